//! `POST /new-order`, `/order/{id}`, `/order/{id}/finalize` and
//! `/orders/{id}` (§4.4, §4.5, §6.1 scenarios 2/4).

use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use acme_auth::{AuthMode, Authenticator};
use acme_core::error::{AcmeErrorType, Error, Result};
use acme_core::finalize::{check_csr_against_order, parse_csr};
use acme_core::model::{Authorization, AuthorizationStatus, Challenge, ChallengeStatus, ChallengeType, Identifier, IdentifierType, Order, OrderStatus};
use acme_core::store::{Entity, Session};
use acme_core::wire::{FinalizePayload, IdentifierDto, NewOrderPayload, OrderDto, OrdersListDto};
use base64::Engine;
use hyper::StatusCode;

use crate::response::{self, Body};
use crate::state::AppState;

/// Authorizations and challenges live for as long as the order they belong
/// to; both use the same clock-driven TTL (§4.4 has no distinct authz TTL).
const ORDER_TTL: Duration = Duration::hours(24);

fn order_url(base_url: &str, id: Uuid) -> String {
    format!("{base_url}/order/{id}")
}

fn finalize_url(base_url: &str, id: Uuid) -> String {
    format!("{base_url}/order/{id}/finalize")
}

fn authz_url(base_url: &str, id: Uuid) -> String {
    format!("{base_url}/authz/{id}")
}

fn challenge_url(base_url: &str, id: Uuid) -> String {
    format!("{base_url}/challenge/{id}")
}

fn certificate_url(base_url: &str, id: Uuid) -> String {
    format!("{base_url}/certificate/{id}")
}

fn random_token() -> String {
    let mut bytes = [0u8; 20];
    ring::rand::SecureRandom::fill(&ring::rand::SystemRandom::new(), &mut bytes)
        .expect("system RNG must be available");
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

async fn authenticate_kid(
    state: &AppState,
    body: &[u8],
    canonical_url: &str,
    base_url: &str,
    post_as_get: bool,
    session: &mut dyn Session,
) -> Result<acme_auth::Authenticated> {
    let authenticator = Authenticator::new(
        &state.nonces,
        AppState::accounts_url_prefix(base_url),
        AppState::new_account_url(base_url),
    );
    authenticator
        .authenticate(body, canonical_url, AuthMode::KidOnly, post_as_get, session)
        .await
}

async fn build_order_dto(
    session: &mut dyn Session,
    order: &Order,
    base_url: &str,
) -> Result<OrderDto> {
    let identifiers = session.get_identifiers_for_order(order.id).await.map_err(|e| Error::Store(e.to_string()))?;
    let authorizations = session.get_authorizations_for_order(order.id).await.map_err(|e| Error::Store(e.to_string()))?;

    let identifier_dtos: Vec<IdentifierDto> = identifiers.iter().map(IdentifierDto::from).collect();
    let mut authz_urls: Vec<String> = authorizations.iter().map(|a| authz_url(base_url, a.id)).collect();
    authz_urls.sort();

    Ok(OrderDto::new(
        order,
        identifier_dtos,
        authz_urls,
        finalize_url(base_url, order.id),
        order.certificate_id.map(|id| certificate_url(base_url, id)),
    ))
}

/// `POST /new-order` (§4.4 "new-order creates..."): mints the order, one
/// authorization per identifier, and a single challenge per authorization
/// (HTTP-01, or DNS-01 for a wildcard identifier — §8 scenario 4).
pub async fn new_order(
    state: &AppState,
    body: &[u8],
    canonical_url: &str,
    base_url: &str,
) -> Result<hyper::Response<Body>> {
    let mut session = state.store.begin().await.map_err(|e| Error::Store(e.to_string()))?;
    let authed = authenticate_kid(state, body, canonical_url, base_url, false, session.as_mut()).await?;
    let account = authed
        .account
        .ok_or_else(|| Error::account_does_not_exist("no account with this kid exists"))?;

    let payload: NewOrderPayload = serde_json::from_slice(&authed.payload)
        .map_err(|e| Error::malformed(format!("invalid new-order payload: {e}")))?;

    if payload.identifiers.is_empty() {
        return Err(Error::malformed("an order must name at least one identifier"));
    }

    let now = OffsetDateTime::now_utc();
    let order = Order {
        id: Uuid::new_v4(),
        kid: account.kid.clone(),
        status: OrderStatus::Pending,
        expires: now + ORDER_TTL,
        not_before: None,
        not_after: None,
        identifier_ids: Vec::new(),
        csr: None,
        certificate_id: None,
        proxied_url: None,
    };
    let mut order = order;

    for dto in &payload.identifiers {
        if !dto.kind.eq_ignore_ascii_case("dns") {
            return Err(Error::malformed(format!("unsupported identifier type {}", dto.kind)));
        }

        let identifier_id = session.next_identifier_id().await.map_err(|e| Error::Store(e.to_string()))?;
        let authorization_id = Uuid::new_v4();
        let wildcard = dto.value.starts_with("*.");

        let identifier = Identifier {
            id: identifier_id,
            order_id: order.id,
            kind: IdentifierType::Dns,
            value: dto.value.clone(),
            authorization_id,
        };

        // §8 scenario 4: a non-wildcard authorization offers one HTTP-01
        // challenge. Wildcards are excluded from HTTP-01 per RFC 8555 and so
        // get DNS-01 instead; either way, exactly one challenge per
        // authorization, not one of each.
        let challenge_kind = if wildcard { ChallengeType::Dns01 } else { ChallengeType::Http01 };
        let challenge = Challenge {
            id: Uuid::new_v4(),
            authorization_id,
            kind: challenge_kind,
            status: ChallengeStatus::Pending,
            token: random_token(),
            validated: None,
        };

        let authorization = Authorization {
            id: authorization_id,
            order_id: order.id,
            identifier_id,
            status: AuthorizationStatus::Pending,
            expires: now + ORDER_TTL,
            wildcard,
            challenge_ids: vec![challenge.id],
        };

        order.identifier_ids.push(identifier_id);
        session.add(Entity::Identifier(identifier));
        session.add(Entity::Authorization(authorization));
        session.add(Entity::Challenge(challenge));
    }

    session.add(Entity::Order(order.clone()));
    session.commit().await.map_err(|e| Error::Store(e.to_string()))?;

    // Proxy mode creates the upstream order eagerly, in the background, so
    // the handler's own latency doesn't depend on the upstream CA (§4.6).
    if let Some(relay) = state.relay_new_order.clone() {
        let kid = order.kid.clone();
        let order_id = order.id;
        tokio::spawn(async move {
            if let Err(error) = relay.on_new_order(&kid, order_id).await {
                tracing::error!(%error, %order_id, "proxy new-order relay failed");
            }
        });
    }

    let mut session2 = state.store.begin().await.map_err(|e| Error::Store(e.to_string()))?;
    let dto = build_order_dto(session2.as_mut(), &order, base_url).await?;

    let mut response = response::json(StatusCode::CREATED, &dto);
    response.headers_mut().insert(
        "location",
        order_url(base_url, order.id)
            .parse()
            .expect("order id is a UUID"),
    );
    Ok(response)
}

/// `POST /order/{id}` (POST-as-GET).
pub async fn get_order(
    state: &AppState,
    body: &[u8],
    canonical_url: &str,
    base_url: &str,
    order_id: Uuid,
) -> Result<hyper::Response<Body>> {
    let mut session = state.store.begin().await.map_err(|e| Error::Store(e.to_string()))?;
    let authed = authenticate_kid(state, body, canonical_url, base_url, true, session.as_mut()).await?;
    let account = authed
        .account
        .ok_or_else(|| Error::account_does_not_exist("no account with this kid exists"))?;

    let mut order = session
        .get_order(order_id)
        .await
        .map_err(|e| Error::Store(e.to_string()))?
        .ok_or_else(|| Error::acme(AcmeErrorType::Malformed, "no such order"))?;

    if order.kid != account.kid {
        return Err(Error::unauthorized("order does not belong to this account"));
    }

    let authorizations = session
        .get_authorizations_for_order(order.id)
        .await
        .map_err(|e| Error::Store(e.to_string()))?;
    order.validate(&authorizations);
    session.add(Entity::Order(order.clone()));
    session.commit().await.map_err(|e| Error::Store(e.to_string()))?;

    let mut session2 = state.store.begin().await.map_err(|e| Error::Store(e.to_string()))?;
    let dto = build_order_dto(session2.as_mut(), &order, base_url).await?;
    Ok(response::json(StatusCode::OK, &dto))
}

/// `POST /orders/{kid}`: every order belonging to the account named by the
/// path segment (§6.1 "orders list... paged" — pagination itself is not
/// implemented, the full set is returned in one page).
pub async fn orders_list(
    state: &AppState,
    body: &[u8],
    canonical_url: &str,
    base_url: &str,
    path_kid: &str,
) -> Result<hyper::Response<Body>> {
    let mut session = state.store.begin().await.map_err(|e| Error::Store(e.to_string()))?;
    let authed = authenticate_kid(state, body, canonical_url, base_url, true, session.as_mut()).await?;
    let account = authed
        .account
        .ok_or_else(|| Error::account_does_not_exist("no account with this kid exists"))?;

    if account.kid != path_kid {
        return Err(Error::unauthorized("cannot list another account's orders"));
    }

    let orders = session
        .get_orders_for_account(&account.kid)
        .await
        .map_err(|e| Error::Store(e.to_string()))?;

    let dto = OrdersListDto {
        orders: orders.iter().map(|o| order_url(base_url, o.id)).collect(),
    };
    Ok(response::json(StatusCode::OK, &dto))
}

/// `POST /order/{id}/finalize` (§4.5 steps 1-4): validate the CSR against
/// the order synchronously, then hand off to the configured finalizer in
/// the background.
pub async fn finalize(
    state: &AppState,
    body: &[u8],
    canonical_url: &str,
    base_url: &str,
    order_id: Uuid,
) -> Result<hyper::Response<Body>> {
    let mut session = state.store.begin().await.map_err(|e| Error::Store(e.to_string()))?;
    let authed = authenticate_kid(state, body, canonical_url, base_url, false, session.as_mut()).await?;
    let account = authed
        .account
        .ok_or_else(|| Error::account_does_not_exist("no account with this kid exists"))?;

    let mut order = session
        .get_order(order_id)
        .await
        .map_err(|e| Error::Store(e.to_string()))?
        .ok_or_else(|| Error::acme(AcmeErrorType::Malformed, "no such order"))?;

    if order.kid != account.kid {
        return Err(Error::unauthorized("order does not belong to this account"));
    }

    // §4.5 steps 1-2: recompute the order's status before judging it, then
    // distinguish "already failed" from "not ready yet".
    let authorizations_for_validate = session
        .get_authorizations_for_order(order.id)
        .await
        .map_err(|e| Error::Store(e.to_string()))?;
    order.validate(&authorizations_for_validate);
    if order.status == OrderStatus::Invalid {
        return Err(Error::order_invalid("order has already failed"));
    }
    if order.status != OrderStatus::Ready {
        return Err(Error::order_not_ready("order is not ready for finalization"));
    }

    let payload: FinalizePayload = serde_json::from_slice(&authed.payload)
        .map_err(|e| Error::malformed(format!("invalid finalize payload: {e}")))?;
    let csr_der = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(&payload.csr)
        .map_err(|e| Error::bad_csr(format!("invalid CSR encoding: {e}")))?;

    let csr_info = parse_csr(&csr_der)?;
    let identifiers = session
        .get_identifiers_for_order(order.id)
        .await
        .map_err(|e| Error::Store(e.to_string()))?;
    check_csr_against_order(&csr_info, &identifiers, state.config.rsa_min_keysize)?;

    order.begin_finalize(csr_der)?;
    session.add(Entity::Order(order.clone()));
    session.commit().await.map_err(|e| Error::Store(e.to_string()))?;

    let finalizer = state.finalizer.clone();
    let kid = order.kid.clone();
    tokio::spawn(async move {
        if let Err(error) = finalizer.handle_order_finalize(&kid, order_id).await {
            tracing::error!(%error, %order_id, "order finalization failed");
        }
    });

    let mut session2 = state.store.begin().await.map_err(|e| Error::Store(e.to_string()))?;
    let dto = build_order_dto(session2.as_mut(), &order, base_url).await?;
    Ok(response::json(StatusCode::OK, &dto))
}
