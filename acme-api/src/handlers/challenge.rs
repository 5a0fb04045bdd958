//! `POST /challenge/{id}` (§4.3, §4.4, §6.1 scenario 4): trigger validation
//! and hand the actual check off to a detached background task.

use std::net::IpAddr;

use uuid::Uuid;

use acme_auth::{AuthMode, Authenticator};
use acme_core::error::{AcmeErrorType, Error, Result};
use acme_core::model::ChallengeStatus;
use acme_core::store::{Entity, Session};
use acme_core::validate::ValidationContext;
use acme_core::wire::ChallengeDto;
use hyper::StatusCode;
use time::OffsetDateTime;

use crate::response::{self, Body};
use crate::state::AppState;

pub(crate) fn challenge_url(base_url: &str, id: Uuid) -> String {
    format!("{base_url}/challenge/{id}")
}

pub async fn challenge(
    state: &AppState,
    body: &[u8],
    canonical_url: &str,
    base_url: &str,
    challenge_id: Uuid,
    source_addr: Option<IpAddr>,
) -> Result<hyper::Response<Body>> {
    let mut session = state.store.begin().await.map_err(|e| Error::Store(e.to_string()))?;

    let authenticator = Authenticator::new(
        &state.nonces,
        AppState::accounts_url_prefix(base_url),
        AppState::new_account_url(base_url),
    );
    let authed = authenticator
        .authenticate(body, canonical_url, AuthMode::KidOnly, false, session.as_mut())
        .await?;
    let account = authed
        .account
        .ok_or_else(|| Error::account_does_not_exist("no account with this kid exists"))?;

    let mut challenge = session
        .get_challenge(challenge_id)
        .await
        .map_err(|e| Error::Store(e.to_string()))?
        .ok_or_else(|| Error::acme(AcmeErrorType::Malformed, "no such challenge"))?;

    let authorization = session
        .get_authorization(challenge.authorization_id)
        .await
        .map_err(|e| Error::Store(e.to_string()))?
        .ok_or_else(|| Error::Internal("challenge with no owning authorization".to_string()))?;
    let order = session
        .get_order(authorization.order_id)
        .await
        .map_err(|e| Error::Store(e.to_string()))?
        .ok_or_else(|| Error::Internal("authorization with no owning order".to_string()))?;
    if order.kid != account.kid {
        return Err(Error::unauthorized("challenge does not belong to this account"));
    }

    // §4.4: triggering an already-processing or terminal challenge is a
    // no-op that just returns its current state (idempotent re-POST).
    if challenge.status == ChallengeStatus::Pending {
        challenge.begin_processing()?;
        session.add(Entity::Challenge(challenge.clone()));
        session.commit().await.map_err(|e| Error::Store(e.to_string()))?;

        let identifier = session
            .get_identifier(authorization.identifier_id)
            .await
            .map_err(|e| Error::Store(e.to_string()))?
            .ok_or_else(|| Error::Internal("authorization with no owning identifier".to_string()))?;

        let validators = state.validators.clone();
        let store = state.store.clone();
        let challenge_id = challenge.id;
        let account_key_thumbprint = authed.key_thumbprint;
        let identifier_value = identifier.value.clone();

        tokio::spawn(async move {
            run_validation(
                store,
                validators,
                challenge_id,
                identifier_value,
                account_key_thumbprint,
                source_addr,
            )
            .await;
        });
    }

    Ok(response::json(
        StatusCode::OK,
        &ChallengeDto::from_challenge(&challenge, challenge_url(base_url, challenge.id)),
    ))
}

/// The detached validation task (§4.3, §5): opens its own session, never
/// assumes anything about the entities beyond what it re-reads by id, and
/// is idempotent if re-run against an already-terminal challenge.
async fn run_validation(
    store: std::sync::Arc<dyn acme_core::store::Store>,
    validators: std::sync::Arc<acme_core::validate::ValidatorRegistry>,
    challenge_id: Uuid,
    identifier_value: String,
    account_key_thumbprint: [u8; 32],
    source_addr: Option<IpAddr>,
) {
    let ctx = ValidationContext {
        identifier_value,
        account_key_thumbprint,
        source_addr,
    };

    let mut session = match store.begin().await {
        Ok(s) => s,
        Err(error) => {
            tracing::error!(%error, %challenge_id, "could not open session for challenge validation");
            return;
        }
    };

    let challenge = match session.get_challenge(challenge_id).await {
        Ok(Some(c)) => c,
        Ok(None) => return,
        Err(error) => {
            tracing::error!(%error, %challenge_id, "could not load challenge for validation");
            return;
        }
    };

    let outcome = validators.validate(&challenge, &ctx).await;
    let winning_status = match outcome {
        Ok(()) => ChallengeStatus::Valid,
        Err(error) => {
            tracing::warn!(%error, %challenge_id, "challenge validation failed");
            ChallengeStatus::Invalid
        }
    };

    let mut challenge = challenge;
    if !challenge.finish(winning_status, OffsetDateTime::now_utc()) {
        return;
    }
    session.add(Entity::Challenge(challenge.clone()));

    let mut authorization = match session.get_authorization(challenge.authorization_id).await {
        Ok(Some(a)) => a,
        Ok(None) => {
            tracing::error!(%challenge_id, "challenge with no owning authorization at finalize time");
            return;
        }
        Err(error) => {
            tracing::error!(%error, %challenge_id, "could not load authorization for validation outcome");
            return;
        }
    };

    if let Some(result) = authorization.finalize(challenge.id, winning_status) {
        for id in result.delete_challenge_ids {
            if let Err(error) = session.delete_challenge(id).await {
                tracing::error!(%error, challenge_id = %id, "could not delete sibling challenge");
            }
        }
    }
    session.add(Entity::Authorization(authorization.clone()));

    let mut order = match session.get_order(authorization.order_id).await {
        Ok(Some(o)) => o,
        Ok(None) => {
            tracing::error!(order_id = %authorization.order_id, "authorization with no owning order at finalize time");
            return;
        }
        Err(error) => {
            tracing::error!(%error, "could not load order for validation outcome");
            return;
        }
    };
    let authorizations = match session.get_authorizations_for_order(order.id).await {
        Ok(list) => list,
        Err(error) => {
            tracing::error!(%error, order_id = %order.id, "could not load order's authorizations");
            return;
        }
    };
    order.validate(&authorizations);
    session.add(Entity::Order(order));

    if let Err(error) = session.commit().await {
        tracing::error!(%error, %challenge_id, "could not commit challenge validation outcome");
    }
}
