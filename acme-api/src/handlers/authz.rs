//! `POST /authz/{id}` (§4.4 Authorization, §6.1 scenario 4): read or, when
//! the payload asks for it, deactivate.

use serde::Deserialize;
use uuid::Uuid;

use acme_auth::{AuthMode, Authenticator};
use acme_core::error::{AcmeErrorType, Error, Result};
use acme_core::model::AuthorizationStatus;
use acme_core::store::{Entity, Session};
use acme_core::wire::{AuthorizationDto, ChallengeDto, IdentifierDto};
use hyper::StatusCode;

use crate::response::{self, Body};
use crate::state::AppState;

#[derive(Debug, Deserialize, Default)]
struct AuthzUpdatePayload {
    #[serde(default)]
    status: Option<AuthorizationStatus>,
}

pub async fn authz(
    state: &AppState,
    body: &[u8],
    canonical_url: &str,
    base_url: &str,
    authz_id: Uuid,
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

    let mut authorization = session
        .get_authorization(authz_id)
        .await
        .map_err(|e| Error::Store(e.to_string()))?
        .ok_or_else(|| Error::acme(AcmeErrorType::Malformed, "no such authorization"))?;

    let order = session
        .get_order(authorization.order_id)
        .await
        .map_err(|e| Error::Store(e.to_string()))?
        .ok_or_else(|| Error::Internal("authorization with no owning order".to_string()))?;
    if order.kid != account.kid {
        return Err(Error::unauthorized("authorization does not belong to this account"));
    }

    if !authed.payload.is_empty() {
        let update: AuthzUpdatePayload = serde_json::from_slice(&authed.payload)
            .map_err(|e| Error::malformed(format!("invalid authorization-update payload: {e}")))?;
        if let Some(AuthorizationStatus::Deactivated) = update.status {
            authorization.deactivate()?;
            session.add(Entity::Authorization(authorization.clone()));
            session.commit().await.map_err(|e| Error::Store(e.to_string()))?;
        }
    }

    let identifier = session
        .get_identifier(authorization.identifier_id)
        .await
        .map_err(|e| Error::Store(e.to_string()))?
        .ok_or_else(|| Error::Internal("authorization with no owning identifier".to_string()))?;
    let challenges = session
        .get_challenges_for_authorization(authorization.id)
        .await
        .map_err(|e| Error::Store(e.to_string()))?;

    let mut challenge_dtos: Vec<ChallengeDto> = challenges
        .iter()
        .map(|c| ChallengeDto::from_challenge(c, super::challenge::challenge_url(base_url, c.id)))
        .collect();
    challenge_dtos.sort_by(|a, b| a.url.cmp(&b.url));

    let dto = AuthorizationDto {
        identifier: IdentifierDto::from(&identifier),
        status: authorization.status,
        expires: authorization.expires,
        challenges: challenge_dtos,
        wildcard: authorization.wildcard,
    };

    Ok(response::json(StatusCode::OK, &dto))
}
