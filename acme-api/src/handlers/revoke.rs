//! `POST /revoke-cert` (§4.7): accepts either a `kid`-signed request from an
//! account that held authorizations for the certificate's identifiers, or a
//! `jwk`-signed request whose embedded key matches the certificate's own.

use acme_auth::{AuthMode, Authenticator};
use acme_core::error::{AcmeErrorType, Error, Result};
use acme_core::finalize::certificate_key_matches;
use acme_core::model::{AuthorizationStatus, Certificate};
use acme_core::store::{Entity, Session};
use acme_core::wire::RevokeCertPayload;
use base64::Engine;
use hyper::StatusCode;

use crate::response::{self, Body};
use crate::state::AppState;

pub async fn revoke_cert(
    state: &AppState,
    body: &[u8],
    canonical_url: &str,
    base_url: &str,
) -> Result<hyper::Response<Body>> {
    let mut session = state.store.begin().await.map_err(|e| Error::Store(e.to_string()))?;

    let authenticator = Authenticator::new(
        &state.nonces,
        AppState::accounts_url_prefix(base_url),
        AppState::new_account_url(base_url),
    );
    let authed = authenticator
        .authenticate(body, canonical_url, AuthMode::Either, false, session.as_mut())
        .await?;

    let payload: RevokeCertPayload = serde_json::from_slice(&authed.payload)
        .map_err(|e| Error::malformed(format!("invalid revoke-cert payload: {e}")))?;
    let cert_der = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(&payload.certificate)
        .map_err(|e| Error::malformed(format!("invalid certificate encoding: {e}")))?;

    if !Certificate::ALLOWED_REASONS.contains(&payload.reason) {
        return Err(Error::acme(
            AcmeErrorType::BadRevocationReason,
            "revocation reason is not in the allowed set",
        ));
    }

    let mut certificate = session
        .find_certificate_by_der(&cert_der)
        .await
        .map_err(|e| Error::Store(e.to_string()))?
        .ok_or_else(|| Error::acme(AcmeErrorType::Malformed, "no such certificate"))?;

    let authorized = match &authed.account {
        Some(account) => account_held_authorizations(&mut *session, &certificate, &account.kid).await?,
        None => false,
    };
    let authorized = authorized
        || authed
            .jwk
            .as_ref()
            .map(|jwk| certificate_key_matches(&certificate.der, jwk))
            .transpose()?
            .unwrap_or(false);

    if !authorized {
        return Err(Error::unauthorized(
            "neither an authorized account nor the certificate's own key signed this request",
        ));
    }

    // §4.6: both relay modes must see upstream accept the revocation before
    // the local certificate is marked REVOKED.
    if let Some(relay) = &state.relay_revoke {
        let accepted = relay
            .revoke_upstream(&certificate.der, payload.reason)
            .await?;
        if !accepted {
            return Err(Error::unauthorized("upstream refused to revoke this certificate"));
        }
    }

    certificate.revoke(payload.reason)?;
    session.add(Entity::Certificate(certificate));
    session.commit().await.map_err(|e| Error::Store(e.to_string()))?;

    Ok(response::empty(StatusCode::OK))
}

/// Whether `kid` held a VALID authorization, at some point, for every
/// identifier the certificate's own order named — the in-memory store's
/// stand-in for "cross-referencing historical valid authorizations against
/// the certificate's SANs + CN" (§4.7).
async fn account_held_authorizations(
    session: &mut dyn acme_core::store::Session,
    certificate: &Certificate,
    kid: &str,
) -> Result<bool> {
    let order = session
        .get_order(certificate.order_id)
        .await
        .map_err(|e| Error::Store(e.to_string()))?;
    let order = match order {
        Some(o) => o,
        None => return Ok(false),
    };
    if order.kid != kid {
        return Ok(false);
    }

    let authorizations = session
        .get_authorizations_for_order(order.id)
        .await
        .map_err(|e| Error::Store(e.to_string()))?;
    Ok(!authorizations.is_empty()
        && authorizations
            .iter()
            .all(|a| a.status == AuthorizationStatus::Valid))
}
