//! `POST /certificate/{id}` and `GET|POST /ca-chain` (§6.1 scenario 4).

use uuid::Uuid;

use acme_auth::{AuthMode, Authenticator};
use acme_core::error::{AcmeErrorType, Error, Result};
use acme_core::store::Session;
use hyper::StatusCode;

use crate::response::Body;
use crate::state::AppState;

pub async fn certificate(
    state: &AppState,
    body: &[u8],
    canonical_url: &str,
    base_url: &str,
    certificate_id: Uuid,
) -> Result<hyper::Response<Body>> {
    let mut session = state.store.begin().await.map_err(|e| Error::Store(e.to_string()))?;

    let authenticator = Authenticator::new(
        &state.nonces,
        AppState::accounts_url_prefix(base_url),
        AppState::new_account_url(base_url),
    );
    let authed = authenticator
        .authenticate(body, canonical_url, AuthMode::KidOnly, true, session.as_mut())
        .await?;
    let account = authed
        .account
        .ok_or_else(|| Error::account_does_not_exist("no account with this kid exists"))?;

    let certificate = session
        .get_certificate(certificate_id)
        .await
        .map_err(|e| Error::Store(e.to_string()))?
        .ok_or_else(|| Error::acme(AcmeErrorType::Malformed, "no such certificate"))?;

    let order = session
        .get_order(certificate.order_id)
        .await
        .map_err(|e| Error::Store(e.to_string()))?
        .ok_or_else(|| Error::Internal("certificate with no owning order".to_string()))?;
    if order.kid != account.kid {
        return Err(Error::unauthorized("certificate does not belong to this account"));
    }

    Ok(hyper::Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "application/pem-certificate-chain")
        .body(Body::new(bytes::Bytes::from(certificate.full_chain.into_bytes())))
        .expect("building a response from a fixed header set cannot fail"))
}

/// `GET|POST /ca-chain` (CA mode only): the issuer certificate, unauthenticated.
pub async fn ca_chain(state: &AppState) -> Result<hyper::Response<Body>> {
    let pem = state
        .ca_chain_pem
        .clone()
        .ok_or_else(|| Error::acme(AcmeErrorType::UnsupportedOperation, "this server is not running in CA mode"))?;

    Ok(hyper::Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "application/pem-certificate-chain")
        .body(Body::new(bytes::Bytes::from(pem.into_bytes())))
        .expect("building a response from a fixed header set cannot fail"))
}
