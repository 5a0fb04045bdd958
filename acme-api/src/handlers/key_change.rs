//! `POST /key-change` (§9 Open Question: resolved as "not implemented" —
//! the endpoint authenticates the request like any other kid-mode handler,
//! then reports the operation unsupported rather than silently succeeding
//! or returning a misleading 404).

use acme_auth::{AuthMode, Authenticator};
use acme_core::error::{AcmeErrorType, Error, Result};

use crate::response::Body;
use crate::state::AppState;

pub async fn key_change(
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
    authenticator
        .authenticate(body, canonical_url, AuthMode::KidOnly, false, session.as_mut())
        .await?;

    Err(Error::acme(
        AcmeErrorType::UnsupportedOperation,
        "key rollover is not supported by this server",
    ))
}
