//! `GET /directory` and `HEAD|GET /new-nonce` (§6.1 scenario 1).

use acme_core::wire::{DirectoryDto, DirectoryMetaDto};
use hyper::StatusCode;

use crate::response::{self, Body};
use crate::state::AppState;

/// `HEAD|GET /new-nonce`: a 204 whose only job is to carry a fresh
/// `Replay-Nonce` through [`response::finish`].
pub fn new_nonce() -> hyper::Response<Body> {
    response::empty(StatusCode::NO_CONTENT)
}

pub fn directory(state: &AppState, base_url: &str) -> DirectoryDto {
    DirectoryDto {
        new_nonce: format!("{base_url}/new-nonce"),
        new_account: format!("{base_url}/new-account"),
        new_order: format!("{base_url}/new-order"),
        revoke_cert: format!("{base_url}/revoke-cert"),
        key_change: format!("{base_url}/key-change"),
        meta: DirectoryMetaDto {
            terms_of_service: state.config.tos_url.clone(),
        },
    }
}
