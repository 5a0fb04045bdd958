//! Data model, state machines, storage contract and capability traits shared
//! by every ACME server component.
//!
//! This crate owns no I/O of its own: the HTTP surface lives in `acme-api`,
//! JWS/nonce verification in `acme-auth`, challenge validation in
//! `acme-validate`, and upstream/CA signing in `acme-relay`. What's here is
//! the vocabulary those crates share.

pub mod config;
pub mod error;
pub mod finalize;
pub mod model;
pub mod relay;
pub mod store;
pub mod validate;
pub mod wire;

pub use error::{Error, Result};

/// Crate version, exposed for the `User-Agent`/diagnostics surface.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
