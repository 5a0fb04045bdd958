//! Nonce replay protection and JWS request authentication for the ACME
//! server core (§4.1, §4.2).

pub mod authenticator;
pub mod jws;
pub mod nonce;

pub use authenticator::{AuthMode, Authenticated, Authenticator};
pub use nonce::NonceStore;
