//! Signer capability and upstream relay adapters for the acme-core ACME
//! server (§4.5, §4.6, §9).
//!
//! Three `OrderFinalizer` implementations, one per server mode: standalone
//! CA signs locally ([`ca::CaFinalizer`]), broker and proxy orchestrate an
//! upstream `instant-acme` client ([`broker::BrokerFinalizer`],
//! [`proxy::ProxyRelay`]). Proxy additionally implements `RelayNewOrder`
//! since it contacts upstream at new-order time rather than at finalize.

pub mod broker;
pub mod ca;
pub mod client;
pub mod proxy;

pub use broker::{BrokerFinalizer, RelayRevoker};
pub use ca::{CaFinalizer, RcgenCaSigner};
pub use client::InstantAcmeClient;
pub use proxy::ProxyRelay;

/// Decode the first `-----BEGIN CERTIFICATE-----` block in a PEM chain to
/// DER. Upstream (`instant-acme`) only ever hands back PEM; the store's
/// `find_certificate_by_der` (used by revoke-cert, §4.7) needs the DER form
/// to be populated on the `Certificate` row, the same as standalone-CA mode
/// already does.
pub(crate) fn leaf_der_from_pem(pem_chain: &str) -> acme_core::error::Result<Vec<u8>> {
    let begin = "-----BEGIN CERTIFICATE-----";
    let end = "-----END CERTIFICATE-----";
    let start = pem_chain
        .find(begin)
        .ok_or_else(|| acme_core::error::Error::Internal("upstream chain has no PEM certificate block".to_string()))?
        + begin.len();
    let stop = pem_chain[start..]
        .find(end)
        .ok_or_else(|| acme_core::error::Error::Internal("upstream chain has an unterminated PEM block".to_string()))?
        + start;
    let body: String = pem_chain[start..stop].chars().filter(|c| !c.is_whitespace()).collect();
    base64::Engine::decode(&base64::engine::general_purpose::STANDARD, body)
        .map_err(|e| acme_core::error::Error::Internal(format!("upstream leaf certificate is not valid base64: {e}")))
}
