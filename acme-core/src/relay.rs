//! Capability interfaces for certificate signing and upstream relaying
//! (§4.5, §4.6, §6.4, §9). The core depends only on these traits; the
//! concrete standalone-CA signer, the `instant-acme`-backed upstream client,
//! and the broker/proxy orchestrations that implement them live in
//! downstream crates so this crate stays free of crypto and network I/O.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;

/// A signed leaf certificate plus the chain a client should be handed.
pub struct SignedCertificate {
    pub der: Vec<u8>,
    pub pem: String,
    pub full_chain: String,
}

/// Drives one order from PROCESSING to a terminal status (§4.5). Invoked as
/// a detached background task after the finalize handler returns; it opens
/// its own session and must not assume anything about entities beyond what
/// it re-reads by id (§5).
#[async_trait]
pub trait OrderFinalizer: Send + Sync {
    async fn handle_order_finalize(&self, kid: &str, order_id: Uuid) -> Result<()>;
}

/// An upstream ACME identifier, mirroring `instant-acme`'s own type closely
/// enough that the wrapper in the relay crate is a thin adapter (§6.4).
#[derive(Debug, Clone)]
pub struct UpstreamIdentifier {
    pub kind: crate::model::IdentifierType,
    pub value: String,
}

/// Internal ACME client contract consumed by relay modes (§6.4). The
/// reference implementation wraps `instant-acme`.
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    async fn order_create(&self, identifiers: &[UpstreamIdentifier]) -> Result<String>;
    async fn order_get(&self, url: &str) -> Result<UpstreamOrderState>;
    /// Drives all of an upstream order's authorizations to completion.
    /// Raised failures are upstream challenge errors, which broker mode
    /// swallows (opaque to the end user) and proxy mode surfaces.
    async fn authorizations_complete(&self, url: &str) -> Result<()>;
    async fn order_finalize(&self, url: &str, csr_der: &[u8]) -> Result<()>;
    async fn certificate_get(&self, url: &str) -> Result<String>;
    async fn certificate_revoke(&self, cert_der: &[u8], reason: u8) -> Result<bool>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamOrderState {
    Pending,
    Ready,
    Processing,
    Valid,
    Invalid,
}

/// Proxy mode's new-order-time upstream orchestration (§4.6): create the
/// upstream order immediately and drive its challenges in the background,
/// independent of finalize.
#[async_trait]
pub trait RelayNewOrder: Send + Sync {
    async fn on_new_order(&self, kid: &str, order_id: Uuid) -> Result<()>;
}

/// Revocation relaying (§4.6, §4.7): both modes must see upstream accept the
/// revocation before the local certificate is marked REVOKED.
#[async_trait]
pub trait RelayRevoke: Send + Sync {
    async fn revoke_upstream(&self, cert_der: &[u8], reason: u8) -> Result<bool>;
}
