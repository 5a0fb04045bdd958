//! Shared application state, constructed once at startup and handed to
//! every connection as an `Arc` (§9: "registries are constructed at startup
//! and not mutated").

use std::sync::Arc;

use acme_auth::NonceStore;
use acme_core::config::AcmeConfig;
use acme_core::relay::{OrderFinalizer, RelayNewOrder, RelayRevoke};
use acme_core::store::Store;
use acme_core::validate::ValidatorRegistry;

pub struct AppState {
    pub store: Arc<dyn Store>,
    pub nonces: Arc<NonceStore>,
    pub validators: Arc<ValidatorRegistry>,
    pub finalizer: Arc<dyn OrderFinalizer>,
    /// Proxy mode only: drives upstream challenge completion at new-order
    /// time (§4.6). `None` in CA and broker modes.
    pub relay_new_order: Option<Arc<dyn RelayNewOrder>>,
    /// Relay modes only: relays revocation upstream before the local
    /// certificate is marked REVOKED (§4.6, §4.7). `None` in CA mode.
    pub relay_revoke: Option<Arc<dyn RelayRevoke>>,
    pub config: Arc<AcmeConfig>,
    /// CA mode only: the issuer certificate PEM served at `/ca-chain`.
    pub ca_chain_pem: Option<String>,
}

impl AppState {
    /// `{base_url}/accounts`, used both to build account `Location`
    /// headers and by the authenticator to validate `kid`-mode URLs
    /// (§4.2 step 7).
    pub fn accounts_url_prefix(base_url: &str) -> String {
        format!("{base_url}/accounts")
    }

    pub fn new_account_url(base_url: &str) -> String {
        format!("{base_url}/new-account")
    }
}
