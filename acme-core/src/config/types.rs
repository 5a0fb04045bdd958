//! Configuration type definitions.
//!
//! These types represent the runtime configuration for the ACME server (§6.5,
//! §10.3). They are deliberately flat: a config *language* is out of scope
//! (§1), this is just the set of operational knobs the core reads.

use serde::{Deserialize, Serialize};

/// Root configuration for the ACME server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcmeConfig {
    /// Address to bind the ACME HTTP listener on.
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Which relay mode the server operates in.
    #[serde(default)]
    pub mode: ServerMode,

    /// Minimum accepted RSA key size for account and CSR keys, in bits.
    #[serde(default = "default_rsa_min_keysize")]
    pub rsa_min_keysize: u32,

    /// Terms-of-service URL advertised in `directory.meta`. `None` disables
    /// the terms-of-service-agreed requirement on new-account.
    #[serde(default)]
    pub tos_url: Option<String>,

    /// Allowed `mailto:` contact suffixes. Empty disables the check.
    #[serde(default)]
    pub mail_suffixes: Vec<String>,

    /// CIDR subnets allowed to reach the server. Empty allows all.
    #[serde(default)]
    pub subnets: Vec<String>,

    /// Whether to trust `X-Forwarded-For` for the client IP.
    #[serde(default)]
    pub use_forwarded_header: bool,

    /// CA mode: path to the CA certificate (PEM).
    pub cert: Option<String>,

    /// CA mode: path to the CA private key (PEM).
    pub private_key: Option<String>,

    /// Broker/proxy mode: directory URL of the upstream ACME CA.
    pub upstream_directory_url: Option<String>,

    /// Capacity of the in-process nonce store.
    #[serde(default = "default_nonce_capacity")]
    pub nonce_capacity: usize,

    /// Log level passed to `tracing_subscriber::EnvFilter` if `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Which built-in validator backs the HTTP-01 and DNS-01 challenge
    /// slots (§4.3). `dummy` is for test/staging deployments only.
    #[serde(default)]
    pub validator: ValidatorKind,
}

fn default_bind() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_rsa_min_keysize() -> u32 {
    2048
}

fn default_nonce_capacity() -> usize {
    4096
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for AcmeConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            mode: ServerMode::default(),
            rsa_min_keysize: default_rsa_min_keysize(),
            tos_url: None,
            mail_suffixes: Vec::new(),
            subnets: Vec::new(),
            use_forwarded_header: false,
            cert: None,
            private_key: None,
            upstream_directory_url: None,
            nonce_capacity: default_nonce_capacity(),
            log_level: default_log_level(),
            validator: ValidatorKind::default(),
        }
    }
}

/// Which built-in [`crate::validate::ChallengeValidator`] the server wires
/// up for the HTTP-01/DNS-01 slots (§4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ValidatorKind {
    /// Unconditionally succeeds. Test/staging deployments only.
    #[default]
    Dummy,
    /// Resolves the identifier and checks the requester's source address
    /// against the result, under an out-of-band trust model.
    RequestIpDns,
}

/// Which relay mode the server operates in (§4.6, §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ServerMode {
    /// Standalone CA: signs CSRs with a locally held key and certificate.
    #[default]
    Ca,
    /// Broker: opaque relay, upstream contacted only at finalize time.
    Broker,
    /// Proxy: transparent relay, upstream order created at new-order time.
    Proxy,
}

impl ServerMode {
    pub fn is_relay(self) -> bool {
        matches!(self, ServerMode::Broker | ServerMode::Proxy)
    }
}
