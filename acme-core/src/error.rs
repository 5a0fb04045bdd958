//! Error types for the ACME core.
//!
//! [`Error`] is the single fallible-operation type returned throughout the
//! crate. The HTTP layer (in `acme-api`) is the only place that maps it to a
//! status code and an `application/problem+json` body, so that mapping stays
//! exhaustive and centrally testable (§7 of the spec this crate implements).

use thiserror::Error;

/// Result type for ACME core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The ACME problem-document error codes this server can produce.
///
/// See RFC 8555 §6.7. Variants map 1:1 onto `urn:ietf:params:acme:error:*`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcmeErrorType {
    Malformed,
    Unauthorized,
    BadNonce,
    BadSignatureAlgorithm,
    BadPublicKey,
    BadCsr,
    BadRevocationReason,
    AccountDoesNotExist,
    TermsOfServiceNotAgreed,
    InvalidContact,
    OrderNotReady,
    OrderInvalid,
    AlreadyRevoked,
    UnsupportedOperation,
    RateLimited,
    ServerInternal,
}

impl AcmeErrorType {
    /// The `urn:ietf:params:acme:error:*` identifier for this error type.
    pub fn urn(self) -> &'static str {
        match self {
            Self::Malformed => "urn:ietf:params:acme:error:malformed",
            Self::Unauthorized => "urn:ietf:params:acme:error:unauthorized",
            Self::BadNonce => "urn:ietf:params:acme:error:badNonce",
            Self::BadSignatureAlgorithm => "urn:ietf:params:acme:error:badSignatureAlgorithm",
            Self::BadPublicKey => "urn:ietf:params:acme:error:badPublicKey",
            Self::BadCsr => "urn:ietf:params:acme:error:badCSR",
            Self::BadRevocationReason => "urn:ietf:params:acme:error:badRevocationReason",
            Self::AccountDoesNotExist => "urn:ietf:params:acme:error:accountDoesNotExist",
            Self::TermsOfServiceNotAgreed => {
                "urn:ietf:params:acme:error:termsOfServiceNotAgreed"
            }
            Self::InvalidContact => "urn:ietf:params:acme:error:invalidContact",
            Self::OrderNotReady => "urn:ietf:params:acme:error:orderNotReady",
            Self::OrderInvalid => "urn:ietf:params:acme:error:orderInvalid",
            Self::AlreadyRevoked => "urn:ietf:params:acme:error:alreadyRevoked",
            Self::UnsupportedOperation => "urn:ietf:params:acme:error:unsupportedOperation",
            Self::RateLimited => "urn:ietf:params:acme:error:rateLimited",
            Self::ServerInternal => "urn:ietf:params:acme:error:serverInternal",
        }
    }

    /// The HTTP status this error type is reported under.
    pub fn http_status(self) -> u16 {
        match self {
            Self::Unauthorized => 403,
            Self::AccountDoesNotExist => 404,
            Self::ServerInternal => 500,
            _ => 400,
        }
    }
}

/// Main error type for ACME core operations.
#[derive(Error, Debug)]
pub enum Error {
    /// An ACME problem-kind error, to be rendered as a problem document.
    #[error("acme error {kind:?}: {detail}")]
    Acme { kind: AcmeErrorType, detail: String },

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Store/persistence failure. Never exposed verbatim to clients.
    #[error("store error: {0}")]
    Store(String),

    /// Programmer/invariant error. Never exposed verbatim to clients.
    #[error("internal error: {0}")]
    Internal(String),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn acme(kind: AcmeErrorType, detail: impl Into<String>) -> Self {
        Error::Acme {
            kind,
            detail: detail.into(),
        }
    }

    pub fn malformed(detail: impl Into<String>) -> Self {
        Self::acme(AcmeErrorType::Malformed, detail)
    }

    pub fn unauthorized(detail: impl Into<String>) -> Self {
        Self::acme(AcmeErrorType::Unauthorized, detail)
    }

    pub fn bad_nonce(detail: impl Into<String>) -> Self {
        Self::acme(AcmeErrorType::BadNonce, detail)
    }

    pub fn account_does_not_exist(detail: impl Into<String>) -> Self {
        Self::acme(AcmeErrorType::AccountDoesNotExist, detail)
    }

    pub fn order_not_ready(detail: impl Into<String>) -> Self {
        Self::acme(AcmeErrorType::OrderNotReady, detail)
    }

    pub fn order_invalid(detail: impl Into<String>) -> Self {
        Self::acme(AcmeErrorType::OrderInvalid, detail)
    }

    pub fn bad_csr(detail: impl Into<String>) -> Self {
        Self::acme(AcmeErrorType::BadCsr, detail)
    }

    /// The ACME error type, if this is a protocol-level error rather than an
    /// internal/store failure.
    pub fn acme_type(&self) -> AcmeErrorType {
        match self {
            Error::Acme { kind, .. } => *kind,
            Error::Config(_) | Error::Store(_) | Error::Internal(_) | Error::Io(_) => {
                AcmeErrorType::ServerInternal
            }
        }
    }

    /// Whether this error is safe to describe to the client verbatim.
    pub fn is_client_facing(&self) -> bool {
        matches!(self, Error::Acme { .. })
    }
}
