//! Challenge validator registry (§4.3).
//!
//! Validators are a capability interface: `{SUPPORTED_CHALLENGES,
//! validate(...)}`. The registry is built once at startup from the
//! configured set and never mutated afterwards (§9 design notes); a
//! challenge type with no bound validator is a configuration error, not a
//! per-request failure, so `register` rejects a collision eagerly instead of
//! silently letting the last registration win.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::model::{Challenge, ChallengeType};

/// Everything a validator needs about the request that triggered validation
/// and the identifier it is validating, without reaching back into the
/// store itself (validators are pure with respect to persistence; the
/// caller records the outcome).
#[derive(Debug, Clone)]
pub struct ValidationContext {
    pub identifier_value: String,
    pub account_key_thumbprint: [u8; 32],
    /// Client address as resolved per §6.6 (forwarded-header handling).
    pub source_addr: Option<IpAddr>,
}

/// Raised by a validator when validation could not be completed; the
/// caller transitions the challenge to INVALID regardless of which branch
/// (explicit failure or unexpected error) produced this (§4.3).
#[derive(Debug, thiserror::Error)]
#[error("could not validate challenge: {0}")]
pub struct CouldNotValidate(pub String);

#[async_trait]
pub trait ChallengeValidator: Send + Sync {
    /// Challenge types this validator is willing to handle. A validator may
    /// claim more than one type (e.g. the out-of-band IP validator stands in
    /// for both HTTP-01 and DNS-01 slots).
    fn supported_challenges(&self) -> &'static [ChallengeType];

    async fn validate(
        &self,
        challenge: &Challenge,
        ctx: &ValidationContext,
    ) -> std::result::Result<(), CouldNotValidate>;
}

/// Constructed once at startup; dispatches `validate` calls by challenge
/// type (§4.3).
#[derive(Default, Clone)]
pub struct ValidatorRegistry {
    validators: HashMap<ChallengeType, Arc<dyn ChallengeValidator>>,
}

impl ValidatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails if any of the validator's declared challenge types is already
    /// bound (§4.3 contract).
    pub fn register(&mut self, validator: Arc<dyn ChallengeValidator>) -> Result<()> {
        for kind in validator.supported_challenges() {
            if self.validators.contains_key(kind) {
                return Err(Error::Config(format!(
                    "a validator is already registered for {}",
                    kind.as_str()
                )));
            }
        }
        for kind in validator.supported_challenges() {
            self.validators.insert(*kind, validator.clone());
        }
        Ok(())
    }

    /// Absence of a validator for a challenge's type is a configuration
    /// error (500-class), not a client-facing ACME problem (§4.3).
    pub async fn validate(
        &self,
        challenge: &Challenge,
        ctx: &ValidationContext,
    ) -> std::result::Result<(), CouldNotValidate> {
        match self.validators.get(&challenge.kind) {
            Some(validator) => validator.validate(challenge, ctx).await,
            None => Err(CouldNotValidate(format!(
                "no validator registered for challenge type {}",
                challenge.kind.as_str()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysOk;

    #[async_trait]
    impl ChallengeValidator for AlwaysOk {
        fn supported_challenges(&self) -> &'static [ChallengeType] {
            &[ChallengeType::Http01]
        }

        async fn validate(
            &self,
            _challenge: &Challenge,
            _ctx: &ValidationContext,
        ) -> std::result::Result<(), CouldNotValidate> {
            Ok(())
        }
    }

    #[test]
    fn register_rejects_collision() {
        let mut registry = ValidatorRegistry::new();
        registry.register(Arc::new(AlwaysOk)).unwrap();
        assert!(registry.register(Arc::new(AlwaysOk)).is_err());
    }
}
