//! The `RequestIP-DNS` validator (§4.3): resolves the authorization's
//! identifier via A/AAAA lookup and succeeds iff the requester's source
//! address appears in the resolved set. It stands in for both the HTTP-01
//! and DNS-01 slots under an out-of-band trust model - the deployer is
//! attesting that anyone who can make the request from that address already
//! controls the name, so no token/key-authorization exchange is needed.

use std::net::IpAddr;

use acme_core::model::{Challenge, ChallengeType};
use acme_core::validate::{ChallengeValidator, CouldNotValidate, ValidationContext};
use async_trait::async_trait;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;

pub struct RequestIpDnsValidator {
    resolver: TokioAsyncResolver,
}

impl RequestIpDnsValidator {
    pub fn new() -> Self {
        Self {
            resolver: TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default()),
        }
    }
}

impl Default for RequestIpDnsValidator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChallengeValidator for RequestIpDnsValidator {
    fn supported_challenges(&self) -> &'static [ChallengeType] {
        &[ChallengeType::Http01, ChallengeType::Dns01]
    }

    async fn validate(
        &self,
        _challenge: &Challenge,
        ctx: &ValidationContext,
    ) -> Result<(), CouldNotValidate> {
        let source = ctx
            .source_addr
            .ok_or_else(|| CouldNotValidate("no source address available for this request".to_string()))?;

        // A failed resolution is treated as "no addresses" (§5 cancellation
        // & timeouts), which simply fails validation rather than erroring.
        let resolved: Vec<IpAddr> = self
            .resolver
            .lookup_ip(ctx.identifier_value.as_str())
            .await
            .map(|lookup| lookup.iter().collect())
            .unwrap_or_default();

        if resolved.contains(&source) {
            Ok(())
        } else {
            Err(CouldNotValidate(format!(
                "source address {source} not found among resolved addresses for {}",
                ctx.identifier_value
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fails_without_a_source_address() {
        let validator = RequestIpDnsValidator::new();
        let challenge = Challenge {
            id: uuid::Uuid::nil(),
            authorization_id: uuid::Uuid::nil(),
            kind: ChallengeType::Http01,
            status: acme_core::model::ChallengeStatus::Processing,
            token: "token".to_string(),
            validated: None,
        };
        let ctx = ValidationContext {
            identifier_value: "example.test".to_string(),
            account_key_thumbprint: [0u8; 32],
            source_addr: None,
        };
        assert!(validator.validate(&challenge, &ctx).await.is_err());
    }
}
