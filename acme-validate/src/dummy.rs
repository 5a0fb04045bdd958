//! The `Dummy` validator (§4.3): unconditionally succeeds. For test
//! contexts only - wiring it into a production configuration defeats the
//! entire point of domain control validation, but the core has no opinion
//! about that; it's the deployer's job to not do it.

use acme_core::model::{Challenge, ChallengeType};
use acme_core::validate::{ChallengeValidator, CouldNotValidate, ValidationContext};
use async_trait::async_trait;

pub struct DummyValidator;

#[async_trait]
impl ChallengeValidator for DummyValidator {
    fn supported_challenges(&self) -> &'static [ChallengeType] {
        &[ChallengeType::Http01, ChallengeType::Dns01]
    }

    async fn validate(
        &self,
        _challenge: &Challenge,
        _ctx: &ValidationContext,
    ) -> Result<(), CouldNotValidate> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn always_succeeds() {
        let validator = DummyValidator;
        let challenge = Challenge {
            id: Uuid::nil(),
            authorization_id: Uuid::nil(),
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
        assert!(validator.validate(&challenge, &ctx).await.is_ok());
    }
}
