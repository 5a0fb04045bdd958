//! Persistent entities and their state machines (§3, §4.4).
//!
//! Entities reference each other by id, never by embedded back-pointer: the
//! store is the only place that resolves an id to a live value, and it always
//! does so with a fresh read. `validate`/`finalize` methods here are pure
//! transition functions; they take the entities they need as arguments and
//! return what changed, so the caller decides how (and whether) to persist
//! the result.

use ring::digest;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Minimal JSON Web Key: enough of RFC 7517/7518 to carry an RSA public key
/// and compute an RFC 7638 thumbprint. Only `kty = "RSA"` is accepted by the
/// authenticator (§4.2 algorithm policy restricts signing to RSA variants).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    pub kty: String,
    /// Base64url-encoded modulus.
    pub n: String,
    /// Base64url-encoded public exponent.
    pub e: String,
}

impl Jwk {
    /// RFC 7638 JWK thumbprint, computed over the canonical (lexicographic
    /// key order, no whitespace) JSON representation.
    pub fn thumbprint(&self) -> [u8; 32] {
        let canonical = format!(
            r#"{{"e":"{}","kty":"{}","n":"{}"}}"#,
            self.e, self.kty, self.n
        );
        let digest = digest::digest(&digest::SHA256, canonical.as_bytes());
        let mut out = [0u8; 32];
        out.copy_from_slice(digest.as_ref());
        out
    }

    /// `kid` is the URL-safe base64 thumbprint (§3 "Account ↔ key
    /// bijection"); this is the reference implementation's choice of hash,
    /// not a wire requirement.
    pub fn kid(&self) -> String {
        base64::Engine::encode(
            &base64::engine::general_purpose::URL_SAFE_NO_PAD,
            self.thumbprint(),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Valid,
    Deactivated,
    Revoked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Ready,
    Processing,
    Valid,
    Invalid,
}

impl OrderStatus {
    /// VALID, INVALID and REVOKED are the terminal states a read must never
    /// regress out of (§8 testable property).
    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Valid | OrderStatus::Invalid)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthorizationStatus {
    Pending,
    Valid,
    Invalid,
    Expired,
    Deactivated,
    Revoked,
}

impl AuthorizationStatus {
    /// Any of these makes the owning order INVALID (§4.4 order transitions).
    pub fn fails_order(self) -> bool {
        matches!(
            self,
            AuthorizationStatus::Invalid
                | AuthorizationStatus::Expired
                | AuthorizationStatus::Deactivated
                | AuthorizationStatus::Revoked
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeStatus {
    Pending,
    Processing,
    Valid,
    Invalid,
}

impl ChallengeStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ChallengeStatus::Valid | ChallengeStatus::Invalid)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CertificateStatus {
    Valid,
    Revoked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum IdentifierType {
    Dns,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChallengeType {
    Http01,
    Dns01,
}

impl ChallengeType {
    pub fn as_str(self) -> &'static str {
        match self {
            ChallengeType::Http01 => "http-01",
            ChallengeType::Dns01 => "dns-01",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub kid: String,
    pub key: Jwk,
    pub status: AccountStatus,
    pub contacts: Vec<String>,
    pub tos_agreed: bool,
    pub created_at: OffsetDateTime,
}

impl Account {
    /// Client-requested deactivation (§4.4 Account). The only account
    /// transition a client may ask for; REVOKED is operator-only and not
    /// reachable through any handler in this core.
    pub fn deactivate(&mut self) -> crate::error::Result<()> {
        if self.status != AccountStatus::Valid {
            return Err(crate::error::Error::unauthorized(
                "account is not in a state that can be deactivated",
            ));
        }
        self.status = AccountStatus::Deactivated;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub kid: String,
    pub status: OrderStatus,
    pub expires: OffsetDateTime,
    pub not_before: Option<OffsetDateTime>,
    pub not_after: Option<OffsetDateTime>,
    pub identifier_ids: Vec<u64>,
    /// DER-encoded CSR, set by finalize.
    pub csr: Option<Vec<u8>>,
    pub certificate_id: Option<Uuid>,
    /// Relay modes only: the upstream order's own URL.
    pub proxied_url: Option<String>,
}

impl Order {
    /// Idempotent recomputation of `status` from the current statuses of
    /// this order's authorizations (§4.4 `order.validate()`). Never regresses
    /// out of a terminal state.
    pub fn validate(&mut self, authorizations: &[Authorization]) {
        if self.status.is_terminal() {
            return;
        }
        if authorizations.iter().any(|a| a.status.fails_order()) {
            self.status = OrderStatus::Invalid;
            return;
        }
        if matches!(self.status, OrderStatus::Pending)
            && !authorizations.is_empty()
            && authorizations
                .iter()
                .all(|a| a.status == AuthorizationStatus::Valid)
        {
            self.status = OrderStatus::Ready;
        }
    }

    /// Begin finalization: READY -> PROCESSING (§4.5 step 4). Caller has
    /// already checked CSR validity.
    pub fn begin_finalize(&mut self, csr_der: Vec<u8>) -> crate::error::Result<()> {
        if self.status != OrderStatus::Ready {
            return Err(crate::error::Error::order_not_ready(
                "order is not ready for finalization",
            ));
        }
        self.csr = Some(csr_der);
        self.status = OrderStatus::Processing;
        Ok(())
    }

    /// PROCESSING -> VALID once a certificate has been stored.
    pub fn finalize_succeeded(&mut self, certificate_id: Uuid) {
        if self.status.is_terminal() {
            return;
        }
        self.certificate_id = Some(certificate_id);
        self.status = OrderStatus::Valid;
    }

    /// PROCESSING -> INVALID on any finalization failure.
    pub fn finalize_failed(&mut self) {
        if self.status.is_terminal() {
            return;
        }
        self.status = OrderStatus::Invalid;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identifier {
    pub id: u64,
    pub order_id: Uuid,
    pub kind: IdentifierType,
    pub value: String,
    pub authorization_id: Uuid,
}

impl Identifier {
    /// Wildcard identifiers match only a leading `*.` label (§3 invariant).
    pub fn is_wildcard(&self) -> bool {
        self.value.starts_with("*.")
    }

    /// The DNS name a CSR/certificate would carry for this identifier: the
    /// wildcard label is part of the value already, so this is the value
    /// itself, case-folded.
    pub fn case_folded(&self) -> String {
        self.value.to_ascii_lowercase()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Authorization {
    pub id: Uuid,
    pub order_id: Uuid,
    pub identifier_id: u64,
    pub status: AuthorizationStatus,
    pub expires: OffsetDateTime,
    pub wildcard: bool,
    pub challenge_ids: Vec<Uuid>,
}

/// Result of finalizing an authorization from a terminal child challenge.
pub struct AuthorizationFinalize {
    /// Challenges to delete (the siblings of the one that went VALID), per
    /// §4.4: "on that transition, all sibling non-VALID challenges are
    /// deleted."
    pub delete_challenge_ids: Vec<Uuid>,
}

impl Authorization {
    /// Terminal states besides VALID are final for the authorization too:
    /// once INVALID/EXPIRED/DEACTIVATED/REVOKED, the order machine reacts
    /// but the authorization itself stops mutating.
    fn is_terminal(&self) -> bool {
        !matches!(self.status, AuthorizationStatus::Pending)
    }

    /// Called when one of this authorization's challenges reaches a terminal
    /// status. Returns the set of sibling challenges to delete when the
    /// authorization becomes VALID; `None` if the authorization was already
    /// terminal (idempotent re-invocation, §5 "challenge validation tasks
    /// are idempotent").
    pub fn finalize(
        &mut self,
        winning_challenge_id: Uuid,
        winning_status: ChallengeStatus,
    ) -> Option<AuthorizationFinalize> {
        if self.is_terminal() {
            return None;
        }
        match winning_status {
            ChallengeStatus::Valid => {
                self.status = AuthorizationStatus::Valid;
                let delete_challenge_ids = self
                    .challenge_ids
                    .iter()
                    .copied()
                    .filter(|id| *id != winning_challenge_id)
                    .collect();
                Some(AuthorizationFinalize {
                    delete_challenge_ids,
                })
            }
            ChallengeStatus::Invalid => {
                self.status = AuthorizationStatus::Invalid;
                Some(AuthorizationFinalize {
                    delete_challenge_ids: Vec::new(),
                })
            }
            ChallengeStatus::Pending | ChallengeStatus::Processing => None,
        }
    }

    /// Client-requested deactivation of a still-pending authorization.
    pub fn deactivate(&mut self) -> crate::error::Result<()> {
        if self.status != AuthorizationStatus::Pending {
            return Err(crate::error::Error::malformed(
                "only a pending authorization can be deactivated",
            ));
        }
        self.status = AuthorizationStatus::Deactivated;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Challenge {
    pub id: Uuid,
    pub authorization_id: Uuid,
    pub kind: ChallengeType,
    pub status: ChallengeStatus,
    pub token: String,
    pub validated: Option<OffsetDateTime>,
}

impl Challenge {
    /// Synchronous PENDING -> PROCESSING edge, taken in the challenge
    /// handler itself (§4.4); the terminal edge is taken later by the
    /// validator task.
    pub fn begin_processing(&mut self) -> crate::error::Result<()> {
        if self.status != ChallengeStatus::Pending {
            return Err(crate::error::Error::malformed(
                "challenge is not pending",
            ));
        }
        self.status = ChallengeStatus::Processing;
        Ok(())
    }

    /// Terminal transition, taken by the background validator task.
    /// Idempotent: a no-op once the challenge is already terminal (§5).
    pub fn finish(&mut self, status: ChallengeStatus, now: OffsetDateTime) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        debug_assert!(status.is_terminal());
        self.status = status;
        self.validated = Some(now);
        true
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Certificate {
    pub id: Uuid,
    pub order_id: Uuid,
    pub status: CertificateStatus,
    /// Leaf certificate, DER.
    pub der: Vec<u8>,
    /// Leaf certificate, PEM.
    pub pem: String,
    /// Leaf + issuer chain, PEM, concatenated (relay modes download this
    /// from upstream; CA mode builds it from the configured CA cert).
    pub full_chain: String,
    pub revocation_reason: Option<u8>,
}

impl Certificate {
    /// §4.7: revocation reason must come from the allowed set. RFC 5280
    /// §5.3.1 CRLReason values accepted by ACME revoke-cert.
    pub const ALLOWED_REASONS: [u8; 9] = [0, 1, 2, 3, 4, 5, 6, 8, 9];

    pub fn revoke(&mut self, reason: u8) -> crate::error::Result<()> {
        if !Self::ALLOWED_REASONS.contains(&reason) {
            return Err(crate::error::Error::acme(
                crate::error::AcmeErrorType::BadRevocationReason,
                "revocation reason is not in the allowed set",
            ));
        }
        if self.status == CertificateStatus::Revoked {
            return Err(crate::error::Error::acme(
                crate::error::AcmeErrorType::AlreadyRevoked,
                "certificate is already revoked",
            ));
        }
        self.status = CertificateStatus::Revoked;
        self.revocation_reason = Some(reason);
        Ok(())
    }
}

/// Append-only audit row. The core appends one of these per entity
/// mutation as part of `commit()`; it never reads them back itself (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeLog {
    pub id: u64,
    pub timestamp: OffsetDateTime,
    pub actor: String,
    pub entity_ref: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jwk() -> Jwk {
        Jwk {
            kty: "RSA".to_string(),
            n: "sXch".to_string(),
            e: "AQAB".to_string(),
        }
    }

    #[test]
    fn jwk_thumbprint_is_stable() {
        assert_eq!(jwk().thumbprint(), jwk().thumbprint());
    }

    #[test]
    fn order_validate_is_idempotent() {
        let mut order = Order {
            id: Uuid::nil(),
            kid: "k".into(),
            status: OrderStatus::Pending,
            expires: OffsetDateTime::now_utc(),
            not_before: None,
            not_after: None,
            identifier_ids: vec![1],
            csr: None,
            certificate_id: None,
            proxied_url: None,
        };
        let authz = Authorization {
            id: Uuid::nil(),
            order_id: order.id,
            identifier_id: 1,
            status: AuthorizationStatus::Valid,
            expires: OffsetDateTime::now_utc(),
            wildcard: false,
            challenge_ids: vec![],
        };
        order.validate(&[authz.clone()]);
        assert_eq!(order.status, OrderStatus::Ready);
        order.validate(&[authz]);
        assert_eq!(order.status, OrderStatus::Ready);
    }

    #[test]
    fn order_never_regresses_from_terminal() {
        let mut order = Order {
            id: Uuid::nil(),
            kid: "k".into(),
            status: OrderStatus::Valid,
            expires: OffsetDateTime::now_utc(),
            not_before: None,
            not_after: None,
            identifier_ids: vec![],
            csr: None,
            certificate_id: None,
            proxied_url: None,
        };
        let authz = Authorization {
            id: Uuid::nil(),
            order_id: order.id,
            identifier_id: 1,
            status: AuthorizationStatus::Invalid,
            expires: OffsetDateTime::now_utc(),
            wildcard: false,
            challenge_ids: vec![],
        };
        order.validate(&[authz]);
        assert_eq!(order.status, OrderStatus::Valid);
    }

    #[test]
    fn authorization_finalize_deletes_sibling_challenges() {
        let mut authz = Authorization {
            id: Uuid::nil(),
            order_id: Uuid::nil(),
            identifier_id: 1,
            status: AuthorizationStatus::Pending,
            expires: OffsetDateTime::now_utc(),
            wildcard: false,
            challenge_ids: vec![Uuid::from_u128(1), Uuid::from_u128(2)],
        };
        let result = authz
            .finalize(Uuid::from_u128(1), ChallengeStatus::Valid)
            .unwrap();
        assert_eq!(result.delete_challenge_ids, vec![Uuid::from_u128(2)]);
        assert_eq!(authz.status, AuthorizationStatus::Valid);

        // idempotent re-invocation is a no-op
        assert!(authz
            .finalize(Uuid::from_u128(1), ChallengeStatus::Valid)
            .is_none());
    }
}
