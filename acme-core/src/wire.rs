//! Wire DTOs (§10.6): the JSON shapes RFC 8555 clients expect are kept
//! separate from the store entities that back them, so store-only fields
//! never leak onto the wire by accident.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::AcmeErrorType;
use crate::model::{
    Account, AuthorizationStatus, Challenge, ChallengeStatus, ChallengeType, Identifier, Order,
    OrderStatus,
};

#[derive(Debug, Clone, Serialize)]
pub struct DirectoryDto {
    #[serde(rename = "newNonce")]
    pub new_nonce: String,
    #[serde(rename = "newAccount")]
    pub new_account: String,
    #[serde(rename = "newOrder")]
    pub new_order: String,
    #[serde(rename = "revokeCert")]
    pub revoke_cert: String,
    #[serde(rename = "keyChange")]
    pub key_change: String,
    pub meta: DirectoryMetaDto,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct DirectoryMetaDto {
    #[serde(rename = "termsOfService", skip_serializing_if = "Option::is_none")]
    pub terms_of_service: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountDto {
    pub status: crate::model::AccountStatus,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub contact: Vec<String>,
    pub orders: String,
}

impl AccountDto {
    pub fn from_account(account: &Account, orders_url: impl Into<String>) -> Self {
        Self {
            status: account.status,
            contact: account.contacts.clone(),
            orders: orders_url.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentifierDto {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
}

impl From<&Identifier> for IdentifierDto {
    fn from(identifier: &Identifier) -> Self {
        Self {
            kind: "dns".to_string(),
            value: identifier.value.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderDto {
    pub status: OrderStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub expires: OffsetDateTime,
    pub identifiers: Vec<IdentifierDto>,
    #[serde(skip_serializing_if = "Option::is_none", with = "time::serde::rfc3339::option")]
    pub not_before: Option<OffsetDateTime>,
    #[serde(skip_serializing_if = "Option::is_none", with = "time::serde::rfc3339::option")]
    pub not_after: Option<OffsetDateTime>,
    pub authorizations: Vec<String>,
    pub finalize: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate: Option<String>,
}

impl OrderDto {
    pub fn new(
        order: &Order,
        identifiers: Vec<IdentifierDto>,
        authz_urls: Vec<String>,
        finalize_url: String,
        certificate_url: Option<String>,
    ) -> Self {
        Self {
            status: order.status,
            expires: order.expires,
            identifiers,
            not_before: order.not_before,
            not_after: order.not_after,
            authorizations: authz_urls,
            finalize: finalize_url,
            certificate: certificate_url,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrdersListDto {
    pub orders: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationDto {
    pub identifier: IdentifierDto,
    pub status: AuthorizationStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub expires: OffsetDateTime,
    pub challenges: Vec<ChallengeDto>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub wildcard: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeDto {
    #[serde(rename = "type")]
    pub kind: ChallengeType,
    pub url: String,
    pub status: ChallengeStatus,
    #[serde(skip_serializing_if = "Option::is_none", with = "time::serde::rfc3339::option")]
    pub validated: Option<OffsetDateTime>,
    pub token: String,
}

impl ChallengeDto {
    pub fn from_challenge(challenge: &Challenge, url: impl Into<String>) -> Self {
        Self {
            kind: challenge.kind,
            url: url.into(),
            status: challenge.status,
            validated: challenge.validated,
            token: challenge.token.clone(),
        }
    }
}

/// `application/problem+json` error document (§6.2, §7).
#[derive(Debug, Clone, Serialize)]
pub struct ProblemDocument {
    #[serde(rename = "type")]
    pub kind: String,
    pub detail: String,
}

impl ProblemDocument {
    pub fn new(kind: AcmeErrorType, detail: impl Into<String>) -> Self {
        Self {
            kind: kind.urn().to_string(),
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RevokeCertPayload {
    pub certificate: String,
    #[serde(default)]
    pub reason: u8,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewOrderPayload {
    pub identifiers: Vec<IdentifierDto>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FinalizePayload {
    pub csr: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewAccountPayload {
    #[serde(default)]
    pub contact: Vec<String>,
    #[serde(default, rename = "termsOfServiceAgreed")]
    pub terms_of_service_agreed: bool,
    #[serde(default, rename = "onlyReturnExisting")]
    pub only_return_existing: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AccountUpdatePayload {
    #[serde(default)]
    pub contact: Option<Vec<String>>,
    #[serde(default)]
    pub status: Option<crate::model::AccountStatus>,
}
