//! Flattened JWS envelope parsing and RSA signature verification (§4.2
//! steps 1-3, 6-7).
//!
//! ACME restricts signing to RSA variants (§4.2 step 3: RS256/384/512,
//! PS256/384/512); this module only implements that subset, not the general
//! JOSE algorithm zoo.

use acme_core::error::{AcmeErrorType, Error, Result};
use acme_core::model::Jwk;
use base64::Engine;
use ring::signature::{self, RsaPublicKeyComponents};
use serde::Deserialize;

const URL_SAFE_NO_PAD: base64::engine::GeneralPurpose =
    base64::engine::general_purpose::URL_SAFE_NO_PAD;

/// The raw flattened-JSON-serialization JWS as received on the wire.
#[derive(Debug, Deserialize)]
pub struct JwsEnvelope {
    pub protected: String,
    #[serde(default)]
    pub payload: String,
    pub signature: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProtectedHeader {
    pub alg: String,
    pub nonce: String,
    pub url: String,
    #[serde(default)]
    pub jwk: Option<Jwk>,
    #[serde(default)]
    pub kid: Option<String>,
}

pub struct ParsedJws {
    pub header: ProtectedHeader,
    pub payload: Vec<u8>,
    signing_input: Vec<u8>,
    signature: Vec<u8>,
}

/// Parse the flattened envelope and decode its protected header (§4.2 step
/// 1: malformed on any failure here).
pub fn parse(body: &[u8]) -> Result<ParsedJws> {
    let envelope: JwsEnvelope =
        serde_json::from_slice(body).map_err(|e| Error::malformed(format!("invalid JWS envelope: {e}")))?;

    let protected_bytes = URL_SAFE_NO_PAD
        .decode(&envelope.protected)
        .map_err(|e| Error::malformed(format!("invalid protected header encoding: {e}")))?;
    let header: ProtectedHeader = serde_json::from_slice(&protected_bytes)
        .map_err(|e| Error::malformed(format!("invalid protected header: {e}")))?;

    let payload = if envelope.payload.is_empty() {
        Vec::new()
    } else {
        URL_SAFE_NO_PAD
            .decode(&envelope.payload)
            .map_err(|e| Error::malformed(format!("invalid payload encoding: {e}")))?
    };

    let signature = URL_SAFE_NO_PAD
        .decode(&envelope.signature)
        .map_err(|e| Error::malformed(format!("invalid signature encoding: {e}")))?;

    let signing_input = format!("{}.{}", envelope.protected, envelope.payload).into_bytes();

    Ok(ParsedJws {
        header,
        payload,
        signing_input,
        signature,
    })
}

/// §4.2 step 3: algorithm policy. Anything outside this set is
/// `badSignatureAlgorithm`, not `malformed`.
fn rsa_verification_algorithm(alg: &str) -> Result<&'static signature::RsaParameters> {
    match alg {
        "RS256" => Ok(&signature::RSA_PKCS1_2048_8192_SHA256),
        "RS384" => Ok(&signature::RSA_PKCS1_2048_8192_SHA384),
        "RS512" => Ok(&signature::RSA_PKCS1_2048_8192_SHA512),
        "PS256" => Ok(&signature::RSA_PSS_2048_8192_SHA256),
        "PS384" => Ok(&signature::RSA_PSS_2048_8192_SHA384),
        "PS512" => Ok(&signature::RSA_PSS_2048_8192_SHA512),
        _ => Err(Error::acme(
            AcmeErrorType::BadSignatureAlgorithm,
            format!("unsupported signature algorithm {alg}"),
        )),
    }
}

impl ParsedJws {
    /// Verify this envelope's signature against the given JWK (§4.2 steps 6
    /// and 7's "verify signature" sub-steps).
    pub fn verify(&self, key: &Jwk) -> Result<()> {
        let alg = rsa_verification_algorithm(&self.header.alg)?;

        let n = URL_SAFE_NO_PAD
            .decode(&key.n)
            .map_err(|e| Error::malformed(format!("invalid JWK modulus: {e}")))?;
        let e = URL_SAFE_NO_PAD
            .decode(&key.e)
            .map_err(|e| Error::malformed(format!("invalid JWK exponent: {e}")))?;

        let public_key = RsaPublicKeyComponents { n: &n, e: &e };
        public_key
            .verify(alg, &self.signing_input, &self.signature)
            .map_err(|_| Error::unauthorized("JWS signature verification failed"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unsupported_algorithm() {
        assert!(rsa_verification_algorithm("ES256").is_err());
        assert!(rsa_verification_algorithm("HS256").is_err());
    }

    #[test]
    fn accepts_each_documented_algorithm() {
        for alg in ["RS256", "RS384", "RS512", "PS256", "PS384", "PS512"] {
            assert!(rsa_verification_algorithm(alg).is_ok());
        }
    }

    #[test]
    fn malformed_body_is_rejected() {
        let err = parse(b"not json").unwrap_err();
        assert_eq!(err.acme_type(), AcmeErrorType::Malformed);
    }
}
