//! Pure CSR-against-order validation (§4.5 steps 1-3): the part of the
//! finalization engine that is the same regardless of which mode
//! (standalone CA, broker, proxy) eventually signs the certificate.
//!
//! Parsing and signing the certificate itself is a signer capability (§1
//! Non-goals) implemented downstream; this module only decides whether a
//! submitted CSR is acceptable for a given order.

use std::collections::BTreeSet;

use x509_parser::prelude::FromDer;
use x509_parser::public_key::PublicKey;

use crate::error::{Error, Result};
use crate::model::{Identifier, Jwk};

/// What the CSR asked for, extracted once so callers don't reparse it.
pub struct CsrInfo {
    pub der: Vec<u8>,
    pub identifiers: BTreeSet<String>,
    pub key_size_bits: usize,
}

/// Parse a DER-encoded CSR and extract the CN + SAN identifier set,
/// case-folded and deduplicated (§3 "order identifier closure"), and the
/// public key size.
pub fn parse_csr(der: &[u8]) -> Result<CsrInfo> {
    let (_, csr) = x509_parser::certification_request::X509CertificationRequest::from_der(der)
        .map_err(|e| Error::bad_csr(format!("could not parse CSR: {e}")))?;

    csr.verify_signature()
        .map_err(|_| Error::bad_csr("CSR signature does not verify"))?;

    let mut identifiers = BTreeSet::new();
    let info = &csr.certification_request_info;
    if let Some(cn) = info
        .subject
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
    {
        identifiers.insert(cn.to_ascii_lowercase());
    }

    for extension in csr.requested_extensions() {
        if let x509_parser::extensions::ParsedExtension::SubjectAlternativeName(san) = extension {
            for name in &san.general_names {
                if let x509_parser::extensions::GeneralName::DNSName(dns) = name {
                    identifiers.insert(dns.to_ascii_lowercase());
                }
            }
        }
    }

    let key_size_bits = match info.subject_pki.parsed() {
        Ok(PublicKey::RSA(rsa)) => rsa.key_size(),
        _ => {
            return Err(Error::acme(
                crate::error::AcmeErrorType::BadPublicKey,
                "only RSA CSR public keys are accepted",
            ))
        }
    };

    Ok(CsrInfo {
        der: der.to_vec(),
        identifiers,
        key_size_bits,
    })
}

/// Reject a CSR whose key is smaller than the configured minimum
/// (`badPublicKey`), or whose identifier set does not exactly match the
/// order's (`badCSR`) — §4.5 step 3, §3 "order identifier closure".
pub fn check_csr_against_order(
    csr: &CsrInfo,
    order_identifiers: &[Identifier],
    rsa_min_keysize: u32,
) -> Result<()> {
    if csr.key_size_bits < rsa_min_keysize as usize {
        return Err(Error::acme(
            crate::error::AcmeErrorType::BadPublicKey,
            format!(
                "CSR key size {} bits is below the minimum of {} bits",
                csr.key_size_bits, rsa_min_keysize
            ),
        ));
    }

    let order_set: BTreeSet<String> = order_identifiers
        .iter()
        .map(Identifier::case_folded)
        .collect();

    if csr.identifiers != order_set {
        return Err(Error::bad_csr(
            "CSR identifier set does not match the order's identifiers",
        ));
    }

    Ok(())
}

/// §4.7 certificate-key revocation mode: the embedded `jwk` must equal the
/// leaf certificate's own public key.
pub fn certificate_key_matches(cert_der: &[u8], jwk: &Jwk) -> Result<bool> {
    let (_, cert) = x509_parser::certificate::X509Certificate::from_der(cert_der)
        .map_err(|e| Error::bad_csr(format!("could not parse certificate: {e}")))?;

    let rsa = match cert.public_key().parsed() {
        Ok(PublicKey::RSA(rsa)) => rsa,
        _ => return Ok(false),
    };

    let n = base64::Engine::decode(&base64::engine::general_purpose::URL_SAFE_NO_PAD, &jwk.n)
        .map_err(|e| Error::malformed(format!("invalid JWK modulus: {e}")))?;
    let e = base64::Engine::decode(&base64::engine::general_purpose::URL_SAFE_NO_PAD, &jwk.e)
        .map_err(|e| Error::malformed(format!("invalid JWK exponent: {e}")))?;

    // Leading zero bytes are a DER sign-byte artifact, not part of the
    // mathematical modulus; strip them from both sides before comparing.
    let trim = |bytes: &[u8]| -> &[u8] {
        let mut start = 0;
        while start < bytes.len() - 1 && bytes[start] == 0 {
            start += 1;
        }
        &bytes[start..]
    };

    Ok(trim(rsa.modulus) == trim(&n) && trim(rsa.exponent) == trim(&e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn identifier(value: &str) -> Identifier {
        Identifier {
            id: 1,
            order_id: Uuid::nil(),
            kind: crate::model::IdentifierType::Dns,
            value: value.to_string(),
            authorization_id: Uuid::nil(),
        }
    }

    #[test]
    fn rejects_identifier_mismatch() {
        let csr = CsrInfo {
            der: vec![],
            identifiers: BTreeSet::from(["b.test".to_string()]),
            key_size_bits: 2048,
        };
        let err = check_csr_against_order(&csr, &[identifier("a.test")], 2048).unwrap_err();
        assert_eq!(err.acme_type(), crate::error::AcmeErrorType::BadCsr);
    }

    #[test]
    fn rejects_undersized_key() {
        let csr = CsrInfo {
            der: vec![],
            identifiers: BTreeSet::from(["a.test".to_string()]),
            key_size_bits: 1024,
        };
        let err = check_csr_against_order(&csr, &[identifier("a.test")], 2048).unwrap_err();
        assert_eq!(err.acme_type(), crate::error::AcmeErrorType::BadPublicKey);
    }

    #[test]
    fn accepts_matching_identifier_set() {
        let csr = CsrInfo {
            der: vec![],
            identifiers: BTreeSet::from(["a.test".to_string()]),
            key_size_bits: 2048,
        };
        assert!(check_csr_against_order(&csr, &[identifier("a.test")], 2048).is_ok());
    }
}
