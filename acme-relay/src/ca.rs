//! Standalone CA mode's signer capability (§1 Non-goals: "certificate
//! generation primitives beyond what a CSR parser and an X.509 signer
//! already give us are not reimplemented" - this wraps `rcgen` as that
//! signer rather than hand-rolling ASN.1).

use std::sync::Arc;

use acme_core::error::{Error, Result};
use acme_core::model::{Certificate, CertificateStatus};
use acme_core::relay::{OrderFinalizer, SignedCertificate};
use acme_core::store::{Entity, Store};
use async_trait::async_trait;
use rcgen::{CertificateParams, Issuer, KeyPair};
use uuid::Uuid;

/// Signs CSRs with a locally held CA key and certificate, loaded once at
/// startup from the configured `cert`/`private_key` paths (§6.5).
pub struct RcgenCaSigner {
    issuer: Issuer<'static, KeyPair>,
    ca_cert_pem: String,
}

impl RcgenCaSigner {
    pub fn load(ca_cert_pem: &str, ca_key_pem: &str) -> Result<Self> {
        let key_pair = KeyPair::from_pem(ca_key_pem)
            .map_err(|e| Error::Config(format!("invalid CA private key: {e}")))?;
        let params = CertificateParams::from_ca_cert_pem(ca_cert_pem)
            .map_err(|e| Error::Config(format!("invalid CA certificate: {e}")))?;
        let issuer = Issuer::new(params, key_pair);

        Ok(Self {
            issuer,
            ca_cert_pem: ca_cert_pem.to_string(),
        })
    }

    /// Sign a DER-encoded CSR, already validated against the order (§4.5:
    /// "sign CSR with the configured CA key and certificate").
    pub fn sign(&self, csr_der: &[u8]) -> Result<SignedCertificate> {
        let csr_params = rcgen::CertificateSigningRequestParams::from_der(csr_der)
            .map_err(|e| Error::bad_csr(format!("could not re-parse CSR for signing: {e}")))?;

        let cert = csr_params
            .signed_by(&self.issuer)
            .map_err(|e| Error::Internal(format!("CA signing failed: {e}")))?;

        let pem = cert.pem();
        let der = cert.der().to_vec();
        let full_chain = format!("{pem}\n{}", self.ca_cert_pem);

        Ok(SignedCertificate {
            der,
            pem,
            full_chain,
        })
    }
}

/// Standalone CA's `OrderFinalizer` (§4.5): sign synchronously against the
/// local key, no network I/O, no partial-failure window beyond a bad CSR
/// (already rejected before this task is spawned) or a signer bug.
pub struct CaFinalizer {
    store: Arc<dyn Store>,
    signer: Arc<RcgenCaSigner>,
}

impl CaFinalizer {
    pub fn new(store: Arc<dyn Store>, signer: Arc<RcgenCaSigner>) -> Self {
        Self { store, signer }
    }
}

#[async_trait]
impl OrderFinalizer for CaFinalizer {
    async fn handle_order_finalize(&self, _kid: &str, order_id: Uuid) -> Result<()> {
        let mut session = self.store.begin().await?;
        let Some(mut order) = session.get_order(order_id).await? else {
            return Ok(());
        };

        let outcome = match &order.csr {
            Some(csr_der) => self.signer.sign(csr_der),
            None => Err(Error::Internal("order has no CSR staged".to_string())),
        };

        match outcome {
            Ok(signed) => {
                let certificate = Certificate {
                    id: Uuid::new_v4(),
                    order_id,
                    status: CertificateStatus::Valid,
                    der: signed.der,
                    pem: signed.pem,
                    full_chain: signed.full_chain,
                    revocation_reason: None,
                };
                order.finalize_succeeded(certificate.id);
                session.add(Entity::Certificate(certificate));
            }
            Err(error) => {
                tracing::warn!(%order_id, %error, "CA signing failed, marking order invalid");
                order.finalize_failed();
            }
        }
        session.add(Entity::Order(order));
        session.commit().await
    }
}
