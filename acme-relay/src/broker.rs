//! Broker relay mode (§4.6): opaque to the end user. Upstream is not
//! touched at new-order time; all upstream orchestration happens inside the
//! finalize background task, and upstream challenge errors are swallowed
//! rather than surfaced (the local client sees only `orderInvalid`).

use std::sync::Arc;

use acme_core::error::Result;
use acme_core::model::{Certificate, CertificateStatus, IdentifierType};
use acme_core::relay::{OrderFinalizer, RelayRevoke, UpstreamClient, UpstreamIdentifier};
use acme_core::store::{Entity, Store};
use async_trait::async_trait;
use uuid::Uuid;

pub struct BrokerFinalizer<C> {
    store: Arc<dyn Store>,
    client: Arc<C>,
}

impl<C> BrokerFinalizer<C> {
    pub fn new(store: Arc<dyn Store>, client: Arc<C>) -> Self {
        Self { store, client }
    }
}

#[async_trait]
impl<C: UpstreamClient + 'static> OrderFinalizer for BrokerFinalizer<C> {
    async fn handle_order_finalize(&self, _kid: &str, order_id: Uuid) -> Result<()> {
        let result = self.drive(order_id).await;

        let mut session = self.store.begin().await?;
        let Some(mut order) = session.get_order(order_id).await? else {
            return Ok(());
        };

        match result {
            Ok(certificate) => {
                order.finalize_succeeded(certificate.id);
                session.add(Entity::Certificate(certificate));
            }
            Err(error) => {
                tracing::warn!(%order_id, %error, "broker finalize failed, marking order invalid");
                order.finalize_failed();
            }
        }
        session.add(Entity::Order(order));
        session.commit().await
    }
}

impl<C: UpstreamClient> BrokerFinalizer<C> {
    async fn drive(&self, order_id: Uuid) -> Result<Certificate> {
        let mut session = self.store.begin().await?;
        let order = session
            .get_order(order_id)
            .await?
            .ok_or_else(|| acme_core::error::Error::Internal("order vanished before finalize".to_string()))?;
        let identifiers = session.get_identifiers_for_order(order_id).await?;
        let csr_der = order
            .csr
            .clone()
            .ok_or_else(|| acme_core::error::Error::Internal("order has no CSR staged".to_string()))?;
        drop(session);

        let upstream_identifiers: Vec<UpstreamIdentifier> = identifiers
            .iter()
            .map(|i| UpstreamIdentifier {
                kind: IdentifierType::Dns,
                value: i.value.clone(),
            })
            .collect();

        let upstream_url = self.client.order_create(&upstream_identifiers).await?;
        // Upstream challenge errors are swallowed here (§4.5): any failure
        // from this point on collapses to a single `orderInvalid` for the
        // local client, which is what the caller does with our `Err`.
        self.client.authorizations_complete(&upstream_url).await?;
        self.client.order_finalize(&upstream_url, &csr_der).await?;
        let full_chain = self.client.certificate_get(&upstream_url).await?;

        let leaf_pem = full_chain
            .split("-----END CERTIFICATE-----")
            .next()
            .map(|s| format!("{s}-----END CERTIFICATE-----\n"))
            .unwrap_or_else(|| full_chain.clone());
        let der = crate::leaf_der_from_pem(&leaf_pem)?;

        Ok(Certificate {
            id: Uuid::new_v4(),
            order_id,
            status: CertificateStatus::Valid,
            der,
            pem: leaf_pem,
            full_chain,
            revocation_reason: None,
        })
    }
}

/// Revocation relaying is mode-agnostic (§4.6): relay first, mark local
/// REVOKED only on upstream success.
pub struct RelayRevoker<C> {
    client: Arc<C>,
}

impl<C> RelayRevoker<C> {
    pub fn new(client: Arc<C>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl<C: UpstreamClient + Send + Sync> RelayRevoke for RelayRevoker<C> {
    async fn revoke_upstream(&self, cert_der: &[u8], reason: u8) -> Result<bool> {
        self.client.certificate_revoke(cert_der, reason).await
    }
}

