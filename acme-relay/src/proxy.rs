//! Proxy relay mode (§4.6): transparent. The upstream order is created at
//! new-order time and its authorizations are driven to completion
//! immediately in the background; a challenge failure there is surfaced as
//! a local `INVALID` order rather than swallowed, so upstream errors are
//! user-visible the way a direct client of the upstream CA would see them.

use std::sync::Arc;
use std::time::Duration;

use acme_core::error::{Error, Result};
use acme_core::model::{Certificate, CertificateStatus, IdentifierType};
use acme_core::relay::{OrderFinalizer, RelayNewOrder, UpstreamClient, UpstreamIdentifier};
use acme_core::store::{Entity, Store};
use async_trait::async_trait;
use uuid::Uuid;

/// §4.5: "the proxy finalize wait is 10 seconds; on timeout the order is
/// marked INVALID" (§5 cancellation & timeouts).
const FINALIZE_TIMEOUT: Duration = Duration::from_secs(10);

pub struct ProxyRelay<C> {
    store: Arc<dyn Store>,
    client: Arc<C>,
}

impl<C> ProxyRelay<C> {
    pub fn new(store: Arc<dyn Store>, client: Arc<C>) -> Self {
        Self { store, client }
    }
}

#[async_trait]
impl<C: UpstreamClient + 'static> RelayNewOrder for ProxyRelay<C> {
    async fn on_new_order(&self, _kid: &str, order_id: Uuid) -> Result<()> {
        let mut session = self.store.begin().await?;
        let Some(mut order) = session.get_order(order_id).await? else {
            return Ok(());
        };
        let identifiers = session.get_identifiers_for_order(order_id).await?;

        let upstream_identifiers: Vec<UpstreamIdentifier> = identifiers
            .iter()
            .map(|i| UpstreamIdentifier {
                kind: IdentifierType::Dns,
                value: i.value.clone(),
            })
            .collect();

        let upstream_url = match self.client.order_create(&upstream_identifiers).await {
            Ok(url) => url,
            Err(error) => {
                tracing::warn!(%order_id, %error, "proxy upstream order creation failed");
                order.finalize_failed();
                session.add(Entity::Order(order));
                return session.commit().await;
            }
        };
        order.proxied_url = Some(upstream_url.clone());
        session.add(Entity::Order(order));
        session.commit().await?;

        // Challenge completion failures here are user-visible: the order
        // goes INVALID immediately instead of waiting for finalize.
        if let Err(error) = self.client.authorizations_complete(&upstream_url).await {
            tracing::warn!(%order_id, %error, "proxy upstream challenge completion failed");
            let mut session = self.store.begin().await?;
            if let Some(mut order) = session.get_order(order_id).await? {
                order.finalize_failed();
                session.add(Entity::Order(order));
                session.commit().await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl<C: UpstreamClient + 'static> OrderFinalizer for ProxyRelay<C> {
    async fn handle_order_finalize(&self, _kid: &str, order_id: Uuid) -> Result<()> {
        let result = tokio::time::timeout(FINALIZE_TIMEOUT, self.drive(order_id)).await;

        let mut session = self.store.begin().await?;
        let Some(mut order) = session.get_order(order_id).await? else {
            return Ok(());
        };

        match result {
            Ok(Ok(certificate)) => {
                order.finalize_succeeded(certificate.id);
                session.add(Entity::Certificate(certificate));
            }
            Ok(Err(error)) => {
                tracing::warn!(%order_id, %error, "proxy finalize failed");
                order.finalize_failed();
            }
            Err(_elapsed) => {
                tracing::warn!(%order_id, "proxy finalize timed out after 10s");
                order.finalize_failed();
            }
        }
        session.add(Entity::Order(order));
        session.commit().await
    }
}

impl<C: UpstreamClient> ProxyRelay<C> {
    async fn drive(&self, order_id: Uuid) -> Result<Certificate> {
        let mut session = self.store.begin().await?;
        let order = session
            .get_order(order_id)
            .await?
            .ok_or_else(|| Error::Internal("order vanished before finalize".to_string()))?;
        let upstream_url = order
            .proxied_url
            .clone()
            .ok_or_else(|| Error::Internal("proxy order has no upstream url".to_string()))?;
        let csr_der = order
            .csr
            .clone()
            .ok_or_else(|| Error::Internal("order has no CSR staged".to_string()))?;
        drop(session);

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
