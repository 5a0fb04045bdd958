//! `instant-acme`-backed implementation of the internal ACME client
//! contract (§6.4) consumed by the broker and proxy relay modes.

use acme_core::error::{Error, Result};
use acme_core::relay::{UpstreamClient, UpstreamIdentifier, UpstreamOrderState};
use acme_core::model::IdentifierType;
use async_trait::async_trait;
use instant_acme::{
    Account, AuthorizationStatus, ChallengeType, Identifier as AcmeIdentifier, NewAccount,
    NewOrder, OrderStatus, RetryPolicy,
};
use tokio::sync::Mutex;

/// Wraps a single upstream ACME account. Broker and proxy modes share one
/// instance across all orders (§4.6: "each a distinct orchestration of the
/// internal ACME client").
pub struct InstantAcmeClient {
    account: Mutex<Account>,
}

impl InstantAcmeClient {
    /// Registers (or re-attaches to, given persisted credentials) the
    /// upstream account used to relay all local orders.
    pub async fn register(directory_url: &str, contact: &[&str]) -> Result<Self> {
        let (account, _credentials) = Account::builder()
            .map_err(|e| Error::Config(format!("ACME client builder init failed: {e}")))?
            .create(
                &NewAccount {
                    contact,
                    terms_of_service_agreed: true,
                    only_return_existing: false,
                },
                directory_url.to_string(),
                None,
            )
            .await
            .map_err(|e| Error::Internal(format!("upstream account registration failed: {e}")))?;

        Ok(Self {
            account: Mutex::new(account),
        })
    }
}

#[async_trait]
impl UpstreamClient for InstantAcmeClient {
    async fn order_create(&self, identifiers: &[UpstreamIdentifier]) -> Result<String> {
        let acme_identifiers: Vec<AcmeIdentifier> = identifiers
            .iter()
            .map(|id| match id.kind {
                IdentifierType::Dns => AcmeIdentifier::Dns(id.value.clone()),
            })
            .collect();

        let account = self.account.lock().await;
        let order = account
            .new_order(&NewOrder::new(&acme_identifiers))
            .await
            .map_err(|e| Error::Internal(format!("upstream order creation failed: {e}")))?;

        Ok(order.url().to_string())
    }

    async fn order_get(&self, url: &str) -> Result<UpstreamOrderState> {
        let account = self.account.lock().await;
        let order = account
            .order(url.to_string())
            .await
            .map_err(|e| Error::Internal(format!("could not refetch upstream order: {e}")))?;

        Ok(match order.state().status {
            OrderStatus::Pending => UpstreamOrderState::Pending,
            OrderStatus::Ready => UpstreamOrderState::Ready,
            OrderStatus::Processing => UpstreamOrderState::Processing,
            OrderStatus::Valid => UpstreamOrderState::Valid,
            OrderStatus::Invalid => UpstreamOrderState::Invalid,
            _ => UpstreamOrderState::Invalid,
        })
    }

    async fn authorizations_complete(&self, url: &str) -> Result<()> {
        let account = self.account.lock().await;
        let mut order = account
            .order(url.to_string())
            .await
            .map_err(|e| Error::Internal(format!("could not refetch upstream order: {e}")))?;

        let mut authorizations = order.authorizations();
        use futures::StreamExt;
        while let Some(auth_result) = authorizations.next().await {
            let mut authorization = authorization_or_bail(auth_result)?;
            if authorization.status == AuthorizationStatus::Valid {
                continue;
            }
            let mut challenge = authorization
                .challenge(ChallengeType::Http01)
                .ok_or_else(|| Error::Internal("upstream offered no HTTP-01 challenge".to_string()))?;
            challenge
                .set_ready()
                .await
                .map_err(|e| Error::Internal(format!("could not mark upstream challenge ready: {e}")))?;
        }

        let retry_policy = RetryPolicy::default();
        let status = order
            .poll_ready(&retry_policy)
            .await
            .map_err(|e| Error::Internal(format!("upstream authorization polling failed: {e}")))?;

        if status != OrderStatus::Ready && status != OrderStatus::Valid {
            return Err(Error::Internal(format!(
                "upstream order did not become ready (status: {status:?})"
            )));
        }
        Ok(())
    }

    async fn order_finalize(&self, url: &str, csr_der: &[u8]) -> Result<()> {
        let account = self.account.lock().await;
        let mut order = account
            .order(url.to_string())
            .await
            .map_err(|e| Error::Internal(format!("could not refetch upstream order: {e}")))?;

        order
            .finalize(csr_der)
            .await
            .map_err(|e| Error::Internal(format!("upstream finalize failed: {e}")))?;
        Ok(())
    }

    async fn certificate_get(&self, url: &str) -> Result<String> {
        let account = self.account.lock().await;
        let mut order = account
            .order(url.to_string())
            .await
            .map_err(|e| Error::Internal(format!("could not refetch upstream order: {e}")))?;

        let retry_policy = RetryPolicy::default();
        order
            .poll_certificate(&retry_policy)
            .await
            .map_err(|e| Error::Internal(format!("upstream certificate download failed: {e}")))
    }

    async fn certificate_revoke(&self, cert_der: &[u8], reason: u8) -> Result<bool> {
        let account = self.account.lock().await;
        match account
            .revoke(cert_der, Some(reason.into()))
            .await
        {
            Ok(()) => Ok(true),
            Err(e) => {
                tracing::warn!(error = %e, "upstream refused revocation");
                Ok(false)
            }
        }
    }
}

fn authorization_or_bail<T>(
    result: std::result::Result<T, instant_acme::Error>,
) -> Result<T> {
    result.map_err(|e| Error::Internal(format!("upstream authorization fetch failed: {e}")))
}
