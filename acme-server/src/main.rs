//! `acme-server` entry point: loads configuration, wires up the store,
//! nonce store, validator registry and mode-specific relay adapters, then
//! hands everything to `acme_api::run`.

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use acme_api::AppState;
use acme_auth::NonceStore;
use acme_core::config::{AcmeConfig, ServerMode, ValidatorKind};
use acme_core::relay::{OrderFinalizer, RelayNewOrder, RelayRevoke};
use acme_core::store::{InMemoryStore, Store};
use acme_core::validate::ValidatorRegistry;
use acme_relay::{BrokerFinalizer, CaFinalizer, InstantAcmeClient, ProxyRelay, RcgenCaSigner, RelayRevoker};
use acme_validate::{DummyValidator, RequestIpDnsValidator};

#[derive(Parser)]
#[command(name = "acme-server")]
#[command(author, version, about = "RFC 8555 ACME server: standalone CA, broker and proxy relay modes")]
struct Cli {
    /// Path to a TOML configuration file. `ACME_*` environment variables
    /// override its values (§6.5).
    #[arg(short, long)]
    config: Option<String>,

    /// Override the configured relay mode.
    #[arg(long, value_enum)]
    mode: Option<CliMode>,

    /// Override the configured bind address.
    #[arg(long)]
    bind: Option<String>,
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum CliMode {
    Ca,
    Broker,
    Proxy,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = acme_core::config::load(cli.config.as_deref())?;
    if let Some(mode) = cli.mode {
        config.mode = match mode {
            CliMode::Ca => ServerMode::Ca,
            CliMode::Broker => ServerMode::Broker,
            CliMode::Proxy => ServerMode::Proxy,
        };
    }
    if let Some(bind) = cli.bind {
        config.bind = bind;
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::try_new(&config.log_level).unwrap_or_default())
        .init();

    tokio::runtime::Runtime::new()?.block_on(run(config))
}

async fn run(config: AcmeConfig) -> anyhow::Result<()> {
    let bind: SocketAddr = config.bind.parse()?;
    let config = Arc::new(config);

    let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
    let nonces = Arc::new(NonceStore::new(config.nonce_capacity));

    let mut validators = ValidatorRegistry::new();
    match config.validator {
        ValidatorKind::Dummy => validators.register(Arc::new(DummyValidator))?,
        ValidatorKind::RequestIpDns => validators.register(Arc::new(RequestIpDnsValidator::new()))?,
    }

    let (finalizer, relay_new_order, relay_revoke, ca_chain_pem) = build_mode(&config, store.clone()).await?;

    let state = Arc::new(AppState {
        store,
        nonces,
        validators: Arc::new(validators),
        finalizer,
        relay_new_order,
        relay_revoke,
        config,
        ca_chain_pem,
    });

    tracing::info!(%bind, "starting acme-server");
    acme_api::run(bind, state).await?;
    Ok(())
}

type ModeParts = (
    Arc<dyn OrderFinalizer>,
    Option<Arc<dyn RelayNewOrder>>,
    Option<Arc<dyn RelayRevoke>>,
    Option<String>,
);

/// Builds the mode-specific `OrderFinalizer`/relay adapters (§4.5, §4.6).
/// The config loader already rejected a mode missing its required knobs
/// (`cert`/`private_key` for CA, `upstream_directory_url` for broker/proxy),
/// so the `expect`s here document an invariant rather than guard one.
async fn build_mode(config: &AcmeConfig, store: Arc<dyn Store>) -> anyhow::Result<ModeParts> {
    match config.mode {
        ServerMode::Ca => {
            let cert_path = config
                .cert
                .as_deref()
                .expect("config loader validated cert is set in CA mode");
            let key_path = config
                .private_key
                .as_deref()
                .expect("config loader validated private_key is set in CA mode");
            let ca_cert_pem = std::fs::read_to_string(cert_path)?;
            let ca_key_pem = std::fs::read_to_string(key_path)?;
            let signer = Arc::new(RcgenCaSigner::load(&ca_cert_pem, &ca_key_pem)?);
            let finalizer: Arc<dyn OrderFinalizer> = Arc::new(CaFinalizer::new(store, signer));
            Ok((finalizer, None, None, Some(ca_cert_pem)))
        }
        ServerMode::Broker => {
            let directory_url = config
                .upstream_directory_url
                .as_deref()
                .expect("config loader validated upstream_directory_url is set in broker mode");
            let client = Arc::new(InstantAcmeClient::register(directory_url, &[]).await?);
            let finalizer: Arc<dyn OrderFinalizer> = Arc::new(BrokerFinalizer::new(store, client.clone()));
            let revoker: Arc<dyn RelayRevoke> = Arc::new(RelayRevoker::new(client));
            Ok((finalizer, None, Some(revoker), None))
        }
        ServerMode::Proxy => {
            let directory_url = config
                .upstream_directory_url
                .as_deref()
                .expect("config loader validated upstream_directory_url is set in proxy mode");
            let client = Arc::new(InstantAcmeClient::register(directory_url, &[]).await?);
            let relay = Arc::new(ProxyRelay::new(store, client.clone()));
            let finalizer: Arc<dyn OrderFinalizer> = relay.clone();
            let new_order: Arc<dyn RelayNewOrder> = relay;
            let revoker: Arc<dyn RelayRevoke> = Arc::new(RelayRevoker::new(client));
            Ok((finalizer, Some(new_order), Some(revoker), None))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
