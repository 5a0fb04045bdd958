//! Layered configuration loading: defaults, an optional TOML file, then
//! `ACME_*` environment overrides, with eager validation (§10.3).

use std::path::Path;

use crate::config::types::{AcmeConfig, ServerMode};
use crate::error::{Error, Result};

/// Load configuration from an optional file path, layering `ACME_*`
/// environment variables on top, and validate the result.
///
/// `ACME_SUBNETS` and `ACME_MAIL_SUFFIXES` are read as comma-separated lists
/// via the `config` crate's list-separator support.
pub fn load<P: AsRef<Path>>(path: Option<P>) -> Result<AcmeConfig> {
    let defaults = AcmeConfig::default();

    let mut builder = config::Config::builder()
        .set_default("bind", defaults.bind)
        .map_err(config_err)?
        .set_default("mode", "ca")
        .map_err(config_err)?
        .set_default("rsa_min_keysize", defaults.rsa_min_keysize)
        .map_err(config_err)?
        .set_default("mail_suffixes", Vec::<String>::new())
        .map_err(config_err)?
        .set_default("subnets", Vec::<String>::new())
        .map_err(config_err)?
        .set_default("use_forwarded_header", defaults.use_forwarded_header)
        .map_err(config_err)?
        .set_default("nonce_capacity", defaults.nonce_capacity as i64)
        .map_err(config_err)?
        .set_default("log_level", defaults.log_level)
        .map_err(config_err)?
        .set_default("validator", "dummy")
        .map_err(config_err)?;

    if let Some(path) = path {
        let path = path.as_ref();
        if path.exists() {
            builder = builder.add_source(config::File::from(path));
        } else {
            return Err(Error::Config(format!(
                "config file not found: {}",
                path.display()
            )));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("ACME")
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("mail_suffixes")
            .with_list_parse_key("subnets")
            .try_parsing(true),
    );

    let raw = builder.build().map_err(config_err)?;
    let cfg: AcmeConfig = raw.try_deserialize().map_err(config_err)?;

    validate(&cfg)?;
    Ok(cfg)
}

fn validate(cfg: &AcmeConfig) -> Result<()> {
    if cfg.rsa_min_keysize == 0 {
        return Err(Error::Config(
            "rsa_min_keysize must be a positive number of bits".to_string(),
        ));
    }

    match cfg.mode {
        ServerMode::Ca => {
            if cfg.cert.is_none() || cfg.private_key.is_none() {
                return Err(Error::Config(
                    "mode \"ca\" requires both cert and private_key".to_string(),
                ));
            }
        }
        ServerMode::Broker | ServerMode::Proxy => {
            if cfg.upstream_directory_url.is_none() {
                return Err(Error::Config(format!(
                    "mode {:?} requires upstream_directory_url",
                    cfg.mode
                )));
            }
        }
    }

    for subnet in &cfg.subnets {
        subnet
            .parse::<ipnetwork::IpNetwork>()
            .map_err(|e| Error::Config(format!("invalid subnet {subnet:?}: {e}")))?;
    }

    Ok(())
}

fn config_err(e: config::ConfigError) -> Error {
    Error::Config(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn rejects_ca_mode_without_cert() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "mode = \"ca\"").unwrap();
        let err = load(Some(file.path())).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn rejects_broker_mode_without_upstream() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "mode = \"broker\"").unwrap();
        let err = load(Some(file.path())).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn accepts_valid_ca_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "mode = \"ca\"").unwrap();
        writeln!(file, "cert = \"ca.pem\"").unwrap();
        writeln!(file, "private_key = \"ca-key.pem\"").unwrap();
        let cfg = load(Some(file.path())).unwrap();
        assert_eq!(cfg.mode, ServerMode::Ca);
    }

    #[test]
    fn rejects_unparseable_subnet() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "mode = \"ca\"").unwrap();
        writeln!(file, "cert = \"ca.pem\"").unwrap();
        writeln!(file, "private_key = \"ca-key.pem\"").unwrap();
        writeln!(file, "subnets = [\"not-a-cidr\"]").unwrap();
        let err = load(Some(file.path())).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
