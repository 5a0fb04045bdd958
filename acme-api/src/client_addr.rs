//! Reverse-proxy client address resolution (§6.6) and subnet whitelisting
//! (§6.5 `subnets`).

use std::net::{IpAddr, SocketAddr};

use acme_core::config::AcmeConfig;
use acme_core::error::{Error, Result};
use hyper::HeaderMap;
use ipnetwork::IpNetwork;

/// Resolve the client IP to check against challenge validators and the
/// subnet whitelist. If `use_forwarded_header` is true, honors the first
/// address in `X-Forwarded-For`; if false, the header's mere presence is
/// treated as spoofing and rejected with 400.
pub fn resolve(
    config: &AcmeConfig,
    headers: &HeaderMap,
    peer_addr: SocketAddr,
) -> Result<IpAddr> {
    let forwarded = headers.get("x-forwarded-for");

    let resolved = if config.use_forwarded_header {
        match forwarded {
            Some(value) => {
                let value = value
                    .to_str()
                    .map_err(|_| Error::malformed("X-Forwarded-For header is not valid UTF-8"))?;
                let first = value
                    .split(',')
                    .next()
                    .map(str::trim)
                    .ok_or_else(|| Error::malformed("X-Forwarded-For header is empty"))?;
                first
                    .parse::<IpAddr>()
                    .map_err(|_| Error::malformed("X-Forwarded-For header is not a valid address"))?
            }
            None => peer_addr.ip(),
        }
    } else {
        if forwarded.is_some() {
            return Err(Error::malformed(
                "X-Forwarded-For present but use_forwarded_header is disabled",
            ));
        }
        peer_addr.ip()
    };

    if !config.subnets.is_empty() {
        let allowed = config.subnets.iter().any(|cidr| {
            cidr.parse::<IpNetwork>()
                .map(|net| net.contains(resolved))
                .unwrap_or(false)
        });
        if !allowed {
            return Err(Error::unauthorized("client address is not in an allowed subnet"));
        }
    }

    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(use_forwarded: bool, subnets: Vec<&str>) -> AcmeConfig {
        let mut cfg = AcmeConfig::default();
        cfg.use_forwarded_header = use_forwarded;
        cfg.subnets = subnets.into_iter().map(String::from).collect();
        cfg
    }

    #[test]
    fn forwarded_header_present_but_disabled_is_rejected() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "1.2.3.4".parse().unwrap());
        let cfg = config(false, vec![]);
        let peer: SocketAddr = "127.0.0.1:1234".parse().unwrap();
        assert!(resolve(&cfg, &headers, peer).is_err());
    }

    #[test]
    fn uses_forwarded_header_when_enabled() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "9.9.9.9, 1.1.1.1".parse().unwrap());
        let cfg = config(true, vec![]);
        let peer: SocketAddr = "127.0.0.1:1234".parse().unwrap();
        let resolved = resolve(&cfg, &headers, peer).unwrap();
        assert_eq!(resolved, "9.9.9.9".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn rejects_addresses_outside_whitelist() {
        let headers = HeaderMap::new();
        let cfg = config(false, vec!["10.0.0.0/8"]);
        let peer: SocketAddr = "127.0.0.1:1234".parse().unwrap();
        assert!(resolve(&cfg, &headers, peer).is_err());
    }
}
