//! Server configuration from the environment

use anyhow::Context;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Data directory variable
pub const DATA_DIR_ENV: &str = "CHAINDB_DATA_DIR";

/// HTTP listen address variable
pub const HTTP_ADDR_ENV: &str = "CHAINDB_HTTP_ADDR";

const DEFAULT_DATA_DIR: &str = "data";
const DEFAULT_HTTP_ADDR: SocketAddr = SocketAddr::new(
    std::net::IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED),
    8086,
);

/// Server configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// HTTP listen address
    pub http_addr: SocketAddr,
    /// Chain data directory
    pub data_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: DEFAULT_HTTP_ADDR,
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let mut config = Self::default();

        if let Some(dir) = lookup(DATA_DIR_ENV) {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(addr) = lookup(HTTP_ADDR_ENV) {
            config.http_addr = addr
                .parse()
                .with_context(|| format!("invalid {HTTP_ADDR_ENV}: {addr}"))?;
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config, ServerConfig::default());
        assert_eq!(config.http_addr.port(), 8086);
        assert_eq!(config.data_dir, PathBuf::from("data"));
    }

    #[test]
    fn test_overrides() {
        let config = ServerConfig::from_lookup(|key| match key {
            DATA_DIR_ENV => Some("/var/lib/chain".to_string()),
            HTTP_ADDR_ENV => Some("127.0.0.1:9000".to_string()),
            _ => None,
        })
        .unwrap();

        assert_eq!(config.data_dir, PathBuf::from("/var/lib/chain"));
        assert_eq!(config.http_addr, "127.0.0.1:9000".parse().unwrap());
    }

    #[test]
    fn test_bad_address() {
        let result = ServerConfig::from_lookup(|key| {
            (key == HTTP_ADDR_ENV).then(|| "not-an-address".to_string())
        });
        assert!(result.is_err());
    }
}
