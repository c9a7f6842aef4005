//! Server configuration loaded from environment variables.
//!
//! All settings have defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;

use phonon_client::ClientConfig;
use phonon_shared::constants::DEFAULT_HTTP_PORT;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP API.
    /// Env: `PHONON_HTTP_ADDR`
    /// Default: `127.0.0.1:8080`
    pub http_addr: SocketAddr,

    /// Session settings (`PHONON_DATA_DIR`, timeouts, device simulation).
    pub client: ClientConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([127, 0, 0, 1], DEFAULT_HTTP_PORT).into(),
            client: ClientConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let mut config = Self {
            client: ClientConfig::from_env(),
            ..Self::default()
        };

        if let Ok(addr) = std::env::var("PHONON_HTTP_ADDR") {
            match parse_http_addr(&addr) {
                Some(parsed) => config.http_addr = parsed,
                None => tracing::warn!(value = %addr, "Invalid PHONON_HTTP_ADDR, using default"),
            }
        }

        // RUST_LOG is read by tracing-subscriber's EnvFilter directly.

        config
    }
}

/// Accepts `host:port` or a bare port.
fn parse_http_addr(value: &str) -> Option<SocketAddr> {
    let value = value.trim();
    if let Ok(addr) = value.parse::<SocketAddr>() {
        return Some(addr);
    }
    value
        .parse::<u16>()
        .ok()
        .map(|port| SocketAddr::from(([127, 0, 0, 1], port)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.http_addr, ([127, 0, 0, 1], 8080).into());
        assert!(!config.client.auto_mock);
    }

    #[test]
    fn test_parse_http_addr() {
        assert_eq!(
            parse_http_addr("0.0.0.0:9000"),
            Some(([0, 0, 0, 0], 9000).into())
        );
        assert_eq!(parse_http_addr("9001"), Some(([127, 0, 0, 1], 9001).into()));
        assert_eq!(parse_http_addr("localhost:http"), None);
    }
}
