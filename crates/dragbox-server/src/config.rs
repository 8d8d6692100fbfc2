//! Relay configuration from environment variables.

use std::net::SocketAddr;
use thiserror::Error;

pub const DEFAULT_ADDR: &str = "0.0.0.0:3030";
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{var} has invalid value {value:?}")]
    InvalidValue { var: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Address the HTTP/WebSocket listener binds to.
    pub addr: SocketAddr,
    /// Per-room broadcast buffer. Slow peers that fall further behind skip messages.
    pub channel_capacity: usize,
}

impl ServerConfig {
    /// Build config from environment variables.
    ///
    /// Optional:
    /// - `DRAGBOX_ADDR`: default `0.0.0.0:3030`
    /// - `DRAGBOX_CHANNEL_CAPACITY`: default 256
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let raw_addr = lookup("DRAGBOX_ADDR").unwrap_or_else(|| DEFAULT_ADDR.to_string());
        let addr = raw_addr.parse().map_err(|_| ConfigError::InvalidValue {
            var: "DRAGBOX_ADDR",
            value: raw_addr.clone(),
        })?;

        let channel_capacity = match lookup("DRAGBOX_CHANNEL_CAPACITY") {
            Some(raw) => match raw.parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        var: "DRAGBOX_CHANNEL_CAPACITY",
                        value: raw,
                    });
                }
            },
            None => DEFAULT_CHANNEL_CAPACITY,
        };

        Ok(Self { addr, channel_capacity })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ServerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.addr, "0.0.0.0:3030".parse::<SocketAddr>().unwrap());
        assert_eq!(config.channel_capacity, 256);
    }

    #[test]
    fn test_overrides() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("DRAGBOX_ADDR", "127.0.0.1:9000"),
            ("DRAGBOX_CHANNEL_CAPACITY", "16"),
        ]))
        .unwrap();
        assert_eq!(config.addr.port(), 9000);
        assert_eq!(config.channel_capacity, 16);
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(ServerConfig::from_lookup(lookup(&[("DRAGBOX_ADDR", "localhost")])).is_err());
        assert_eq!(
            ServerConfig::from_lookup(lookup(&[("DRAGBOX_CHANNEL_CAPACITY", "0")])),
            Err(ConfigError::InvalidValue {
                var: "DRAGBOX_CHANNEL_CAPACITY",
                value: "0".to_string()
            })
        );
    }
}
