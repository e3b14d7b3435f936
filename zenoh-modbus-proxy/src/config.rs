//! Configuration for the Modbus proxy.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use proxy_common::KEY_PREFIX;
use proxy_framework::{Format, FrameworkError, LoggingConfig, ProxyConfig, ZenohConfig};

use crate::bridge::GapFill;
use crate::layout::SequentialBound;
use crate::slave::SlaveOptions;
use crate::store::ProxyIdentity;

/// Complete proxy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModbusProxyConfig {
    /// Zenoh connection settings
    #[serde(default)]
    pub zenoh: ZenohConfig,

    /// Proxy settings
    #[serde(default)]
    pub proxy: ProxySettings,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Encoding used when writing rows back to the store
    #[serde(default)]
    pub serialization: Format,
}

/// Modbus-facing proxy settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxySettings {
    /// Key expression prefix of the store collections (default: "modbusproxy")
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Serve only the outstations behind this proxy address
    #[serde(default)]
    pub proxy_address: Option<String>,

    /// Local address the Modbus listeners bind to (default: each proxy address)
    #[serde(default)]
    pub listen_address: Option<String>,

    /// Upper bound on every store round trip, in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Value served for sequential addresses the store has no row for.
    /// `null` turns missing rows into request failures.
    #[serde(default = "default_gap_fill")]
    pub gap_fill: Option<u16>,

    /// How the top of a sequential address range is interpreted
    #[serde(default)]
    pub sequential_bound: SequentialBound,

    /// Interval between heartbeat log lines, in seconds
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
}

fn default_key_prefix() -> String {
    KEY_PREFIX.to_string()
}

fn default_request_timeout_ms() -> u64 {
    2000
}

fn default_gap_fill() -> Option<u16> {
    Some(0)
}

fn default_heartbeat_secs() -> u64 {
    30
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            key_prefix: default_key_prefix(),
            proxy_address: None,
            listen_address: None,
            request_timeout_ms: default_request_timeout_ms(),
            gap_fill: default_gap_fill(),
            sequential_bound: SequentialBound::default(),
            heartbeat_secs: default_heartbeat_secs(),
        }
    }
}

impl ProxySettings {
    /// Timeout applied to store round trips.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Heartbeat interval.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs)
    }

    /// Gap-fill policy for sequential reads.
    pub fn gap_fill(&self) -> GapFill {
        match self.gap_fill {
            Some(value) => GapFill::Value(value),
            None => GapFill::Disabled,
        }
    }

    /// Options handed to every slave context.
    pub fn slave_options(&self) -> SlaveOptions {
        SlaveOptions {
            gap_fill: self.gap_fill(),
            request_timeout: self.request_timeout(),
            sequential_bound: self.sequential_bound,
        }
    }

    /// Socket address the listener for `proxy` binds to.
    pub fn bind_address(&self, proxy: &ProxyIdentity) -> Result<SocketAddr, FrameworkError> {
        let host = self.listen_address.as_deref().unwrap_or(&proxy.ip_address);
        let ip: IpAddr = host.parse().map_err(|e| {
            FrameworkError::config(format!("Invalid listen address '{}': {}", host, e))
        })?;
        Ok(SocketAddr::new(ip, proxy.ip_port))
    }
}

impl ProxyConfig for ModbusProxyConfig {
    fn zenoh(&self) -> &ZenohConfig {
        &self.zenoh
    }

    fn logging(&self) -> &LoggingConfig {
        &self.logging
    }

    fn key_prefix(&self) -> &str {
        &self.proxy.key_prefix
    }

    fn validate(&self) -> Result<(), FrameworkError> {
        let proxy = &self.proxy;

        if proxy.key_prefix.is_empty() {
            return Err(FrameworkError::validation("proxy.key_prefix cannot be empty"));
        }

        if proxy.request_timeout_ms == 0 {
            return Err(FrameworkError::validation(
                "proxy.request_timeout_ms must be greater than 0",
            ));
        }

        if proxy.heartbeat_secs == 0 {
            return Err(FrameworkError::validation(
                "proxy.heartbeat_secs must be greater than 0",
            ));
        }

        if let Some(address) = &proxy.proxy_address {
            if address.is_empty() {
                return Err(FrameworkError::validation(
                    "proxy.proxy_address cannot be empty",
                ));
            }
        }

        if let Some(address) = &proxy.listen_address {
            if address.parse::<IpAddr>().is_err() {
                return Err(FrameworkError::validation(format!(
                    "proxy.listen_address '{}' is not an IP address",
                    address
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config() {
        let json5 = r#"
        {
            zenoh: {
                mode: "client",
                connect: ["tcp/localhost:7447"],
            },
            proxy: {
                key_prefix: "site-a",
                proxy_address: "192.168.1.200",
                request_timeout_ms: 500,
                gap_fill: null,
                sequential_bound: "exclusive",
            },
            logging: {
                level: "debug",
            },
            serialization: "cbor",
        }
        "#;

        let config = ModbusProxyConfig::parse(json5).unwrap();
        assert_eq!(config.key_prefix(), "site-a");
        assert_eq!(config.proxy.proxy_address.as_deref(), Some("192.168.1.200"));
        assert_eq!(config.proxy.request_timeout(), Duration::from_millis(500));
        assert_eq!(config.proxy.gap_fill(), GapFill::Disabled);
        assert_eq!(config.proxy.sequential_bound, SequentialBound::Exclusive);
        assert_eq!(config.serialization, Format::Cbor);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_defaults() {
        let config = ModbusProxyConfig::parse("{}").unwrap();

        assert_eq!(config.key_prefix(), "modbusproxy");
        assert!(config.proxy.proxy_address.is_none());
        assert_eq!(config.proxy.gap_fill(), GapFill::Value(0));
        assert_eq!(config.proxy.sequential_bound, SequentialBound::Inclusive);
        assert_eq!(config.proxy.heartbeat_interval(), Duration::from_secs(30));
        assert_eq!(config.serialization, Format::Json);
    }

    #[test]
    fn test_validation_errors() {
        for json5 in [
            r#"{ proxy: { key_prefix: "" } }"#,
            r#"{ proxy: { request_timeout_ms: 0 } }"#,
            r#"{ proxy: { heartbeat_secs: 0 } }"#,
            r#"{ proxy: { proxy_address: "" } }"#,
            r#"{ proxy: { listen_address: "not-an-ip" } }"#,
        ] {
            let result = ModbusProxyConfig::parse(json5);
            assert!(
                matches!(result, Err(FrameworkError::ConfigValidation(_))),
                "expected validation failure for {}",
                json5
            );
        }
    }

    #[test]
    fn test_bind_address() {
        let proxy = ProxyIdentity::new("192.168.1.200", 1502);

        let settings = ProxySettings::default();
        assert_eq!(
            settings.bind_address(&proxy).unwrap(),
            "192.168.1.200:1502".parse::<SocketAddr>().unwrap()
        );

        let settings = ProxySettings {
            listen_address: Some("0.0.0.0".to_string()),
            ..Default::default()
        };
        assert_eq!(
            settings.bind_address(&proxy).unwrap(),
            "0.0.0.0:1502".parse::<SocketAddr>().unwrap()
        );
    }
}
