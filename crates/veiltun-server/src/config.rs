// ============================================
// File: crates/veiltun-server/src/config.rs
// ============================================
//! # Server Configuration
//!
//! ## Creation Reason
//! Provides configuration management for the VeilTun endpoint, loaded
//! from a TOML file with defaults for every field.
//!
//! ## Main Functionality
//! - `ServerConfig`: Main configuration structure
//! - TOML file loading and parsing
//! - Configuration validation
//! - `Duration` accessors for the timeout settings
//!
//! ## Configuration Sections
//! - `network`: control (TCP) and datagram (UDP) listen addresses
//! - `tunnel`: address range, gateway, DNS, MTU, routes, feature list
//! - `limits`: connection cap and timeouts
//! - `crypto`: optional master key file
//! - `identity`: static credential → user table
//! - `logging`: Log level
//!
//! ## Example Configuration
//! ```toml
//! [network]
//! stream_addr = "0.0.0.0:7000"
//! datagram_addr = "0.0.0.0:7001"
//!
//! [tunnel]
//! address_range = "10.8.0.0/24"
//! gateway = "10.8.0.1"
//! dns = ["1.1.1.1", "8.8.8.8"]
//! mtu = 1420
//! routes = ["0.0.0.0/0"]
//!
//! [limits]
//! max_connections = 1000
//! handshake_timeout_secs = 30
//! idle_timeout_secs = 300
//!
//! [crypto]
//! key_file = "/etc/veiltun/master_key.json"
//!
//! [identity.tokens]
//! "s3cr3t-token" = "alice"
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - All config changes require server restart
//! - Validate config before server startup
//! - Without `crypto.key_file` a fresh master key is generated on every
//!   start, which invalidates every client's key
//!
//! ## Last Modified
//! v0.1.0 - Initial configuration implementation

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use veiltun_transport::SocketOptions;

use crate::error::{Result, ServerError};
use crate::services::ip_pool::{AddressRange, IpPoolService};

// ============================================
// ServerConfig
// ============================================

/// Main server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen addresses.
    #[serde(default)]
    pub network: NetworkConfig,

    /// Parameters announced to clients in the tunnel configuration.
    #[serde(default)]
    pub tunnel: TunnelSettings,

    /// Resource limits and timeouts.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Master key source.
    #[serde(default)]
    pub crypto: CryptoConfig,

    /// Static credential table.
    #[serde(default)]
    pub identity: IdentityConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ServerConfig {
    /// Loads configuration from a TOML file.
    ///
    /// # Arguments
    /// * `path` - Path to the configuration file
    ///
    /// # Errors
    /// `ConfigLoad` if the file cannot be read or parsed, `ConfigInvalid`
    /// if a value is out of range.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let path_str = path.display().to_string();

        info!(path = %path_str, "Loading configuration");

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ServerError::config_load(&path_str, e.to_string()))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| ServerError::config_load(&path_str, e.to_string()))?;

        config.validate()?;

        info!("Configuration loaded successfully");
        Ok(config)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    /// `ConfigInvalid` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        self.tunnel.validate()?;
        self.limits.validate()?;
        self.identity.validate()?;
        Ok(())
    }

    /// Serializes configuration to TOML string.
    #[must_use]
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }

    /// Time allowed for each handshake receive.
    #[must_use]
    pub const fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.limits.handshake_timeout_secs)
    }

    /// Inactivity after which an established connection is dropped.
    #[must_use]
    pub const fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.limits.idle_timeout_secs)
    }

    /// Period of the idle cleanup task.
    #[must_use]
    pub const fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.limits.cleanup_interval_secs)
    }
}

impl FromStr for ServerConfig {
    type Err = ServerError;

    /// Parses and validates configuration from a TOML string.
    fn from_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| ServerError::config_load("<string>", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}

// ============================================
// NetworkConfig
// ============================================

/// Network configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Control channel (TCP) listen address. Port 0 picks a free port.
    #[serde(default = "default_stream_addr")]
    pub stream_addr: SocketAddr,

    /// Datagram channel (UDP) listen address. Port 0 picks a free port.
    #[serde(default = "default_datagram_addr")]
    pub datagram_addr: SocketAddr,

    /// `SO_RCVBUF` for the datagram socket.
    #[serde(default)]
    pub recv_buffer_size: Option<usize>,

    /// `SO_SNDBUF` for the datagram socket.
    #[serde(default)]
    pub send_buffer_size: Option<usize>,
}

fn default_stream_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 7000))
}

fn default_datagram_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 7001))
}

impl NetworkConfig {
    /// Socket options for the datagram socket.
    #[must_use]
    pub const fn datagram_options(&self) -> SocketOptions {
        SocketOptions {
            recv_buffer_size: self.recv_buffer_size,
            send_buffer_size: self.send_buffer_size,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            stream_addr: default_stream_addr(),
            datagram_addr: default_datagram_addr(),
            recv_buffer_size: None,
            send_buffer_size: None,
        }
    }
}

// ============================================
// TunnelSettings
// ============================================

/// Tunnel parameters handed to every client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunnelSettings {
    /// Client address pool (CIDR notation).
    #[serde(default = "default_address_range")]
    pub address_range: AddressRange,

    /// Server's address inside the tunnel.
    #[serde(default = "default_gateway")]
    pub gateway: Ipv4Addr,

    /// DNS servers announced to clients.
    #[serde(default = "default_dns")]
    pub dns: Vec<IpAddr>,

    /// Tunnel MTU.
    #[serde(default = "default_mtu")]
    pub mtu: u16,

    /// Routes the client should send through the tunnel (CIDR strings).
    #[serde(default = "default_routes")]
    pub routes: Vec<String>,

    /// Feature names advertised in AUTH_RESPONSE.
    #[serde(default = "default_features")]
    pub features: Vec<String>,
}

fn default_address_range() -> AddressRange {
    AddressRange::from_parts(Ipv4Addr::new(10, 8, 0, 0), 24)
}

fn default_gateway() -> Ipv4Addr {
    Ipv4Addr::new(10, 8, 0, 1)
}

fn default_dns() -> Vec<IpAddr> {
    vec![
        IpAddr::V4(Ipv4Addr::new(1, 1, 1, 1)),
        IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8)),
    ]
}

fn default_mtu() -> u16 {
    1420
}

fn default_routes() -> Vec<String> {
    vec!["0.0.0.0/0".to_string()]
}

fn default_features() -> Vec<String> {
    vec!["keepalive".to_string()]
}

impl TunnelSettings {
    fn validate(&self) -> Result<()> {
        if self.mtu < 576 {
            return Err(ServerError::config_invalid("tunnel.mtu", "must be at least 576"));
        }

        if self.mtu > 9000 {
            return Err(ServerError::config_invalid("tunnel.mtu", "cannot exceed 9000"));
        }

        for route in &self.routes {
            route.parse::<AddressRange>().map_err(|_| {
                ServerError::config_invalid("tunnel.routes", format!("'{route}' is not a CIDR block"))
            })?;
        }

        // Surfaces prefix and gateway problems at load time.
        self.build_pool()?;
        Ok(())
    }

    /// Builds the address pool described by this section.
    ///
    /// # Errors
    /// `ConfigInvalid` if the range is unusable or the gateway lies outside it.
    pub fn build_pool(&self) -> Result<IpPoolService> {
        IpPoolService::new(self.address_range, self.gateway)
    }
}

impl Default for TunnelSettings {
    fn default() -> Self {
        Self {
            address_range: default_address_range(),
            gateway: default_gateway(),
            dns: default_dns(),
            mtu: default_mtu(),
            routes: default_routes(),
            features: default_features(),
        }
    }
}

// ============================================
// LimitsConfig
// ============================================

/// Resource limits configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum concurrent established connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Bound on each handshake receive, in seconds.
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_secs: u64,

    /// Inactivity before an established connection expires, in seconds.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// How often the cleanup task scans for idle connections, in seconds.
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,
}

fn default_max_connections() -> usize {
    1000
}

fn default_handshake_timeout() -> u64 {
    30
}

fn default_idle_timeout() -> u64 {
    300
}

fn default_cleanup_interval() -> u64 {
    10
}

impl LimitsConfig {
    fn validate(&self) -> Result<()> {
        if self.max_connections == 0 {
            return Err(ServerError::config_invalid(
                "limits.max_connections",
                "must be greater than 0",
            ));
        }

        for (field, value) in [
            ("limits.handshake_timeout_secs", self.handshake_timeout_secs),
            ("limits.idle_timeout_secs", self.idle_timeout_secs),
            ("limits.cleanup_interval_secs", self.cleanup_interval_secs),
        ] {
            if value == 0 {
                return Err(ServerError::config_invalid(field, "must be greater than 0"));
            }
        }

        Ok(())
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            handshake_timeout_secs: default_handshake_timeout(),
            idle_timeout_secs: default_idle_timeout(),
            cleanup_interval_secs: default_cleanup_interval(),
        }
    }
}

// ============================================
// CryptoConfig
// ============================================

/// Master key configuration section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CryptoConfig {
    /// Key file written by `veiltun-server genkey`. `None` generates an
    /// ephemeral key at startup.
    #[serde(default)]
    pub key_file: Option<PathBuf>,
}

// ============================================
// IdentityConfig
// ============================================

/// Static identity table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Credential → user id.
    #[serde(default)]
    pub tokens: HashMap<String, String>,
}

impl IdentityConfig {
    fn validate(&self) -> Result<()> {
        for (token, user) in &self.tokens {
            if token.trim().is_empty() {
                return Err(ServerError::config_invalid(
                    "identity.tokens",
                    "credential cannot be blank",
                ));
            }
            if user.trim().is_empty() {
                return Err(ServerError::config_invalid(
                    "identity.tokens",
                    "user id cannot be blank",
                ));
            }
        }
        Ok(())
    }
}

// ============================================
// LoggingConfig
// ============================================

/// Logging configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.network.stream_addr.port(), 7000);
        assert_eq!(config.network.datagram_addr.port(), 7001);
        assert_eq!(config.handshake_timeout(), Duration::from_secs(30));
        assert_eq!(config.idle_timeout(), Duration::from_secs(300));
        assert_eq!(config.tunnel.features, vec!["keepalive".to_string()]);
    }

    #[test]
    fn test_full_config_format() {
        let toml = r#"
            [network]
            stream_addr = "127.0.0.1:9000"
            datagram_addr = "127.0.0.1:9001"
            recv_buffer_size = 262144

            [tunnel]
            address_range = "172.20.0.0/16"
            gateway = "172.20.0.1"
            dns = ["9.9.9.9"]
            mtu = 1380
            routes = ["10.0.0.0/8", "192.168.0.0/16"]
            features = ["keepalive", "compression"]

            [limits]
            max_connections = 50
            handshake_timeout_secs = 5
            idle_timeout_secs = 60

            [crypto]
            key_file = "/etc/veiltun/master_key.json"

            [identity.tokens]
            "token-a" = "alice"
            "token-b" = "bob"

            [logging]
            level = "debug"
        "#;

        let config: ServerConfig = toml.parse().unwrap();
        assert_eq!(config.network.stream_addr.port(), 9000);
        assert_eq!(config.network.datagram_options().recv_buffer_size, Some(262_144));
        assert_eq!(config.tunnel.address_range.to_string(), "172.20.0.0/16");
        assert_eq!(config.tunnel.mtu, 1380);
        assert_eq!(config.limits.max_connections, 50);
        assert_eq!(config.handshake_timeout(), Duration::from_secs(5));
        assert_eq!(config.cleanup_interval(), Duration::from_secs(10));
        assert_eq!(
            config.crypto.key_file.as_deref(),
            Some(Path::new("/etc/veiltun/master_key.json"))
        );
        assert_eq!(config.identity.tokens.get("token-b").map(String::as_str), Some("bob"));
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: ServerConfig = "".parse().unwrap();
        assert_eq!(config.limits.max_connections, 1000);
        assert!(config.crypto.key_file.is_none());
        assert!(config.identity.tokens.is_empty());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let cases = [
            "[limits]\nmax_connections = 0",
            "[limits]\nhandshake_timeout_secs = 0",
            "[limits]\nidle_timeout_secs = 0",
            "[tunnel]\nmtu = 100",
            "[tunnel]\nmtu = 10000",
            "[tunnel]\nroutes = [\"default\"]",
            "[tunnel]\ngateway = \"192.168.1.1\"",
            "[tunnel]\naddress_range = \"10.0.0.0/8\"",
            "[identity.tokens]\n\"  \" = \"alice\"",
        ];

        for case in cases {
            let err = case.parse::<ServerConfig>().unwrap_err();
            assert!(err.is_config_error(), "{case}: {err}");
        }
    }

    #[test]
    fn test_malformed_toml() {
        let err = "[network\nstream_addr = 1".parse::<ServerConfig>().unwrap_err();
        assert!(matches!(err, ServerError::ConfigLoad { .. }));

        let err = "[tunnel]\naddress_range = \"10.8.0.0\""
            .parse::<ServerConfig>()
            .unwrap_err();
        assert!(err.is_config_error());
    }

    #[test]
    fn test_toml_round_trip() {
        let mut config = ServerConfig::default();
        config.identity.tokens.insert("t".into(), "u".into());

        let reparsed: ServerConfig = config.to_toml().parse().unwrap();
        assert_eq!(reparsed.tunnel.address_range, config.tunnel.address_range);
        assert_eq!(reparsed.identity.tokens, config.identity.tokens);
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let err = ServerConfig::load("/nonexistent/veiltun.toml").await.unwrap_err();
        assert!(matches!(err, ServerError::ConfigLoad { .. }));
    }
}
