//! # Configuration Management
//!
//! This module handles loading and managing application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix, `__` between nesting levels)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Platform variables (`HOST`, `PORT`, `AWS_REGION`, `NOVA_SONIC_MODEL_ID`)
//! 2. Environment variables (`APP_SERVER__PORT`, `APP_UPSTREAM__ENDPOINT`, etc.)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)
//!
//! ## Why `__` as the separator:
//! Field names such as `model_id` and `max_concurrent_sessions` contain single
//! underscores, so `APP_UPSTREAM_MODEL_ID` could not be split unambiguously.

use crate::error::AppResult;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Main application configuration that contains all settings.
///
/// ## Why separate config structs:
/// Each group maps to one concern: the HTTP listener, the upstream
/// translation engine, and per-session behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    pub session: SessionConfig,
}

/// Server-specific configuration settings.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: Only accept connections from localhost (development)
/// - `host = "0.0.0.0"`: Accept connections from any IP address (containers, App Runner)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Where and how to reach the speech-to-speech translation engine.
///
/// ## Fields:
/// - `endpoint`: WebSocket URL of the streaming bridge in front of the engine
/// - `model_id`: Engine model identifier, forwarded as the `model` query parameter
/// - `region`: Engine region, forwarded as the `region` query parameter
/// - `connect_timeout_ms`: Upper bound on opening the upstream stream
/// - `outbound_buffer`: Frames that may queue towards the engine before senders wait
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    pub endpoint: String,
    pub model_id: String,
    pub region: String,
    pub connect_timeout_ms: u64,
    pub outbound_buffer: usize,
}

/// Per-session behavior.
///
/// ## Fields:
/// - `default_source` / `default_target`: Language tags used when the client omits them
/// - `max_concurrent_sessions`: Upgrades beyond this count are refused with 503
/// - `heartbeat_interval_secs`: How often the server pings the client socket
/// - `client_timeout_secs`: Client silence after which the socket is dropped
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub default_source: String,
    pub default_target: String,
    pub max_concurrent_sessions: usize,
    pub heartbeat_interval_secs: u64,
    pub client_timeout_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8000,
            },
            upstream: UpstreamConfig {
                endpoint: "ws://127.0.0.1:9000/v1/stream".to_string(),
                model_id: "amazon.nova-sonic-v1:0".to_string(),
                region: "us-east-1".to_string(),
                connect_timeout_ms: 5000,
                outbound_buffer: 64,
            },
            session: SessionConfig {
                default_source: "en-US".to_string(),
                default_target: "es-US".to_string(),
                max_concurrent_sessions: 10,
                heartbeat_interval_secs: 30,
                client_timeout_secs: 60,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__HOST=127.0.0.1`: Override server host
    /// - `APP_UPSTREAM__ENDPOINT=wss://bridge.internal/v1/stream`: Point at another bridge
    /// - `APP_SESSION__MAX_CONCURRENT_SESSIONS=50`: Raise the session cap
    /// - `PORT=3000`, `AWS_REGION=eu-west-1`: Deployment platform conventions
    pub fn load() -> AppResult<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        let overrides = [
            ("HOST", "server.host"),
            ("PORT", "server.port"),
            ("AWS_REGION", "upstream.region"),
            ("NOVA_SONIC_MODEL_ID", "upstream.model_id"),
        ];
        for (var, key) in overrides {
            if let Ok(value) = env::var(var) {
                settings = settings.set_override(key, value)?;
            }
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if !(self.upstream.endpoint.starts_with("ws://") || self.upstream.endpoint.starts_with("wss://")) {
            return Err(anyhow::anyhow!(
                "Upstream endpoint must be a ws:// or wss:// URL, got '{}'",
                self.upstream.endpoint
            ));
        }

        if self.upstream.connect_timeout_ms == 0 {
            return Err(anyhow::anyhow!("Upstream connect timeout must be greater than 0"));
        }

        if self.upstream.outbound_buffer == 0 {
            return Err(anyhow::anyhow!("Upstream outbound buffer must be greater than 0"));
        }

        if self.session.max_concurrent_sessions == 0 {
            return Err(anyhow::anyhow!("Max concurrent sessions must be greater than 0"));
        }

        if self.session.client_timeout_secs <= self.session.heartbeat_interval_secs {
            return Err(anyhow::anyhow!(
                "Client timeout ({}s) must be greater than the heartbeat interval ({}s)",
                self.session.client_timeout_secs,
                self.session.heartbeat_interval_secs
            ));
        }

        Ok(())
    }
}

impl UpstreamConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl SessionConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn client_timeout(&self) -> Duration {
        Duration::from_secs(self.client_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Test that the default configuration is valid and has expected values.
    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.upstream.model_id, "amazon.nova-sonic-v1:0");
        assert_eq!(config.session.default_source, "en-US");
        assert_eq!(config.session.default_target, "es-US");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.upstream.endpoint = "http://127.0.0.1:9000".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.session.max_concurrent_sessions = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_client_timeout_must_exceed_heartbeat() {
        let mut config = AppConfig::default();
        config.session.heartbeat_interval_secs = 30;
        config.session.client_timeout_secs = 30;
        assert!(config.validate().is_err());

        config.session.client_timeout_secs = 31;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_duration_helpers() {
        let config = AppConfig::default();
        assert_eq!(config.upstream.connect_timeout(), Duration::from_millis(5000));
        assert_eq!(config.session.heartbeat_interval(), Duration::from_secs(30));
        assert_eq!(config.session.client_timeout(), Duration::from_secs(60));
    }
}
