//! Gateway Configuration
//!
//! Configuration management for the Signet gateway.
//! Supports config files, `SIGNET__` environment variables, and CLI arguments.

use serde::{Deserialize, Serialize};
use signet_auth::AuthConfig;
use signet_db::DatabaseConfig;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Gateway configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Server binding configuration
    pub server: ServerSettings,

    /// TLS listener configuration
    pub tls: TlsSettings,

    /// Credential store backend
    pub store: StoreSettings,

    /// Database configuration (postgres backend)
    pub database: DatabaseConfig,

    /// Authentication configuration
    pub auth: AuthConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Metrics configuration
    pub metrics: MetricsConfig,
}

/// Server binding settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Request timeout in seconds
    pub request_timeout_secs: u64,

    /// Shutdown timeout in seconds
    pub shutdown_timeout_secs: u64,

    /// Maximum request body size in bytes
    pub max_body_size: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8545,
            request_timeout_secs: 30,
            shutdown_timeout_secs: 30,
            max_body_size: 1024 * 1024, // 1MB
        }
    }
}

impl ServerSettings {
    /// Get the socket address to bind to
    pub fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid socket address {}:{}: {}", self.host, self.port, e))
    }

    /// Get the request timeout duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Get the shutdown timeout duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// TLS listener settings
///
/// The client certificate policy itself lives in `auth.mtls.client_auth`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsSettings {
    /// Enable TLS
    pub enabled: bool,

    /// Server certificate chain (PEM)
    pub cert: Option<PathBuf>,

    /// Server private key (PEM)
    pub key: Option<PathBuf>,

    /// CA bundle for verifying client certificates (PEM)
    pub client_ca: Option<PathBuf>,
}

/// Credential store backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// PostgreSQL via signet-db
    #[default]
    Postgres,
    /// Process memory; development only
    Memory,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub backend: StoreBackend,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (json, pretty)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Enable the Prometheus exporter
    pub enabled: bool,

    /// Metrics port (separate from main server)
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 9090,
        }
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

impl GatewayConfig {
    /// Load configuration from environment and optional config file
    pub fn load(config_path: Option<&str>) -> anyhow::Result<Self> {
        let mut builder = config::Config::builder();

        // Add config file if specified
        if let Some(path) = config_path {
            builder = builder.add_source(config::File::with_name(path).required(true));
        }

        // Add default config locations
        builder = builder
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name("config/local").required(false));

        // Add environment variables with SIGNET__ prefix
        builder = builder.add_source(
            config::Environment::with_prefix("SIGNET")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: GatewayConfig = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = self.auth.validate().err().unwrap_or_default();

        if self.tls.enabled {
            if self.tls.cert.is_none() || self.tls.key.is_none() {
                errors.push("TLS is enabled but certificate or key path is not set".to_string());
            }
            if self.auth.mtls.client_auth.verifies_chain() && self.tls.client_ca.is_none() {
                errors.push(format!(
                    "Client auth mode {} requires tls.client_ca",
                    self.auth.mtls.client_auth
                ));
            }
        } else if self.auth.mtls.client_auth.is_mandatory() {
            errors.push(format!(
                "Client auth mode {} requires TLS to be enabled",
                self.auth.mtls.client_auth
            ));
        }

        if self.server.max_body_size == 0 {
            errors.push("Maximum body size must be positive".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Create a configuration for development/testing
    pub fn development() -> Self {
        Self {
            store: StoreSettings {
                backend: StoreBackend::Memory,
            },
            logging: LoggingConfig {
                level: "debug".to_string(),
                format: "pretty".to_string(),
            },
            ..Default::default()
        }
    }
}
