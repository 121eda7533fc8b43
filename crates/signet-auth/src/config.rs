//! Authentication configuration
//!
//! Centralized configuration for all authentication components with
//! secure defaults.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

use crate::codec::Environment;
use crate::error::{AuthError, AuthResult};

/// Main authentication configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Credential hashing configuration
    pub hasher: HasherConfig,
    /// API key configuration
    pub api_key: ApiKeyConfig,
    /// Client certificate configuration
    pub mtls: MtlsConfig,
    /// Per-organization quota configuration
    pub quota: QuotaConfig,
}

/// Credential hashing configuration (Argon2id)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HasherConfig {
    /// Memory cost in KiB
    pub memory_cost: u32,
    /// Time cost (iterations)
    pub time_cost: u32,
    /// Parallelism factor
    pub parallelism: u32,
    /// Output hash length in bytes
    pub hash_length: usize,
    /// Salt length in bytes
    pub salt_length: usize,
}

impl Default for HasherConfig {
    fn default() -> Self {
        Self {
            memory_cost: 64 * 1024, // 64 MiB
            time_cost: 1,
            parallelism: 4,
            hash_length: 32,
            salt_length: 16,
        }
    }
}

/// API key configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiKeyConfig {
    /// Environment used when a create request names none
    pub default_environment: Environment,
    /// Upper bound on a single store lookup
    #[serde(with = "humantime_serde")]
    pub lookup_timeout: Duration,
    /// Scopes accepted by the signing gate; any one suffices
    pub required_scopes: Vec<String>,
    /// Maximum key name length in characters
    pub max_name_length: usize,
    /// Record last use after each successful validation
    pub track_last_used: bool,
}

impl Default for ApiKeyConfig {
    fn default() -> Self {
        Self {
            default_environment: Environment::Live,
            lookup_timeout: Duration::from_secs(2),
            required_scopes: vec!["keys:sign:evm".to_string(), "keys:sign".to_string()],
            max_name_length: 255,
            track_last_used: true,
        }
    }
}

/// Client certificate configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MtlsConfig {
    /// Accept client certificates at the gate
    pub enabled: bool,
    /// Upper bound on a single store lookup
    #[serde(with = "humantime_serde")]
    pub lookup_timeout: Duration,
    /// TLS-level client certificate policy
    pub client_auth: ClientAuthMode,
}

impl Default for MtlsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            lookup_timeout: Duration::from_secs(2),
            client_auth: ClientAuthMode::default(),
        }
    }
}

/// Per-organization request quota
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaConfig {
    /// Enable quota enforcement
    pub enabled: bool,
    /// Requests allowed per window per organization
    pub requests_per_window: u32,
    /// Window duration
    #[serde(with = "humantime_serde")]
    pub window: Duration,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_window: 600, // 10/sec
            window: Duration::from_secs(60),
        }
    }
}

/// TLS client certificate policy
///
/// Parsing is lenient: unknown names fall back to
/// [`ClientAuthMode::VerifyClientCertIfGiven`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "&'static str")]
pub enum ClientAuthMode {
    /// Never ask for a client certificate
    NoClientCert,
    /// Ask, accept anything or nothing
    RequestClientCert,
    /// Require a certificate, do not verify its chain
    RequireAnyClientCert,
    /// Verify the chain when a certificate is sent
    #[default]
    VerifyClientCertIfGiven,
    /// Require a certificate with a verified chain
    RequireAndVerifyClientCert,
}

impl ClientAuthMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoClientCert => "NoClientCert",
            Self::RequestClientCert => "RequestClientCert",
            Self::RequireAnyClientCert => "RequireAnyClientCert",
            Self::VerifyClientCertIfGiven => "VerifyClientCertIfGiven",
            Self::RequireAndVerifyClientCert => "RequireAndVerifyClientCert",
        }
    }

    /// Whether the handshake fails without a client certificate
    pub fn is_mandatory(&self) -> bool {
        matches!(
            self,
            Self::RequireAnyClientCert | Self::RequireAndVerifyClientCert
        )
    }

    /// Whether presented chains are verified against the client CA roots
    pub fn verifies_chain(&self) -> bool {
        matches!(
            self,
            Self::VerifyClientCertIfGiven | Self::RequireAndVerifyClientCert
        )
    }
}

impl FromStr for ClientAuthMode {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .flat_map(char::to_lowercase)
            .collect();

        Ok(match normalized.as_str() {
            "noclientcert" => Self::NoClientCert,
            "requestclientcert" => Self::RequestClientCert,
            "requireanyclientcert" => Self::RequireAnyClientCert,
            "requireandverifyclientcert" => Self::RequireAndVerifyClientCert,
            _ => Self::VerifyClientCertIfGiven,
        })
    }
}

impl From<String> for ClientAuthMode {
    fn from(s: String) -> Self {
        match s.parse() {
            Ok(mode) => mode,
            Err(never) => match never {},
        }
    }
}

impl From<ClientAuthMode> for &'static str {
    fn from(mode: ClientAuthMode) -> Self {
        mode.as_str()
    }
}

impl std::fmt::Display for ClientAuthMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn env_duration(name: &str) -> AuthResult<Option<Duration>> {
    match std::env::var(name) {
        Ok(value) => humantime_serde::re::humantime::parse_duration(&value)
            .map(Some)
            .map_err(|e| AuthError::Config(format!("{name}: {e}"))),
        Err(_) => Ok(None),
    }
}

fn env_parse<T: FromStr>(name: &str) -> AuthResult<Option<T>> {
    match std::env::var(name) {
        Ok(value) => value
            .parse()
            .map(Some)
            .map_err(|_| AuthError::Config(format!("{name}: invalid value {value:?}"))),
        Err(_) => Ok(None),
    }
}

impl AuthConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> AuthResult<Self> {
        let mut config = Self::default();

        // Hasher cost
        if let Some(memory) = env_parse("SIGNET_ARGON2_MEMORY_KIB")? {
            config.hasher.memory_cost = memory;
        }
        if let Some(time) = env_parse("SIGNET_ARGON2_TIME_COST")? {
            config.hasher.time_cost = time;
        }
        if let Some(parallelism) = env_parse("SIGNET_ARGON2_PARALLELISM")? {
            config.hasher.parallelism = parallelism;
        }

        // API keys
        if let Some(env) = env_parse::<Environment>("SIGNET_API_KEY_ENV")? {
            config.api_key.default_environment = env;
        }
        if let Some(timeout) = env_duration("SIGNET_LOOKUP_TIMEOUT")? {
            config.api_key.lookup_timeout = timeout;
            config.mtls.lookup_timeout = timeout;
        }

        // mTLS
        if let Ok(mode) = std::env::var("SIGNET_CLIENT_AUTH") {
            config.mtls.client_auth = ClientAuthMode::from(mode);
        }

        // Quota
        if let Some(limit) = env_parse("SIGNET_QUOTA_REQUESTS")? {
            config.quota.requests_per_window = limit;
        }
        if let Some(window) = env_duration("SIGNET_QUOTA_WINDOW")? {
            config.quota.window = window;
        }

        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        // Hasher validation
        if self.hasher.time_cost < 1 {
            errors.push("Argon2 time cost must be at least 1".to_string());
        }
        if self.hasher.parallelism < 1 {
            errors.push("Argon2 parallelism must be at least 1".to_string());
        }
        if self.hasher.memory_cost < 8 * self.hasher.parallelism {
            errors.push("Argon2 memory cost must be at least 8 KiB per lane".to_string());
        }
        if self.hasher.hash_length < 16 {
            errors.push("Hash length should be at least 128 bits (16 bytes)".to_string());
        }
        if self.hasher.salt_length < 16 {
            errors.push("Salt length should be at least 128 bits (16 bytes)".to_string());
        }
        if self.hasher.salt_length > 48 {
            errors.push("Salt length must be at most 48 bytes".to_string());
        }

        // API key validation
        if self.api_key.lookup_timeout.is_zero() {
            errors.push("API key lookup timeout must be non-zero".to_string());
        }
        if self.api_key.required_scopes.is_empty() {
            errors.push("At least one required signing scope must be configured".to_string());
        }
        if self.api_key.max_name_length == 0 {
            errors.push("Maximum key name length must be non-zero".to_string());
        }

        // mTLS validation
        if self.mtls.enabled && self.mtls.lookup_timeout.is_zero() {
            errors.push("Certificate lookup timeout must be non-zero".to_string());
        }

        // Quota validation
        if self.quota.enabled {
            if self.quota.requests_per_window == 0 {
                errors.push("Quota requests per window must be non-zero".to_string());
            }
            if self.quota.window.is_zero() {
                errors.push("Quota window must be non-zero".to_string());
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
