//! Authentication error types
//!
//! Errors are designed to be:
//! - Informative for logging/debugging
//! - Safe for external exposure (no sensitive data leakage)
//! - Convertible to HTTP status codes and JSON-RPC error codes

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::mtls::CertAuthError;

/// Result type alias for authentication operations
pub type AuthResult<T> = Result<T, AuthError>;

/// JSON-RPC code for authentication failures
pub const RPC_UNAUTHORIZED: i32 = -32001;
/// JSON-RPC code for scope/role failures
pub const RPC_FORBIDDEN: i32 = -32003;
/// JSON-RPC code for quota rejections
pub const RPC_RATE_LIMITED: i32 = -32029;

/// Coarse classification of an [`AuthError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Unauthorized,
    Forbidden,
    /// Store outage or timeout; never reported to callers as a bad credential
    Transient,
    RateLimited,
    Validation,
    NotFound,
    Conflict,
    Internal,
}

/// Authentication error types
#[derive(Debug, Error)]
pub enum AuthError {
    // =========================================================================
    // Credential Errors
    // =========================================================================
    /// Neither an API key nor a client certificate was presented
    #[error("No credentials presented")]
    MissingCredentials,

    /// No API key header was present
    #[error("API key required")]
    MissingApiKey,

    /// Malformed, unknown, mismatched, revoked or expired API key
    #[error("Invalid API key")]
    InvalidApiKey,

    /// Client certificate was rejected
    #[error("Certificate rejected: {0}")]
    Certificate(#[from] CertAuthError),

    // =========================================================================
    // Permission Errors
    // =========================================================================
    /// Authenticated key lacks every accepted scope
    #[error("API key missing required scope")]
    MissingScope,

    /// Member role is below the required level
    #[error("Insufficient role: requires {required}")]
    InsufficientRole {
        /// Name of the role that was required
        required: &'static str,
    },

    /// User is not a member of the organization
    #[error("Not a member of this organization")]
    NotAMember,

    // =========================================================================
    // Rate Limiting Errors
    // =========================================================================
    /// Per-organization quota exhausted
    #[error("Rate limit exceeded, try again in {retry_after} seconds")]
    RateLimitExceeded {
        /// Seconds until the window frees a slot
        retry_after: u64,
    },

    // =========================================================================
    // Validation Errors
    // =========================================================================
    /// Unknown scope at key creation
    #[error("Invalid scope: {0}")]
    InvalidScope(String),

    /// No scopes given at key creation
    #[error("At least one scope is required")]
    EmptyScopes,

    /// Blank or overlong key name
    #[error("Invalid key name: {0}")]
    InvalidName(String),

    /// Unknown key environment
    #[error("Invalid environment: {0}")]
    InvalidEnvironment(String),

    /// Expiry must be a positive number of days
    #[error("Invalid expiry: {0}")]
    InvalidExpiry(String),

    // =========================================================================
    // API Key Lifecycle Errors
    // =========================================================================
    /// API key not found (or owned by another organization)
    #[error("API key not found")]
    ApiKeyNotFound,

    /// API key was revoked earlier
    #[error("API key already revoked")]
    ApiKeyAlreadyRevoked,

    // =========================================================================
    // Transient Errors
    // =========================================================================
    /// Credential store failed
    #[error("Credential store unavailable: {0}")]
    StoreUnavailable(String),

    /// Credential store did not answer in time
    #[error("Credential store lookup timed out")]
    Timeout,

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// OS random source failed; never retried
    #[error("Entropy source unavailable")]
    EntropyUnavailable,

    /// Argon2 parameters rejected or hashing failed
    #[error("Credential hashing failed: {0}")]
    Hashing(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error (should not be exposed to clients)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AuthError {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingCredentials | Self::MissingApiKey | Self::InvalidApiKey => {
                ErrorKind::Unauthorized
            }
            Self::Certificate(err) if err.is_transient() => ErrorKind::Transient,
            Self::Certificate(_) => ErrorKind::Unauthorized,

            Self::MissingScope | Self::InsufficientRole { .. } | Self::NotAMember => {
                ErrorKind::Forbidden
            }

            Self::RateLimitExceeded { .. } => ErrorKind::RateLimited,

            Self::InvalidScope(_)
            | Self::EmptyScopes
            | Self::InvalidName(_)
            | Self::InvalidEnvironment(_)
            | Self::InvalidExpiry(_) => ErrorKind::Validation,

            Self::ApiKeyNotFound => ErrorKind::NotFound,
            Self::ApiKeyAlreadyRevoked => ErrorKind::Conflict,

            Self::StoreUnavailable(_) | Self::Timeout => ErrorKind::Transient,

            Self::EntropyUnavailable | Self::Hashing(_) | Self::Config(_) | Self::Internal(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// Whether a retry could succeed without the caller changing anything
    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self.kind() {
            ErrorKind::Validation => 400,
            ErrorKind::Unauthorized => 401,
            ErrorKind::Forbidden => 403,
            ErrorKind::NotFound => 404,
            ErrorKind::Conflict => 409,
            ErrorKind::RateLimited => 429,
            ErrorKind::Internal => 500,
            ErrorKind::Transient => 503,
        }
    }

    /// Get the JSON-RPC error code for this error
    pub fn rpc_code(&self) -> i32 {
        match self.kind() {
            ErrorKind::Unauthorized => RPC_UNAUTHORIZED,
            ErrorKind::Forbidden => RPC_FORBIDDEN,
            ErrorKind::RateLimited => RPC_RATE_LIMITED,
            ErrorKind::Validation => -32602,
            ErrorKind::NotFound => -32004,
            ErrorKind::Conflict => -32009,
            ErrorKind::Transient => -32000,
            ErrorKind::Internal => -32603,
        }
    }

    /// Get an error code for the client (safe to expose)
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::MissingCredentials => "UNAUTHENTICATED",
            Self::MissingApiKey => "API_KEY_REQUIRED",
            Self::InvalidApiKey => "INVALID_API_KEY",
            Self::Certificate(_) => "INVALID_CERTIFICATE",
            Self::MissingScope => "API_KEY_PERMISSION_DENIED",
            Self::InsufficientRole { .. } => "INSUFFICIENT_ROLE",
            Self::NotAMember => "NOT_A_MEMBER",
            Self::RateLimitExceeded { .. } => "RATE_LIMIT_EXCEEDED",
            Self::InvalidScope(_) => "INVALID_SCOPE",
            Self::EmptyScopes => "INVALID_SCOPE",
            Self::InvalidName(_) => "INVALID_NAME",
            Self::InvalidEnvironment(_) => "INVALID_ENVIRONMENT",
            Self::InvalidExpiry(_) => "INVALID_EXPIRY",
            Self::ApiKeyNotFound => "API_KEY_NOT_FOUND",
            Self::ApiKeyAlreadyRevoked => "API_KEY_ALREADY_REVOKED",
            Self::StoreUnavailable(_) | Self::Timeout => "SERVICE_UNAVAILABLE",
            Self::EntropyUnavailable | Self::Hashing(_) | Self::Config(_) | Self::Internal(_) => {
                "INTERNAL_ERROR"
            }
        }
    }

    /// Check if this error should be logged at error level
    pub fn is_server_error(&self) -> bool {
        self.status_code() >= 500
    }

    /// Get safe message for client (doesn't leak internal details)
    pub fn client_message(&self) -> String {
        match self.kind() {
            ErrorKind::Unauthorized => "Unauthorized".to_string(),
            ErrorKind::Transient => "Service temporarily unavailable".to_string(),
            ErrorKind::Internal => "An internal error occurred".to_string(),
            _ => self.to_string(),
        }
    }

    /// Create a rate limit error with retry-after duration
    pub fn rate_limited(duration: std::time::Duration) -> Self {
        Self::RateLimitExceeded {
            retry_after: duration.as_secs().max(1),
        }
    }
}

impl From<argon2::password_hash::Error> for AuthError {
    fn from(err: argon2::password_hash::Error) -> Self {
        Self::Hashing(err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for AuthError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Self::Timeout
    }
}

/// JSON-RPC error object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
}

/// JSON-RPC error envelope returned on rejected requests
///
/// Serializes as `{"jsonrpc":"2.0","error":{"code":..,"message":".."},"id":null}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcErrorResponse {
    pub jsonrpc: String,
    pub error: RpcError,
    pub id: Option<serde_json::Value>,
}

impl RpcErrorResponse {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            error: RpcError {
                code,
                message: message.into(),
            },
            id: None,
        }
    }
}

impl From<&AuthError> for RpcErrorResponse {
    fn from(error: &AuthError) -> Self {
        Self::new(error.rpc_code(), error.client_message())
    }
}
