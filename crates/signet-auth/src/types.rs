//! Core authentication types
//!
//! Shared types used across all authentication components.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::codec::Environment;

// =============================================================================
// API Key Types
// =============================================================================

/// Stored API key record
///
/// The hash never leaves the process: it is skipped by serde and redacted
/// from `Debug` output.
#[derive(Clone, Serialize, Deserialize)]
pub struct ApiKey {
    pub id: Uuid,
    pub org_id: Uuid,
    /// Creator, if the key was created on behalf of a user
    pub user_id: Option<Uuid>,
    pub name: String,
    /// Public lookup prefix, `psk_<env>_<first 8 secret chars>`
    pub key_prefix: String,
    /// Argon2id PHC string of the full raw key
    #[serde(skip)]
    pub key_hash: String,
    pub scopes: Vec<String>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ApiKey {
    /// Not revoked and not past its expiry at `now`
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.revoked_at.is_none() && self.expires_at.map_or(true, |expires| expires > now)
    }

    /// Not revoked and not expired right now
    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now())
    }

    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiKey")
            .field("id", &self.id)
            .field("org_id", &self.org_id)
            .field("user_id", &self.user_id)
            .field("name", &self.name)
            .field("key_prefix", &self.key_prefix)
            .field("key_hash", &"[REDACTED]")
            .field("scopes", &self.scopes)
            .field("last_used_at", &self.last_used_at)
            .field("expires_at", &self.expires_at)
            .field("revoked_at", &self.revoked_at)
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// API key info for listing (without secrets)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyView {
    pub id: Uuid,
    pub org_id: Uuid,
    pub user_id: Option<Uuid>,
    pub name: String,
    pub key_prefix: String,
    pub scopes: Vec<String>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub is_valid: bool,
}

impl From<&ApiKey> for ApiKeyView {
    fn from(key: &ApiKey) -> Self {
        Self {
            id: key.id,
            org_id: key.org_id,
            user_id: key.user_id,
            name: key.name.clone(),
            key_prefix: key.key_prefix.clone(),
            scopes: key.scopes.clone(),
            last_used_at: key.last_used_at,
            expires_at: key.expires_at,
            revoked_at: key.revoked_at,
            created_at: key.created_at,
            is_valid: key.is_valid(),
        }
    }
}

/// Request to create a new API key
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateApiKeyRequest {
    pub name: String,
    pub scopes: Vec<String>,
    /// Days until expiry; `None` never expires
    pub expires_in_days: Option<i64>,
    /// Defaults to the configured environment
    pub environment: Option<Environment>,
    pub user_id: Option<Uuid>,
}

/// Freshly created API key
///
/// The raw key appears here and nowhere else.
#[derive(Clone, Serialize)]
pub struct CreatedApiKey {
    #[serde(flatten)]
    pub key: ApiKeyView,
    pub raw_key: String,
    pub warning: String,
}

impl std::fmt::Debug for CreatedApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CreatedApiKey")
            .field("key", &self.key)
            .field("raw_key", &"[REDACTED]")
            .finish()
    }
}

// =============================================================================
// Certificate Types
// =============================================================================

/// Registered client certificate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateRecord {
    /// Lowercase hex SHA-256 of the DER encoding
    pub fingerprint: String,
    pub org_id: Uuid,
    pub name: String,
    pub revoked_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Revocation and expiry flags, evaluated independently
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CertificateStatus {
    pub revoked: bool,
    pub expired: bool,
}

impl CertificateRecord {
    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn status_at(&self, now: DateTime<Utc>) -> CertificateStatus {
        CertificateStatus {
            revoked: self.is_revoked(),
            expired: self.is_expired_at(now),
        }
    }
}

// =============================================================================
// Identity Types
// =============================================================================

/// Authentication method used
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    /// `Authorization`/`X-API-Key` header
    ApiKey,
    /// TLS client certificate
    Mtls,
}

impl AuthMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ApiKey => "api_key",
            Self::Mtls => "mtls",
        }
    }
}

impl std::fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authenticated organization, as a request extension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrgId(pub Uuid);

/// API key that authenticated the request, as a request extension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApiKeyId(pub Uuid);

/// Fingerprint of the client certificate that authenticated the request
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CertFingerprint(pub String);

/// Result of a successful authentication
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthOutcome {
    pub org_id: Uuid,
    pub method: AuthMethod,
    /// Truncated credential, safe to log
    pub identifier: String,
    pub api_key_id: Option<Uuid>,
    pub cert_fingerprint: Option<String>,
}

impl AuthOutcome {
    pub fn from_api_key(key: &ApiKey, raw_key: &str) -> Self {
        Self {
            org_id: key.org_id,
            method: AuthMethod::ApiKey,
            identifier: truncate_identifier(raw_key, 12),
            api_key_id: Some(key.id),
            cert_fingerprint: None,
        }
    }

    pub fn from_certificate(org_id: Uuid, fingerprint: String) -> Self {
        Self {
            org_id,
            method: AuthMethod::Mtls,
            identifier: truncate_identifier(&fingerprint, 16),
            api_key_id: None,
            cert_fingerprint: Some(fingerprint),
        }
    }
}

/// First `len` characters, followed by `...` when anything was cut
///
/// Counts characters, not bytes, so arbitrary header input cannot split a
/// code point.
pub fn truncate_identifier(value: &str, len: usize) -> String {
    let mut chars = value.chars();
    let mut out: String = chars.by_ref().take(len).collect();
    if chars.next().is_some() {
        out.push_str("...");
    }
    out
}
