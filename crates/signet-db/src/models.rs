//! Database models - mapped from PostgreSQL tables

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use signet_auth::{ApiKey, CertificateRecord};
use sqlx::FromRow;
use uuid::Uuid;

// ============================================================================
// API Key Models
// ============================================================================

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DbApiKey {
    pub id: Uuid,
    pub org_id: Uuid,
    pub user_id: Option<Uuid>,
    pub name: String,
    pub key_prefix: String,
    pub key_hash: String,
    pub scopes: serde_json::Value,
    pub last_used_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl DbApiKey {
    /// Unknown scope entries are dropped rather than failing the row
    pub fn into_api_key(self) -> ApiKey {
        let scopes = match self.scopes {
            serde_json::Value::Array(items) => items
                .into_iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect(),
            _ => Vec::new(),
        };

        ApiKey {
            id: self.id,
            org_id: self.org_id,
            user_id: self.user_id,
            name: self.name,
            key_prefix: self.key_prefix,
            key_hash: self.key_hash,
            scopes,
            last_used_at: self.last_used_at,
            expires_at: self.expires_at,
            revoked_at: self.revoked_at,
            created_at: self.created_at,
        }
    }
}

// ============================================================================
// Client Certificate Models
// ============================================================================

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DbClientCertificate {
    pub fingerprint: String,
    pub org_id: Uuid,
    pub name: String,
    pub revoked_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl From<DbClientCertificate> for CertificateRecord {
    fn from(row: DbClientCertificate) -> Self {
        CertificateRecord {
            fingerprint: row.fingerprint,
            org_id: row.org_id,
            name: row.name,
            revoked_at: row.revoked_at,
            expires_at: row.expires_at,
            created_at: row.created_at,
        }
    }
}
