//! API key repository

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use signet_auth::{ApiKey, ApiKeyRepository, AuthResult};
use sqlx::PgPool;
use uuid::Uuid;

use crate::{DbApiKey, DbError, DbResult};

const API_KEY_COLUMNS: &str = "id, org_id, user_id, name, key_prefix, key_hash, scopes, \
                               last_used_at, expires_at, revoked_at, created_at";

/// Postgres-backed API key store
#[derive(Clone)]
pub struct PgApiKeyRepository {
    pool: PgPool,
}

impl PgApiKeyRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a new key
    pub async fn insert(&self, key: &ApiKey) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO api_keys
                (id, org_id, user_id, name, key_prefix, key_hash, scopes, expires_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(key.id)
        .bind(key.org_id)
        .bind(key.user_id)
        .bind(&key.name)
        .bind(&key.key_prefix)
        .bind(&key.key_hash)
        .bind(serde_json::to_value(&key.scopes)?)
        .bind(key.expires_at)
        .bind(key.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e {
                if db_err.constraint() == Some("api_keys_key_prefix_key") {
                    return DbError::Duplicate(format!("API key prefix {}", key.key_prefix));
                }
            }
            DbError::Query(e)
        })?;

        Ok(())
    }

    /// Find a key by lookup prefix
    pub async fn find_by_prefix(&self, prefix: &str) -> DbResult<Option<ApiKey>> {
        let row = sqlx::query_as::<_, DbApiKey>(&format!(
            "SELECT {} FROM api_keys WHERE key_prefix = $1",
            API_KEY_COLUMNS
        ))
        .bind(prefix)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(DbApiKey::into_api_key))
    }

    /// Find a key by ID
    pub async fn find_by_id(&self, id: Uuid) -> DbResult<Option<ApiKey>> {
        let row = sqlx::query_as::<_, DbApiKey>(&format!(
            "SELECT {} FROM api_keys WHERE id = $1",
            API_KEY_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(DbApiKey::into_api_key))
    }

    /// All keys of an organization, newest first
    pub async fn find_by_org(&self, org_id: Uuid) -> DbResult<Vec<ApiKey>> {
        let rows = sqlx::query_as::<_, DbApiKey>(&format!(
            "SELECT {} FROM api_keys WHERE org_id = $1 ORDER BY created_at DESC",
            API_KEY_COLUMNS
        ))
        .bind(org_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(DbApiKey::into_api_key).collect())
    }

    /// Mark a key revoked
    pub async fn set_revoked(&self, id: Uuid, at: DateTime<Utc>) -> DbResult<bool> {
        let result = sqlx::query("UPDATE api_keys SET revoked_at = $2 WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Delete a key
    pub async fn remove(&self, id: Uuid) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM api_keys WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Update last used timestamp
    pub async fn set_last_used(&self, id: Uuid, at: DateTime<Utc>) -> DbResult<()> {
        sqlx::query("UPDATE api_keys SET last_used_at = $2 WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

#[async_trait]
impl ApiKeyRepository for PgApiKeyRepository {
    async fn create(&self, key: &ApiKey) -> AuthResult<()> {
        Ok(self.insert(key).await?)
    }

    async fn get_by_prefix(&self, prefix: &str) -> AuthResult<Option<ApiKey>> {
        Ok(self.find_by_prefix(prefix).await?)
    }

    async fn get_by_id(&self, id: Uuid) -> AuthResult<Option<ApiKey>> {
        Ok(self.find_by_id(id).await?)
    }

    async fn list_by_org(&self, org_id: Uuid) -> AuthResult<Vec<ApiKey>> {
        Ok(self.find_by_org(org_id).await?)
    }

    async fn revoke(&self, id: Uuid, at: DateTime<Utc>) -> AuthResult<bool> {
        Ok(self.set_revoked(id, at).await?)
    }

    async fn delete(&self, id: Uuid) -> AuthResult<bool> {
        Ok(self.remove(id).await?)
    }

    async fn touch_last_used(&self, id: Uuid, at: DateTime<Utc>) -> AuthResult<()> {
        Ok(self.set_last_used(id, at).await?)
    }
}
