//! Credential store capabilities
//!
//! The authenticators only see these traits. `signet-db` provides the
//! Postgres implementations; the in-memory versions here back tests and
//! single-node development.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{AuthError, AuthResult};
use crate::types::{ApiKey, CertificateRecord};

/// Persistent storage for API keys
#[async_trait]
pub trait ApiKeyRepository: Send + Sync {
    /// Insert a new key; an existing id or prefix is an error
    async fn create(&self, key: &ApiKey) -> AuthResult<()>;

    /// Find a key by its public lookup prefix
    async fn get_by_prefix(&self, prefix: &str) -> AuthResult<Option<ApiKey>>;

    async fn get_by_id(&self, id: Uuid) -> AuthResult<Option<ApiKey>>;

    /// All keys of an organization, newest first
    async fn list_by_org(&self, org_id: Uuid) -> AuthResult<Vec<ApiKey>>;

    /// Set `revoked_at`; returns false if the key does not exist
    async fn revoke(&self, id: Uuid, at: DateTime<Utc>) -> AuthResult<bool>;

    /// Hard delete; returns false if the key does not exist
    async fn delete(&self, id: Uuid) -> AuthResult<bool>;

    /// Best-effort last-use bookkeeping
    async fn touch_last_used(&self, id: Uuid, at: DateTime<Utc>) -> AuthResult<()>;
}

/// Registered client certificates
#[async_trait]
pub trait CertificateRepository: Send + Sync {
    /// Find a certificate by lowercase hex SHA-256 fingerprint
    async fn get_by_fingerprint(&self, fingerprint: &str) -> AuthResult<Option<CertificateRecord>>;

    /// Register a certificate; an existing fingerprint is an error
    async fn register(&self, record: &CertificateRecord) -> AuthResult<()>;

    async fn list_by_org(&self, org_id: Uuid) -> AuthResult<Vec<CertificateRecord>>;

    /// Set `revoked_at`; returns false if the fingerprint is unknown
    async fn revoke(&self, fingerprint: &str, at: DateTime<Utc>) -> AuthResult<bool>;
}

// =============================================================================
// In-memory implementations
// =============================================================================

/// API key store held in process memory
#[derive(Clone, Default)]
pub struct InMemoryApiKeyRepository {
    keys: Arc<RwLock<HashMap<Uuid, ApiKey>>>,
}

impl InMemoryApiKeyRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ApiKeyRepository for InMemoryApiKeyRepository {
    async fn create(&self, key: &ApiKey) -> AuthResult<()> {
        let mut keys = self.keys.write().await;
        if keys.contains_key(&key.id) || keys.values().any(|k| k.key_prefix == key.key_prefix) {
            return Err(AuthError::Internal(format!(
                "duplicate API key prefix {}",
                key.key_prefix
            )));
        }
        keys.insert(key.id, key.clone());
        Ok(())
    }

    async fn get_by_prefix(&self, prefix: &str) -> AuthResult<Option<ApiKey>> {
        let keys = self.keys.read().await;
        Ok(keys.values().find(|k| k.key_prefix == prefix).cloned())
    }

    async fn get_by_id(&self, id: Uuid) -> AuthResult<Option<ApiKey>> {
        Ok(self.keys.read().await.get(&id).cloned())
    }

    async fn list_by_org(&self, org_id: Uuid) -> AuthResult<Vec<ApiKey>> {
        let keys = self.keys.read().await;
        let mut out: Vec<ApiKey> = keys.values().filter(|k| k.org_id == org_id).cloned().collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }

    async fn revoke(&self, id: Uuid, at: DateTime<Utc>) -> AuthResult<bool> {
        let mut keys = self.keys.write().await;
        match keys.get_mut(&id) {
            Some(key) => {
                key.revoked_at = Some(at);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, id: Uuid) -> AuthResult<bool> {
        Ok(self.keys.write().await.remove(&id).is_some())
    }

    async fn touch_last_used(&self, id: Uuid, at: DateTime<Utc>) -> AuthResult<()> {
        if let Some(key) = self.keys.write().await.get_mut(&id) {
            key.last_used_at = Some(at);
        }
        Ok(())
    }
}

/// Certificate registry held in process memory
#[derive(Clone, Default)]
pub struct InMemoryCertificateRepository {
    certs: Arc<RwLock<HashMap<String, CertificateRecord>>>,
}

impl InMemoryCertificateRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CertificateRepository for InMemoryCertificateRepository {
    async fn get_by_fingerprint(&self, fingerprint: &str) -> AuthResult<Option<CertificateRecord>> {
        Ok(self.certs.read().await.get(fingerprint).cloned())
    }

    async fn register(&self, record: &CertificateRecord) -> AuthResult<()> {
        let mut certs = self.certs.write().await;
        if certs.contains_key(&record.fingerprint) {
            return Err(AuthError::Internal(format!(
                "duplicate certificate {}",
                record.fingerprint
            )));
        }
        certs.insert(record.fingerprint.clone(), record.clone());
        Ok(())
    }

    async fn list_by_org(&self, org_id: Uuid) -> AuthResult<Vec<CertificateRecord>> {
        let certs = self.certs.read().await;
        let mut out: Vec<CertificateRecord> =
            certs.values().filter(|c| c.org_id == org_id).cloned().collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }

    async fn revoke(&self, fingerprint: &str, at: DateTime<Utc>) -> AuthResult<bool> {
        let mut certs = self.certs.write().await;
        match certs.get_mut(fingerprint) {
            Some(record) => {
                record.revoked_at = Some(at);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample_key(org_id: Uuid, prefix: &str, created_at: DateTime<Utc>) -> ApiKey {
        ApiKey {
            id: Uuid::new_v4(),
            org_id,
            user_id: None,
            name: "deploy".to_string(),
            key_prefix: prefix.to_string(),
            key_hash: String::new(),
            scopes: vec!["keys:read".to_string()],
            last_used_at: None,
            expires_at: None,
            revoked_at: None,
            created_at,
        }
    }

    #[tokio::test]
    async fn test_api_key_crud() {
        let repo = InMemoryApiKeyRepository::new();
        let org = Uuid::new_v4();
        let now = Utc::now();
        let older = sample_key(org, "psk_live_aaaaaaaa", now - Duration::days(1));
        let newer = sample_key(org, "psk_live_bbbbbbbb", now);
        repo.create(&older).await.unwrap();
        repo.create(&newer).await.unwrap();
        repo.create(&sample_key(Uuid::new_v4(), "psk_live_cccccccc", now))
            .await
            .unwrap();

        let found = repo.get_by_prefix("psk_live_bbbbbbbb").await.unwrap().unwrap();
        assert_eq!(found.id, newer.id);
        assert!(repo.get_by_prefix("psk_live_zzzzzzzz").await.unwrap().is_none());

        let listed = repo.list_by_org(org).await.unwrap();
        assert_eq!(
            listed.iter().map(|k| k.id).collect::<Vec<_>>(),
            vec![newer.id, older.id]
        );

        assert!(repo.revoke(older.id, now).await.unwrap());
        assert!(repo.get_by_id(older.id).await.unwrap().unwrap().is_revoked());
        assert!(!repo.revoke(Uuid::new_v4(), now).await.unwrap());

        repo.touch_last_used(newer.id, now).await.unwrap();
        assert_eq!(repo.get_by_id(newer.id).await.unwrap().unwrap().last_used_at, Some(now));

        assert!(repo.delete(newer.id).await.unwrap());
        assert!(!repo.delete(newer.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_api_key_duplicates_rejected() {
        let repo = InMemoryApiKeyRepository::new();
        let org = Uuid::new_v4();
        let key = sample_key(org, "psk_live_aaaaaaaa", Utc::now());
        repo.create(&key).await.unwrap();

        let same_id = repo.create(&key).await;
        assert!(matches!(same_id, Err(AuthError::Internal(msg)) if msg.starts_with("duplicate")));

        let same_prefix = sample_key(org, "psk_live_aaaaaaaa", Utc::now());
        assert!(matches!(repo.create(&same_prefix).await, Err(AuthError::Internal(_))));

        // The original row is untouched
        assert_eq!(repo.list_by_org(org).await.unwrap().len(), 1);
        assert_eq!(
            repo.get_by_prefix("psk_live_aaaaaaaa").await.unwrap().unwrap().id,
            key.id
        );
    }

    #[tokio::test]
    async fn test_certificate_registry() {
        let repo = InMemoryCertificateRepository::new();
        let now = Utc::now();
        let record = CertificateRecord {
            fingerprint: "ab".repeat(32),
            org_id: Uuid::new_v4(),
            name: "hsm-client".to_string(),
            revoked_at: None,
            expires_at: now + Duration::days(365),
            created_at: now,
        };
        repo.register(&record).await.unwrap();

        let found = repo.get_by_fingerprint(&record.fingerprint).await.unwrap().unwrap();
        assert_eq!(found.org_id, record.org_id);
        assert_eq!(repo.list_by_org(record.org_id).await.unwrap().len(), 1);

        assert!(repo.revoke(&record.fingerprint, now).await.unwrap());
        assert!(repo
            .get_by_fingerprint(&record.fingerprint)
            .await
            .unwrap()
            .unwrap()
            .is_revoked());
        assert!(repo.get_by_fingerprint("00").await.unwrap().is_none());

        let again = CertificateRecord {
            org_id: Uuid::new_v4(),
            ..record.clone()
        };
        let duplicate = repo.register(&again).await;
        assert!(matches!(duplicate, Err(AuthError::Internal(msg)) if msg.starts_with("duplicate")));
        assert_eq!(
            repo.get_by_fingerprint(&record.fingerprint).await.unwrap().unwrap().org_id,
            record.org_id
        );
    }
}
