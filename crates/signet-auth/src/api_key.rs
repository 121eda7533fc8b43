//! API Key Service
//!
//! Key lifecycle and authentication. Features:
//! - `psk_<env>_<secret>` keys with 192 bits of OS entropy
//! - Argon2id hashes with per-key salt; the raw key is never stored
//! - Prefix-indexed lookup, so validation costs one hash check
//! - Scope validation at creation against the closed scope set
//! - Best-effort last-used tracking off the request path

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tokio::time::timeout;
use uuid::Uuid;

use crate::authz::validate_scopes;
use crate::codec::{generate_key, parse_key};
use crate::config::ApiKeyConfig;
use crate::error::{AuthError, AuthResult};
use crate::hasher::CredentialHasher;
use crate::repository::ApiKeyRepository;
use crate::types::{ApiKey, ApiKeyView, CreateApiKeyRequest, CreatedApiKey};

/// Longest accepted expiry, in days
const MAX_EXPIRY_DAYS: i64 = 3650;

const CREATED_KEY_WARNING: &str =
    "Store this key securely. It will not be shown again.";

/// Turns a raw key into its stored record, or fails
#[async_trait]
pub trait KeyValidator: Send + Sync {
    async fn validate(&self, raw_key: &str) -> AuthResult<ApiKey>;
}

/// API key service for authentication and key management
#[derive(Clone)]
pub struct ApiKeyService {
    repo: Arc<dyn ApiKeyRepository>,
    hasher: CredentialHasher,
    config: ApiKeyConfig,
}

impl ApiKeyService {
    /// Create a new API key service
    pub fn new(
        repo: Arc<dyn ApiKeyRepository>,
        hasher: CredentialHasher,
        config: ApiKeyConfig,
    ) -> Self {
        Self {
            repo,
            hasher,
            config,
        }
    }

    pub fn config(&self) -> &ApiKeyConfig {
        &self.config
    }

    /// Authenticate a raw key
    ///
    /// Malformed, unknown, mismatched, revoked and expired keys all fail
    /// with [`AuthError::InvalidApiKey`]. Store outages and timeouts surface
    /// as transient errors instead.
    pub async fn validate(&self, raw_key: &str) -> AuthResult<ApiKey> {
        let parsed = parse_key(raw_key).map_err(|reason| {
            tracing::debug!(reason = %reason, "API key failed format check");
            AuthError::InvalidApiKey
        })?;
        let prefix = parsed.lookup_prefix();

        let record = timeout(self.config.lookup_timeout, self.repo.get_by_prefix(&prefix))
            .await
            .map_err(|_| {
                tracing::error!(prefix = %prefix, "API key lookup timed out");
                AuthError::Timeout
            })?
            .map_err(|e| {
                tracing::error!(prefix = %prefix, error = %e, "API key lookup failed");
                e
            })?;

        let Some(record) = record else {
            tracing::debug!(prefix = %prefix, "API key prefix not found");
            return Err(AuthError::InvalidApiKey);
        };

        if !self.hasher.verify_blocking(raw_key, &record.key_hash).await {
            tracing::debug!(key_id = %record.id, "API key hash mismatch");
            return Err(AuthError::InvalidApiKey);
        }

        if !record.is_valid_at(Utc::now()) {
            tracing::debug!(
                key_id = %record.id,
                revoked = record.is_revoked(),
                "API key revoked or expired"
            );
            return Err(AuthError::InvalidApiKey);
        }

        if self.config.track_last_used {
            let repo = self.repo.clone();
            let key_id = record.id;
            tokio::spawn(async move {
                if let Err(e) = repo.touch_last_used(key_id, Utc::now()).await {
                    tracing::debug!(key_id = %key_id, error = %e, "Failed to record API key use");
                }
            });
        }

        Ok(record)
    }

    /// Create a key for `org_id`
    ///
    /// The returned value is the only place the raw key ever appears.
    pub async fn create(
        &self,
        org_id: Uuid,
        request: CreateApiKeyRequest,
    ) -> AuthResult<CreatedApiKey> {
        let name = request.name.trim();
        if name.is_empty() {
            return Err(AuthError::InvalidName("name is required".to_string()));
        }
        if name.chars().count() > self.config.max_name_length {
            return Err(AuthError::InvalidName(format!(
                "name must be at most {} characters",
                self.config.max_name_length
            )));
        }

        let scopes = validate_scopes(&request.scopes)?;
        let environment = request
            .environment
            .unwrap_or(self.config.default_environment);

        let now = Utc::now();
        let expires_at = match request.expires_in_days {
            None => None,
            Some(days) if days <= 0 || days > MAX_EXPIRY_DAYS => {
                return Err(AuthError::InvalidExpiry(format!(
                    "expires_in_days must be between 1 and {}",
                    MAX_EXPIRY_DAYS
                )));
            }
            Some(days) => Some(now + Duration::days(days)),
        };

        let generated = generate_key(environment)?;
        let key_hash = self.hasher.hash_blocking(&generated.raw_key).await?;

        let key = ApiKey {
            id: Uuid::new_v4(),
            org_id,
            user_id: request.user_id,
            name: name.to_string(),
            key_prefix: generated.lookup_prefix.clone(),
            key_hash,
            scopes,
            last_used_at: None,
            expires_at,
            revoked_at: None,
            created_at: now,
        };

        self.repo.create(&key).await?;

        tracing::info!(
            key_id = %key.id,
            org_id = %org_id,
            prefix = %key.key_prefix,
            environment = %environment,
            "API key created"
        );

        Ok(CreatedApiKey {
            key: ApiKeyView::from(&key),
            raw_key: generated.raw_key.to_string(),
            warning: CREATED_KEY_WARNING.to_string(),
        })
    }

    /// All keys of an organization, newest first
    pub async fn list(&self, org_id: Uuid) -> AuthResult<Vec<ApiKeyView>> {
        let keys = self.repo.list_by_org(org_id).await?;
        Ok(keys.iter().map(ApiKeyView::from).collect())
    }

    /// One key; keys of other organizations are reported as not found
    pub async fn get(&self, org_id: Uuid, key_id: Uuid) -> AuthResult<ApiKeyView> {
        self.owned_key(org_id, key_id)
            .await
            .map(|key| ApiKeyView::from(&key))
    }

    /// Revoke a key; revoking twice is a conflict
    pub async fn revoke(&self, org_id: Uuid, key_id: Uuid) -> AuthResult<()> {
        let key = self.owned_key(org_id, key_id).await?;
        if key.is_revoked() {
            return Err(AuthError::ApiKeyAlreadyRevoked);
        }

        if !self.repo.revoke(key_id, Utc::now()).await? {
            return Err(AuthError::ApiKeyNotFound);
        }

        tracing::info!(key_id = %key_id, org_id = %org_id, "API key revoked");
        Ok(())
    }

    /// Permanently remove a key
    pub async fn delete(&self, org_id: Uuid, key_id: Uuid) -> AuthResult<()> {
        self.owned_key(org_id, key_id).await?;

        if !self.repo.delete(key_id).await? {
            return Err(AuthError::ApiKeyNotFound);
        }

        tracing::info!(key_id = %key_id, org_id = %org_id, "API key deleted");
        Ok(())
    }

    async fn owned_key(&self, org_id: Uuid, key_id: Uuid) -> AuthResult<ApiKey> {
        match self.repo.get_by_id(key_id).await? {
            Some(key) if key.org_id == org_id => Ok(key),
            _ => Err(AuthError::ApiKeyNotFound),
        }
    }
}

#[async_trait]
impl KeyValidator for ApiKeyService {
    async fn validate(&self, raw_key: &str) -> AuthResult<ApiKey> {
        ApiKeyService::validate(self, raw_key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Environment;
    use crate::config::HasherConfig;
    use crate::repository::InMemoryApiKeyRepository;
    use chrono::DateTime;

    fn test_hasher() -> CredentialHasher {
        CredentialHasher::new(HasherConfig {
            memory_cost: 1024,
            time_cost: 1,
            parallelism: 1,
            hash_length: 32,
            salt_length: 16,
        })
    }

    fn test_service() -> (ApiKeyService, InMemoryApiKeyRepository) {
        let repo = InMemoryApiKeyRepository::new();
        let service = ApiKeyService::new(
            Arc::new(repo.clone()),
            test_hasher(),
            ApiKeyConfig::default(),
        );
        (service, repo)
    }

    fn request(name: &str, scopes: &[&str]) -> CreateApiKeyRequest {
        CreateApiKeyRequest {
            name: name.to_string(),
            scopes: scopes.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    /// Repository whose every call fails or hangs
    struct BrokenRepo {
        hang: bool,
    }

    #[async_trait]
    impl ApiKeyRepository for BrokenRepo {
        async fn create(&self, _key: &ApiKey) -> AuthResult<()> {
            Err(AuthError::StoreUnavailable("down".to_string()))
        }

        async fn get_by_prefix(&self, _prefix: &str) -> AuthResult<Option<ApiKey>> {
            if self.hang {
                std::future::pending::<()>().await;
            }
            Err(AuthError::StoreUnavailable("down".to_string()))
        }

        async fn get_by_id(&self, _id: Uuid) -> AuthResult<Option<ApiKey>> {
            Err(AuthError::StoreUnavailable("down".to_string()))
        }

        async fn list_by_org(&self, _org_id: Uuid) -> AuthResult<Vec<ApiKey>> {
            Err(AuthError::StoreUnavailable("down".to_string()))
        }

        async fn revoke(&self, _id: Uuid, _at: DateTime<Utc>) -> AuthResult<bool> {
            Err(AuthError::StoreUnavailable("down".to_string()))
        }

        async fn delete(&self, _id: Uuid) -> AuthResult<bool> {
            Err(AuthError::StoreUnavailable("down".to_string()))
        }

        async fn touch_last_used(&self, _id: Uuid, _at: DateTime<Utc>) -> AuthResult<()> {
            Err(AuthError::StoreUnavailable("down".to_string()))
        }
    }

    #[tokio::test]
    async fn test_create_and_validate() {
        let (service, _repo) = test_service();
        let org = Uuid::new_v4();

        let created = service
            .create(org, request("ci signer", &["keys:sign"]))
            .await
            .unwrap();
        assert!(created.raw_key.starts_with("psk_live_"));
        assert!(created.raw_key.starts_with(&created.key.key_prefix));
        assert_eq!(created.key.scopes, vec!["keys:sign".to_string()]);
        assert!(created.key.is_valid);

        let key = service.validate(&created.raw_key).await.unwrap();
        assert_eq!(key.org_id, org);
        assert_eq!(key.id, created.key.id);
    }

    #[tokio::test]
    async fn test_validate_records_last_use() {
        let (service, repo) = test_service();
        let created = service
            .create(Uuid::new_v4(), request("ci", &["keys:sign"]))
            .await
            .unwrap();

        service.validate(&created.raw_key).await.unwrap();

        let mut touched = false;
        for _ in 0..50 {
            tokio::task::yield_now().await;
            let key = repo.get_by_id(created.key.id).await.unwrap().unwrap();
            if key.last_used_at.is_some() {
                touched = true;
                break;
            }
        }
        assert!(touched);
    }

    #[tokio::test]
    async fn test_validate_rejections_are_uniform() {
        let (service, _repo) = test_service();
        let org = Uuid::new_v4();
        let created = service
            .create(org, request("ci", &["keys:sign"]))
            .await
            .unwrap();

        // Malformed
        assert!(matches!(
            service.validate("not-a-key").await,
            Err(AuthError::InvalidApiKey)
        ));

        // Right prefix, wrong remainder
        let mut tampered = created.raw_key.clone();
        let last = tampered.pop().unwrap();
        tampered.push(if last == 'A' { 'B' } else { 'A' });
        assert!(matches!(
            service.validate(&tampered).await,
            Err(AuthError::InvalidApiKey)
        ));

        // Revoked
        service.revoke(org, created.key.id).await.unwrap();
        assert!(matches!(
            service.validate(&created.raw_key).await,
            Err(AuthError::InvalidApiKey)
        ));
    }

    #[tokio::test]
    async fn test_expired_key_rejected() {
        let (service, repo) = test_service();
        let created = service
            .create(Uuid::new_v4(), request("ci", &["keys:sign"]))
            .await
            .unwrap();

        let mut key = repo.get_by_id(created.key.id).await.unwrap().unwrap();
        key.expires_at = Some(Utc::now() - Duration::seconds(1));
        repo.delete(key.id).await.unwrap();
        repo.create(&key).await.unwrap();

        assert!(matches!(
            service.validate(&created.raw_key).await,
            Err(AuthError::InvalidApiKey)
        ));
    }

    #[tokio::test]
    async fn test_store_failure_is_transient() {
        let service = ApiKeyService::new(
            Arc::new(BrokenRepo { hang: false }),
            test_hasher(),
            ApiKeyConfig::default(),
        );
        let raw = format!("psk_live_{}", "A".repeat(crate::codec::SECRET_LEN));
        let err = service.validate(&raw).await.unwrap_err();
        assert!(err.is_transient());
        assert!(!matches!(err, AuthError::InvalidApiKey));
    }

    #[tokio::test(start_paused = true)]
    async fn test_lookup_timeout() {
        let service = ApiKeyService::new(
            Arc::new(BrokenRepo { hang: true }),
            test_hasher(),
            ApiKeyConfig::default(),
        );
        let raw = format!("psk_test_{}", "z".repeat(crate::codec::SECRET_LEN));
        assert!(matches!(
            service.validate(&raw).await,
            Err(AuthError::Timeout)
        ));
    }

    #[tokio::test]
    async fn test_create_validation() {
        let (service, _repo) = test_service();
        let org = Uuid::new_v4();

        assert!(matches!(
            service.create(org, request("   ", &["keys:read"])).await,
            Err(AuthError::InvalidName(_))
        ));
        assert!(matches!(
            service.create(org, request(&"n".repeat(256), &["keys:read"])).await,
            Err(AuthError::InvalidName(_))
        ));
        assert!(service
            .create(org, request(&"n".repeat(255), &["keys:read"]))
            .await
            .is_ok());
        assert!(matches!(
            service.create(org, request("ci", &[])).await,
            Err(AuthError::EmptyScopes)
        ));
        assert!(matches!(
            service.create(org, request("ci", &["keys:sign:evm"])).await,
            Err(AuthError::InvalidScope(_))
        ));

        let mut req = request("ci", &["keys:read"]);
        req.expires_in_days = Some(0);
        assert!(matches!(
            service.create(org, req).await,
            Err(AuthError::InvalidExpiry(_))
        ));
    }

    #[tokio::test]
    async fn test_create_with_expiry_and_environment() {
        let (service, _repo) = test_service();
        let mut req = request("staging", &["*", "keys:read", "*"]);
        req.expires_in_days = Some(30);
        req.environment = Some(Environment::Test);

        let created = service.create(Uuid::new_v4(), req).await.unwrap();
        assert!(created.raw_key.starts_with("psk_test_"));
        assert_eq!(created.key.scopes, vec!["*".to_string(), "keys:read".to_string()]);
        let expires = created.key.expires_at.unwrap();
        assert!(expires > Utc::now() + Duration::days(29));
    }

    #[tokio::test]
    async fn test_list_get_revoke_delete() {
        let (service, _repo) = test_service();
        let org = Uuid::new_v4();
        let other_org = Uuid::new_v4();

        let a = service.create(org, request("a", &["keys:read"])).await.unwrap();
        let _b = service.create(org, request("b", &["keys:read"])).await.unwrap();
        service
            .create(other_org, request("c", &["keys:read"]))
            .await
            .unwrap();

        assert_eq!(service.list(org).await.unwrap().len(), 2);
        assert_eq!(service.get(org, a.key.id).await.unwrap().name, "a");

        // Cross-org access looks like a missing key
        assert!(matches!(
            service.get(other_org, a.key.id).await,
            Err(AuthError::ApiKeyNotFound)
        ));
        assert!(matches!(
            service.revoke(other_org, a.key.id).await,
            Err(AuthError::ApiKeyNotFound)
        ));

        service.revoke(org, a.key.id).await.unwrap();
        assert!(matches!(
            service.revoke(org, a.key.id).await,
            Err(AuthError::ApiKeyAlreadyRevoked)
        ));
        assert!(!service.get(org, a.key.id).await.unwrap().is_valid);

        service.delete(org, a.key.id).await.unwrap();
        assert!(matches!(
            service.get(org, a.key.id).await,
            Err(AuthError::ApiKeyNotFound)
        ));
        assert_eq!(service.list(org).await.unwrap().len(), 1);
    }

    #[test]
    fn test_created_key_debug_redacts() {
        let created = CreatedApiKey {
            key: ApiKeyView {
                id: Uuid::nil(),
                org_id: Uuid::nil(),
                user_id: None,
                name: "x".to_string(),
                key_prefix: "psk_live_abcdefgh".to_string(),
                scopes: vec![],
                last_used_at: None,
                expires_at: None,
                revoked_at: None,
                created_at: Utc::now(),
                is_valid: true,
            },
            raw_key: "psk_live_supersecret".to_string(),
            warning: CREATED_KEY_WARNING.to_string(),
        };
        assert!(!format!("{:?}", created).contains("supersecret"));
    }
}
