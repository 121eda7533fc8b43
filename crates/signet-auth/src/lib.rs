//! Signet Authentication Layer
//!
//! Authentication and authorization for the Signet signing gateway. Every
//! request is resolved to exactly one organization through:
//!
//! - **API Keys**: `psk_<env>_<secret>` bearer keys, Argon2id-hashed at rest
//! - **mTLS**: registered client certificates with an `org:<uuid>` subject CN
//! - **Scopes**: closed scope set with a `*` wildcard
//! - **Roles**: viewer < operator < admin < owner
//! - **Quotas**: per-organization sliding-window request limits
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Authentication Flow                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  TLS accept → AuthGate → QuotaLayer → Handler               │
//! │                  │                                           │
//! │          ┌───────┴────────┐                                  │
//! │          ▼                ▼                                  │
//! │    API key header    PeerCertificates                        │
//! │          │                │                                  │
//! │          ▼                ▼                                  │
//! │    ApiKeyService    MtlsAuthenticator                        │
//! │     + scope check         │                                  │
//! │          └───────┬────────┘                                  │
//! │                  ▼                                           │
//! │             AuthOutcome                                      │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod api_key;
pub mod authz;
pub mod codec;
pub mod config;
pub mod error;
pub mod gate;
pub mod hasher;
pub mod mtls;
pub mod quota;
pub mod repository;
pub mod types;

pub use api_key::{ApiKeyService, KeyValidator};
pub use authz::{check_access, has_any_scope, has_scope, require_role, Role, RoleResolver, Scope};
pub use codec::Environment;
pub use config::{AuthConfig, ClientAuthMode};
pub use error::{AuthError, AuthResult, ErrorKind};
pub use gate::{
    ApiKeyOnlyLayer, AuthGateMiddleware, DualAuthLayer, MtlsOnlyLayer, OptionalAuth, RequireAuth,
    RequireOrg,
};
pub use hasher::CredentialHasher;
pub use mtls::{CertAuthError, MtlsAuthenticator, PeerCertificates};
pub use quota::{QuotaLayer, QuotaLimiter};
pub use repository::{ApiKeyRepository, CertificateRepository};
pub use types::*;

use std::sync::Arc;

/// Main authentication service combining all auth methods
#[derive(Clone)]
pub struct AuthService {
    pub api_keys: ApiKeyService,
    pub mtls: MtlsAuthenticator,
    pub quota: QuotaLimiter,
    config: AuthConfig,
}

impl AuthService {
    /// Create a new auth service over the given credential stores
    pub fn new(
        config: AuthConfig,
        api_key_repo: Arc<dyn ApiKeyRepository>,
        cert_repo: Arc<dyn CertificateRepository>,
    ) -> Self {
        let hasher = CredentialHasher::new(config.hasher.clone());
        let api_keys = ApiKeyService::new(api_key_repo, hasher, config.api_key.clone());
        let mtls = MtlsAuthenticator::new(cert_repo, config.mtls.clone());
        let quota = QuotaLimiter::new(config.quota.clone());

        Self {
            api_keys,
            mtls,
            quota,
            config,
        }
    }

    /// Get the config reference
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// API key or client certificate, with the configured signing scopes
    pub fn dual_auth_layer(&self) -> DualAuthLayer {
        DualAuthLayer::new(
            Arc::new(self.api_keys.clone()),
            self.mtls.clone(),
            self.config.api_key.required_scopes.clone(),
        )
    }

    /// API key only, with the configured signing scopes
    pub fn api_key_layer(&self) -> ApiKeyOnlyLayer {
        ApiKeyOnlyLayer::new(
            Arc::new(self.api_keys.clone()),
            self.config.api_key.required_scopes.clone(),
        )
    }

    /// Client certificate only
    pub fn mtls_layer(&self) -> MtlsOnlyLayer {
        MtlsOnlyLayer::new(self.mtls.clone())
    }

    /// Per-organization quota enforcement
    pub fn quota_layer(&self) -> QuotaLayer {
        QuotaLayer::new(self.quota.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{InMemoryApiKeyRepository, InMemoryCertificateRepository};

    #[test]
    fn test_auth_service_creation() {
        let service = AuthService::new(
            AuthConfig::default(),
            Arc::new(InMemoryApiKeyRepository::new()),
            Arc::new(InMemoryCertificateRepository::new()),
        );

        assert_eq!(service.config().api_key.required_scopes.len(), 2);
        assert!(service.quota.is_enabled() == service.config().quota.enabled);
        let _ = service.dual_auth_layer();
    }
}
