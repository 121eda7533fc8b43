//! Credential Hasher
//!
//! Argon2id hashing for API key secrets. Features:
//! - Per-credential 16-byte salt from the OS random source
//! - Self-describing PHC output (`$argon2id$v=19$m=..,t=..,p=..$salt$digest`)
//! - Verification recomputes with the encoded parameters, so cost changes
//!   never invalidate existing keys
//! - Constant-time digest comparison

use std::sync::Arc;

use argon2::{
    password_hash::{
        rand_core::{OsRng, RngCore},
        PasswordHash, PasswordHasher, SaltString,
    },
    Algorithm, Argon2, Params, Version,
};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::config::HasherConfig;
use crate::error::{AuthError, AuthResult};

type Comparator = Arc<dyn Fn(&[u8], &[u8]) -> bool + Send + Sync>;

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

/// Argon2id hasher for API key secrets
#[derive(Clone)]
pub struct CredentialHasher {
    config: HasherConfig,
    compare: Comparator,
}

impl CredentialHasher {
    /// Create a new credential hasher
    pub fn new(config: HasherConfig) -> Self {
        Self {
            config,
            compare: Arc::new(constant_time_eq),
        }
    }

    #[cfg(test)]
    fn with_comparator(config: HasherConfig, compare: Comparator) -> Self {
        Self { config, compare }
    }

    pub fn config(&self) -> &HasherConfig {
        &self.config
    }

    /// Hash a secret with a fresh random salt
    ///
    /// Two calls with the same input produce different strings. Fails with
    /// [`AuthError::EntropyUnavailable`] if the OS random source fails.
    pub fn hash(&self, secret: &str) -> AuthResult<String> {
        let mut salt_bytes = Zeroizing::new(vec![0u8; self.config.salt_length]);
        OsRng
            .try_fill_bytes(&mut salt_bytes)
            .map_err(|_| AuthError::EntropyUnavailable)?;
        let salt = SaltString::encode_b64(&salt_bytes)?;

        let params = Params::new(
            self.config.memory_cost,
            self.config.time_cost,
            self.config.parallelism,
            Some(self.config.hash_length),
        )
        .map_err(|e| AuthError::Hashing(format!("Invalid Argon2 params: {}", e)))?;

        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
        let hash = argon2.hash_password(secret.as_bytes(), &salt)?;

        Ok(hash.to_string())
    }

    /// Verify a secret against an encoded hash
    ///
    /// Never errors: malformed, foreign-algorithm or corrupted encodings
    /// all verify as `false`.
    pub fn verify(&self, secret: &str, encoded: &str) -> bool {
        self.try_verify(secret, encoded).unwrap_or(false)
    }

    fn try_verify(&self, secret: &str, encoded: &str) -> Option<bool> {
        let parsed = PasswordHash::new(encoded).ok()?;
        if parsed.algorithm.as_str() != Algorithm::Argon2id.as_str() {
            return None;
        }

        let version = match parsed.version {
            Some(v) => Version::try_from(v).ok()?,
            None => Version::V0x13,
        };
        let params = Params::try_from(&parsed).ok()?;

        let mut salt_buf = [0u8; 64];
        let salt = parsed.salt?.decode_b64(&mut salt_buf).ok()?;
        let expected = parsed.hash?;

        let mut computed = Zeroizing::new(vec![0u8; expected.len()]);
        Argon2::new(Algorithm::Argon2id, version, params)
            .hash_password_into(secret.as_bytes(), salt, &mut computed)
            .ok()?;

        Some((self.compare)(&computed, expected.as_bytes()))
    }

    /// [`hash`](Self::hash) on the blocking pool
    pub async fn hash_blocking(&self, secret: &str) -> AuthResult<String> {
        let hasher = self.clone();
        let secret = Zeroizing::new(secret.to_string());
        tokio::task::spawn_blocking(move || hasher.hash(&secret))
            .await
            .map_err(|e| AuthError::Internal(format!("hash task failed: {}", e)))?
    }

    /// [`verify`](Self::verify) on the blocking pool
    pub async fn verify_blocking(&self, secret: &str, encoded: &str) -> bool {
        let hasher = self.clone();
        let secret = Zeroizing::new(secret.to_string());
        let encoded = encoded.to_string();
        tokio::task::spawn_blocking(move || hasher.verify(&secret, &encoded))
            .await
            .unwrap_or(false)
    }
}

impl std::fmt::Debug for CredentialHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialHasher")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn test_config() -> HasherConfig {
        HasherConfig {
            // Use lower values for tests to be fast
            memory_cost: 1024,
            time_cost: 1,
            parallelism: 1,
            hash_length: 32,
            salt_length: 16,
        }
    }

    #[test]
    fn test_hash_and_verify() {
        let hasher = CredentialHasher::new(test_config());
        let secret = "psk_live_4kQ9zRt2bX7mN1pL8sV3cW6yH0jF5dG2a";

        let hash = hasher.hash(secret).unwrap();
        assert!(hash.starts_with("$argon2id$v=19$m=1024,t=1,p=1$"));

        assert!(hasher.verify(secret, &hash));
        assert!(!hasher.verify("psk_live_wrong", &hash));
    }

    #[test]
    fn test_default_params_encoded() {
        let hasher = CredentialHasher::new(HasherConfig::default());
        let hash = hasher.hash("secret").unwrap();
        assert!(hash.starts_with("$argon2id$v=19$m=65536,t=1,p=4$"));
    }

    #[test]
    fn test_different_hashes_same_input() {
        let hasher = CredentialHasher::new(test_config());
        let hash1 = hasher.hash("same-secret").unwrap();
        let hash2 = hasher.hash("same-secret").unwrap();

        assert_ne!(hash1, hash2);
        assert!(hasher.verify("same-secret", &hash1));
        assert!(hasher.verify("same-secret", &hash2));
    }

    #[test]
    fn test_verify_uses_encoded_params() {
        let cheap = CredentialHasher::new(test_config());
        let hash = cheap.hash("secret").unwrap();

        let mut other = test_config();
        other.memory_cost = 2048;
        other.time_cost = 2;
        assert!(CredentialHasher::new(other).verify("secret", &hash));
    }

    #[test]
    fn test_malformed_inputs_are_false() {
        let hasher = CredentialHasher::new(test_config());
        let hash = hasher.hash("secret").unwrap();

        assert!(!hasher.verify("secret", ""));
        assert!(!hasher.verify("secret", "not-a-hash"));
        assert!(!hasher.verify("secret", "$argon2id$v=19$m=1024,t=1,p=1$"));
        assert!(!hasher.verify("secret", &hash.replace("argon2id", "argon2i")));
        assert!(!hasher.verify("secret", &format!("{}AAAA", hash)));
        assert!(!hasher.verify(
            "secret",
            "$2b$12$R9h/cIPz0gi.URNNX3kh2OPST9/PgBkqquzi.Ss7KIUgO2t0jWMUW"
        ));
    }

    #[test]
    fn test_comparator_runs_once_over_full_digest() {
        let calls = Arc::new(AtomicUsize::new(0));
        let lengths = Arc::new(Mutex::new(Vec::new()));

        let compare: Comparator = {
            let calls = calls.clone();
            let lengths = lengths.clone();
            Arc::new(move |a: &[u8], b: &[u8]| {
                calls.fetch_add(1, Ordering::SeqCst);
                lengths.lock().unwrap().push((a.len(), b.len()));
                constant_time_eq(a, b)
            })
        };
        let hasher = CredentialHasher::with_comparator(test_config(), compare);
        let hash = hasher.hash("secret").unwrap();

        assert!(hasher.verify("secret", &hash));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        assert!(!hasher.verify("other", &hash));
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        assert_eq!(*lengths.lock().unwrap(), vec![(32, 32), (32, 32)]);
    }

    #[test]
    fn test_invalid_params_error() {
        let mut config = test_config();
        config.memory_cost = 1;
        let err = CredentialHasher::new(config).hash("secret").unwrap_err();
        assert!(matches!(err, AuthError::Hashing(_)));
    }

    #[tokio::test]
    async fn test_blocking_variants() {
        let hasher = CredentialHasher::new(test_config());
        let hash = hasher.hash_blocking("secret").await.unwrap();
        assert!(hasher.verify_blocking("secret", &hash).await);
        assert!(!hasher.verify_blocking("nope", &hash).await);
    }
}
