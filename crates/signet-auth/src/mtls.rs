//! Client certificate authentication
//!
//! The TLS layer hands over the peer chain (leaf first) as a
//! [`PeerCertificates`] request extension. Authentication then checks the
//! leaf against the certificate registry:
//!
//! 1. fingerprint = lowercase hex SHA-256 of the leaf DER
//! 2. registered, not revoked, not expired
//! 3. Subject CN names an organization (`org:<uuid>`)
//! 4. that organization is the one the fingerprint is registered to
//!
//! Chain validation is the TLS layer's job and is configured separately
//! (see [`ClientAuthMode`](crate::config::ClientAuthMode)).

use std::sync::Arc;

use chrono::Utc;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::time::timeout;
use uuid::Uuid;

use crate::config::MtlsConfig;
use crate::error::AuthError;
use crate::repository::CertificateRepository;
use crate::types::AuthOutcome;

/// CN prefix naming an organization
pub const ORG_CN_PREFIX: &str = "org:";

/// DER-encoded peer certificate chain, leaf first
#[derive(Debug, Clone, Default)]
pub struct PeerCertificates(Arc<Vec<Vec<u8>>>);

impl PeerCertificates {
    pub fn new(chain: Vec<Vec<u8>>) -> Self {
        Self(Arc::new(chain))
    }

    pub fn leaf(&self) -> Option<&[u8]> {
        self.0.first().map(Vec::as_slice)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

/// Why a client certificate was rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CertAuthError {
    #[error("no client certificate")]
    NoCertificate,
    #[error("certificate not registered")]
    NotRegistered,
    #[error("certificate revoked")]
    Revoked,
    #[error("certificate expired")]
    Expired,
    #[error("invalid certificate CN")]
    InvalidCommonName,
    #[error("certificate CN does not match registered organization")]
    OrgMismatch,
    #[error("certificate store unavailable: {0}")]
    Store(String),
    #[error("certificate lookup timed out")]
    Timeout,
}

impl CertAuthError {
    /// Store trouble rather than a bad certificate
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Store(_) | Self::Timeout)
    }
}

/// Lowercase hex SHA-256 of a DER certificate
pub fn fingerprint(der: &[u8]) -> String {
    hex::encode(Sha256::digest(der))
}

/// Organization named by a certificate CN
///
/// Only `org:` followed by a canonical (lowercase, hyphenated) UUID is
/// accepted.
pub fn org_id_from_cn(cn: &str) -> Option<Uuid> {
    let raw = cn.strip_prefix(ORG_CN_PREFIX)?;
    let org_id = Uuid::parse_str(raw).ok()?;
    (org_id.hyphenated().to_string() == raw).then_some(org_id)
}

/// CN to issue for an organization's client certificates
pub fn org_cn(org_id: Uuid) -> String {
    format!("{}{}", ORG_CN_PREFIX, org_id.hyphenated())
}

/// First Subject CN of a DER certificate
pub fn common_name(der: &[u8]) -> Option<String> {
    let (_, cert) = x509_parser::parse_x509_certificate(der).ok()?;
    let subject = cert.subject();
    let cn = subject
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())?;
    Some(cn.to_string())
}

/// Authenticates requests by their TLS client certificate
#[derive(Clone)]
pub struct MtlsAuthenticator {
    repo: Arc<dyn CertificateRepository>,
    config: MtlsConfig,
}

impl MtlsAuthenticator {
    pub fn new(repo: Arc<dyn CertificateRepository>, config: MtlsConfig) -> Self {
        Self { repo, config }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Authenticate the leaf of `peer`
    pub async fn authenticate(
        &self,
        peer: Option<&PeerCertificates>,
    ) -> Result<AuthOutcome, CertAuthError> {
        let leaf = peer
            .and_then(PeerCertificates::leaf)
            .ok_or(CertAuthError::NoCertificate)?;
        let fp = fingerprint(leaf);

        let record = timeout(self.config.lookup_timeout, self.repo.get_by_fingerprint(&fp))
            .await
            .map_err(|_| CertAuthError::Timeout)?
            .map_err(|e| match e {
                AuthError::Timeout => CertAuthError::Timeout,
                other => {
                    tracing::error!(error = %other, "Certificate lookup failed");
                    CertAuthError::Store(other.to_string())
                }
            })?
            .ok_or(CertAuthError::NotRegistered)?;

        let status = record.status_at(Utc::now());
        if status.revoked || status.expired {
            tracing::debug!(
                fingerprint = %fp,
                revoked = status.revoked,
                expired = status.expired,
                "Certificate no longer usable"
            );
        }
        if status.revoked {
            return Err(CertAuthError::Revoked);
        }
        if status.expired {
            return Err(CertAuthError::Expired);
        }

        let cn_org = common_name(leaf)
            .as_deref()
            .and_then(org_id_from_cn)
            .ok_or(CertAuthError::InvalidCommonName)?;

        if cn_org != record.org_id {
            return Err(CertAuthError::OrgMismatch);
        }

        Ok(AuthOutcome::from_certificate(record.org_id, fp))
    }
}
