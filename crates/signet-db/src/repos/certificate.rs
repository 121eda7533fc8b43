//! Client certificate repository

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use signet_auth::{AuthResult, CertificateRecord, CertificateRepository};
use sqlx::PgPool;
use uuid::Uuid;

use crate::{DbClientCertificate, DbError, DbResult};

/// Postgres-backed certificate registry
#[derive(Clone)]
pub struct PgCertificateRepository {
    pool: PgPool,
}

impl PgCertificateRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Find a certificate by fingerprint
    pub async fn find_by_fingerprint(&self, fingerprint: &str) -> DbResult<Option<CertificateRecord>> {
        let row = sqlx::query_as::<_, DbClientCertificate>(
            r#"
            SELECT fingerprint, org_id, name, revoked_at, expires_at, created_at
            FROM client_certificates
            WHERE fingerprint = $1
            "#,
        )
        .bind(fingerprint)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(CertificateRecord::from))
    }

    /// Register a certificate
    pub async fn insert(&self, record: &CertificateRecord) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO client_certificates (fingerprint, org_id, name, revoked_at, expires_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&record.fingerprint)
        .bind(record.org_id)
        .bind(&record.name)
        .bind(record.revoked_at)
        .bind(record.expires_at)
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e {
                if db_err.constraint() == Some("client_certificates_pkey") {
                    return DbError::Duplicate(format!("certificate {}", record.fingerprint));
                }
            }
            DbError::Query(e)
        })?;

        Ok(())
    }

    /// Certificates of an organization, newest first
    pub async fn find_by_org(&self, org_id: Uuid) -> DbResult<Vec<CertificateRecord>> {
        let rows = sqlx::query_as::<_, DbClientCertificate>(
            r#"
            SELECT fingerprint, org_id, name, revoked_at, expires_at, created_at
            FROM client_certificates
            WHERE org_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(org_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(CertificateRecord::from).collect())
    }

    /// Mark a certificate revoked
    pub async fn set_revoked(&self, fingerprint: &str, at: DateTime<Utc>) -> DbResult<bool> {
        let result = sqlx::query("UPDATE client_certificates SET revoked_at = $2 WHERE fingerprint = $1")
            .bind(fingerprint)
            .bind(at)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl CertificateRepository for PgCertificateRepository {
    async fn get_by_fingerprint(&self, fingerprint: &str) -> AuthResult<Option<CertificateRecord>> {
        Ok(self.find_by_fingerprint(fingerprint).await?)
    }

    async fn register(&self, record: &CertificateRecord) -> AuthResult<()> {
        Ok(self.insert(record).await?)
    }

    async fn list_by_org(&self, org_id: Uuid) -> AuthResult<Vec<CertificateRecord>> {
        Ok(self.find_by_org(org_id).await?)
    }

    async fn revoke(&self, fingerprint: &str, at: DateTime<Utc>) -> AuthResult<bool> {
        Ok(self.set_revoked(fingerprint, at).await?)
    }
}
