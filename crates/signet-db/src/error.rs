//! Database error types

use signet_auth::AuthError;
use thiserror::Error;

/// Database operation errors
#[derive(Debug, Error)]
pub enum DbError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Query error: {0}")]
    Query(#[from] sqlx::Error),

    #[error("Duplicate: {0}")]
    Duplicate(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for DbError {
    fn from(e: serde_json::Error) -> Self {
        DbError::Serialization(e.to_string())
    }
}

/// Store failures reach the auth core as transient errors. A duplicate row
/// (lookup prefix collision) is an internal fault.
impl From<DbError> for AuthError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::Duplicate(what) => AuthError::Internal(format!("duplicate {}", what)),
            DbError::Query(sqlx::Error::PoolTimedOut) => AuthError::Timeout,
            other => AuthError::StoreUnavailable(other.to_string()),
        }
    }
}

/// Result type for database operations
pub type DbResult<T> = Result<T, DbError>;
