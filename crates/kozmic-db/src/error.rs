//! Database error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("duplicate: {0}")]
    Duplicate(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl DbError {
    /// Whether this error came from a unique constraint, e.g. the
    /// `unique_ref_and_sha_within_project` or `unique_hook_call_within_build`
    /// constraints that back webhook deduplication.
    pub fn is_duplicate(&self) -> bool {
        matches!(self, DbError::Duplicate(_))
    }
}

/// Map an insertion error, turning unique violations into `Duplicate`.
pub(crate) fn map_insert_err(e: sqlx::Error, what: &str) -> DbError {
    if let sqlx::Error::Database(db) = &e {
        if matches!(db.kind(), sqlx::error::ErrorKind::UniqueViolation) {
            return DbError::Duplicate(what.to_string());
        }
    }
    DbError::Database(e)
}

impl From<DbError> for kozmic_core::Error {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound(msg) => kozmic_core::Error::NotFound(msg),
            DbError::Duplicate(msg) => kozmic_core::Error::Conflict(msg),
            DbError::Database(e) => kozmic_core::Error::Internal(e.to_string()),
        }
    }
}

pub type DbResult<T> = std::result::Result<T, DbError>;
