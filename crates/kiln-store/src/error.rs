//! Database error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("corrupt record {name}: {message}")]
    Corrupt { name: String, message: String },
}

pub type DbResult<T> = std::result::Result<T, DbError>;

impl From<DbError> for kiln_core::Error {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound(msg) => kiln_core::Error::NotFound(msg),
            DbError::InvalidInput(msg) => kiln_core::Error::InvalidInput(msg),
            other => kiln_core::Error::Internal(other.to_string()),
        }
    }
}
