//! Error types for Feedstore
//!
//! Every storage failure is surfaced as a `StoreError` on the operation or
//! observation that caused it. Raw `sqlx` errors are classified on conversion
//! so the writer can tell transient interruptions from permanent failures.

use thiserror::Error;

/// SQLite primary result codes that mean "try again later".
const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;
const SQLITE_INTERRUPT: i32 = 9;
/// SQLite primary result code for constraint failures.
const SQLITE_CONSTRAINT: i32 = 19;

/// Store-wide error type
#[derive(Debug, Error)]
pub enum StoreError {
    /// A lookup expecting exactly one row found none
    #[error("Resource not found")]
    NotFound,

    /// Storage temporarily inaccessible (suspension, external lock)
    #[error("Storage temporarily unavailable: {0}")]
    TransientIo(String),

    /// A write would break a relational invariant
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    /// A stored value failed to decode into its structured form
    #[error("Malformed payload in {column}: {message}")]
    MalformedPayload { column: String, message: String },

    /// Any other database failure
    #[error("Database error: {0}")]
    Database(sqlx::Error),

    /// Migration failure at open time
    #[error("Migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Column mapping does not match the migrated schema
    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    /// Filter phrases could not be compiled into one expression
    #[error("Filter expression error: {0}")]
    FilterExpression(#[from] regex::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// The write serializer has shut down
    #[error("Store is closed")]
    Closed,
}

impl StoreError {
    /// Build a `MalformedPayload` for a column.
    pub fn malformed(column: &str, message: impl std::fmt::Display) -> Self {
        StoreError::MalformedPayload {
            column: column.to_string(),
            message: message.to_string(),
        }
    }

    /// Whether the writer may retry after a resume signal.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::TransientIo(_))
    }

    /// Short label used for metrics and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            StoreError::NotFound => "not_found",
            StoreError::TransientIo(_) => "transient_io",
            StoreError::ConstraintViolation(_) => "constraint_violation",
            StoreError::MalformedPayload { .. } => "malformed_payload",
            StoreError::Database(_) => "database",
            StoreError::Migration(_) => "migration",
            StoreError::SchemaMismatch(_) => "schema_mismatch",
            StoreError::FilterExpression(_) => "filter_expression",
            StoreError::Config(_) => "config",
            StoreError::Closed => "closed",
        }
    }
}

fn sqlite_primary_code(error: &dyn sqlx::error::DatabaseError) -> Option<i32> {
    error
        .code()
        .and_then(|code| code.parse::<i32>().ok())
        .map(|code| code & 0xff)
}

impl From<sqlx::Error> for StoreError {
    fn from(error: sqlx::Error) -> Self {
        match &error {
            sqlx::Error::Database(db_error) => match sqlite_primary_code(&**db_error) {
                Some(SQLITE_BUSY | SQLITE_LOCKED | SQLITE_INTERRUPT) => {
                    StoreError::TransientIo(db_error.message().to_string())
                }
                Some(SQLITE_CONSTRAINT) => {
                    StoreError::ConstraintViolation(db_error.message().to_string())
                }
                _ => StoreError::Database(error),
            },
            sqlx::Error::ColumnDecode { index, source } => StoreError::malformed(index, source),
            sqlx::Error::Decode(source) => StoreError::malformed("<unknown>", source),
            sqlx::Error::PoolTimedOut => {
                StoreError::TransientIo("timed out acquiring a read connection".to_string())
            }
            _ => StoreError::Database(error),
        }
    }
}

impl From<config::ConfigError> for StoreError {
    fn from(err: config::ConfigError) -> Self {
        StoreError::Config(err.to_string())
    }
}

/// Result type alias using StoreError
pub type Result<T> = std::result::Result<T, StoreError>;
