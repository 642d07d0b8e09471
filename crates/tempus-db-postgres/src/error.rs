//! Error types for the PostgreSQL execution layer.

use tempus_sql::SqlGenError;

/// Errors specific to the PostgreSQL execution layer.
#[derive(Debug, thiserror::Error)]
pub enum PostgresError {
    /// Database connection or query error.
    #[error("Database error: {0}")]
    Connection(#[from] sqlx_core::error::Error),

    /// A result column could not be read.
    #[error("Cannot decode column {position}: {source}")]
    Decode {
        position: usize,
        #[source]
        source: sqlx_core::error::Error,
    },

    /// Configuration error.
    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl PostgresError {
    /// Creates a new configuration error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn decode(position: usize, source: sqlx_core::error::Error) -> Self {
        Self::Decode { position, source }
    }
}

impl From<PostgresError> for SqlGenError {
    fn from(err: PostgresError) -> Self {
        let message = err.to_string();
        SqlGenError::execution(message, err)
    }
}

/// Result type alias for PostgreSQL operations.
pub type Result<T> = std::result::Result<T, PostgresError>;
