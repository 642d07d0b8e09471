//! Error types for SQL generation, execution and result mapping.

use thiserror::Error;

use crate::statement::CompilationPhase;

/// Errors raised while selecting a generator, compiling a statement,
/// executing it or mapping its rows back into propositions.
///
/// None of these are retried inside this crate; see [`SqlGenError::category`].
#[derive(Debug, Error)]
pub enum SqlGenError {
    #[error(
        "No compatible SQL generator for driver {driver_name} {driver_version} \
         and database {database_product} {database_version}"
    )]
    NoCompatibleGenerator {
        driver_name: String,
        driver_version: String,
        database_product: String,
        database_version: String,
    },

    #[error("Invalid version string: '{0}'")]
    InvalidVersion(String),

    #[error("Invalid entity spec: {0}")]
    InvalidSpec(String),

    #[error("Ambiguous reference path from {from} to {to}: several paths of length {length}")]
    AmbiguousReferencePath {
        from: String,
        to: String,
        length: usize,
    },

    #[error("Cyclic reference path from {from}: reference '{reference}' is traversed twice")]
    CyclicReferencePath { from: String, reference: String },

    #[error("Generator {generator} does not support staging tables ({count} staging specs supplied)")]
    StagingUnsupported { generator: String, count: usize },

    #[error("Malformed filter: {0}")]
    MalformedFilter(String),

    #[error("Compilation failed while {phase}: {message}")]
    Compilation {
        phase: CompilationPhase,
        message: String,
    },

    #[error("Query execution failed: {message}")]
    Execution {
        message: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Row cannot be mapped to a proposition: {0}")]
    DataShape(String),
}

impl SqlGenError {
    pub fn invalid_spec(message: impl Into<String>) -> Self {
        Self::InvalidSpec(message.into())
    }

    pub fn malformed_filter(message: impl Into<String>) -> Self {
        Self::MalformedFilter(message.into())
    }

    pub fn compilation(phase: CompilationPhase, message: impl Into<String>) -> Self {
        Self::Compilation {
            phase,
            message: message.into(),
        }
    }

    pub fn execution(
        message: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::Execution {
            message: message.into(),
            source: source.into(),
        }
    }

    pub fn data_shape(message: impl Into<String>) -> Self {
        Self::DataShape(message.into())
    }

    /// Error category for logging and for the caller's retry decision.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::NoCompatibleGenerator { .. }
            | Self::InvalidVersion(_)
            | Self::InvalidSpec(_)
            | Self::AmbiguousReferencePath { .. }
            | Self::CyclicReferencePath { .. }
            | Self::StagingUnsupported { .. }
            | Self::MalformedFilter(_) => ErrorCategory::Configuration,
            Self::Compilation { .. } => ErrorCategory::Compilation,
            Self::Execution { .. } => ErrorCategory::Execution,
            Self::DataShape(_) => ErrorCategory::DataShape,
        }
    }

    /// Always `false`: retry policy belongs to the caller.
    pub fn is_retryable(&self) -> bool {
        false
    }
}

/// Error categories for monitoring and classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Compilation,
    Execution,
    DataShape,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Configuration => "configuration",
            Self::Compilation => "compilation",
            Self::Execution => "execution",
            Self::DataShape => "data_shape",
        };
        f.write_str(name)
    }
}

/// Result type for SQL generation operations.
pub type Result<T> = std::result::Result<T, SqlGenError>;
