//! Configuration and tracing setup for tempus data sources.
//!
//! Settings are layered: built-in defaults, then a TOML file, then
//! `TEMPUS__SECTION__KEY` environment variables. See [`loader`].

pub mod loader;
pub mod observability;
pub mod settings;

pub use loader::{load_settings, load_settings_with_env};
pub use settings::{
    DatabaseSettings, DriverSettings, LoggingSettings, OrderBy, QuerySettings, Settings,
};

/// Error types for configuration operations
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config build error: {0}")]
    Build(String),

    #[error("Config deserialize error: {0}")]
    Deserialize(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

impl ConfigError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, ConfigError>;
