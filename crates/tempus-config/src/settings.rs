use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{ConfigError, Result};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    /// Driver identification fed to generator resolution
    #[serde(default)]
    pub driver: DriverSettings,
    #[serde(default)]
    pub database: DatabaseSettings,
    #[serde(default)]
    pub query: QuerySettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

impl Settings {
    /// Parse settings from TOML text without environment overrides.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let settings: Settings =
            toml::from_str(text).map_err(|e| ConfigError::Deserialize(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.driver.name.trim().is_empty() {
            return Err(ConfigError::validation("driver.name must not be empty"));
        }
        if self.driver.version.trim().is_empty() {
            return Err(ConfigError::validation("driver.version must not be empty"));
        }
        // Database validations
        let url = self.database.url.as_str();
        if !(url.starts_with("postgres://") || url.starts_with("postgresql://")) {
            return Err(ConfigError::validation(
                "database.url must start with postgres:// or postgresql://",
            ));
        }
        if self.database.pool_size == 0 {
            return Err(ConfigError::validation("database.pool_size must be > 0"));
        }
        if let Some(min) = self.database.min_connections
            && min > self.database.pool_size
        {
            return Err(ConfigError::validation(
                "database.min_connections must be <= database.pool_size",
            ));
        }
        if self.database.connect_timeout_ms == 0 {
            return Err(ConfigError::validation(
                "database.connect_timeout_ms must be > 0",
            ));
        }
        if let Some(schema) = &self.database.schema
            && schema.trim().is_empty()
        {
            return Err(ConfigError::validation(
                "database.schema must not be empty when set",
            ));
        }
        // Logging validation
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(ConfigError::validation(format!(
                "logging.level must be one of {valid_levels:?}"
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverSettings {
    #[serde(default = "default_driver_name")]
    pub name: String,
    #[serde(default = "default_driver_version")]
    pub version: String,
}

fn default_driver_name() -> String {
    "postgresql".into()
}
fn default_driver_version() -> String {
    "0.8.6".into()
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            name: default_driver_name(),
            version: default_driver_version(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    #[serde(default = "default_database_url")]
    pub url: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
    #[serde(default)]
    pub min_connections: Option<u32>,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default)]
    pub idle_timeout_ms: Option<u64>,
    /// Default schema for tables whose spec leaves it out
    #[serde(default)]
    pub schema: Option<String>,
}

fn default_database_url() -> String {
    "postgres://postgres@localhost:5432/tempus".into()
}
fn default_pool_size() -> u32 {
    5
}
fn default_connect_timeout_ms() -> u64 {
    5000
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            pool_size: default_pool_size(),
            min_connections: None,
            connect_timeout_ms: default_connect_timeout_ms(),
            idle_timeout_ms: None,
            schema: None,
        }
    }
}

impl DatabaseSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_ms.map(Duration::from_millis)
    }
}

/// Requested row order, by key id then unique id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderBy {
    #[default]
    None,
    #[serde(alias = "asc")]
    Ascending,
    #[serde(alias = "desc")]
    Descending,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct QuerySettings {
    /// Hand propositions to the caller as they are read instead of
    /// collecting them
    #[serde(default)]
    pub streaming: bool,
    /// Wrap key ids so the database sorts them bytewise
    #[serde(default)]
    pub wrap_key_id: bool,
    #[serde(default)]
    pub order_by: OrderBy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        settings.validate().unwrap();
        assert_eq!(settings.driver.name, "postgresql");
        assert_eq!(settings.query.order_by, OrderBy::None);
        assert!(settings.database.idle_timeout().is_none());
    }

    #[test]
    fn test_order_by_aliases() {
        let settings = Settings::from_toml_str("[query]\norder_by = \"asc\"").unwrap();
        assert_eq!(settings.query.order_by, OrderBy::Ascending);
        let settings = Settings::from_toml_str("[query]\norder_by = \"descending\"").unwrap();
        assert_eq!(settings.query.order_by, OrderBy::Descending);
        assert!(Settings::from_toml_str("[query]\norder_by = \"random\"").is_err());
    }

    #[test]
    fn test_min_connections_bounded_by_pool_size() {
        let err = Settings::from_toml_str("[database]\npool_size = 2\nmin_connections = 3")
            .unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_rejects_non_postgres_url() {
        let err = Settings::from_toml_str("[database]\nurl = \"mysql://localhost/db\"")
            .unwrap_err();
        assert!(err.to_string().contains("database.url"));
    }
}
