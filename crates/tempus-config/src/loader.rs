use std::path::PathBuf;

use config::{Config, Environment, File};
use tracing::{debug, warn};

use crate::settings::Settings;
use crate::{ConfigError, Result};

/// File read when no path is given and it exists in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "tempus.toml";

/// Environment prefix, e.g. `TEMPUS__DATABASE__POOL_SIZE=20`.
pub const ENV_PREFIX: &str = "TEMPUS";

pub fn load_settings(path: Option<&str>) -> Result<Settings> {
    let mut builder = Config::builder();
    let pathbuf = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_FILE));
    if pathbuf.exists() {
        debug!(path = %pathbuf.display(), "reading settings file");
        builder = builder.add_source(File::from(pathbuf));
    } else if path.is_some() {
        warn!(path = %pathbuf.display(), "settings file not found, using defaults");
    }
    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .try_parsing(true)
            .separator("__"),
    );
    let cfg = builder
        .build()
        .map_err(|e| ConfigError::Build(e.to_string()))?;
    let merged: Settings = cfg
        .try_deserialize()
        .map_err(|e| ConfigError::Deserialize(e.to_string()))?;
    merged.validate()?;
    Ok(merged)
}

/// Like [`load_settings`], after loading a `.env` file when one exists.
pub fn load_settings_with_env(path: Option<&str>) -> Result<Settings> {
    if let Err(e) = dotenvy::dotenv()
        && !matches!(e, dotenvy::Error::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::NotFound)
    {
        warn!(error = %e, "failed to load .env file");
    }
    load_settings(path)
}
