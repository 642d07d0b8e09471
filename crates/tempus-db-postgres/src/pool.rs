//! Connection pool management.

use std::time::Duration;

use sqlx_core::pool::PoolOptions;
use sqlx_postgres::{PgPool, Postgres};
use tempus_sql::spec::validate_identifier;
use tracing::{debug, info, instrument};

use crate::config::PostgresConfig;
use crate::error::{PostgresError, Result};

pub type PgPoolOptions = PoolOptions<Postgres>;

/// Open a pool for `config`. Every new connection gets the configured
/// schema first on its search path.
#[instrument(skip(config), fields(url = %mask_password(&config.url)))]
pub async fn create_pool(config: &PostgresConfig) -> Result<PgPool> {
    let options = pool_options(config)?;
    info!(
        max_connections = options.get_max_connections(),
        min_connections = options.get_min_connections(),
        schema = ?config.schema,
        "opening PostgreSQL pool"
    );
    let pool = options.connect(&config.url).await?;
    debug!(idle = pool.num_idle(), "PostgreSQL pool open");
    Ok(pool)
}

/// Pool options for `config`, before any connection is made.
fn pool_options(config: &PostgresConfig) -> Result<PgPoolOptions> {
    let mut options = PgPoolOptions::new()
        .max_connections(config.pool_size)
        .min_connections(min_connections(config))
        .acquire_timeout(Duration::from_millis(config.connect_timeout_ms))
        .test_before_acquire(false);

    if let Some(idle_timeout) = config.idle_timeout_ms {
        options = options.idle_timeout(Duration::from_millis(idle_timeout));
    }

    if let Some(schema) = &config.schema {
        validate_identifier(schema)
            .map_err(|_| PostgresError::config(format!("invalid schema name '{schema}'")))?;
        let search_path = format!("SET search_path TO \"{schema}\", public");
        options = options.after_connect(move |conn, _meta| {
            let search_path = search_path.clone();
            Box::pin(async move {
                sqlx_core::query::query(&search_path).execute(conn).await?;
                Ok(())
            })
        });
    }
    Ok(options)
}

/// Configured minimum, or a quarter of the pool; at least one and never
/// above the pool size.
fn min_connections(config: &PostgresConfig) -> u32 {
    config
        .min_connections
        .unwrap_or(config.pool_size / 4)
        .clamp(1, config.pool_size.max(1))
}

/// `url` with the password of its user info replaced by `****`.
pub(crate) fn mask_password(url: &str) -> String {
    let (scheme, rest) = url.split_once("://").unwrap_or(("", url));
    let Some((user_info, host)) = rest.rsplit_once('@') else {
        return url.to_string();
    };
    match user_info.split_once(':') {
        Some((user, _password)) if scheme.is_empty() => format!("{user}:****@{host}"),
        Some((user, _password)) => format!("{scheme}://{user}:****@{host}"),
        None => url.to_string(),
    }
}
