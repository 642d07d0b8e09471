//! Identifying the live server for generator resolution.

use sqlx_postgres::PgPool;
use tempus_sql::dialect::postgres::DATABASE_PRODUCT;
use tempus_sql::{Result, ServerIdentity, Version};
use tracing::{debug, instrument};

use crate::error::PostgresError;

/// Read `SHOW server_version` and pair it with the driver identification.
#[instrument(skip(pool))]
pub async fn server_identity(
    pool: &PgPool,
    driver_name: &str,
    driver_version: &str,
) -> Result<ServerIdentity> {
    let reported: String = sqlx_core::query_scalar::query_scalar("SHOW server_version")
        .fetch_one(pool)
        .await
        .map_err(PostgresError::from)?;
    debug!(server_version = %reported, "database identified");
    identity_from(driver_name, driver_version, &reported)
}

/// Build the identity from a driver name, driver version and the raw
/// `server_version` text, e.g. `"15.4 (Debian 15.4-1.pgdg120+1)"`.
pub fn identity_from(
    driver_name: &str,
    driver_version: &str,
    server_version: &str,
) -> Result<ServerIdentity> {
    Ok(ServerIdentity::new(
        driver_name,
        Version::parse(driver_version)?,
        DATABASE_PRODUCT,
        Version::parse(server_version)?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempus_sql::GeneratorRegistry;

    #[test]
    fn test_vendor_suffixes_are_ignored() {
        let identity =
            identity_from("postgresql", "0.8.6", "15.4 (Debian 15.4-1.pgdg120+1)").unwrap();
        assert_eq!(identity.database_product, "PostgreSQL");
        assert_eq!(identity.database_version, Version::new(15, 4));
    }

    #[test]
    fn test_identity_resolves_to_the_matching_plugin() {
        let registry = GeneratorRegistry::with_defaults();
        let old = identity_from("postgresql", "0.8.6", "9.0.23").unwrap();
        let new = identity_from("postgresql", "0.8.6", "16.2").unwrap();
        assert_eq!(
            registry.select_generator(&old).unwrap().name(),
            "postgresql-pre-9.1"
        );
        assert_eq!(
            registry.select_generator(&new).unwrap().name(),
            "postgresql-9.1"
        );
    }

    #[test]
    fn test_garbage_version_is_rejected() {
        assert!(identity_from("postgresql", "0.8.6", "devel").is_err());
    }
}
