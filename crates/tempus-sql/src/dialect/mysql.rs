//! MySQL 4.1 to 5.x through Connector 5.x.

use super::standard::StandardFrom;
use super::{FromClauseBuilder, Generator, WhereClauseBuilder};
use crate::aliaser::TableAliaser;
use crate::error::{Result, SqlGenError};
use crate::spec::StagingSpec;
use crate::version::{CompatibilityWindow, Version, VersionRange};

pub const DRIVER_NAME: &str = "mysql-connector";
pub const DATABASE_PRODUCT: &str = "MySQL";

/// Rejects every staging spec.
#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlFrom;

impl FromClauseBuilder for MySqlFrom {
    fn check_staging(&self, generator: &str, staging: &[StagingSpec]) -> Result<()> {
        if staging.is_empty() {
            Ok(())
        } else {
            Err(SqlGenError::StagingUnsupported {
                generator: generator.to_string(),
                count: staging.len(),
            })
        }
    }

    fn build(&self, tables: &TableAliaser, _staging: &[StagingSpec]) -> String {
        StandardFrom.build(tables, &[])
    }
}

/// Backslash is an escape character in MySQL string literals.
#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlWhere;

impl WhereClauseBuilder for MySqlWhere {
    fn escape_string(&self, text: &str) -> String {
        text.replace('\\', "\\\\").replace('\'', "''")
    }
}

pub fn generator() -> Generator {
    Generator::new(
        "mysql",
        CompatibilityWindow::new(
            DRIVER_NAME,
            VersionRange::new(Version::new(5, 0), Version::major(5)),
            DATABASE_PRODUCT,
            VersionRange::new(Version::new(4, 1), Version::major(5)),
        ),
    )
    .with_from(MySqlFrom)
    .with_where(MySqlWhere)
}
