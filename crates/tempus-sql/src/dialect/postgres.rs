//! PostgreSQL before and from 9.1.
//!
//! Both plugins force byte-order key comparison when key wrapping is asked
//! for. Servers before 9.1 have no per-expression collation, so the key is
//! re-encoded with `CONVERT_TO` and read back as bytes; this also requires
//! the server locale to be `C`. From 9.1 on, `COLLATE "C"` does the same.

use super::{Generator, KeyIdNormalizer, SelectClauseBuilder};
use crate::version::{CompatibilityWindow, Version, VersionRange};

pub const DRIVER_NAME: &str = "postgresql";
pub const DATABASE_PRODUCT: &str = "PostgreSQL";

#[derive(Debug, Clone, Copy, Default)]
pub struct ConvertToSelect;

impl SelectClauseBuilder for ConvertToSelect {
    fn key_id_expression(&self, column: &str, wrap_key_id: bool) -> String {
        if wrap_key_id {
            format!("CONVERT_TO({column}, 'SQL_ASCII')")
        } else {
            column.to_string()
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CollateSelect;

impl SelectClauseBuilder for CollateSelect {
    fn key_id_expression(&self, column: &str, wrap_key_id: bool) -> String {
        if wrap_key_id {
            format!("{column} COLLATE \"C\"")
        } else {
            column.to_string()
        }
    }
}

fn driver_range() -> VersionRange {
    VersionRange::at_least(Version::new(0, 0))
}

/// PostgreSQL 8.0 through 9.0.x.
pub fn pre_91_generator() -> Generator {
    Generator::new(
        "postgresql-pre-9.1",
        CompatibilityWindow::new(
            DRIVER_NAME,
            driver_range(),
            DATABASE_PRODUCT,
            VersionRange::new(Version::new(8, 0), Version::new(9, 0)),
        ),
    )
    .with_select(ConvertToSelect)
    .with_key_normalizer(KeyIdNormalizer::AsciiBytes)
}

/// PostgreSQL 9.1 and later.
pub fn generator_91() -> Generator {
    Generator::new(
        "postgresql-9.1",
        CompatibilityWindow::new(
            DRIVER_NAME,
            driver_range(),
            DATABASE_PRODUCT,
            VersionRange::at_least(Version::new(9, 1)),
        ),
    )
    .with_select(CollateSelect)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::ServerIdentity;

    fn server(version: &str) -> ServerIdentity {
        ServerIdentity::new(
            DRIVER_NAME,
            Version::parse("42.2").unwrap(),
            DATABASE_PRODUCT,
            Version::parse(version).unwrap(),
        )
    }

    #[test]
    fn test_windows_are_disjoint() {
        let old = pre_91_generator();
        let new = generator_91();
        for version in ["8.0", "8.4.22", "9.0", "9.0.23 (Debian 9.0.23-1)"] {
            assert!(old.is_compatible(&server(version)), "{version}");
            assert!(!new.is_compatible(&server(version)), "{version}");
        }
        for version in ["9.1", "9.6.24", "16.4"] {
            assert!(!old.is_compatible(&server(version)), "{version}");
            assert!(new.is_compatible(&server(version)), "{version}");
        }
        assert!(!old.is_compatible(&server("7.4")));
    }

    #[test]
    fn test_key_expressions() {
        assert_eq!(
            ConvertToSelect.key_id_expression("a1.patient_id", true),
            "CONVERT_TO(a1.patient_id, 'SQL_ASCII')"
        );
        assert_eq!(
            CollateSelect.key_id_expression("a1.patient_id", true),
            "a1.patient_id COLLATE \"C\""
        );
        assert_eq!(CollateSelect.key_id_expression("a1.patient_id", false), "a1.patient_id");
        assert_eq!(pre_91_generator().key_normalizer(true), KeyIdNormalizer::AsciiBytes);
        assert_eq!(pre_91_generator().key_normalizer(false), KeyIdNormalizer::Text);
    }
}
