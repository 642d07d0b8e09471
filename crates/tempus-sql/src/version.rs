//! Driver and database versions and the compatibility windows built from them.
//!
//! Versions compare component-wise with missing trailing components read as
//! zero. Range bounds are precision-aware: a bound written `9.0` contains every
//! `9.0.x` release, and a major-only bound such as `5` contains every `5.x`.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::{Result, SqlGenError};

static LEADING_VERSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*[vV]?(\d+(?:\.\d+)*)").expect("leading version pattern is valid")
});

/// A dotted numeric version such as `9.0`, `9.0.23` or `5.1.49`.
#[derive(Debug, Clone)]
pub struct Version {
    parts: Vec<u32>,
}

impl Version {
    /// Create a `major.minor` version.
    pub fn new(major: u32, minor: u32) -> Self {
        Self {
            parts: vec![major, minor],
        }
    }

    /// Create a major-only version, used as an upper bound meaning "any minor".
    pub fn major(major: u32) -> Self {
        Self { parts: vec![major] }
    }

    pub fn from_parts(parts: Vec<u32>) -> Result<Self> {
        if parts.is_empty() {
            return Err(SqlGenError::InvalidVersion(String::new()));
        }
        Ok(Self { parts })
    }

    /// Parse a vendor version string, keeping the leading dotted-number run.
    ///
    /// Accepts strings like `"9.0.23 (Debian 9.0.23-1)"` or `"5.1.49-community"`.
    pub fn parse(text: &str) -> Result<Self> {
        let captures = LEADING_VERSION
            .captures(text)
            .ok_or_else(|| SqlGenError::InvalidVersion(text.to_string()))?;
        let parts = captures[1]
            .split('.')
            .map(|part| {
                part.parse::<u32>()
                    .map_err(|_| SqlGenError::InvalidVersion(text.to_string()))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { parts })
    }

    pub fn parts(&self) -> &[u32] {
        &self.parts
    }

    fn component(&self, index: usize) -> u32 {
        self.parts.get(index).copied().unwrap_or(0)
    }

    /// Compare only as many components as `bound` specifies.
    fn cmp_at_precision(&self, bound: &Version) -> Ordering {
        for index in 0..bound.parts.len() {
            match self.component(index).cmp(&bound.parts[index]) {
                Ordering::Equal => continue,
                other => return other,
            }
        }
        Ordering::Equal
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.parts.len().max(other.parts.len());
        for index in 0..len {
            match self.component(index).cmp(&other.component(index)) {
                Ordering::Equal => continue,
                other => return other,
            }
        }
        Ordering::Equal
    }
}

impl FromStr for Version {
    type Err = SqlGenError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = self
            .parts
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(".");
        f.write_str(&text)
    }
}

/// An inclusive version range; `max == None` is unbounded above.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRange {
    min: Version,
    max: Option<Version>,
}

impl VersionRange {
    pub fn new(min: Version, max: Version) -> Self {
        Self {
            min,
            max: Some(max),
        }
    }

    pub fn at_least(min: Version) -> Self {
        Self { min, max: None }
    }

    pub fn min(&self) -> &Version {
        &self.min
    }

    pub fn max(&self) -> Option<&Version> {
        self.max.as_ref()
    }

    pub fn contains(&self, version: &Version) -> bool {
        if version.cmp_at_precision(&self.min) == Ordering::Less {
            return false;
        }
        match &self.max {
            Some(max) => version.cmp_at_precision(max) != Ordering::Greater,
            None => true,
        }
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.max {
            Some(max) if max.parts.len() == 1 => write!(f, "[{}, {}.*]", self.min, max),
            Some(max) => write!(f, "[{}, {}]", self.min, max),
            None => write!(f, "[{}, ∞)", self.min),
        }
    }
}

/// Live identification of the driver and database server a query will run on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerIdentity {
    pub driver_name: String,
    pub driver_version: Version,
    pub database_product: String,
    pub database_version: Version,
}

impl ServerIdentity {
    pub fn new(
        driver_name: impl Into<String>,
        driver_version: Version,
        database_product: impl Into<String>,
        database_version: Version,
    ) -> Self {
        Self {
            driver_name: driver_name.into(),
            driver_version,
            database_product: database_product.into(),
            database_version,
        }
    }
}

impl fmt::Display for ServerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} on {} {}",
            self.driver_name, self.driver_version, self.database_product, self.database_version
        )
    }
}

/// Driver and database versions a generator declares itself usable with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompatibilityWindow {
    pub driver_name: String,
    pub driver: VersionRange,
    pub database_product: String,
    pub database: VersionRange,
}

impl CompatibilityWindow {
    pub fn new(
        driver_name: impl Into<String>,
        driver: VersionRange,
        database_product: impl Into<String>,
        database: VersionRange,
    ) -> Self {
        Self {
            driver_name: driver_name.into(),
            driver,
            database_product: database_product.into(),
            database,
        }
    }

    /// Names must match exactly; both live versions must fall in range.
    pub fn matches(&self, identity: &ServerIdentity) -> bool {
        self.driver_name == identity.driver_name
            && self.database_product == identity.database_product
            && self.driver.contains(&identity.driver_version)
            && self.database.contains(&identity.database_version)
    }
}

impl fmt::Display for CompatibilityWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} / {} {}",
            self.driver_name, self.driver, self.database_product, self.database
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_vendor_strings() {
        assert_eq!(Version::parse("9.0.23 (Debian 9.0.23-1)").unwrap().parts(), &[9, 0, 23]);
        assert_eq!(Version::parse("5.1.49-community").unwrap().parts(), &[5, 1, 49]);
        assert_eq!(Version::parse("14").unwrap().parts(), &[14]);
        assert_eq!(Version::parse("v1.4.200").unwrap().parts(), &[1, 4, 200]);
        assert!(matches!(
            Version::parse("unknown"),
            Err(SqlGenError::InvalidVersion(_))
        ));
        assert!(Version::parse("").is_err());
    }

    #[test]
    fn test_ordering_pads_missing_components() {
        assert_eq!(Version::new(9, 0), Version::parse("9.0.0").unwrap());
        assert!(Version::new(9, 1) > Version::parse("9.0.23").unwrap());
        assert!(Version::major(5) < Version::new(5, 1));
    }

    #[test]
    fn test_range_bound_precision() {
        let pre_91 = VersionRange::new(Version::new(8, 0), Version::new(9, 0));
        assert!(pre_91.contains(&Version::parse("9.0.23").unwrap()));
        assert!(pre_91.contains(&Version::new(8, 4)));
        assert!(!pre_91.contains(&Version::new(9, 1)));
        assert!(!pre_91.contains(&Version::parse("7.4.30").unwrap()));

        let any_five = VersionRange::new(Version::new(5, 0), Version::major(5));
        assert!(any_five.contains(&Version::new(5, 999)));
        assert!(any_five.contains(&Version::parse("5.1.49").unwrap()));
        assert!(!any_five.contains(&Version::new(6, 0)));
        assert!(!any_five.contains(&Version::new(4, 9)));

        let open = VersionRange::at_least(Version::new(9, 1));
        assert!(open.contains(&Version::parse("16.2").unwrap()));
        assert!(!open.contains(&Version::new(9, 0)));
    }

    #[test]
    fn test_range_display() {
        assert_eq!(
            VersionRange::new(Version::new(5, 0), Version::major(5)).to_string(),
            "[5.0, 5.*]"
        );
        assert_eq!(
            VersionRange::at_least(Version::new(9, 1)).to_string(),
            "[9.1, ∞)"
        );
    }

    #[test]
    fn test_window_requires_exact_names() {
        let window = CompatibilityWindow::new(
            "h2",
            VersionRange::new(Version::new(1, 0), Version::major(1)),
            "H2",
            VersionRange::new(Version::new(1, 0), Version::major(1)),
        );
        let live = ServerIdentity::new("h2", Version::new(1, 4), "H2", Version::new(1, 4));
        assert!(window.matches(&live));

        let renamed = ServerIdentity::new("h2", Version::new(1, 4), "h2", Version::new(1, 4));
        assert!(!window.matches(&renamed));
    }
}
