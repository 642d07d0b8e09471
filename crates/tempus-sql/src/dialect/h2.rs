//! H2 1.x.

use super::Generator;
use crate::version::{CompatibilityWindow, Version, VersionRange};

pub const DRIVER_NAME: &str = "h2";
pub const DATABASE_PRODUCT: &str = "H2";

/// H2 uses the portable builders throughout, staging included.
pub fn generator() -> Generator {
    Generator::new(
        "h2",
        CompatibilityWindow::new(
            DRIVER_NAME,
            VersionRange::new(Version::new(1, 0), Version::major(1)),
            DATABASE_PRODUCT,
            VersionRange::new(Version::new(1, 0), Version::major(1)),
        ),
    )
}
