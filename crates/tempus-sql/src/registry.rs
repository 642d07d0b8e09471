//! Generator registry and compatibility resolution.
//!
//! The registry is an explicit, ordered list of generators, populated once at
//! startup and read-only afterwards. Resolution walks it in registration order
//! and picks the first generator whose compatibility window matches the live
//! driver and database.

use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::dialect::{Generator, h2, mysql, postgres};
use crate::error::{Result, SqlGenError};
use crate::version::ServerIdentity;

/// Ordered list of available generators.
#[derive(Debug, Default, Clone)]
pub struct GeneratorRegistry {
    generators: Vec<Arc<Generator>>,
}

impl GeneratorRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// H2, MySQL, PostgreSQL before 9.1 and PostgreSQL 9.1+, in that order.
    pub fn with_defaults() -> Self {
        Self::new()
            .with(h2::generator())
            .with(mysql::generator())
            .with(postgres::pre_91_generator())
            .with(postgres::generator_91())
    }

    /// Builder form of [`Self::register`].
    pub fn with(mut self, generator: Generator) -> Self {
        self.register(generator);
        self
    }

    /// Append a generator. Earlier registrations win ties.
    pub fn register(&mut self, generator: Generator) {
        self.generators.push(Arc::new(generator));
    }

    pub fn generators(&self) -> &[Arc<Generator>] {
        &self.generators
    }

    pub fn len(&self) -> usize {
        self.generators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.generators.is_empty()
    }

    /// The first generator compatible with `identity`.
    #[instrument(skip(self), fields(identity = %identity))]
    pub fn select_generator(&self, identity: &ServerIdentity) -> Result<Arc<Generator>> {
        match self.generators.iter().find(|g| g.is_compatible(identity)) {
            Some(generator) => {
                info!(generator = %generator.name(), "selected SQL generator");
                Ok(Arc::clone(generator))
            }
            None => {
                warn!(registered = self.generators.len(), "no compatible SQL generator");
                Err(SqlGenError::NoCompatibleGenerator {
                    driver_name: identity.driver_name.clone(),
                    driver_version: identity.driver_version.to_string(),
                    database_product: identity.database_product.clone(),
                    database_version: identity.database_version.to_string(),
                })
            }
        }
    }

    /// Every compatible generator, in registration order.
    pub fn matching_generators(&self, identity: &ServerIdentity) -> Vec<Arc<Generator>> {
        self.generators
            .iter()
            .filter(|g| g.is_compatible(identity))
            .cloned()
            .collect()
    }
}
