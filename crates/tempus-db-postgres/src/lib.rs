//! PostgreSQL execution layer for tempus data sources.
//!
//! This crate connects the dialect-aware compiler in `tempus-sql` to a live
//! PostgreSQL server through sqlx: it builds the pool, reads the server
//! version so the right generator is chosen, and streams statement results
//! into result processors.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use tempus_config::load_settings;
//! use tempus_db_postgres::PostgresDataSource;
//!
//! let settings = load_settings(Some("tempus.toml"))?;
//! let graph = Arc::new(EntitySpecGraph::from_toml_str(&specs)?);
//! let source = PostgresDataSource::connect(&settings, graph).await?;
//!
//! let request = source.request(["Encounter"]).key_ids(["00001"]);
//! let propositions = source.read(&request).await?;
//! ```
//!
//! # Architecture
//!
//! - [`config`]: pool configuration
//! - [`error`]: error types specific to PostgreSQL operations
//! - [`pool`]: connection pool management
//! - [`identity`]: server identification for generator resolution
//! - [`executor`]: the `QueryExecutor` implementation

pub mod config;
pub mod error;
pub mod executor;
pub mod identity;
pub mod pool;

use std::sync::Arc;

use sqlx_postgres::PgPool;
use tempus_config::{OrderBy, QuerySettings, Settings};
use tempus_sql::{
    DataSourceOptions, EntitySpecGraph, GeneratorRegistry, KeyedPropositions, Proposition,
    QueryRequest, Result, SqlDataSource, SqlOrderBy,
};
use tracing::{info, instrument};

pub use config::PostgresConfig;
pub use error::PostgresError;
pub use executor::PgQueryExecutor;
pub use identity::server_identity;
pub use pool::create_pool;

/// A [`SqlDataSource`] over a PostgreSQL pool, configured from [`Settings`].
pub struct PostgresDataSource {
    source: SqlDataSource<PgQueryExecutor>,
    query: QuerySettings,
}

impl PostgresDataSource {
    /// Connect with the built-in generators.
    pub async fn connect(settings: &Settings, graph: Arc<EntitySpecGraph>) -> Result<Self> {
        Self::connect_with_registry(settings, graph, &GeneratorRegistry::with_defaults()).await
    }

    /// Create the pool, identify the server and select its generator.
    #[instrument(skip_all, fields(driver = %settings.driver.name))]
    pub async fn connect_with_registry(
        settings: &Settings,
        graph: Arc<EntitySpecGraph>,
        registry: &GeneratorRegistry,
    ) -> Result<Self> {
        let pool = create_pool(&PostgresConfig::from(&settings.database)).await?;
        let identity =
            server_identity(&pool, &settings.driver.name, &settings.driver.version).await?;
        let source = SqlDataSource::connect(registry, &identity, graph, PgQueryExecutor::new(pool))?
            .with_options(DataSourceOptions {
                wrap_key_id: settings.query.wrap_key_id,
                staging: Vec::new(),
            });
        info!(
            identity = %identity,
            generator = %source.generator().name(),
            streaming = settings.query.streaming,
            "PostgreSQL data source ready"
        );
        Ok(Self {
            source,
            query: settings.query.clone(),
        })
    }

    pub fn source(&self) -> &SqlDataSource<PgQueryExecutor> {
        &self.source
    }

    pub fn pool(&self) -> &PgPool {
        self.source.executor().pool()
    }

    /// A request for `proposition_ids` with the configured row order.
    pub fn request<I, S>(&self, proposition_ids: I) -> QueryRequest
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        QueryRequest::new(proposition_ids).order_by(sql_order_by(self.query.order_by))
    }

    pub async fn read(&self, request: &QueryRequest) -> Result<KeyedPropositions> {
        self.source.read(request).await
    }

    pub async fn stream(
        &self,
        request: &QueryRequest,
        handler: &mut (dyn FnMut(&str, Proposition) -> Result<()> + Send),
    ) -> Result<u64> {
        self.source.stream(request, handler).await
    }

    /// Hand every proposition to `handler`, streaming or buffering as
    /// configured by `query.streaming`.
    pub async fn deliver(
        &self,
        request: &QueryRequest,
        handler: &mut (dyn FnMut(&str, Proposition) -> Result<()> + Send),
    ) -> Result<u64> {
        if self.query.streaming {
            return self.stream(request, handler).await;
        }
        let mut delivered = 0;
        for (key_id, propositions) in self.read(request).await? {
            for proposition in propositions {
                handler(&key_id, proposition)?;
                delivered += 1;
            }
        }
        Ok(delivered)
    }
}

/// The statement ordering for a configured [`OrderBy`].
pub fn sql_order_by(order_by: OrderBy) -> SqlOrderBy {
    match order_by {
        OrderBy::None => SqlOrderBy::None,
        OrderBy::Ascending => SqlOrderBy::Ascending,
        OrderBy::Descending => SqlOrderBy::Descending,
    }
}
