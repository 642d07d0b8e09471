//! The execution seam and the data-source query runner.
//!
//! [`QueryExecutor`] is the boundary to a real database driver: it runs SQL
//! text and feeds rows to a [`ResultProcessor`]. [`SqlDataSource`] sits on
//! top. It turns a [`QueryRequest`] into one statement per entity that holds
//! requested propositions, runs each one and merges or streams the results.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument, trace};

use crate::column_info::ColumnLayout;
use crate::dialect::Generator;
use crate::error::Result;
use crate::filter::Filter;
use crate::processor::{
    ProcessorOutput, PropositionProcessorFactory, ResultMode, ResultProcessor,
    ResultProcessorFactory,
};
use crate::proposition::{KeyedPropositions, Proposition};
use crate::registry::GeneratorRegistry;
use crate::spec::{EntitySpec, EntitySpecGraph, StagingSpec};
use crate::statement::{CompilationPhase, CompiledSelect, SelectRequest, SelectStatement, SqlOrderBy};
use crate::version::ServerIdentity;

/// Runs compiled SQL against a live database.
///
/// Implementations must hold their connection only for the duration of the
/// call and release it on every exit path, including errors raised by the
/// processor mid-stream.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Execute `sql`, handing every row to `processor` in arrival order.
    ///
    /// Returns the number of rows read. Errors from the driver are wrapped as
    /// [`crate::SqlGenError::Execution`]; processor errors are returned as is.
    async fn execute(
        &self,
        sql: &str,
        layout: &ColumnLayout,
        processor: &mut dyn ResultProcessor,
    ) -> Result<u64>;
}

/// What the data-source backend asks for.
#[derive(Debug, Clone, Default)]
pub struct QueryRequest {
    pub key_ids: Vec<String>,
    pub proposition_ids: Vec<String>,
    pub filter: Option<Filter>,
    pub order_by: SqlOrderBy,
}

impl QueryRequest {
    pub fn new<I, S>(proposition_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            proposition_ids: proposition_ids.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn key_ids<I, S>(mut self, key_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.key_ids = key_ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn order_by(mut self, order_by: SqlOrderBy) -> Self {
        self.order_by = order_by;
        self
    }
}

/// Statement options fixed for the lifetime of a data source.
#[derive(Debug, Clone, Default)]
pub struct DataSourceOptions {
    pub wrap_key_id: bool,
    pub staging: Vec<StagingSpec>,
}

/// Reads propositions through one generator and one executor.
pub struct SqlDataSource<E> {
    graph: Arc<EntitySpecGraph>,
    generator: Arc<Generator>,
    executor: E,
    factory: Arc<dyn ResultProcessorFactory>,
    options: DataSourceOptions,
}

impl<E: QueryExecutor> SqlDataSource<E> {
    pub fn new(generator: Arc<Generator>, graph: Arc<EntitySpecGraph>, executor: E) -> Self {
        Self {
            graph,
            generator,
            executor,
            factory: Arc::new(PropositionProcessorFactory),
            options: DataSourceOptions::default(),
        }
    }

    /// Select the generator for `identity` and build the data source.
    #[instrument(skip_all, fields(identity = %identity))]
    pub fn connect(
        registry: &GeneratorRegistry,
        identity: &ServerIdentity,
        graph: Arc<EntitySpecGraph>,
        executor: E,
    ) -> Result<Self> {
        debug!(phase = %CompilationPhase::SelectingGenerator);
        let generator = registry.select_generator(identity)?;
        Ok(Self::new(generator, graph, executor))
    }

    pub fn with_options(mut self, options: DataSourceOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_factory(mut self, factory: Arc<dyn ResultProcessorFactory>) -> Self {
        self.factory = factory;
        self
    }

    pub fn generator(&self) -> &Generator {
        &self.generator
    }

    pub fn graph(&self) -> &EntitySpecGraph {
        &self.graph
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    /// One select request per entity declaring a requested proposition id,
    /// in entity declaration order.
    pub fn plan(&self, request: &QueryRequest) -> Vec<SelectRequest> {
        self.graph
            .entities()
            .filter_map(|entity| {
                let ids: Vec<&String> = request
                    .proposition_ids
                    .iter()
                    .filter(|id| entity.handles(id))
                    .collect();
                if ids.is_empty() {
                    return None;
                }
                let mut select = SelectRequest::new(entity.name.clone())
                    .proposition_ids(ids.into_iter().cloned())
                    .key_ids(request.key_ids.iter().cloned())
                    .order_by(request.order_by)
                    .wrap_key_id(self.options.wrap_key_id)
                    .staging(self.options.staging.clone());
                if let Some(filter) = &request.filter {
                    for joinable in self.joinable_for(entity, filter) {
                        select = select.joinable(joinable);
                    }
                    select = select.filter(filter.clone());
                }
                Some(select)
            })
            .collect()
    }

    /// Entities restricted by `filter` that `entity` can reach unambiguously.
    fn joinable_for(&self, entity: &EntitySpec, filter: &Filter) -> Vec<String> {
        let mut joinable: Vec<String> = Vec::new();
        for node in filter.and_iter() {
            if !node.reference_path().is_empty() || node.applies_to(entity) {
                continue;
            }
            for candidate in self.graph.entities() {
                if candidate.name == entity.name
                    || !node.applies_to(candidate)
                    || joinable.contains(&candidate.name)
                {
                    continue;
                }
                match self.graph.resolve_join_path(&entity.name, &candidate.name) {
                    Ok(_) => joinable.push(candidate.name.clone()),
                    Err(err) => trace!(
                        from = %entity.name,
                        to = %candidate.name,
                        error = %err,
                        "filter entity not joinable"
                    ),
                }
            }
        }
        joinable
    }

    /// Read every requested proposition into memory, grouped by key id.
    #[instrument(skip_all, fields(generator = %self.generator.name()))]
    pub async fn read(&self, request: &QueryRequest) -> Result<KeyedPropositions> {
        let statement = SelectStatement::new(&self.generator, &self.graph);
        let mut merged = KeyedPropositions::new();
        for select in self.plan(request) {
            let CompiledSelect {
                sql,
                layout,
                mut processor,
            } = statement.compile(&select, self.factory.as_ref(), ResultMode::Buffered)?;
            let rows = self
                .executor
                .execute(&sql, &layout, processor.as_mut())
                .await?;
            debug!(entity = %select.entity, rows, "statement executed");
            for (key_id, propositions) in processor.finish()?.into_propositions() {
                merged.entry(key_id).or_default().extend(propositions);
            }
        }
        Ok(merged)
    }

    /// Hand every requested proposition to `handler` as it is read.
    ///
    /// Returns the number of propositions delivered. When execution fails
    /// part way, the propositions already delivered stay valid and the error
    /// is returned.
    #[instrument(skip_all, fields(generator = %self.generator.name()))]
    pub async fn stream(
        &self,
        request: &QueryRequest,
        handler: &mut (dyn FnMut(&str, Proposition) -> Result<()> + Send),
    ) -> Result<u64> {
        let statement = SelectStatement::new(&self.generator, &self.graph);
        let mut delivered = 0;
        for select in self.plan(request) {
            let CompiledSelect {
                sql,
                layout,
                mut processor,
            } = statement.compile(
                &select,
                self.factory.as_ref(),
                ResultMode::Streaming(&mut *handler),
            )?;
            let rows = self
                .executor
                .execute(&sql, &layout, processor.as_mut())
                .await?;
            if let ProcessorOutput::Streamed { delivered: count } = processor.finish()? {
                delivered += count;
            }
            debug!(entity = %select.entity, rows, delivered, "statement streamed");
        }
        Ok(delivered)
    }
}
