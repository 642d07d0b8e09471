//! The SELECT statement compiler.
//!
//! Compilation runs in fixed steps, each a [`CompilationPhase`]:
//!
//! 1. collect the needed columns ([`ColumnSpecInfo`]): projection first, then
//!    the operand columns of every filter that applies;
//! 2. alias every table those columns live in ([`TableAliaser`]);
//! 3. build the SELECT, FROM, WHERE and ORDER BY fragments with the
//!    generator's clause builders;
//! 4. join the fragments into the final SQL text.
//!
//! Any failure aborts before SQL text exists, so a partial statement is never
//! returned.

use std::fmt;
use std::str::FromStr;

use tracing::{debug, instrument, trace};

use crate::aliaser::{TableAliaser, TableId};
use crate::column_info::{ColumnLayout, ColumnPurpose, ColumnSpecInfo};
use crate::dialect::{Generator, WhereClauseBuilder};
use crate::error::{Result, SqlGenError};
use crate::filter::{Filter, FilterKind};
use crate::processor::{ProcessorOptions, ResultMode, ResultProcessor, ResultProcessorFactory};
use crate::spec::{
    Cardinality, ColumnSpec, Direction, EntitySpec, EntitySpecGraph, InboundReference, PathStep,
    StagingSpec,
};
use crate::value::{Comparator, Value};

/// Steps of one compilation, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompilationPhase {
    SelectingGenerator,
    BuildingColumnInfo,
    AliasingTables,
    BuildingClauses,
    AssemblingSql,
    Ready,
}

impl fmt::Display for CompilationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::SelectingGenerator => "selecting a generator",
            Self::BuildingColumnInfo => "building column info",
            Self::AliasingTables => "aliasing tables",
            Self::BuildingClauses => "building clauses",
            Self::AssemblingSql => "assembling SQL",
            Self::Ready => "ready",
        };
        f.write_str(text)
    }
}

/// Requested ordering of the result rows by key id.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SqlOrderBy {
    #[default]
    None,
    Ascending,
    Descending,
}

impl FromStr for SqlOrderBy {
    type Err = SqlGenError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "" => Ok(Self::None),
            "asc" | "ascending" => Ok(Self::Ascending),
            "desc" | "descending" => Ok(Self::Descending),
            other => Err(SqlGenError::invalid_spec(format!(
                "unknown order-by '{other}', expected none, ascending or descending"
            ))),
        }
    }
}

/// Everything one compilation needs besides the generator and graph.
#[derive(Debug, Clone, Default)]
pub struct SelectRequest {
    /// Entity whose propositions are selected.
    pub entity: String,
    /// Other entities that filters may join to.
    pub joinable_entities: Vec<String>,
    /// References into `entity` whose declaring side's unique ids are read back.
    pub inbound_references: Vec<InboundReference>,
    pub filter: Option<Filter>,
    /// Proposition ids wanted; empty means every id of `entity`.
    pub proposition_ids: Vec<String>,
    /// Key ids to restrict to; empty means all.
    pub key_ids: Vec<String>,
    pub order_by: SqlOrderBy,
    pub wrap_key_id: bool,
    pub staging: Vec<StagingSpec>,
}

impl SelectRequest {
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            ..Default::default()
        }
    }

    pub fn joinable(mut self, entity: impl Into<String>) -> Self {
        self.joinable_entities.push(entity.into());
        self
    }

    pub fn inbound(mut self, reference: InboundReference) -> Self {
        self.inbound_references.push(reference);
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn proposition_ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.proposition_ids = ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn key_ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.key_ids = ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn order_by(mut self, order_by: SqlOrderBy) -> Self {
        self.order_by = order_by;
        self
    }

    pub fn wrap_key_id(mut self, wrap: bool) -> Self {
        self.wrap_key_id = wrap;
        self
    }

    pub fn staging(mut self, staging: Vec<StagingSpec>) -> Self {
        self.staging = staging;
        self
    }
}

/// SQL text and the layout of its result rows.
#[derive(Debug, Clone)]
pub struct GeneratedSql {
    pub sql: String,
    pub layout: ColumnLayout,
}

/// A compiled statement ready to execute.
pub struct CompiledSelect<'a> {
    pub sql: String,
    pub layout: ColumnLayout,
    pub processor: Box<dyn ResultProcessor + 'a>,
}

impl fmt::Debug for CompiledSelect<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledSelect")
            .field("sql", &self.sql)
            .field("layout", &self.layout)
            .finish_non_exhaustive()
    }
}

/// A filter node that applies, and where its entity sits.
struct AppliedFilter<'r> {
    node: usize,
    filter: &'r Filter,
    scope: usize,
    guard: Option<CodeGuard>,
}

/// Keeps a filter on a coded entity to the proposition ids it names.
#[derive(Debug, Clone, PartialEq)]
enum CodeGuard {
    /// Main entity: rows with these codes are read but not restricted.
    Bypass(Vec<Value>),
    /// Joined entity: only rows with these codes can satisfy the filter.
    Restrict(Vec<Value>),
}

impl CodeGuard {
    /// `None` when the filter names every id `target` yields in this statement.
    fn for_filter(
        target: &EntitySpec,
        filter: &Filter,
        request: &SelectRequest,
        main: bool,
    ) -> Option<Self> {
        let code = target.code.as_ref()?;
        let named = |id: &str| filter.proposition_ids().iter().any(|f| f == id);
        if target.proposition_ids.iter().all(|id| named(id)) {
            return None;
        }
        let nominal = |codes: Vec<&str>| codes.into_iter().map(Value::nominal).collect::<Vec<_>>();
        if main {
            let read = |id: &str| {
                request.proposition_ids.is_empty() || request.proposition_ids.iter().any(|r| r == id)
            };
            let others = nominal(code.codes_for(|id| !named(id) && read(id)));
            (!others.is_empty()).then_some(Self::Bypass(others))
        } else {
            Some(Self::Restrict(nominal(code.codes_for(named))))
        }
    }

    fn wrap(&self, builder: &dyn WhereClauseBuilder, code: &str, predicate: &str) -> String {
        match self {
            Self::Bypass(others) => format!(
                "({} OR {predicate})",
                builder.predicate(code, Comparator::NotIn, others)
            ),
            Self::Restrict(codes) if codes.is_empty() => builder.never(),
            Self::Restrict(codes) => format!(
                "({} AND {predicate})",
                builder.predicate(code, Comparator::In, codes)
            ),
        }
    }
}

/// Compiles [`SelectRequest`]s with one generator against one entity graph.
#[derive(Debug, Clone, Copy)]
pub struct SelectStatement<'g> {
    generator: &'g Generator,
    graph: &'g EntitySpecGraph,
}

impl<'g> SelectStatement<'g> {
    pub fn new(generator: &'g Generator, graph: &'g EntitySpecGraph) -> Self {
        Self { generator, graph }
    }

    /// Compile `request` and create the processor for its rows.
    ///
    /// `mode` picks buffering or streaming; the SQL text is the same either way.
    pub fn compile<'a>(
        &self,
        request: &SelectRequest,
        factory: &dyn ResultProcessorFactory,
        mode: ResultMode<'a>,
    ) -> Result<CompiledSelect<'a>> {
        let GeneratedSql { sql, layout } = self.generate(request)?;
        let options = ProcessorOptions {
            proposition_ids: request.proposition_ids.clone(),
            order_by: request.order_by,
            wrap_key_id: request.wrap_key_id,
        };
        let processor = factory.create(layout.clone(), options, mode);
        Ok(CompiledSelect {
            sql,
            layout,
            processor,
        })
    }

    /// Compile `request` to SQL text.
    #[instrument(skip_all, fields(generator = %self.generator.name(), entity = %request.entity))]
    pub fn generate(&self, request: &SelectRequest) -> Result<GeneratedSql> {
        self.generator
            .from_clause()
            .check_staging(self.generator.name(), &request.staging)?;

        debug!(phase = %CompilationPhase::BuildingColumnInfo);
        let entity = self
            .graph
            .entity(&request.entity)
            .ok_or_else(|| {
                SqlGenError::compilation(
                    CompilationPhase::BuildingColumnInfo,
                    format!("unknown entity '{}'", request.entity),
                )
            })?
            .clone();
        self.check_request(&entity, request)?;

        let mut info = ColumnSpecInfo::for_entity(entity.clone());
        for inbound in &request.inbound_references {
            self.need_inbound(&mut info, &entity, inbound)?;
        }

        let mut applied = Vec::new();
        if let Some(filter) = &request.filter {
            for (node, filter) in filter.and_iter().enumerate() {
                let Some(path) = self.filter_scope(&entity, filter, request)? else {
                    trace!(node, proposition_ids = ?filter.proposition_ids(), "filter does not apply, skipping");
                    continue;
                };
                let scope = info.add_scope(path);
                self.need_filter_columns(&mut info, node, filter, scope)?;
                let target = info.scopes()[scope].entity.clone();
                let guard = CodeGuard::for_filter(&target, filter, request, scope == 0);
                if guard.is_some()
                    && let Some(code) = &target.code
                {
                    info.need(scope, &code.column, ColumnPurpose::FilterCode(node), false);
                }
                applied.push(AppliedFilter {
                    node,
                    filter,
                    scope,
                    guard,
                });
            }
        }
        debug!(
            columns = info.columns().len(),
            projected = info.projected().len(),
            filters = applied.len(),
            "column info built"
        );

        debug!(phase = %CompilationPhase::AliasingTables);
        let mut aliaser = TableAliaser::new(&entity.table);
        let tables: Vec<TableId> = info
            .columns()
            .iter()
            .map(|needed| aliaser.column_table(&info.scopes()[needed.scope].path, &needed.column))
            .collect();
        let column_sql = |index: usize| {
            format!(
                "{}.{}",
                aliaser.alias(tables[index]),
                info.columns()[index].column.column
            )
        };
        debug!(tables = aliaser.len(), "tables aliased");

        debug!(phase = %CompilationPhase::BuildingClauses);
        let key_index = purpose_index(&info, |p| *p == ColumnPurpose::KeyId).ok_or_else(|| {
            SqlGenError::compilation(CompilationPhase::BuildingClauses, "no key id column")
        })?;
        let key_column = column_sql(key_index);
        let key_expression = self
            .generator
            .select_clause()
            .key_id_expression(&key_column, request.wrap_key_id);

        let select_list: Vec<String> = info
            .projected()
            .iter()
            .map(|&index| {
                if index == key_index {
                    key_expression.clone()
                } else {
                    column_sql(index)
                }
            })
            .collect();
        let select = self.generator.select_clause().build(&select_list);
        let from = self.generator.from_clause().build(&aliaser, &request.staging);

        let where_builder = self.generator.where_clause();
        let mut fragments = Vec::new();
        if !request.key_ids.is_empty() {
            let keys: Vec<Value> = request.key_ids.iter().map(Value::nominal).collect();
            fragments.push(where_builder.predicate(&key_column, Comparator::In, &keys));
        }
        if let Some(code_fragment) = self.code_restriction(&entity, request, &info, &column_sql) {
            fragments.push(code_fragment);
        }
        for applied in &applied {
            let columns: Vec<String> = info
                .filter_columns(applied.node)
                .into_iter()
                .map(&column_sql)
                .collect();
            let target = &info.scopes()[applied.scope].entity;
            let Some(predicate) = filter_fragment(where_builder, target, applied.filter, &columns)?
            else {
                trace!(node = applied.node, "filter is unbounded, no predicate");
                continue;
            };
            let fragment = match &applied.guard {
                Some(guard) => {
                    let code = purpose_index(&info, |p| *p == ColumnPurpose::FilterCode(applied.node))
                        .map(&column_sql)
                        .ok_or_else(|| {
                            SqlGenError::compilation(
                                CompilationPhase::BuildingClauses,
                                format!("code column of filter {} was not registered", applied.node),
                            )
                        })?;
                    guard.wrap(where_builder, &code, &predicate)
                }
                None => predicate,
            };
            fragments.push(fragment);
        }
        let where_clause = where_builder.build(&fragments);

        let unique_ids: Vec<String> = info
            .purposes()
            .iter()
            .filter(|(purpose, _)| *purpose == ColumnPurpose::UniqueId)
            .map(|(_, index)| column_sql(*index))
            .collect();
        let order = match request.order_by {
            SqlOrderBy::None if spans_rows(&info) => {
                debug!("a proposition may span several rows, ordering by key id");
                SqlOrderBy::Ascending
            }
            order => order,
        };
        let order_by = self
            .generator
            .order_by_clause()
            .build(&key_expression, &unique_ids, order);

        debug!(phase = %CompilationPhase::AssemblingSql);
        let mut parts = vec![select, from];
        parts.extend(where_clause);
        parts.extend(order_by);
        let sql = parts.join(" ");

        debug!(phase = %CompilationPhase::Ready, sql = %sql, "statement compiled");
        Ok(GeneratedSql {
            sql,
            layout: info.layout(self.generator.key_normalizer(request.wrap_key_id)),
        })
    }

    fn check_request(&self, entity: &EntitySpec, request: &SelectRequest) -> Result<()> {
        if !request.proposition_ids.is_empty()
            && !request.proposition_ids.iter().any(|id| entity.handles(id))
        {
            return Err(SqlGenError::compilation(
                CompilationPhase::BuildingColumnInfo,
                format!(
                    "entity '{}' declares none of the requested proposition ids",
                    entity.name
                ),
            ));
        }
        if let Some(unknown) = request
            .joinable_entities
            .iter()
            .find(|name| self.graph.entity(name).is_none())
        {
            return Err(SqlGenError::compilation(
                CompilationPhase::BuildingColumnInfo,
                format!("unknown joinable entity '{unknown}'"),
            ));
        }
        Ok(())
    }

    fn need_inbound(
        &self,
        info: &mut ColumnSpecInfo,
        entity: &EntitySpec,
        inbound: &InboundReference,
    ) -> Result<()> {
        if inbound.reference.target != entity.name {
            return Err(SqlGenError::compilation(
                CompilationPhase::BuildingColumnInfo,
                format!(
                    "inbound reference '{}.{}' targets '{}', not '{}'",
                    inbound.source_entity,
                    inbound.reference.name,
                    inbound.reference.target,
                    entity.name
                ),
            ));
        }
        let step = self.graph.inbound_step(inbound)?;
        let source = step.to.clone();
        let scope = info.add_scope(vec![step]);
        let label = format!("{}.{}", inbound.source_entity, inbound.reference.name);
        for unique_id in &source.unique_ids {
            info.need(
                scope,
                unique_id,
                ColumnPurpose::InboundReference(label.clone()),
                true,
            );
        }
        Ok(())
    }

    /// Path from the main entity to the entity a filter restricts, or `None`
    /// when the filter restricts nothing this statement reads.
    fn filter_scope(
        &self,
        entity: &EntitySpec,
        filter: &Filter,
        request: &SelectRequest,
    ) -> Result<Option<Vec<PathStep>>> {
        if !filter.reference_path().is_empty() {
            let path = self
                .graph
                .resolve_named_path(&entity.name, filter.reference_path())?;
            let applies = match path.last() {
                Some(step) => filter.applies_to(&step.to),
                None => filter.applies_to(entity),
            };
            return Ok(applies.then_some(path));
        }
        if filter.applies_to(entity) {
            return Ok(Some(Vec::new()));
        }
        let joinable = request.joinable_entities.iter().find(|name| {
            self.graph
                .entity(name)
                .is_some_and(|candidate| filter.applies_to(candidate))
        });
        match joinable {
            Some(name) => self.graph.resolve_join_path(&entity.name, name).map(Some),
            None => Ok(None),
        }
    }

    fn need_filter_columns(
        &self,
        info: &mut ColumnSpecInfo,
        node: usize,
        filter: &Filter,
        scope: usize,
    ) -> Result<()> {
        let target = info.scopes()[scope].entity.clone();
        let missing = |what: String| {
            SqlGenError::compilation(
                CompilationPhase::BuildingColumnInfo,
                format!("entity '{}' has no {what}", target.name),
            )
        };
        match filter.kind() {
            FilterKind::PropertyValue(property) => {
                let column = self
                    .graph
                    .resolve_columns(&target, &[property.property()])?
                    .remove(0);
                info.need(scope, &column, ColumnPurpose::Filter(node), false);
            }
            FilterKind::Value(_) => {
                let column = target
                    .value
                    .as_ref()
                    .ok_or_else(|| missing("value column".into()))?;
                info.need(scope, column, ColumnPurpose::Filter(node), false);
            }
            FilterKind::Position(position) => {
                if position.is_unbounded() {
                    return Ok(());
                }
                let start = target
                    .start_time
                    .as_ref()
                    .ok_or_else(|| missing("start time column".into()))?;
                let finish = target.finish_time.as_ref().unwrap_or(start);
                info.need(scope, start, ColumnPurpose::Filter(node), false);
                info.need(scope, finish, ColumnPurpose::Filter(node), false);
            }
        }
        Ok(())
    }

    /// `code IN (...)` when only some of a coded entity's ids are wanted.
    fn code_restriction(
        &self,
        entity: &EntitySpec,
        request: &SelectRequest,
        info: &ColumnSpecInfo,
        column_sql: &dyn Fn(usize) -> String,
    ) -> Option<String> {
        let code = entity.code.as_ref()?;
        let wanted = |id: &str| request.proposition_ids.iter().any(|r| r == id);
        let proper_subset = !request.proposition_ids.is_empty()
            && entity.proposition_ids.iter().any(|id| !wanted(id));
        if !proper_subset {
            return None;
        }
        let index = purpose_index(info, |p| *p == ColumnPurpose::Code)?;
        let where_builder = self.generator.where_clause();
        let codes: Vec<Value> = code.codes_for(wanted).into_iter().map(Value::nominal).collect();
        if codes.is_empty() {
            return Some(where_builder.never());
        }
        Some(where_builder.predicate(&column_sql(index), Comparator::In, &codes))
    }
}

/// Whether one proposition can come back as several rows: a many-valued
/// reference on the main entity, or a join that fans out.
fn spans_rows(info: &ColumnSpecInfo) -> bool {
    let many = |cardinality: Cardinality| cardinality == Cardinality::Many;
    info.entity().references.iter().any(|r| many(r.cardinality))
        || info.scopes().iter().any(|scope| {
            scope
                .path
                .iter()
                .any(|step| step.direction == Direction::Reverse || many(step.reference.cardinality))
        })
}

fn purpose_index(info: &ColumnSpecInfo, wanted: impl Fn(&ColumnPurpose) -> bool) -> Option<usize> {
    info.purposes()
        .iter()
        .find(|(purpose, _)| wanted(purpose))
        .map(|(_, index)| *index)
}

/// One WHERE fragment for one filter node; `None` when it restricts nothing.
fn filter_fragment(
    builder: &dyn WhereClauseBuilder,
    target: &EntitySpec,
    filter: &Filter,
    columns: &[String],
) -> Result<Option<String>> {
    let column = |position: usize| {
        columns.get(position).ok_or_else(|| {
            SqlGenError::compilation(
                CompilationPhase::BuildingClauses,
                format!("filter column {position} was not registered"),
            )
        })
    };

    match filter.kind() {
        FilterKind::PropertyValue(property) => {
            let spec = target.property(property.property()).map(|p| &p.column);
            Ok(Some(comparison(
                builder,
                column(0)?,
                spec,
                property.comparator(),
                property.values(),
            )))
        }
        FilterKind::Value(value) => Ok(Some(comparison(
            builder,
            column(0)?,
            target.value.as_ref(),
            value.comparator(),
            value.values(),
        ))),
        FilterKind::Position(position) => {
            let bounds = position.bounds();
            let mut parts = Vec::new();
            if let Some(min_start) = bounds.min_start {
                parts.push(format!(
                    "{} >= {}",
                    column(0)?,
                    builder.literal(&Value::DateTime(min_start))
                ));
            }
            if let Some(max_finish) = bounds.max_finish {
                let finish = column(1).or_else(|_| column(0))?;
                parts.push(format!(
                    "{finish} < {}",
                    builder.literal(&Value::DateTime(max_finish))
                ));
            }
            Ok(match parts.len() {
                0 => None,
                1 => parts.pop(),
                _ => Some(format!("({})", parts.join(" AND "))),
            })
        }
    }
}

/// Compare a column, translating display values back to stored codes when
/// the column has mappings.
fn comparison(
    builder: &dyn WhereClauseBuilder,
    column: &str,
    spec: Option<&ColumnSpec>,
    comparator: Comparator,
    values: &[Value],
) -> String {
    let Some(mappings) = spec.and_then(|s| s.mappings.as_ref()) else {
        return builder.predicate(column, comparator, values);
    };
    let codes: Vec<Value> = values
        .iter()
        .filter_map(|value| mappings.encode(&value.as_text()).map(Value::nominal))
        .collect();
    if codes.is_empty() {
        return match comparator {
            Comparator::NotEqual | Comparator::NotIn => builder.always(),
            _ => builder.never(),
        };
    }
    builder.predicate(column, comparator, &codes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::h2;
    use crate::filter::{Granularity, PositionFilter, PropertyValueFilter, ValueFilter};
    use crate::spec::{Cardinality, CodeSpec, Mappings, ReferenceSpec, SqlType, TableSpec};
    use time::macros::datetime;

    fn graph() -> EntitySpecGraph {
        let patient = EntitySpec::new(
            "Patient",
            TableSpec::new("patient"),
            ColumnSpec::varchar("patient_id"),
        )
        .with_proposition_id("PatientDetails")
        .with_unique_id(ColumnSpec::varchar("patient_id"))
        .with_property(
            "gender",
            ColumnSpec::varchar("gender_cd")
                .with_mappings([("M", "Male"), ("F", "Female")].into_iter().collect::<Mappings>()),
        );

        let lab = EntitySpec::new("Lab", TableSpec::new("lab"), ColumnSpec::varchar("patient_id"))
            .with_proposition_id("HbA1c")
            .with_proposition_id("Glucose")
            .with_unique_id(ColumnSpec::varchar("lab_id"))
            .with_code(
                CodeSpec::new(ColumnSpec::varchar("loinc"))
                    .with_code("4548-4", "HbA1c")
                    .with_code("2345-7", "Glucose"),
            )
            .with_start_time(ColumnSpec::new("result_dt", SqlType::Timestamp))
            .with_value(ColumnSpec::new("result_num", SqlType::Numeric))
            .with_reference(ReferenceSpec::new(
                "patient",
                "Patient",
                ColumnSpec::varchar("patient_id"),
                ColumnSpec::varchar("patient_id"),
                Cardinality::One,
            ));

        EntitySpecGraph::new(vec![patient, lab]).unwrap()
    }

    fn generate(request: SelectRequest) -> Result<String> {
        let graph = graph();
        let generator = h2::generator();
        SelectStatement::new(&generator, &graph)
            .generate(&request)
            .map(|g| g.sql)
    }

    #[test]
    fn test_plain_select() {
        let sql = generate(SelectRequest::new("Patient")).unwrap();
        assert_eq!(sql, "SELECT a1.patient_id, a1.gender_cd FROM patient a1");
    }

    #[test]
    fn test_key_ids_and_code_subset() {
        let sql = generate(
            SelectRequest::new("Lab")
                .key_ids(["00001", "00002"])
                .proposition_ids(["HbA1c"])
                .order_by(SqlOrderBy::Ascending),
        )
        .unwrap();
        assert_eq!(
            sql,
            "SELECT a1.patient_id, a1.lab_id, a1.loinc, a1.result_dt, a1.result_num \
             FROM lab a1 \
             WHERE a1.patient_id IN ('00001', '00002') AND a1.loinc IN ('4548-4') \
             ORDER BY a1.patient_id ASC, a1.lab_id ASC"
        );

        let all = generate(SelectRequest::new("Lab").proposition_ids(["HbA1c", "Glucose"])).unwrap();
        assert!(!all.contains("loinc IN"));
    }

    #[test]
    fn test_filter_on_joined_entity_uses_mappings() {
        let filter = Filter::property_value(
            ["PatientDetails"],
            PropertyValueFilter::new("gender", Comparator::Equal, vec![Value::nominal("Female")])
                .unwrap(),
        );
        let sql = generate(SelectRequest::new("Lab").joinable("Patient").filter(filter)).unwrap();
        assert!(sql.contains("INNER JOIN patient a2 ON a1.patient_id = a2.patient_id"));
        assert!(sql.ends_with("WHERE a2.gender_cd = 'F'"));
        // Filter columns are not projected.
        assert!(sql.starts_with("SELECT a1.patient_id, a1.lab_id, a1.loinc, a1.result_dt, a1.result_num FROM"));
    }

    #[test]
    fn test_unmapped_operand_matches_nothing() {
        let filter = Filter::property_value(
            ["PatientDetails"],
            PropertyValueFilter::new("gender", Comparator::In, vec![Value::nominal("Other")])
                .unwrap(),
        );
        let sql = generate(SelectRequest::new("Patient").filter(filter)).unwrap();
        assert!(sql.ends_with("WHERE 1 = 0"));

        let filter = Filter::property_value(
            ["PatientDetails"],
            PropertyValueFilter::new(
                "gender",
                Comparator::NotIn,
                vec![Value::nominal("Other"), Value::nominal("Male")],
            )
            .unwrap(),
        );
        let sql = generate(SelectRequest::new("Patient").filter(filter)).unwrap();
        assert!(sql.ends_with("WHERE a1.gender_cd NOT IN ('M')"));
    }

    #[test]
    fn test_position_and_value_filters() {
        let filter = Filter::position(
            ["HbA1c", "Glucose"],
            PositionFilter::new(
                Some(datetime!(2010-01-15 0:00)),
                Granularity::Month,
                Some(datetime!(2010-12-31 0:00)),
                Granularity::Day,
            )
            .unwrap(),
        )
        .and(Filter::value(
            ["HbA1c", "Glucose"],
            ValueFilter::new(Comparator::GreaterThan, vec![Value::Float(6.5)]).unwrap(),
        ));
        let sql = generate(SelectRequest::new("Lab").filter(filter)).unwrap();
        assert!(sql.ends_with(
            "WHERE (a1.result_dt >= TIMESTAMP '2010-01-01 00:00:00' \
             AND a1.result_dt < TIMESTAMP '2011-01-01 00:00:00') AND a1.result_num > 6.5"
        ));
    }

    #[test]
    fn test_filter_for_other_entity_skipped() {
        let filter = Filter::value(
            ["Glucose"],
            ValueFilter::new(Comparator::LessThan, vec![Value::Integer(70)]).unwrap(),
        );
        let sql = generate(SelectRequest::new("Patient").filter(filter)).unwrap();
        assert!(!sql.contains("WHERE"));
    }

    fn hba1c_above(threshold: f64) -> Filter {
        Filter::value(
            ["HbA1c"],
            ValueFilter::new(Comparator::GreaterThan, vec![Value::Float(threshold)]).unwrap(),
        )
    }

    #[test]
    fn test_filter_on_some_coded_ids_spares_the_others() {
        let sql = generate(
            SelectRequest::new("Lab")
                .proposition_ids(["HbA1c", "Glucose"])
                .filter(hba1c_above(6.5)),
        )
        .unwrap();
        assert!(sql.ends_with("WHERE (a1.loinc NOT IN ('2345-7') OR a1.result_num > 6.5)"));

        // Glucose is not read, so the code restriction already scopes the filter.
        let sql = generate(
            SelectRequest::new("Lab")
                .proposition_ids(["HbA1c"])
                .filter(hba1c_above(6.5)),
        )
        .unwrap();
        assert!(sql.ends_with("WHERE a1.loinc IN ('4548-4') AND a1.result_num > 6.5"));
    }

    #[test]
    fn test_filter_on_joined_coded_entity_checks_code() {
        let sql = generate(
            SelectRequest::new("Patient")
                .joinable("Lab")
                .filter(hba1c_above(6.5)),
        )
        .unwrap();
        assert!(sql.contains("LEFT OUTER JOIN lab a2 ON a1.patient_id = a2.patient_id"));
        assert!(sql.contains("WHERE (a2.loinc IN ('4548-4') AND a2.result_num > 6.5)"));
        // The code column is read for the filter only.
        assert!(sql.starts_with("SELECT a1.patient_id, a1.gender_cd FROM"));
        assert!(sql.ends_with("ORDER BY a1.patient_id ASC"));
    }

    #[test]
    fn test_failures_carry_phase() {
        let err = generate(SelectRequest::new("Nope")).unwrap_err();
        assert!(matches!(
            err,
            SqlGenError::Compilation { phase: CompilationPhase::BuildingColumnInfo, .. }
        ));

        let filter = Filter::property_value(
            ["HbA1c"],
            PropertyValueFilter::new("units", Comparator::Equal, vec![Value::nominal("%")])
                .unwrap(),
        );
        let err = generate(SelectRequest::new("Lab").filter(filter)).unwrap_err();
        assert!(matches!(err, SqlGenError::Compilation { .. }));

        let err = generate(SelectRequest::new("Lab").proposition_ids(["PatientDetails"])).unwrap_err();
        assert!(err.to_string().contains("none of the requested"));
    }

    #[test]
    fn test_inbound_reference_projection() {
        let graph = graph();
        let generator = h2::generator();
        let inbound = graph.inbound_references("Patient").remove(0);
        let generated = SelectStatement::new(&generator, &graph)
            .generate(&SelectRequest::new("Patient").inbound(inbound))
            .unwrap();
        assert_eq!(
            generated.sql,
            "SELECT a1.patient_id, a1.gender_cd, a2.lab_id FROM patient a1 \
             LEFT OUTER JOIN lab a2 ON a1.patient_id = a2.patient_id \
             ORDER BY a1.patient_id ASC"
        );
        assert_eq!(generated.layout.inbound()[0].label, "Lab.patient");
        assert_eq!(generated.layout.inbound()[0].unique_ids, vec![2]);
    }

    #[test]
    fn test_order_by_parse() {
        assert_eq!("ascending".parse::<SqlOrderBy>().unwrap(), SqlOrderBy::Ascending);
        assert_eq!("DESC".parse::<SqlOrderBy>().unwrap(), SqlOrderBy::Descending);
        assert_eq!("none".parse::<SqlOrderBy>().unwrap(), SqlOrderBy::None);
        assert!("sideways".parse::<SqlOrderBy>().is_err());
    }
}
