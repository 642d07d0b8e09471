//! Which columns a statement needs, and where each lands in the result row.

use std::collections::HashMap;
use std::sync::Arc;

use crate::aliaser::ScopeStep;
use crate::dialect::KeyIdNormalizer;
use crate::spec::{ColumnSpec, EntitySpec, JoinSpec, PathStep, SqlType};

/// Why a column is needed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnPurpose {
    KeyId,
    UniqueId,
    Code,
    StartTime,
    FinishTime,
    Value,
    Property(String),
    Reference(String),
    InboundReference(String),
    /// Operand column of the filter node at this chain position.
    Filter(usize),
    /// Code column that scopes the filter node at this position to its ids.
    FilterCode(usize),
}

/// An entity reached from the statement's main entity.
#[derive(Debug, Clone)]
pub struct ColumnScope {
    pub entity: Arc<EntitySpec>,
    pub path: Vec<PathStep>,
}

#[derive(Debug, Clone)]
pub struct NeededColumn {
    pub scope: usize,
    pub column: ColumnSpec,
    /// Position in the SELECT list, when projected.
    pub projection: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ColumnLocation {
    scope: usize,
    joins: Vec<JoinSpec>,
    column: String,
}

/// The deduplicated column needs of one statement.
///
/// Scope 0 is always the main entity. Columns are recorded in the order they
/// are first needed and two needs for the same physical column share one
/// entry, so a column is never projected twice.
#[derive(Debug, Clone)]
pub struct ColumnSpecInfo {
    scopes: Vec<ColumnScope>,
    scope_index: HashMap<Vec<ScopeStep>, usize>,
    columns: Vec<NeededColumn>,
    locations: HashMap<ColumnLocation, usize>,
    purposes: Vec<(ColumnPurpose, usize)>,
    projected: Vec<usize>,
}

impl ColumnSpecInfo {
    pub fn new(entity: Arc<EntitySpec>) -> Self {
        let mut scope_index = HashMap::new();
        scope_index.insert(Vec::new(), 0);
        Self {
            scopes: vec![ColumnScope {
                entity,
                path: Vec::new(),
            }],
            scope_index,
            columns: Vec::new(),
            locations: HashMap::new(),
            purposes: Vec::new(),
            projected: Vec::new(),
        }
    }

    /// Needs for reading the main entity's propositions: key id, unique ids,
    /// code, times, value, properties and outbound references, in that order.
    pub fn for_entity(entity: Arc<EntitySpec>) -> Self {
        let mut info = Self::new(Arc::clone(&entity));
        info.need(0, &entity.key_id, ColumnPurpose::KeyId, true);
        for unique_id in &entity.unique_ids {
            info.need(0, unique_id, ColumnPurpose::UniqueId, true);
        }
        if let Some(code) = &entity.code {
            info.need(0, &code.column, ColumnPurpose::Code, true);
        }
        if let Some(start) = &entity.start_time {
            info.need(0, start, ColumnPurpose::StartTime, true);
        }
        if let Some(finish) = &entity.finish_time {
            info.need(0, finish, ColumnPurpose::FinishTime, true);
        }
        if let Some(value) = &entity.value {
            info.need(0, value, ColumnPurpose::Value, true);
        }
        for property in &entity.properties {
            info.need(
                0,
                &property.column,
                ColumnPurpose::Property(property.name.clone()),
                true,
            );
        }
        for reference in &entity.references {
            info.need(
                0,
                &reference.source_column,
                ColumnPurpose::Reference(reference.name.clone()),
                true,
            );
        }
        info
    }

    pub fn entity(&self) -> &Arc<EntitySpec> {
        &self.scopes[0].entity
    }

    /// Register the entity at the end of `path`, returning its scope index.
    pub fn add_scope(&mut self, path: Vec<PathStep>) -> usize {
        let key = ScopeStep::key_of(&path);
        if let Some(&index) = self.scope_index.get(&key) {
            return index;
        }
        let entity = path
            .last()
            .map(|step| Arc::clone(&step.to))
            .unwrap_or_else(|| Arc::clone(&self.scopes[0].entity));
        let index = self.scopes.len();
        self.scopes.push(ColumnScope { entity, path });
        self.scope_index.insert(key, index);
        index
    }

    /// Record that `column`, read in `scope`, is needed for `purpose`.
    pub fn need(
        &mut self,
        scope: usize,
        column: &ColumnSpec,
        purpose: ColumnPurpose,
        project: bool,
    ) -> usize {
        let location = ColumnLocation {
            scope,
            joins: column.joins.clone(),
            column: column.column.clone(),
        };
        let index = match self.locations.get(&location) {
            Some(&index) => index,
            None => {
                let index = self.columns.len();
                self.columns.push(NeededColumn {
                    scope,
                    column: column.clone(),
                    projection: None,
                });
                self.locations.insert(location, index);
                index
            }
        };
        if project && self.columns[index].projection.is_none() {
            self.columns[index].projection = Some(self.projected.len());
            self.projected.push(index);
        }
        self.purposes.push((purpose, index));
        index
    }

    pub fn scopes(&self) -> &[ColumnScope] {
        &self.scopes
    }

    pub fn columns(&self) -> &[NeededColumn] {
        &self.columns
    }

    /// Column indexes in SELECT-list order.
    pub fn projected(&self) -> &[usize] {
        &self.projected
    }

    pub fn purposes(&self) -> &[(ColumnPurpose, usize)] {
        &self.purposes
    }

    /// Columns needed by the filter node at `node`, in the order registered.
    pub fn filter_columns(&self, node: usize) -> Vec<usize> {
        self.purposes
            .iter()
            .filter(|(purpose, _)| *purpose == ColumnPurpose::Filter(node))
            .map(|(_, index)| *index)
            .collect()
    }

    /// The result-row layout of the projected columns.
    pub fn layout(&self, key_normalizer: KeyIdNormalizer) -> ColumnLayout {
        let projection = |index: usize| self.columns[index].projection;
        let mut layout = ColumnLayout {
            entity: Arc::clone(self.entity()),
            columns: self
                .projected
                .iter()
                .map(|&index| self.columns[index].column.clone())
                .collect(),
            key_id: 0,
            unique_ids: Vec::new(),
            code: None,
            start_time: None,
            finish_time: None,
            value: None,
            properties: Vec::new(),
            references: Vec::new(),
            inbound: Vec::new(),
            key_normalizer,
        };

        for (purpose, index) in &self.purposes {
            let Some(position) = projection(*index) else {
                continue;
            };
            match purpose {
                ColumnPurpose::KeyId => layout.key_id = position,
                ColumnPurpose::UniqueId => layout.unique_ids.push(position),
                ColumnPurpose::Code => layout.code = Some(position),
                ColumnPurpose::StartTime => layout.start_time = Some(position),
                ColumnPurpose::FinishTime => layout.finish_time = Some(position),
                ColumnPurpose::Value => layout.value = Some(position),
                ColumnPurpose::Property(name) => layout.properties.push((name.clone(), position)),
                ColumnPurpose::Reference(name) => layout.references.push((name.clone(), position)),
                ColumnPurpose::InboundReference(label) => {
                    match layout.inbound.iter_mut().find(|i| i.label == *label) {
                        Some(inbound) => inbound.unique_ids.push(position),
                        None => {
                            let entity = self.scopes[self.columns[*index].scope].entity.name.clone();
                            layout.inbound.push(InboundLayout {
                                label: label.clone(),
                                entity,
                                unique_ids: vec![position],
                            });
                        }
                    }
                }
                ColumnPurpose::Filter(_) | ColumnPurpose::FilterCode(_) => {}
            }
        }
        layout
    }
}

/// Unique-id positions of one inbound reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundLayout {
    /// `Entity.reference` of the declaring side.
    pub label: String,
    pub entity: String,
    pub unique_ids: Vec<usize>,
}

/// Positions of each proposition part in a result row.
#[derive(Debug, Clone)]
pub struct ColumnLayout {
    entity: Arc<EntitySpec>,
    columns: Vec<ColumnSpec>,
    key_id: usize,
    unique_ids: Vec<usize>,
    code: Option<usize>,
    start_time: Option<usize>,
    finish_time: Option<usize>,
    value: Option<usize>,
    properties: Vec<(String, usize)>,
    references: Vec<(String, usize)>,
    inbound: Vec<InboundLayout>,
    key_normalizer: KeyIdNormalizer,
}

impl ColumnLayout {
    pub fn entity(&self) -> &Arc<EntitySpec> {
        &self.entity
    }

    /// Projected columns in SELECT-list order.
    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn sql_type(&self, position: usize) -> Option<SqlType> {
        self.columns.get(position).map(|c| c.sql_type)
    }

    /// Whether the driver should read this position as raw bytes.
    pub fn is_binary(&self, position: usize) -> bool {
        position == self.key_id && self.key_normalizer == KeyIdNormalizer::AsciiBytes
    }

    pub fn key_id(&self) -> usize {
        self.key_id
    }

    pub fn unique_ids(&self) -> &[usize] {
        &self.unique_ids
    }

    pub fn code(&self) -> Option<usize> {
        self.code
    }

    pub fn start_time(&self) -> Option<usize> {
        self.start_time
    }

    pub fn finish_time(&self) -> Option<usize> {
        self.finish_time
    }

    pub fn value(&self) -> Option<usize> {
        self.value
    }

    pub fn properties(&self) -> &[(String, usize)] {
        &self.properties
    }

    pub fn references(&self) -> &[(String, usize)] {
        &self.references
    }

    pub fn inbound(&self) -> &[InboundLayout] {
        &self.inbound
    }

    pub fn key_normalizer(&self) -> KeyIdNormalizer {
        self.key_normalizer
    }
}
