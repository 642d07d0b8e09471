//! Per-compilation table aliasing.
//!
//! Every table a statement touches is allocated once in an arena and named
//! `a1`, `a2`, ... in the order it is first needed. A table is identified by
//! how it is reached (the reference scope plus any column join hops), not by
//! its physical name, so the same table reached two different ways gets two
//! aliases.

use indexmap::IndexMap;

use crate::spec::{ColumnSpec, Direction, JoinSpec, PathStep, TableSpec};

/// Index of a table in a [`TableAliaser`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TableId(usize);

impl TableId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// One reference hop of a scope, by name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScopeStep {
    pub owner: String,
    pub reference: String,
    pub direction: Direction,
}

impl ScopeStep {
    pub fn key_of(path: &[PathStep]) -> Vec<ScopeStep> {
        path.iter()
            .map(|step| ScopeStep {
                owner: step.owner.name.clone(),
                reference: step.reference.name.clone(),
                direction: step.direction,
            })
            .collect()
    }
}

/// How a table is reached from the statement's base table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableKey {
    pub scope: Vec<ScopeStep>,
    pub joins: Vec<JoinSpec>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    LeftOuter,
}

impl JoinKind {
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Inner => "INNER JOIN",
            Self::LeftOuter => "LEFT OUTER JOIN",
        }
    }
}

/// The ON condition linking a table to an earlier one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableJoin {
    pub parent: TableId,
    pub parent_column: String,
    pub column: String,
    pub kind: JoinKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableEntry {
    pub table: TableSpec,
    pub alias: String,
    /// `None` only for the base table.
    pub join: Option<TableJoin>,
}

/// Arena of aliased tables for one compilation.
#[derive(Debug, Clone)]
pub struct TableAliaser {
    tables: Vec<TableEntry>,
    index: IndexMap<TableKey, TableId>,
}

impl TableAliaser {
    /// Start with the statement's base table as `a1`.
    pub fn new(base: &TableSpec) -> Self {
        let mut aliaser = Self {
            tables: Vec::new(),
            index: IndexMap::new(),
        };
        aliaser.insert(
            TableKey {
                scope: Vec::new(),
                joins: Vec::new(),
            },
            base.clone(),
            None,
        );
        aliaser
    }

    pub fn root(&self) -> TableId {
        TableId(0)
    }

    pub fn entry(&self, id: TableId) -> &TableEntry {
        &self.tables[id.0]
    }

    pub fn alias(&self, id: TableId) -> &str {
        &self.tables[id.0].alias
    }

    /// Tables in alias order. Parents always precede the tables joined to them.
    pub fn tables(&self) -> &[TableEntry] {
        &self.tables
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Base table of the entity at the end of `path`, joining every hop.
    pub fn scope_table(&mut self, path: &[PathStep]) -> TableId {
        let mut current = self.root();
        for (depth, step) in path.iter().enumerate() {
            let key = TableKey {
                scope: ScopeStep::key_of(&path[..=depth]),
                joins: Vec::new(),
            };
            if let Some(&existing) = self.index.get(&key) {
                current = existing;
                continue;
            }

            current = match step.direction {
                Direction::Forward => {
                    let source = self.column_table(&path[..depth], &step.reference.source_column);
                    let kind = self.child_kind(source, step.reference.required);
                    self.insert(
                        key,
                        step.to.table.clone(),
                        Some(TableJoin {
                            parent: source,
                            parent_column: step.reference.source_column.column.clone(),
                            column: step.reference.target_column.column.clone(),
                            kind,
                        }),
                    )
                }
                Direction::Reverse => self.insert(
                    key,
                    step.to.table.clone(),
                    Some(TableJoin {
                        parent: current,
                        parent_column: step.reference.target_column.column.clone(),
                        column: step.reference.source_column.column.clone(),
                        kind: JoinKind::LeftOuter,
                    }),
                ),
            };
        }
        current
    }

    /// Table holding `column` when read from the entity at the end of `scope`.
    pub fn column_table(&mut self, scope: &[PathStep], column: &ColumnSpec) -> TableId {
        let mut current = self.scope_table(scope);
        let scope_key = ScopeStep::key_of(scope);
        for depth in 0..column.joins.len() {
            let key = TableKey {
                scope: scope_key.clone(),
                joins: column.joins[..=depth].to_vec(),
            };
            if let Some(&existing) = self.index.get(&key) {
                current = existing;
                continue;
            }
            let join = &column.joins[depth];
            let kind = self.child_kind(current, join.required);
            current = self.insert(
                key,
                join.table.clone(),
                Some(TableJoin {
                    parent: current,
                    parent_column: join.from_column.clone(),
                    column: join.to_column.clone(),
                    kind,
                }),
            );
        }
        current
    }

    /// Anything hanging off an outer-joined table is outer-joined too.
    fn child_kind(&self, parent: TableId, required: bool) -> JoinKind {
        let parent_outer = matches!(
            &self.tables[parent.0].join,
            Some(join) if join.kind == JoinKind::LeftOuter
        );
        if required && !parent_outer {
            JoinKind::Inner
        } else {
            JoinKind::LeftOuter
        }
    }

    fn insert(&mut self, key: TableKey, table: TableSpec, join: Option<TableJoin>) -> TableId {
        let id = TableId(self.tables.len());
        self.tables.push(TableEntry {
            table,
            alias: format!("a{}", id.0 + 1),
            join,
        });
        self.index.insert(key, id);
        id
    }
}
