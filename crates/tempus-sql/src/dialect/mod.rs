//! Dialect plugins: a compatibility window plus one strategy per clause.
//!
//! [`Generator`] bundles the clause builders a dialect uses. Every builder
//! trait has default methods producing portable SQL, so a dialect only
//! implements the parts where it differs.

pub mod h2;
pub mod mysql;
pub mod postgres;
pub mod standard;

use std::fmt;

use crate::aliaser::TableAliaser;
use crate::error::{Result, SqlGenError};
use crate::row::CellValue;
use crate::spec::StagingSpec;
use crate::statement::SqlOrderBy;
use crate::value::{Comparator, Value, format_timestamp};
use crate::version::{CompatibilityWindow, ServerIdentity};

/// Builds the SELECT list.
pub trait SelectClauseBuilder: Send + Sync {
    /// Expression used for the key-id column in SELECT and ORDER BY.
    fn key_id_expression(&self, column: &str, wrap_key_id: bool) -> String {
        let _ = wrap_key_id;
        column.to_string()
    }

    fn build(&self, columns: &[String]) -> String {
        format!("SELECT {}", columns.join(", "))
    }
}

/// Builds the FROM clause and its joins.
pub trait FromClauseBuilder: Send + Sync {
    /// Reject staging specs the dialect cannot honour. Called before any SQL
    /// is produced.
    fn check_staging(&self, generator: &str, staging: &[StagingSpec]) -> Result<()> {
        let _ = (generator, staging);
        Ok(())
    }

    fn build(&self, tables: &TableAliaser, staging: &[StagingSpec]) -> String {
        let mut sql = String::from("FROM ");
        for (position, entry) in tables.tables().iter().enumerate() {
            let qualified = entry.table.qualified();
            let name = staging
                .iter()
                .find(|s| s.table == qualified)
                .map(|s| s.staged_table.qualified())
                .unwrap_or(qualified);

            match &entry.join {
                None if position == 0 => {
                    sql.push_str(&name);
                    sql.push(' ');
                    sql.push_str(&entry.alias);
                }
                None => {
                    sql.push_str(", ");
                    sql.push_str(&name);
                    sql.push(' ');
                    sql.push_str(&entry.alias);
                }
                Some(join) => {
                    let parent = tables.alias(join.parent);
                    sql.push_str(&format!(
                        " {} {name} {alias} ON {parent}.{} = {alias}.{}",
                        join.kind.as_sql(),
                        join.parent_column,
                        join.column,
                        alias = entry.alias,
                    ));
                }
            }
        }
        sql
    }
}

/// Builds WHERE predicates and renders literals.
pub trait WhereClauseBuilder: Send + Sync {
    fn escape_string(&self, text: &str) -> String {
        text.replace('\'', "''")
    }

    fn literal(&self, value: &Value) -> String {
        match value {
            Value::Nominal(text) => format!("'{}'", self.escape_string(text)),
            Value::Integer(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Boolean(true) => "TRUE".to_string(),
            Value::Boolean(false) => "FALSE".to_string(),
            Value::DateTime(dt) => format!("TIMESTAMP '{}'", format_timestamp(dt)),
            Value::List(items) => items
                .iter()
                .map(|item| self.literal(item))
                .collect::<Vec<_>>()
                .join(", "),
        }
    }

    /// `column <op> operand`, or `column [NOT] IN (operands)`.
    fn predicate(&self, column: &str, comparator: Comparator, operands: &[Value]) -> String {
        if comparator.is_set_operator() {
            let list = operands
                .iter()
                .map(|v| self.literal(v))
                .collect::<Vec<_>>()
                .join(", ");
            format!("{column} {} ({list})", comparator.as_sql())
        } else {
            let operand = operands
                .first()
                .map(|v| self.literal(v))
                .unwrap_or_else(|| "NULL".to_string());
            format!("{column} {} {operand}", comparator.as_sql())
        }
    }

    /// A predicate that matches nothing.
    fn never(&self) -> String {
        "1 = 0".to_string()
    }

    /// A predicate that matches everything.
    fn always(&self) -> String {
        "1 = 1".to_string()
    }

    fn build(&self, fragments: &[String]) -> Option<String> {
        if fragments.is_empty() {
            None
        } else {
            Some(format!("WHERE {}", fragments.join(" AND ")))
        }
    }
}

/// Builds ORDER BY.
pub trait OrderByClauseBuilder: Send + Sync {
    fn build(&self, key_id: &str, unique_ids: &[String], order: SqlOrderBy) -> Option<String> {
        let direction = match order {
            SqlOrderBy::None => return None,
            SqlOrderBy::Ascending => "ASC",
            SqlOrderBy::Descending => "DESC",
        };
        let terms = std::iter::once(key_id)
            .chain(
                unique_ids
                    .iter()
                    .map(String::as_str)
                    .filter(|unique_id| *unique_id != key_id),
            )
            .map(|term| format!("{term} {direction}"))
            .collect::<Vec<_>>()
            .join(", ");
        Some(format!("ORDER BY {terms}"))
    }
}

/// How key-id cells read back from the database become key strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyIdNormalizer {
    /// The driver's text form.
    Text,
    /// Raw bytes of a re-encoded column; must be ASCII.
    AsciiBytes,
}

impl KeyIdNormalizer {
    pub fn normalize(self, cell: &CellValue) -> Result<String> {
        let text = match (self, cell) {
            (_, CellValue::Null) => {
                return Err(SqlGenError::data_shape("key id is null"));
            }
            (Self::AsciiBytes, CellValue::Bytes(bytes)) => {
                if !bytes.is_ascii() {
                    return Err(SqlGenError::data_shape("key id bytes are not ASCII"));
                }
                cell.to_text()?
            }
            (_, other) => other.to_text()?,
        };
        text.ok_or_else(|| SqlGenError::data_shape("key id is null"))
    }
}

/// A dialect: its compatibility window and clause builders.
pub struct Generator {
    name: String,
    window: CompatibilityWindow,
    select: Box<dyn SelectClauseBuilder>,
    from: Box<dyn FromClauseBuilder>,
    where_clause: Box<dyn WhereClauseBuilder>,
    order_by: Box<dyn OrderByClauseBuilder>,
    key_normalizer: KeyIdNormalizer,
}

impl Generator {
    pub fn new(name: impl Into<String>, window: CompatibilityWindow) -> Self {
        Self {
            name: name.into(),
            window,
            select: Box::new(standard::StandardSelect),
            from: Box::new(standard::StandardFrom),
            where_clause: Box::new(standard::StandardWhere),
            order_by: Box::new(standard::StandardOrderBy),
            key_normalizer: KeyIdNormalizer::Text,
        }
    }

    pub fn with_select(mut self, select: impl SelectClauseBuilder + 'static) -> Self {
        self.select = Box::new(select);
        self
    }

    pub fn with_from(mut self, from: impl FromClauseBuilder + 'static) -> Self {
        self.from = Box::new(from);
        self
    }

    pub fn with_where(mut self, where_clause: impl WhereClauseBuilder + 'static) -> Self {
        self.where_clause = Box::new(where_clause);
        self
    }

    pub fn with_order_by(mut self, order_by: impl OrderByClauseBuilder + 'static) -> Self {
        self.order_by = Box::new(order_by);
        self
    }

    pub fn with_key_normalizer(mut self, normalizer: KeyIdNormalizer) -> Self {
        self.key_normalizer = normalizer;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn window(&self) -> &CompatibilityWindow {
        &self.window
    }

    pub fn is_compatible(&self, identity: &ServerIdentity) -> bool {
        self.window.matches(identity)
    }

    pub fn select_clause(&self) -> &dyn SelectClauseBuilder {
        self.select.as_ref()
    }

    pub fn from_clause(&self) -> &dyn FromClauseBuilder {
        self.from.as_ref()
    }

    pub fn where_clause(&self) -> &dyn WhereClauseBuilder {
        self.where_clause.as_ref()
    }

    pub fn order_by_clause(&self) -> &dyn OrderByClauseBuilder {
        self.order_by.as_ref()
    }

    /// Normalizer for key ids, given whether the key column was wrapped.
    pub fn key_normalizer(&self, wrap_key_id: bool) -> KeyIdNormalizer {
        if wrap_key_id {
            self.key_normalizer
        } else {
            KeyIdNormalizer::Text
        }
    }
}

impl fmt::Debug for Generator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Generator")
            .field("name", &self.name)
            .field("window", &self.window)
            .field("key_normalizer", &self.key_normalizer)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Generator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.window)
    }
}
