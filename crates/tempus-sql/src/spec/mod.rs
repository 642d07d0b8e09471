//! Declarative mapping from proposition types to physical tables and columns.
//!
//! An [`EntitySpec`] describes one logical proposition type: its base table,
//! key-id column, unique-id columns, optional code/time/value columns,
//! properties and outbound [`ReferenceSpec`]s. Specs are built once when the
//! knowledge source loads and are read-only afterwards; see
//! [`EntitySpecGraph`] for the validated, shareable form.

mod graph;

pub use graph::{Direction, EntitySpecGraph, InboundReference, PathStep};

use indexmap::IndexMap;
use serde::Deserialize;

use crate::error::{Result, SqlGenError};
use crate::row::CellValue;
use crate::value::{Value, parse_timestamp};

/// Validate an identifier (schema, table or column name).
///
/// Only ASCII alphanumerics and underscores are allowed and the first
/// character may not be a digit. Identifiers are emitted unquoted.
pub fn validate_identifier(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(SqlGenError::invalid_spec(format!(
            "invalid SQL identifier '{name}'"
        )))
    }
}

/// Physical SQL type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SqlType {
    Varchar,
    Integer,
    Numeric,
    Boolean,
    Timestamp,
}

impl SqlType {
    /// Whether two columns of these types can be joined on.
    pub fn is_compatible_with(self, other: SqlType) -> bool {
        match (self, other) {
            (a, b) if a == b => true,
            (Self::Integer, Self::Numeric) | (Self::Numeric, Self::Integer) => true,
            _ => false,
        }
    }

    /// Convert a non-null cell into a value of this type.
    pub fn decode(self, cell: &CellValue) -> Result<Value> {
        let mismatch = || {
            SqlGenError::data_shape(format!(
                "cannot read a {} cell as {self:?}",
                cell.kind()
            ))
        };
        match (self, cell) {
            (_, CellValue::Null) => Err(SqlGenError::data_shape("unexpected null value")),
            (Self::Varchar, other) => other
                .to_text()?
                .map(Value::Nominal)
                .ok_or_else(mismatch),
            (Self::Integer, CellValue::Integer(i)) => Ok(Value::Integer(*i)),
            (Self::Integer, CellValue::Text(s)) => {
                s.trim().parse().map(Value::Integer).map_err(|_| mismatch())
            }
            (Self::Numeric, CellValue::Float(f)) => Ok(Value::Float(*f)),
            (Self::Numeric, CellValue::Integer(i)) => Ok(Value::Float(*i as f64)),
            (Self::Numeric, CellValue::Text(s)) => {
                s.trim().parse().map(Value::Float).map_err(|_| mismatch())
            }
            (Self::Boolean, CellValue::Boolean(b)) => Ok(Value::Boolean(*b)),
            (Self::Boolean, CellValue::Integer(i)) => Ok(Value::Boolean(*i != 0)),
            (Self::Boolean, CellValue::Text(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "t" | "1" => Ok(Value::Boolean(true)),
                "false" | "f" | "0" => Ok(Value::Boolean(false)),
                _ => Err(mismatch()),
            },
            (Self::Timestamp, CellValue::Timestamp(dt)) => Ok(Value::DateTime(*dt)),
            (Self::Timestamp, CellValue::Text(s)) => {
                parse_timestamp(s).map(Value::DateTime).ok_or_else(mismatch)
            }
            _ => Err(mismatch()),
        }
    }
}

/// Ordered code to display-value table used to decode stored codes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Mappings {
    entries: IndexMap<String, String>,
}

impl Mappings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, code: impl Into<String>, display: impl Into<String>) -> Self {
        self.entries.insert(code.into(), display.into());
        self
    }

    /// Stored code to display value.
    pub fn decode(&self, code: &str) -> Option<&str> {
        self.entries.get(code).map(String::as_str)
    }

    /// Display value back to the first stored code that decodes to it.
    pub fn encode(&self, display: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(_, value)| value.as_str() == display)
            .map(|(code, _)| code.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Mappings {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// A physical table, optionally schema-qualified.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
pub struct TableSpec {
    #[serde(default)]
    pub schema: Option<String>,
    pub name: String,
}

impl TableSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            schema: None,
            name: name.into(),
        }
    }

    pub fn in_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    /// `schema.name`, or just `name` when no schema is set.
    pub fn qualified(&self) -> String {
        match &self.schema {
            Some(schema) => format!("{schema}.{}", self.name),
            None => self.name.clone(),
        }
    }

    fn validate(&self) -> Result<()> {
        if let Some(schema) = &self.schema {
            validate_identifier(schema)?;
        }
        validate_identifier(&self.name)
    }
}

fn default_required() -> bool {
    true
}

/// One join hop from the previous table to `table`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
pub struct JoinSpec {
    /// Column on the previous table.
    pub from_column: String,
    pub table: TableSpec,
    /// Column on `table`.
    pub to_column: String,
    /// Inner join when required, left outer join otherwise.
    #[serde(default = "default_required")]
    pub required: bool,
}

impl JoinSpec {
    pub fn new(
        from_column: impl Into<String>,
        table: TableSpec,
        to_column: impl Into<String>,
    ) -> Self {
        Self {
            from_column: from_column.into(),
            table,
            to_column: to_column.into(),
            required: true,
        }
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }
}

/// Physical column descriptor.
///
/// The column lives on the last join's table, or on the owning entity's base
/// table when `joins` is empty.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ColumnSpec {
    pub column: String,
    pub sql_type: SqlType,
    #[serde(default)]
    pub mappings: Option<Mappings>,
    #[serde(default)]
    pub joins: Vec<JoinSpec>,
}

impl ColumnSpec {
    pub fn new(column: impl Into<String>, sql_type: SqlType) -> Self {
        Self {
            column: column.into(),
            sql_type,
            mappings: None,
            joins: Vec::new(),
        }
    }

    pub fn varchar(column: impl Into<String>) -> Self {
        Self::new(column, SqlType::Varchar)
    }

    pub fn with_mappings(mut self, mappings: Mappings) -> Self {
        self.mappings = Some(mappings);
        self
    }

    /// Reach this column through one more join hop.
    pub fn via(mut self, join: JoinSpec) -> Self {
        self.joins.push(join);
        self
    }

    pub fn is_on_base_table(&self) -> bool {
        self.joins.is_empty()
    }

    /// Decode a cell into a proposition value. Null cells decode to `None`.
    ///
    /// With mappings, the stored code must be present in the table.
    pub fn decode(&self, cell: &CellValue) -> Result<Option<Value>> {
        if cell.is_null() {
            return Ok(None);
        }
        match &self.mappings {
            Some(mappings) => {
                let code = cell.to_text()?.unwrap_or_default();
                mappings
                    .decode(&code)
                    .map(|display| Some(Value::nominal(display)))
                    .ok_or_else(|| {
                        SqlGenError::data_shape(format!(
                            "no mapping for code '{code}' in column {}",
                            self.column
                        ))
                    })
            }
            None => self.sql_type.decode(cell).map(Some),
        }
    }

    fn validate(&self) -> Result<()> {
        validate_identifier(&self.column)?;
        for join in &self.joins {
            validate_identifier(&join.from_column)?;
            validate_identifier(&join.to_column)?;
            join.table.validate()?;
        }
        Ok(())
    }
}

/// A named property and the column holding it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PropertySpec {
    pub name: String,
    pub column: ColumnSpec,
}

/// The column whose stored codes decide a row's proposition id.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CodeSpec {
    pub column: ColumnSpec,
    /// Stored code to proposition id.
    pub proposition_ids: IndexMap<String, String>,
}

impl CodeSpec {
    pub fn new(column: ColumnSpec) -> Self {
        Self {
            column,
            proposition_ids: IndexMap::new(),
        }
    }

    pub fn with_code(mut self, code: impl Into<String>, proposition_id: impl Into<String>) -> Self {
        self.proposition_ids
            .insert(code.into(), proposition_id.into());
        self
    }

    pub fn proposition_id(&self, code: &str) -> Option<&str> {
        self.proposition_ids.get(code).map(String::as_str)
    }

    /// Stored codes whose proposition id is accepted by `wanted`, in declaration order.
    pub fn codes_for<'a>(&'a self, wanted: impl Fn(&str) -> bool) -> Vec<&'a str> {
        self.proposition_ids
            .iter()
            .filter(|(_, id)| wanted(id))
            .map(|(code, _)| code.as_str())
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cardinality {
    One,
    Many,
}

/// Named edge from one entity to another.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReferenceSpec {
    pub name: String,
    /// Name of the referenced entity.
    pub target: String,
    /// Column on the referring entity holding the target's unique id.
    pub source_column: ColumnSpec,
    /// Column on the target entity's base table.
    pub target_column: ColumnSpec,
    pub cardinality: Cardinality,
    /// Inner join when required, left outer join otherwise.
    #[serde(default = "default_required")]
    pub required: bool,
}

impl ReferenceSpec {
    pub fn new(
        name: impl Into<String>,
        target: impl Into<String>,
        source_column: ColumnSpec,
        target_column: ColumnSpec,
        cardinality: Cardinality,
    ) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            source_column,
            target_column,
            cardinality,
            required: true,
        }
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }
}

/// Mapping from one logical proposition type to its physical storage.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EntitySpec {
    pub name: String,
    pub proposition_ids: Vec<String>,
    pub table: TableSpec,
    pub key_id: ColumnSpec,
    pub unique_ids: Vec<ColumnSpec>,
    #[serde(default)]
    pub code: Option<CodeSpec>,
    #[serde(default)]
    pub start_time: Option<ColumnSpec>,
    #[serde(default)]
    pub finish_time: Option<ColumnSpec>,
    #[serde(default)]
    pub value: Option<ColumnSpec>,
    #[serde(default)]
    pub properties: Vec<PropertySpec>,
    #[serde(default)]
    pub references: Vec<ReferenceSpec>,
}

impl EntitySpec {
    pub fn new(name: impl Into<String>, table: TableSpec, key_id: ColumnSpec) -> Self {
        Self {
            name: name.into(),
            proposition_ids: Vec::new(),
            table,
            key_id,
            unique_ids: Vec::new(),
            code: None,
            start_time: None,
            finish_time: None,
            value: None,
            properties: Vec::new(),
            references: Vec::new(),
        }
    }

    pub fn with_proposition_id(mut self, id: impl Into<String>) -> Self {
        self.proposition_ids.push(id.into());
        self
    }

    pub fn with_unique_id(mut self, column: ColumnSpec) -> Self {
        self.unique_ids.push(column);
        self
    }

    pub fn with_code(mut self, code: CodeSpec) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_start_time(mut self, column: ColumnSpec) -> Self {
        self.start_time = Some(column);
        self
    }

    pub fn with_finish_time(mut self, column: ColumnSpec) -> Self {
        self.finish_time = Some(column);
        self
    }

    pub fn with_value(mut self, column: ColumnSpec) -> Self {
        self.value = Some(column);
        self
    }

    pub fn with_property(mut self, name: impl Into<String>, column: ColumnSpec) -> Self {
        self.properties.push(PropertySpec {
            name: name.into(),
            column,
        });
        self
    }

    pub fn with_reference(mut self, reference: ReferenceSpec) -> Self {
        self.references.push(reference);
        self
    }

    pub fn handles(&self, proposition_id: &str) -> bool {
        self.proposition_ids.iter().any(|id| id == proposition_id)
    }

    pub fn property(&self, name: &str) -> Option<&PropertySpec> {
        self.properties.iter().find(|p| p.name == name)
    }

    pub fn reference(&self, name: &str) -> Option<&ReferenceSpec> {
        self.references.iter().find(|r| r.name == name)
    }

    /// Check the entity's own invariants. Cross-entity checks live in
    /// [`EntitySpecGraph::new`].
    pub fn validate(&self) -> Result<()> {
        let fail = |message: String| {
            Err(SqlGenError::invalid_spec(format!(
                "entity '{}': {message}",
                self.name
            )))
        };

        if self.name.trim().is_empty() {
            return Err(SqlGenError::invalid_spec("entity name is empty"));
        }
        if self.proposition_ids.is_empty() {
            return fail("no proposition ids declared".into());
        }
        if self.unique_ids.is_empty() {
            return fail("at least one unique-id column is required".into());
        }

        self.table.validate()?;
        self.key_id.validate()?;
        let optional_columns = [&self.start_time, &self.finish_time, &self.value];
        for column in self
            .unique_ids
            .iter()
            .chain(optional_columns.into_iter().flatten())
            .chain(self.properties.iter().map(|p| &p.column))
        {
            column.validate()?;
        }

        for (index, property) in self.properties.iter().enumerate() {
            if self.properties[..index]
                .iter()
                .any(|p| p.name == property.name)
            {
                return fail(format!("duplicate property '{}'", property.name));
            }
        }

        match &self.code {
            Some(code) => {
                code.column.validate()?;
                if let Some((code_value, id)) = code
                    .proposition_ids
                    .iter()
                    .find(|(_, id)| !self.handles(id))
                {
                    return fail(format!(
                        "code '{code_value}' maps to undeclared proposition id '{id}'"
                    ));
                }
            }
            None if self.proposition_ids.len() > 1 => {
                return fail("several proposition ids require a code column".into());
            }
            None => {}
        }

        for (index, reference) in self.references.iter().enumerate() {
            if self.references[..index]
                .iter()
                .any(|r| r.name == reference.name)
            {
                return fail(format!("duplicate reference '{}'", reference.name));
            }
            reference.source_column.validate()?;
            reference.target_column.validate()?;
            if !reference.target_column.is_on_base_table() {
                return fail(format!(
                    "reference '{}' must target a column on the target's base table",
                    reference.name
                ));
            }
        }
        Ok(())
    }
}

/// A pre-materialised copy of `table` substituted in the FROM clause.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StagingSpec {
    /// Qualified name of the table being replaced.
    pub table: String,
    pub staged_table: TableSpec,
}

impl StagingSpec {
    pub fn new(table: impl Into<String>, staged_table: TableSpec) -> Self {
        Self {
            table: table.into(),
            staged_table,
        }
    }
}
