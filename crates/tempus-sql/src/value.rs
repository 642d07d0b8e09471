//! Proposition values and filter comparators.

use std::fmt;

use time::PrimitiveDateTime;
use time::macros::format_description;

/// A proposition or filter value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Nominal(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    DateTime(PrimitiveDateTime),
    List(Vec<Value>),
}

impl Value {
    pub fn nominal(value: impl Into<String>) -> Self {
        Self::Nominal(value.into())
    }

    pub fn is_list(&self) -> bool {
        matches!(self, Self::List(_))
    }

    /// Text form used for codes, unique-id parts and mapping lookups.
    pub fn as_text(&self) -> String {
        match self {
            Self::Nominal(s) => s.clone(),
            Self::Integer(i) => i.to_string(),
            Self::Float(f) => f.to_string(),
            Self::Boolean(b) => b.to_string(),
            Self::DateTime(dt) => format_timestamp(dt),
            Self::List(items) => items
                .iter()
                .map(Value::as_text)
                .collect::<Vec<_>>()
                .join(","),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::List(items) => {
                let inner = items
                    .iter()
                    .map(Value::to_string)
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(f, "[{inner}]")
            }
            other => f.write_str(&other.as_text()),
        }
    }
}

/// Render a timestamp as `YYYY-MM-DD HH:MM:SS`.
pub fn format_timestamp(dt: &PrimitiveDateTime) -> String {
    let format = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    dt.format(&format).unwrap_or_else(|_| dt.to_string())
}

/// Parse a `YYYY-MM-DD HH:MM:SS` or `YYYY-MM-DDTHH:MM:SS` timestamp.
pub fn parse_timestamp(text: &str) -> Option<PrimitiveDateTime> {
    let spaced = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    let iso = format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]");
    PrimitiveDateTime::parse(text.trim(), &spaced)
        .or_else(|_| PrimitiveDateTime::parse(text.trim(), &iso))
        .ok()
}

/// Comparison operators for property-value and value filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    In,
    NotIn,
    Unknown,
}

impl Comparator {
    /// Get the SQL operator string.
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Equal => "=",
            Self::NotEqual => "<>",
            Self::LessThan => "<",
            Self::LessThanOrEqual => "<=",
            Self::GreaterThan => ">",
            Self::GreaterThanOrEqual => ">=",
            Self::In => "IN",
            Self::NotIn => "NOT IN",
            Self::Unknown => "?",
        }
    }

    /// `IN` and `NOT IN` take any number of operands; everything else takes one.
    pub fn is_set_operator(self) -> bool {
        matches!(self, Self::In | Self::NotIn)
    }
}
