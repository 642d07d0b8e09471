//! Driver-neutral result rows handed to a [`crate::ResultProcessor`].

use time::PrimitiveDateTime;

use crate::error::{Result, SqlGenError};
use crate::value::format_timestamp;

/// One cell as read back from the database.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Null,
    Text(String),
    Bytes(Vec<u8>),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Timestamp(PrimitiveDateTime),
}

impl CellValue {
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Text form of a non-null cell. Byte cells must be valid UTF-8.
    pub fn to_text(&self) -> Result<Option<String>> {
        let text = match self {
            Self::Null => return Ok(None),
            Self::Text(s) => s.clone(),
            Self::Bytes(bytes) => String::from_utf8(bytes.clone())
                .map_err(|_| SqlGenError::data_shape("byte value is not valid UTF-8"))?,
            Self::Integer(i) => i.to_string(),
            Self::Float(f) => f.to_string(),
            Self::Boolean(b) => b.to_string(),
            Self::Timestamp(dt) => format_timestamp(dt),
        };
        Ok(Some(text))
    }

    /// Short type name for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Text(_) => "text",
            Self::Bytes(_) => "bytes",
            Self::Integer(_) => "integer",
            Self::Float(_) => "float",
            Self::Boolean(_) => "boolean",
            Self::Timestamp(_) => "timestamp",
        }
    }
}

/// A result row with cells in SELECT-list order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultRow {
    cells: Vec<CellValue>,
}

impl ResultRow {
    pub fn new(cells: Vec<CellValue>) -> Self {
        Self { cells }
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn cell(&self, index: usize) -> Result<&CellValue> {
        self.cells.get(index).ok_or_else(|| {
            SqlGenError::data_shape(format!(
                "row has {} columns, column {} was expected",
                self.cells.len(),
                index + 1
            ))
        })
    }
}

impl From<Vec<CellValue>> for ResultRow {
    fn from(cells: Vec<CellValue>) -> Self {
        Self::new(cells)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_to_text() {
        let cell = CellValue::Bytes(b"00001".to_vec());
        assert_eq!(cell.to_text().unwrap().as_deref(), Some("00001"));

        let bad = CellValue::Bytes(vec![0xff, 0xfe]);
        assert!(matches!(bad.to_text(), Err(SqlGenError::DataShape(_))));
        assert_eq!(CellValue::Null.to_text().unwrap(), None);
    }

    #[test]
    fn test_missing_cell_is_data_shape_error() {
        let row = ResultRow::new(vec![CellValue::text("a")]);
        assert!(row.cell(0).is_ok());
        assert!(matches!(row.cell(3), Err(SqlGenError::DataShape(_))));
    }
}
