//! Running compiled statements on PostgreSQL.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use futures_util::TryStreamExt;
use sqlx_core::row::Row;
use sqlx_core::type_info::TypeInfo;
use sqlx_core::value::ValueRef;
use sqlx_postgres::{PgPool, PgRow};
use tempus_sql::{
    CellValue, ColumnLayout, QueryExecutor, Result, ResultProcessor, ResultRow, SqlType,
};
use time::{Date, OffsetDateTime, PrimitiveDateTime, UtcOffset};
use tracing::{debug, instrument};

use crate::error::PostgresError;

/// Streams rows from a pooled connection into a result processor.
///
/// A connection is acquired per statement and goes back to the pool when
/// the call returns, whether the cursor finished, the server failed or the
/// processor rejected a row.
#[derive(Debug, Clone)]
pub struct PgQueryExecutor {
    pool: PgPool,
}

impl PgQueryExecutor {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl QueryExecutor for PgQueryExecutor {
    #[instrument(skip_all, fields(columns = layout.len()))]
    async fn execute(
        &self,
        sql: &str,
        layout: &ColumnLayout,
        processor: &mut dyn ResultProcessor,
    ) -> Result<u64> {
        debug!(sql = %sql, "executing statement");
        let mut conn = self.pool.acquire().await.map_err(PostgresError::from)?;
        let mut rows = sqlx_core::query::query(sql).fetch(&mut *conn);

        let mut count = 0u64;
        while let Some(row) = rows.try_next().await.map_err(PostgresError::from)? {
            processor.process_row(decode_row(&row, layout)?)?;
            count += 1;
        }
        debug!(rows = count, held = processor.held_rows(), "cursor exhausted");
        Ok(count)
    }
}

fn decode_row(row: &PgRow, layout: &ColumnLayout) -> std::result::Result<ResultRow, PostgresError> {
    (0..layout.len())
        .map(|position| {
            let sql_type = layout.sql_type(position).unwrap_or(SqlType::Varchar);
            decode_cell(row, position, sql_type, layout.is_binary(position))
                .map_err(|e| PostgresError::decode(position, e))
        })
        .collect::<std::result::Result<Vec<_>, _>>()
        .map(ResultRow::new)
}

/// Read one cell by its server type, shaped by the column's declared type.
fn decode_cell(
    row: &PgRow,
    position: usize,
    sql_type: SqlType,
    binary: bool,
) -> std::result::Result<CellValue, sqlx_core::error::Error> {
    let raw = row.try_get_raw(position)?;
    if raw.is_null() {
        return Ok(CellValue::Null);
    }
    let server_type = raw.type_info().name().to_string();

    if binary || server_type == "BYTEA" {
        return Ok(CellValue::Bytes(row.try_get::<Vec<u8>, _>(position)?));
    }

    let cell = match server_type.as_str() {
        "INT2" => CellValue::Integer(row.try_get::<i16, _>(position)?.into()),
        "INT4" => CellValue::Integer(row.try_get::<i32, _>(position)?.into()),
        "INT8" => CellValue::Integer(row.try_get::<i64, _>(position)?),
        "FLOAT4" => CellValue::Float(row.try_get::<f32, _>(position)?.into()),
        "FLOAT8" => CellValue::Float(row.try_get::<f64, _>(position)?),
        "NUMERIC" => numeric_cell(row.try_get::<BigDecimal, _>(position)?, sql_type),
        "BOOL" => CellValue::Boolean(row.try_get::<bool, _>(position)?),
        "TIMESTAMP" => CellValue::Timestamp(row.try_get::<PrimitiveDateTime, _>(position)?),
        "TIMESTAMPTZ" => {
            let utc = row
                .try_get::<OffsetDateTime, _>(position)?
                .to_offset(UtcOffset::UTC);
            CellValue::Timestamp(PrimitiveDateTime::new(utc.date(), utc.time()))
        }
        "DATE" => CellValue::Timestamp(row.try_get::<Date, _>(position)?.midnight()),
        _ => CellValue::Text(row.try_get::<String, _>(position)?),
    };
    Ok(cell)
}

/// Numeric columns keep their exact text unless the column spec declares a number.
fn numeric_cell(value: BigDecimal, sql_type: SqlType) -> CellValue {
    if !matches!(sql_type, SqlType::Integer | SqlType::Numeric) {
        return CellValue::Text(value.to_string());
    }
    let text = value.normalized().to_string();
    match sql_type {
        SqlType::Integer if value.is_integer() => text
            .parse::<i64>()
            .map(CellValue::Integer)
            .unwrap_or(CellValue::Text(text)),
        _ => text
            .parse::<f64>()
            .map(CellValue::Float)
            .unwrap_or(CellValue::Text(text)),
    }
}
