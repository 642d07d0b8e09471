//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::sync::Mutex;

use async_trait::async_trait;
use tempus_sql::{
    Cardinality, CellValue, CodeSpec, ColumnLayout, ColumnSpec, EntitySpec, EntitySpecGraph,
    Mappings, QueryExecutor, ReferenceSpec, Result, ResultProcessor, ResultRow, SqlGenError,
    SqlType, TableSpec,
};
use time::PrimitiveDateTime;

/// Patient, Encounter (references Patient) and Lab (references Encounter).
pub fn clinical_graph() -> EntitySpecGraph {
    let patient = EntitySpec::new(
        "Patient",
        TableSpec::new("patient").in_schema("cdw"),
        ColumnSpec::varchar("patient_id"),
    )
    .with_proposition_id("PatientDetails")
    .with_unique_id(ColumnSpec::varchar("patient_id"))
    .with_property(
        "gender",
        ColumnSpec::varchar("gender_cd").with_mappings(
            [("M", "Male"), ("F", "Female")]
                .into_iter()
                .collect::<Mappings>(),
        ),
    );

    let encounter = EntitySpec::new(
        "Encounter",
        TableSpec::new("encounter").in_schema("cdw"),
        ColumnSpec::varchar("patient_id"),
    )
    .with_proposition_id("Encounter")
    .with_unique_id(ColumnSpec::varchar("encounter_id"))
    .with_start_time(ColumnSpec::new("admit_dt", SqlType::Timestamp))
    .with_finish_time(ColumnSpec::new("discharge_dt", SqlType::Timestamp))
    .with_property(
        "type",
        ColumnSpec::varchar("type_cd").with_mappings(
            [("IP", "Inpatient"), ("OP", "Outpatient")]
                .into_iter()
                .collect::<Mappings>(),
        ),
    )
    .with_reference(ReferenceSpec::new(
        "patient",
        "Patient",
        ColumnSpec::varchar("patient_id"),
        ColumnSpec::varchar("patient_id"),
        Cardinality::One,
    ));

    let lab = EntitySpec::new(
        "Lab",
        TableSpec::new("lab").in_schema("cdw"),
        ColumnSpec::varchar("patient_id"),
    )
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
        "encounter",
        "Encounter",
        ColumnSpec::varchar("encounter_id"),
        ColumnSpec::varchar("encounter_id"),
        Cardinality::One,
    ));

    EntitySpecGraph::new(vec![patient, encounter, lab]).expect("fixture graph is valid")
}

/// A row of the Encounter statement's layout:
/// key, encounter_id, admit_dt, discharge_dt, type_cd.
pub fn encounter_row(
    key: &str,
    encounter_id: &str,
    admit: PrimitiveDateTime,
    kind: &str,
) -> ResultRow {
    ResultRow::new(vec![
        CellValue::text(key),
        CellValue::text(encounter_id),
        CellValue::Timestamp(admit),
        CellValue::Timestamp(admit),
        CellValue::text(kind),
    ])
}

/// Executor answering from canned rows, picked by the table in the FROM clause.
#[derive(Default)]
pub struct CannedExecutor {
    tables: Vec<(String, Vec<ResultRow>)>,
    /// Fail with an execution error after this many rows.
    fail_after: Option<usize>,
    pub statements: Mutex<Vec<String>>,
}

impl CannedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rows(mut self, table: &str, rows: Vec<ResultRow>) -> Self {
        self.tables.push((format!("FROM {table} "), rows));
        self
    }

    pub fn failing_after(mut self, rows: usize) -> Self {
        self.fail_after = Some(rows);
        self
    }

    pub fn statements(&self) -> Vec<String> {
        self.statements.lock().unwrap().clone()
    }
}

#[async_trait]
impl QueryExecutor for CannedExecutor {
    async fn execute(
        &self,
        sql: &str,
        layout: &ColumnLayout,
        processor: &mut dyn ResultProcessor,
    ) -> Result<u64> {
        self.statements.lock().unwrap().push(sql.to_string());
        let rows = self
            .tables
            .iter()
            .find(|(from, _)| sql.contains(from.as_str()))
            .map(|(_, rows)| rows.clone())
            .unwrap_or_default();

        let mut count = 0;
        for row in rows {
            if self.fail_after == Some(count as usize) {
                return Err(SqlGenError::execution(
                    "cursor closed",
                    std::io::Error::other("connection reset by peer"),
                ));
            }
            assert_eq!(row.len(), layout.len(), "canned row matches the layout");
            processor.process_row(row)?;
            count += 1;
        }
        Ok(count)
    }
}
