//! Turning result rows back into propositions.
//!
//! A [`ResultProcessor`] sees every row of one statement in arrival order.
//! A proposition with many reference values, or joined to a fanning-out
//! entity, spans several rows; they are merged so it is delivered once.
//!
//! The buffered processor keeps everything until [`ResultProcessor::finish`]
//! and merges rows by unique id wherever they arrive. The streaming processor
//! hands each proposition to the caller's handler as soon as the next one
//! starts and never holds more than one, so it relies on the statement
//! ordering by key id then unique id whenever rows can repeat.

use std::collections::HashMap;

use indexmap::IndexMap;
use tracing::trace;

use crate::column_info::ColumnLayout;
use crate::error::{Result, SqlGenError};
use crate::proposition::{Interval, KeyedPropositions, Proposition, UniqueId};
use crate::row::ResultRow;
use crate::statement::SqlOrderBy;
use crate::value::Value;

/// Where reconstructed propositions go.
pub enum ResultMode<'a> {
    /// Collect into [`KeyedPropositions`], returned by `finish`.
    Buffered,
    /// Call the handler with `(key id, proposition)` as each one completes.
    Streaming(&'a mut (dyn FnMut(&str, Proposition) -> Result<()> + Send)),
}

impl ResultMode<'_> {
    pub fn is_streaming(&self) -> bool {
        matches!(self, Self::Streaming(_))
    }
}

/// What a finished processor produced.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessorOutput {
    Buffered(KeyedPropositions),
    Streamed { delivered: u64 },
}

impl ProcessorOutput {
    /// The buffered map; empty for streamed output.
    pub fn into_propositions(self) -> KeyedPropositions {
        match self {
            Self::Buffered(propositions) => propositions,
            Self::Streamed { .. } => KeyedPropositions::new(),
        }
    }
}

/// Consumes the rows of one statement.
pub trait ResultProcessor: Send {
    /// Called once per row, in arrival order.
    fn process_row(&mut self, row: ResultRow) -> Result<()>;

    /// Propositions currently held in memory.
    fn held_rows(&self) -> usize;

    /// Flush anything pending and return the result.
    fn finish(self: Box<Self>) -> Result<ProcessorOutput>;
}

/// Per-statement settings for a processor.
#[derive(Debug, Clone, Default)]
pub struct ProcessorOptions {
    /// Proposition ids to keep; empty keeps every id of the entity.
    pub proposition_ids: Vec<String>,
    pub order_by: SqlOrderBy,
    pub wrap_key_id: bool,
}

impl ProcessorOptions {
    /// Byte-ordered ascending keys were requested, so arrival order can be
    /// checked.
    fn checks_key_order(&self) -> bool {
        self.order_by == SqlOrderBy::Ascending && self.wrap_key_id
    }
}

/// Creates the processor for a compiled statement.
pub trait ResultProcessorFactory: Send + Sync {
    fn create<'a>(
        &self,
        layout: ColumnLayout,
        options: ProcessorOptions,
        mode: ResultMode<'a>,
    ) -> Box<dyn ResultProcessor + 'a>;
}

/// Factory for the proposition-building processors in this module.
#[derive(Debug, Clone, Copy, Default)]
pub struct PropositionProcessorFactory;

impl ResultProcessorFactory for PropositionProcessorFactory {
    fn create<'a>(
        &self,
        layout: ColumnLayout,
        options: ProcessorOptions,
        mode: ResultMode<'a>,
    ) -> Box<dyn ResultProcessor + 'a> {
        let mapper = RowMapper::new(layout, options);
        match mode {
            ResultMode::Buffered => Box::new(BufferedResultProcessor::new(mapper)),
            ResultMode::Streaming(handler) => {
                Box::new(StreamingResultProcessor::new(mapper, handler))
            }
        }
    }
}

/// Builds one proposition from one row.
#[derive(Debug, Clone)]
pub struct RowMapper {
    layout: ColumnLayout,
    options: ProcessorOptions,
    last_key: Option<String>,
}

impl RowMapper {
    pub fn new(layout: ColumnLayout, options: ProcessorOptions) -> Self {
        Self {
            layout,
            options,
            last_key: None,
        }
    }

    pub fn layout(&self) -> &ColumnLayout {
        &self.layout
    }

    /// `None` for rows whose code maps to a proposition id that was not asked for.
    pub fn map(&mut self, row: &ResultRow) -> Result<Option<(String, Proposition)>> {
        let layout = &self.layout;
        if row.len() < layout.len() {
            return Err(SqlGenError::data_shape(format!(
                "row has {} columns, {} were selected",
                row.len(),
                layout.len()
            )));
        }

        let key_id = layout.key_normalizer().normalize(row.cell(layout.key_id())?)?;
        if self.options.checks_key_order() {
            if let Some(previous) = &self.last_key
                && previous.as_str() > key_id.as_str()
            {
                return Err(SqlGenError::data_shape(format!(
                    "key id '{key_id}' arrived after '{previous}' in ascending order"
                )));
            }
            self.last_key = Some(key_id.clone());
        }

        let entity = layout.entity();
        let id = match (&entity.code, layout.code()) {
            (Some(code), Some(position)) => {
                let stored = row.cell(position)?.to_text()?.unwrap_or_default();
                match code.proposition_id(&stored) {
                    Some(id) => id.to_string(),
                    None => {
                        trace!(entity = %entity.name, code = %stored, "skipping row with unmapped code");
                        return Ok(None);
                    }
                }
            }
            _ => entity.proposition_ids.first().cloned().unwrap_or_default(),
        };
        if !self.options.proposition_ids.is_empty() && !self.options.proposition_ids.contains(&id) {
            trace!(entity = %entity.name, proposition_id = %id, "skipping row for unrequested id");
            return Ok(None);
        }

        let unique_id = UniqueId::new(
            entity.name.clone(),
            self.text_parts(row, layout.unique_ids(), "unique id")?
                .ok_or_else(|| SqlGenError::data_shape("unique id is null"))?,
        );

        let start = self.timestamp(row, layout.start_time())?;
        let finish = match layout.finish_time() {
            Some(position) => self.timestamp(row, Some(position))?,
            None => start,
        };

        let value = match layout.value() {
            Some(position) => self.decode(row, position)?,
            None => None,
        };

        let mut properties = IndexMap::new();
        for (name, position) in layout.properties() {
            if let Some(value) = self.decode(row, *position)? {
                properties.insert(name.clone(), value);
            }
        }

        let mut references: IndexMap<String, Vec<UniqueId>> = IndexMap::new();
        for (name, position) in layout.references() {
            let Some(reference) = entity.reference(name) else {
                continue;
            };
            let entry = references.entry(name.clone()).or_default();
            if let Some(target) = row.cell(*position)?.to_text()? {
                entry.push(UniqueId::new(reference.target.clone(), vec![target]));
            }
        }

        let mut inbound_keys: IndexMap<String, Vec<UniqueId>> = IndexMap::new();
        for inbound in layout.inbound() {
            let entry = inbound_keys.entry(inbound.label.clone()).or_default();
            if let Some(parts) = self.text_parts(row, &inbound.unique_ids, "inbound unique id")? {
                entry.push(UniqueId::new(inbound.entity.clone(), parts));
            }
        }

        let proposition = Proposition {
            id,
            key_id: key_id.clone(),
            unique_id,
            interval: Interval { start, finish },
            value,
            properties,
            references,
            inbound_keys,
        };
        Ok(Some((key_id, proposition)))
    }

    fn decode(&self, row: &ResultRow, position: usize) -> Result<Option<Value>> {
        let column = &self.layout.columns()[position];
        column.decode(row.cell(position)?)
    }

    fn timestamp(
        &self,
        row: &ResultRow,
        position: Option<usize>,
    ) -> Result<Option<time::PrimitiveDateTime>> {
        let Some(position) = position else {
            return Ok(None);
        };
        match self.decode(row, position)? {
            None => Ok(None),
            Some(Value::DateTime(dt)) => Ok(Some(dt)),
            Some(other) => Err(SqlGenError::data_shape(format!(
                "time column {} holds non-timestamp value '{other}'",
                self.layout.columns()[position].column
            ))),
        }
    }

    /// Text of every position; `None` when all are null, an error when only
    /// some are.
    fn text_parts(
        &self,
        row: &ResultRow,
        positions: &[usize],
        what: &str,
    ) -> Result<Option<Vec<String>>> {
        let parts = positions
            .iter()
            .map(|&position| row.cell(position)?.to_text())
            .collect::<Result<Vec<_>>>()?;
        if parts.iter().all(Option::is_none) {
            return Ok(None);
        }
        parts
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .map(Some)
            .ok_or_else(|| SqlGenError::data_shape(format!("{what} is partly null")))
    }
}

/// Keeps every proposition until `finish`.
pub struct BufferedResultProcessor {
    mapper: RowMapper,
    propositions: KeyedPropositions,
    /// Position of each proposition within its key's list.
    positions: HashMap<(String, UniqueId), usize>,
}

impl BufferedResultProcessor {
    pub fn new(mapper: RowMapper) -> Self {
        Self {
            mapper,
            propositions: KeyedPropositions::new(),
            positions: HashMap::new(),
        }
    }
}

impl ResultProcessor for BufferedResultProcessor {
    fn process_row(&mut self, row: ResultRow) -> Result<()> {
        let Some((key_id, proposition)) = self.mapper.map(&row)? else {
            return Ok(());
        };
        let list = self.propositions.entry(key_id.clone()).or_default();
        let slot = (key_id, proposition.unique_id.clone());
        match self.positions.get(&slot) {
            Some(&position) => list[position].merge(proposition),
            None => {
                self.positions.insert(slot, list.len());
                list.push(proposition);
            }
        }
        Ok(())
    }

    fn held_rows(&self) -> usize {
        self.positions.len()
    }

    fn finish(self: Box<Self>) -> Result<ProcessorOutput> {
        Ok(ProcessorOutput::Buffered(self.propositions))
    }
}

/// Hands propositions to a callback, holding at most one pending.
pub struct StreamingResultProcessor<'a> {
    mapper: RowMapper,
    handler: &'a mut (dyn FnMut(&str, Proposition) -> Result<()> + Send),
    pending: Option<(String, Proposition)>,
    delivered: u64,
}

impl<'a> StreamingResultProcessor<'a> {
    pub fn new(
        mapper: RowMapper,
        handler: &'a mut (dyn FnMut(&str, Proposition) -> Result<()> + Send),
    ) -> Self {
        Self {
            mapper,
            handler,
            pending: None,
            delivered: 0,
        }
    }

    fn deliver(&mut self, key_id: String, proposition: Proposition) -> Result<()> {
        (self.handler)(&key_id, proposition)?;
        self.delivered += 1;
        Ok(())
    }
}

impl ResultProcessor for StreamingResultProcessor<'_> {
    fn process_row(&mut self, row: ResultRow) -> Result<()> {
        let Some((key_id, proposition)) = self.mapper.map(&row)? else {
            return Ok(());
        };
        match self.pending.take() {
            Some((pending_key, mut pending))
                if pending_key == key_id && pending.unique_id == proposition.unique_id =>
            {
                pending.merge(proposition);
                self.pending = Some((pending_key, pending));
            }
            Some((pending_key, pending)) => {
                self.pending = Some((key_id, proposition));
                self.deliver(pending_key, pending)?;
            }
            None => self.pending = Some((key_id, proposition)),
        }
        Ok(())
    }

    fn held_rows(&self) -> usize {
        usize::from(self.pending.is_some())
    }

    fn finish(mut self: Box<Self>) -> Result<ProcessorOutput> {
        if let Some((key_id, proposition)) = self.pending.take() {
            self.deliver(key_id, proposition)?;
        }
        Ok(ProcessorOutput::Streamed {
            delivered: self.delivered,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column_info::ColumnSpecInfo;
    use crate::dialect::KeyIdNormalizer;
    use crate::row::CellValue;
    use crate::spec::{
        Cardinality, CodeSpec, ColumnSpec, EntitySpec, ReferenceSpec, SqlType, TableSpec,
    };
    use std::sync::Arc;
    use time::macros::datetime;

    fn encounter_layout(normalizer: KeyIdNormalizer) -> ColumnLayout {
        let spec = EntitySpec::new(
            "Encounter",
            TableSpec::new("encounter"),
            ColumnSpec::varchar("patient_id"),
        )
        .with_proposition_id("Inpatient")
        .with_proposition_id("Outpatient")
        .with_unique_id(ColumnSpec::varchar("encounter_id"))
        .with_code(
            CodeSpec::new(ColumnSpec::varchar("enc_type"))
                .with_code("IP", "Inpatient")
                .with_code("OP", "Outpatient"),
        )
        .with_start_time(ColumnSpec::new("admit_dt", SqlType::Timestamp))
        .with_reference(ReferenceSpec::new(
            "provider",
            "Provider",
            ColumnSpec::varchar("provider_id"),
            ColumnSpec::varchar("provider_id"),
            Cardinality::Many,
        ));
        // key, encounter_id, enc_type, admit_dt, provider_id
        ColumnSpecInfo::for_entity(Arc::new(spec)).layout(normalizer)
    }

    fn row(key: &str, encounter: &str, code: &str, provider: Option<&str>) -> ResultRow {
        ResultRow::new(vec![
            CellValue::text(key),
            CellValue::text(encounter),
            CellValue::text(code),
            CellValue::Timestamp(datetime!(2010-05-01 08:00)),
            provider.map(CellValue::text).unwrap_or(CellValue::Null),
        ])
    }

    #[test]
    fn test_map_builds_proposition() {
        let mut mapper = RowMapper::new(encounter_layout(KeyIdNormalizer::Text), ProcessorOptions::default());
        let (key, prop) = mapper.map(&row("00001", "e1", "OP", Some("p9"))).unwrap().unwrap();
        assert_eq!(key, "00001");
        assert_eq!(prop.id, "Outpatient");
        assert_eq!(prop.unique_id.to_string(), "Encounter^e1");
        assert_eq!(prop.interval.start, Some(datetime!(2010-05-01 08:00)));
        assert_eq!(prop.interval.finish, prop.interval.start);
        assert_eq!(prop.references("provider")[0].to_string(), "Provider^p9");
    }

    #[test]
    fn test_unrequested_and_unmapped_codes_skipped() {
        let options = ProcessorOptions {
            proposition_ids: vec!["Inpatient".into()],
            ..Default::default()
        };
        let mut mapper = RowMapper::new(encounter_layout(KeyIdNormalizer::Text), options);
        assert!(mapper.map(&row("1", "e1", "OP", None)).unwrap().is_none());
        assert!(mapper.map(&row("1", "e1", "ER", None)).unwrap().is_none());
        assert!(mapper.map(&row("1", "e1", "IP", None)).unwrap().is_some());
    }

    #[test]
    fn test_short_row_is_data_shape_error() {
        let mut mapper = RowMapper::new(encounter_layout(KeyIdNormalizer::Text), ProcessorOptions::default());
        let short = ResultRow::new(vec![CellValue::text("1")]);
        assert!(matches!(mapper.map(&short), Err(SqlGenError::DataShape(_))));
    }

    #[test]
    fn test_buffered_merges_adjacent_rows() {
        let factory = PropositionProcessorFactory;
        let mut processor = factory.create(
            encounter_layout(KeyIdNormalizer::Text),
            ProcessorOptions::default(),
            ResultMode::Buffered,
        );
        processor.process_row(row("00001", "e1", "IP", Some("p1"))).unwrap();
        processor.process_row(row("00001", "e1", "IP", Some("p2"))).unwrap();
        processor.process_row(row("00001", "e2", "IP", None)).unwrap();
        assert_eq!(processor.held_rows(), 2);

        let output = processor.finish().unwrap().into_propositions();
        let list = &output["00001"];
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].references("provider").len(), 2);
        assert!(list[1].references("provider").is_empty());
    }

    #[test]
    fn test_buffered_merges_interleaved_rows() {
        let mut processor = PropositionProcessorFactory.create(
            encounter_layout(KeyIdNormalizer::Text),
            ProcessorOptions::default(),
            ResultMode::Buffered,
        );
        processor.process_row(row("00001", "e1", "IP", Some("p1"))).unwrap();
        processor.process_row(row("00001", "e2", "IP", None)).unwrap();
        processor.process_row(row("00001", "e1", "IP", Some("p2"))).unwrap();
        assert_eq!(processor.held_rows(), 2);

        let output = processor.finish().unwrap().into_propositions();
        let list = &output["00001"];
        let ids: Vec<String> = list.iter().map(|p| p.unique_id.to_string()).collect();
        assert_eq!(ids, ["Encounter^e1", "Encounter^e2"]);
        assert_eq!(list[0].references("provider").len(), 2);
    }

    #[test]
    fn test_streaming_checks_ascending_keys() {
        let mut handler = |_: &str, _: Proposition| -> Result<()> { Ok(()) };
        let options = ProcessorOptions {
            order_by: SqlOrderBy::Ascending,
            wrap_key_id: true,
            ..Default::default()
        };
        let mut processor = PropositionProcessorFactory.create(
            encounter_layout(KeyIdNormalizer::Text),
            options,
            ResultMode::Streaming(&mut handler),
        );
        processor.process_row(row("00002", "e1", "IP", None)).unwrap();
        let err = processor.process_row(row("00001", "e2", "IP", None)).unwrap_err();
        assert!(matches!(err, SqlGenError::DataShape(_)));
    }

    #[test]
    fn test_streaming_handler_error_propagates() {
        let mut handler = |_: &str, _: Proposition| -> Result<()> {
            Err(SqlGenError::data_shape("caller gave up"))
        };
        let mut processor = PropositionProcessorFactory.create(
            encounter_layout(KeyIdNormalizer::Text),
            ProcessorOptions::default(),
            ResultMode::Streaming(&mut handler),
        );
        processor.process_row(row("1", "e1", "IP", None)).unwrap();
        assert!(processor.process_row(row("1", "e2", "IP", None)).is_err());
    }
}
