//! Query restrictions: an ordered AND-chain of filter nodes.
//!
//! Each node names the proposition ids it restricts and carries one of three
//! restriction kinds. Nodes are appended with [`Filter::and`] and compile to
//! one predicate fragment each, in chain order.
//!
//! ```ignore
//! let filter = Filter::position(["Encounter"], PositionFilter::new(
//!         Some(datetime!(2010-01-01 0:00)), Granularity::Day,
//!         Some(datetime!(2010-12-31 0:00)), Granularity::Day,
//!     )?)
//!     .and(Filter::property_value(["Encounter"], PropertyValueFilter::new(
//!         "type", Comparator::In, vec![Value::nominal("Inpatient")],
//!     )?));
//! ```

use time::{Date, Duration, Month, PrimitiveDateTime, Time};

use crate::error::{Result, SqlGenError};
use crate::spec::EntitySpec;
use crate::value::{Comparator, Value};

/// Check comparator/operand arity and flatten a single list operand.
///
/// A single list operand is accepted for `IN`/`NOT IN` and flattened; lists
/// nested in it, lists with other comparators and several operands with a
/// scalar comparator are rejected. Floats must be finite to have a SQL literal.
fn validate_operands(comparator: Comparator, values: Vec<Value>) -> Result<Vec<Value>> {
    if comparator == Comparator::Unknown {
        return Err(SqlGenError::malformed_filter("comparator UNKNOWN is not allowed"));
    }

    let values = match values.as_slice() {
        [Value::List(items)] if comparator.is_set_operator() => items.clone(),
        _ => values,
    };

    if values.is_empty() {
        return Err(SqlGenError::malformed_filter("at least one operand is required"));
    }
    if values.iter().any(Value::is_list) {
        return Err(SqlGenError::malformed_filter(
            "list operands may not be nested or combined with other operands",
        ));
    }
    if let Some(bad) = values
        .iter()
        .find(|v| matches!(v, Value::Float(f) if !f.is_finite()))
    {
        return Err(SqlGenError::malformed_filter(format!(
            "operand {bad} is not a finite number"
        )));
    }
    if values.len() > 1 && !comparator.is_set_operator() {
        return Err(SqlGenError::malformed_filter(format!(
            "comparator {} takes exactly one operand, got {}",
            comparator.as_sql(),
            values.len()
        )));
    }
    Ok(values)
}

/// Restrict a named property.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyValueFilter {
    property: String,
    comparator: Comparator,
    values: Vec<Value>,
}

impl PropertyValueFilter {
    pub fn new(
        property: impl Into<String>,
        comparator: Comparator,
        values: Vec<Value>,
    ) -> Result<Self> {
        let property = property.into();
        if property.trim().is_empty() {
            return Err(SqlGenError::malformed_filter("property name is empty"));
        }
        Ok(Self {
            property,
            comparator,
            values: validate_operands(comparator, values)?,
        })
    }

    pub fn property(&self) -> &str {
        &self.property
    }

    pub fn comparator(&self) -> Comparator {
        self.comparator
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }
}

/// Restrict the proposition's own value column.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueFilter {
    comparator: Comparator,
    values: Vec<Value>,
}

impl ValueFilter {
    pub fn new(comparator: Comparator, values: Vec<Value>) -> Result<Self> {
        Ok(Self {
            comparator,
            values: validate_operands(comparator, values)?,
        })
    }

    pub fn comparator(&self) -> Comparator {
        self.comparator
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }
}

/// Calendar precision of a position bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
    Year,
    Month,
    Day,
    Hour,
    Minute,
    Second,
}

impl Granularity {
    /// Start of the granule containing `dt`.
    pub fn floor(self, dt: PrimitiveDateTime) -> PrimitiveDateTime {
        let date = dt.date();
        let midnight = Time::MIDNIGHT;
        let hms = |h: u8, m: u8, s: u8| Time::from_hms(h, m, s).unwrap_or(midnight);
        match self {
            Self::Year => PrimitiveDateTime::new(first_of(date.year(), Month::January), midnight),
            Self::Month => PrimitiveDateTime::new(first_of(date.year(), date.month()), midnight),
            Self::Day => PrimitiveDateTime::new(date, midnight),
            Self::Hour => PrimitiveDateTime::new(date, hms(dt.hour(), 0, 0)),
            Self::Minute => PrimitiveDateTime::new(date, hms(dt.hour(), dt.minute(), 0)),
            Self::Second => PrimitiveDateTime::new(date, hms(dt.hour(), dt.minute(), dt.second())),
        }
    }

    /// Start of the granule after the one containing `dt`.
    pub fn next(self, dt: PrimitiveDateTime) -> Result<PrimitiveDateTime> {
        let start = self.floor(dt);
        let overflow = || SqlGenError::malformed_filter(format!("position {dt} is out of range"));
        match self {
            Self::Year => Date::from_calendar_date(start.year() + 1, Month::January, 1)
                .map(|d| PrimitiveDateTime::new(d, Time::MIDNIGHT))
                .map_err(|_| overflow()),
            Self::Month => {
                let (year, month) = match start.month() {
                    Month::December => (start.year() + 1, Month::January),
                    month => (start.year(), month.next()),
                };
                Date::from_calendar_date(year, month, 1)
                    .map(|d| PrimitiveDateTime::new(d, Time::MIDNIGHT))
                    .map_err(|_| overflow())
            }
            Self::Day => start.checked_add(Duration::days(1)).ok_or_else(overflow),
            Self::Hour => start.checked_add(Duration::hours(1)).ok_or_else(overflow),
            Self::Minute => start.checked_add(Duration::minutes(1)).ok_or_else(overflow),
            Self::Second => start.checked_add(Duration::seconds(1)).ok_or_else(overflow),
        }
    }
}

fn first_of(year: i32, month: Month) -> Date {
    Date::from_calendar_date(year, month, 1).unwrap_or(Date::MIN)
}

/// Interval bounds derived from a position filter. Upper values are the
/// exclusive end of the granule holding the bound; `None` is unbounded, which
/// includes a granule ending past the last representable timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionBounds {
    pub min_start: Option<PrimitiveDateTime>,
    pub max_start: Option<PrimitiveDateTime>,
    pub min_finish: Option<PrimitiveDateTime>,
    pub max_finish: Option<PrimitiveDateTime>,
}

/// Restrict propositions to those starting at or after `start` and finishing
/// within or before the `finish` granule.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionFilter {
    start: Option<PrimitiveDateTime>,
    start_granularity: Granularity,
    finish: Option<PrimitiveDateTime>,
    finish_granularity: Granularity,
}

impl PositionFilter {
    pub fn new(
        start: Option<PrimitiveDateTime>,
        start_granularity: Granularity,
        finish: Option<PrimitiveDateTime>,
        finish_granularity: Granularity,
    ) -> Result<Self> {
        let filter = Self {
            start,
            start_granularity,
            finish,
            finish_granularity,
        };
        let bounds = filter.bounds();
        if let (Some(min_start), Some(max_finish)) = (bounds.min_start, bounds.max_finish)
            && min_start >= max_finish
        {
            return Err(SqlGenError::malformed_filter(format!(
                "position start {min_start} is not before finish bound {max_finish}"
            )));
        }
        Ok(filter)
    }

    pub fn start(&self) -> Option<PrimitiveDateTime> {
        self.start
    }

    pub fn start_granularity(&self) -> Granularity {
        self.start_granularity
    }

    pub fn finish(&self) -> Option<PrimitiveDateTime> {
        self.finish
    }

    pub fn finish_granularity(&self) -> Granularity {
        self.finish_granularity
    }

    pub fn bounds(&self) -> PositionBounds {
        PositionBounds {
            min_start: self.start.map(|s| self.start_granularity.floor(s)),
            max_start: self.start.and_then(|s| self.start_granularity.next(s).ok()),
            min_finish: self.finish.map(|f| self.finish_granularity.floor(f)),
            max_finish: self.finish.and_then(|f| self.finish_granularity.next(f).ok()),
        }
    }

    pub fn is_unbounded(&self) -> bool {
        self.start.is_none() && self.finish.is_none()
    }
}

/// The restriction carried by one chain node.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterKind {
    PropertyValue(PropertyValueFilter),
    Position(PositionFilter),
    Value(ValueFilter),
}

/// One node of an AND-chain of restrictions.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    proposition_ids: Vec<String>,
    kind: FilterKind,
    reference_path: Vec<String>,
    and: Option<Box<Filter>>,
}

impl Filter {
    pub fn new<I, S>(proposition_ids: I, kind: FilterKind) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            proposition_ids: proposition_ids.into_iter().map(Into::into).collect(),
            kind,
            reference_path: Vec::new(),
            and: None,
        }
    }

    pub fn property_value<I, S>(proposition_ids: I, filter: PropertyValueFilter) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(proposition_ids, FilterKind::PropertyValue(filter))
    }

    pub fn position<I, S>(proposition_ids: I, filter: PositionFilter) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(proposition_ids, FilterKind::Position(filter))
    }

    pub fn value<I, S>(proposition_ids: I, filter: ValueFilter) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(proposition_ids, FilterKind::Value(filter))
    }

    /// Name the references to follow to this node's entity instead of
    /// letting the shortest path be chosen. Applies to this node only.
    pub fn via<I, S>(mut self, reference_names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.reference_path = reference_names.into_iter().map(Into::into).collect();
        self
    }

    /// Append `next` (and its own chain) at the tail of this chain.
    pub fn and(mut self, next: Filter) -> Filter {
        self.push_tail(next);
        self
    }

    fn push_tail(&mut self, next: Filter) {
        match &mut self.and {
            Some(node) => node.push_tail(next),
            None => self.and = Some(Box::new(next)),
        }
    }

    pub fn proposition_ids(&self) -> &[String] {
        &self.proposition_ids
    }

    pub fn kind(&self) -> &FilterKind {
        &self.kind
    }

    pub fn reference_path(&self) -> &[String] {
        &self.reference_path
    }

    pub fn next(&self) -> Option<&Filter> {
        self.and.as_deref()
    }

    /// Walk the chain from this node, in order.
    pub fn and_iter(&self) -> AndIter<'_> {
        AndIter { next: Some(self) }
    }

    pub fn chain_length(&self) -> usize {
        self.and_iter().count()
    }

    /// Whether this node restricts any proposition id of `entity`.
    pub fn applies_to(&self, entity: &EntitySpec) -> bool {
        self.proposition_ids.iter().any(|id| entity.handles(id))
    }
}

/// Iterator over the nodes of a filter chain.
pub struct AndIter<'a> {
    next: Option<&'a Filter>,
}

impl<'a> Iterator for AndIter<'a> {
    type Item = &'a Filter;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = current.and.as_deref();
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn gender(value: &str) -> Filter {
        Filter::property_value(
            ["PatientDetails"],
            PropertyValueFilter::new("gender", Comparator::Equal, vec![Value::nominal(value)])
                .unwrap(),
        )
    }

    #[test]
    fn test_property_value_validation() {
        assert!(PropertyValueFilter::new("x", Comparator::Unknown, vec![Value::Integer(1)]).is_err());
        assert!(
            PropertyValueFilter::new(
                "x",
                Comparator::Equal,
                vec![Value::Integer(1), Value::Integer(2)]
            )
            .is_err()
        );
        assert!(PropertyValueFilter::new("x", Comparator::In, vec![]).is_err());
        assert!(
            PropertyValueFilter::new(
                "x",
                Comparator::Equal,
                vec![Value::List(vec![Value::Integer(1)])]
            )
            .is_err()
        );

        let flattened = PropertyValueFilter::new(
            "x",
            Comparator::In,
            vec![Value::List(vec![Value::Integer(1), Value::Integer(2)])],
        )
        .unwrap();
        assert_eq!(flattened.values().len(), 2);

        let nested = PropertyValueFilter::new(
            "x",
            Comparator::In,
            vec![Value::List(vec![Value::List(vec![Value::Integer(1)])])],
        );
        assert!(matches!(nested, Err(SqlGenError::MalformedFilter(_))));
    }

    #[test]
    fn test_chain_preserves_order() {
        let chain = gender("Male").and(gender("Female")).and(gender("Unknown"));
        assert_eq!(chain.chain_length(), 3);

        let values: Vec<String> = chain
            .and_iter()
            .map(|f| match f.kind() {
                FilterKind::PropertyValue(p) => p.values()[0].as_text(),
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(values, ["Male", "Female", "Unknown"]);
    }

    #[test]
    fn test_and_appends_whole_chain() {
        let tail = gender("B").and(gender("C"));
        let chain = gender("A").and(tail);
        assert_eq!(chain.chain_length(), 3);
        assert!(chain.next().and_then(Filter::next).is_some());
    }

    #[test]
    fn test_position_bounds_by_granularity() {
        let filter = PositionFilter::new(
            Some(datetime!(2010-03-15 10:20:30)),
            Granularity::Month,
            Some(datetime!(2010-12-05 08:00:00)),
            Granularity::Month,
        )
        .unwrap();
        let bounds = filter.bounds();
        assert_eq!(bounds.min_start, Some(datetime!(2010-03-01 0:00)));
        assert_eq!(bounds.max_start, Some(datetime!(2010-04-01 0:00)));
        assert_eq!(bounds.min_finish, Some(datetime!(2010-12-01 0:00)));
        assert_eq!(bounds.max_finish, Some(datetime!(2011-01-01 0:00)));
    }

    #[test]
    fn test_position_unbounded_sides() {
        let open = PositionFilter::new(
            None,
            Granularity::Day,
            Some(datetime!(2010-01-01 0:00)),
            Granularity::Year,
        )
        .unwrap();
        assert_eq!(open.bounds().min_start, None);
        assert_eq!(open.bounds().max_finish, Some(datetime!(2011-01-01 0:00)));
        assert!(!open.is_unbounded());

        let reversed = PositionFilter::new(
            Some(datetime!(2012-01-01 0:00)),
            Granularity::Day,
            Some(datetime!(2010-01-01 0:00)),
            Granularity::Day,
        );
        assert!(reversed.is_err());
    }

    #[test]
    fn test_non_finite_operands_rejected() {
        for bad in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let result = ValueFilter::new(Comparator::GreaterThan, vec![Value::Float(bad)]);
            assert!(matches!(result, Err(SqlGenError::MalformedFilter(_))));
        }
        let in_list = PropertyValueFilter::new(
            "x",
            Comparator::In,
            vec![Value::List(vec![Value::Float(1.5), Value::Float(f64::NAN)])],
        );
        assert!(in_list.is_err());
        assert!(ValueFilter::new(Comparator::GreaterThan, vec![Value::Float(6.5)]).is_ok());
    }

    #[test]
    fn test_position_in_last_representable_year() {
        let filter = PositionFilter::new(
            Some(datetime!(9999-06-01 0:00)),
            Granularity::Year,
            Some(datetime!(9999-12-31 0:00)),
            Granularity::Year,
        )
        .unwrap();
        assert_eq!(filter.bounds().min_start, Some(datetime!(9999-01-01 0:00)));
    }

    #[test]
    fn test_granularity_floor() {
        let dt = datetime!(2010-03-15 10:20:30);
        assert_eq!(Granularity::Year.floor(dt), datetime!(2010-01-01 0:00));
        assert_eq!(Granularity::Hour.floor(dt), datetime!(2010-03-15 10:00));
        assert_eq!(Granularity::Second.next(dt).unwrap(), datetime!(2010-03-15 10:20:31));
    }
}
