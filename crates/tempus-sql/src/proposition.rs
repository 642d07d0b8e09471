//! Propositions reconstructed from result rows.

use std::fmt;

use indexmap::IndexMap;
use time::PrimitiveDateTime;

use crate::value::Value;

/// Identity of one proposition instance: its entity and unique-id values.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UniqueId {
    pub entity: String,
    pub parts: Vec<String>,
}

impl UniqueId {
    pub fn new(entity: impl Into<String>, parts: Vec<String>) -> Self {
        Self {
            entity: entity.into(),
            parts,
        }
    }
}

impl fmt::Display for UniqueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}^{}", self.entity, self.parts.join("^"))
    }
}

/// When a proposition holds. Point events have `start == finish`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Interval {
    pub start: Option<PrimitiveDateTime>,
    pub finish: Option<PrimitiveDateTime>,
}

/// A proposition read from the database.
#[derive(Debug, Clone, PartialEq)]
pub struct Proposition {
    pub id: String,
    pub key_id: String,
    pub unique_id: UniqueId,
    pub interval: Interval,
    pub value: Option<Value>,
    pub properties: IndexMap<String, Value>,
    /// Reference name to the unique ids it points at.
    pub references: IndexMap<String, Vec<UniqueId>>,
    /// `Entity.reference` to the unique ids of propositions pointing here.
    pub inbound_keys: IndexMap<String, Vec<UniqueId>>,
}

impl Proposition {
    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }

    pub fn references(&self, name: &str) -> &[UniqueId] {
        self.references.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Fold the reference values of another row of the same proposition into
    /// this one, keeping first-seen order and skipping duplicates.
    pub fn merge(&mut self, other: Proposition) {
        merge_ids(&mut self.references, other.references);
        merge_ids(&mut self.inbound_keys, other.inbound_keys);
    }
}

fn merge_ids(into: &mut IndexMap<String, Vec<UniqueId>>, from: IndexMap<String, Vec<UniqueId>>) {
    for (name, ids) in from {
        let existing = into.entry(name).or_default();
        for id in ids {
            if !existing.contains(&id) {
                existing.push(id);
            }
        }
    }
}

/// Propositions grouped by key id, keys in first-arrival order.
pub type KeyedPropositions = IndexMap<String, Vec<Proposition>>;

#[cfg(test)]
mod tests {
    use super::*;

    fn prop(reference: &str) -> Proposition {
        let mut references = IndexMap::new();
        references.insert(
            "provider".to_string(),
            vec![UniqueId::new("Provider", vec![reference.to_string()])],
        );
        Proposition {
            id: "Encounter".into(),
            key_id: "00001".into(),
            unique_id: UniqueId::new("Encounter", vec!["e1".into()]),
            interval: Interval::default(),
            value: None,
            properties: IndexMap::new(),
            references,
            inbound_keys: IndexMap::new(),
        }
    }

    #[test]
    fn test_merge_accumulates_distinct_references() {
        let mut first = prop("p1");
        first.merge(prop("p2"));
        first.merge(prop("p1"));
        let ids: Vec<String> = first
            .references("provider")
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(ids, ["Provider^p1", "Provider^p2"]);
        assert!(first.references("other").is_empty());
    }
}
