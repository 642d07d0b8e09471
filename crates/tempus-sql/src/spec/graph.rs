//! The validated, read-only entity graph and its reference-path resolution.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use indexmap::IndexMap;
use serde::Deserialize;

use super::{ColumnSpec, EntitySpec, ReferenceSpec};
use crate::error::{Result, SqlGenError};
use crate::statement::CompilationPhase;

/// Which way a reference is walked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// From the entity declaring the reference to its target.
    Forward,
    /// From the target back to the declaring entity.
    Reverse,
}

/// One hop of a resolved join path.
#[derive(Debug, Clone)]
pub struct PathStep {
    pub reference: ReferenceSpec,
    /// Entity declaring `reference`.
    pub owner: Arc<EntitySpec>,
    pub from: Arc<EntitySpec>,
    pub to: Arc<EntitySpec>,
    pub direction: Direction,
}

/// A reference declared elsewhere that targets a given entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundReference {
    pub source_entity: String,
    pub reference: ReferenceSpec,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Edge {
    owner: usize,
    reference: usize,
    to: usize,
    direction: Direction,
}

#[derive(Deserialize)]
struct SpecFile {
    #[serde(rename = "entity", default)]
    entities: Vec<EntitySpec>,
}

/// All entity specs of a knowledge source, validated and shared read-only.
#[derive(Debug, Clone, Default)]
pub struct EntitySpecGraph {
    entities: IndexMap<String, Arc<EntitySpec>>,
}

impl EntitySpecGraph {
    /// Validate every entity and the references between them.
    ///
    /// Fails on duplicate entity names, references to unknown entities and
    /// reference columns whose types cannot be joined.
    pub fn new(specs: Vec<EntitySpec>) -> Result<Self> {
        let mut entities = IndexMap::with_capacity(specs.len());
        for spec in specs {
            spec.validate()?;
            if entities.contains_key(&spec.name) {
                return Err(SqlGenError::invalid_spec(format!(
                    "duplicate entity '{}'",
                    spec.name
                )));
            }
            entities.insert(spec.name.clone(), Arc::new(spec));
        }

        for entity in entities.values() {
            for reference in &entity.references {
                if !entities.contains_key(&reference.target) {
                    return Err(SqlGenError::invalid_spec(format!(
                        "reference '{}' of entity '{}' targets unknown entity '{}'",
                        reference.name, entity.name, reference.target
                    )));
                }
                let source_type = reference.source_column.sql_type;
                let target_type = reference.target_column.sql_type;
                if !source_type.is_compatible_with(target_type) {
                    return Err(SqlGenError::invalid_spec(format!(
                        "reference '{}' of entity '{}' joins {source_type:?} to {target_type:?}",
                        reference.name, entity.name
                    )));
                }
            }
        }

        Ok(Self { entities })
    }

    /// Load entity specs from TOML (`[[entity]]` tables).
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let file: SpecFile = toml::from_str(text)
            .map_err(|e| SqlGenError::invalid_spec(format!("spec file: {e}")))?;
        Self::new(file.entities)
    }

    pub fn entity(&self, name: &str) -> Option<&Arc<EntitySpec>> {
        self.entities.get(name)
    }

    /// Entities in declaration order.
    pub fn entities(&self) -> impl Iterator<Item = &Arc<EntitySpec>> {
        self.entities.values()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// First entity, in declaration order, that declares `proposition_id`.
    pub fn entity_for_proposition(&self, proposition_id: &str) -> Option<&Arc<EntitySpec>> {
        self.entities().find(|e| e.handles(proposition_id))
    }

    /// Columns holding the given properties, in the order asked for.
    pub fn resolve_columns(
        &self,
        entity: &EntitySpec,
        needed_properties: &[&str],
    ) -> Result<Vec<ColumnSpec>> {
        needed_properties
            .iter()
            .map(|name| {
                entity
                    .property(name)
                    .map(|p| p.column.clone())
                    .ok_or_else(|| {
                        SqlGenError::compilation(
                            CompilationPhase::BuildingColumnInfo,
                            format!("entity '{}' has no property '{name}'", entity.name),
                        )
                    })
            })
            .collect()
    }

    /// References targeting `target`, in declaration order.
    pub fn inbound_references(&self, target: &str) -> Vec<InboundReference> {
        self.entities()
            .flat_map(|entity| {
                entity
                    .references
                    .iter()
                    .filter(|r| r.target == target)
                    .map(|r| InboundReference {
                        source_entity: entity.name.clone(),
                        reference: r.clone(),
                    })
            })
            .collect()
    }

    /// Shortest join path from `from` to `to`, walking references either way.
    ///
    /// Breadth-first with a visited set, so self references terminate. When
    /// more than one path of the minimal length exists the caller must name
    /// the path explicitly (see [`Self::resolve_named_path`]).
    pub fn resolve_join_path(&self, from: &str, to: &str) -> Result<Vec<PathStep>> {
        let start = self.index_of(from)?;
        let goal = self.index_of(to)?;
        if start == goal {
            return Ok(Vec::new());
        }

        let count = self.entities.len();
        let mut distance: Vec<Option<usize>> = vec![None; count];
        let mut paths: Vec<usize> = vec![0; count];
        let mut previous: Vec<Option<(usize, Edge)>> = vec![None; count];
        let mut queue = VecDeque::new();

        distance[start] = Some(0);
        paths[start] = 1;
        queue.push_back(start);

        while let Some(current) = queue.pop_front() {
            let next_distance = distance[current].unwrap_or(0) + 1;
            for edge in self.edges_from(current) {
                match distance[edge.to] {
                    None => {
                        distance[edge.to] = Some(next_distance);
                        paths[edge.to] = paths[current];
                        previous[edge.to] = Some((current, edge));
                        queue.push_back(edge.to);
                    }
                    Some(known) if known == next_distance => {
                        // Saturate: only "one" versus "more than one" matters.
                        paths[edge.to] = (paths[edge.to] + paths[current]).min(2);
                    }
                    Some(_) => {}
                }
            }
        }

        let Some(length) = distance[goal] else {
            return Err(SqlGenError::compilation(
                CompilationPhase::BuildingColumnInfo,
                format!("no reference path from '{from}' to '{to}'"),
            ));
        };
        if paths[goal] > 1 {
            return Err(SqlGenError::AmbiguousReferencePath {
                from: from.to_string(),
                to: to.to_string(),
                length,
            });
        }

        let mut edges = Vec::with_capacity(length);
        let mut cursor = goal;
        while let Some((before, edge)) = previous[cursor] {
            edges.push((before, edge));
            cursor = before;
        }
        edges.reverse();
        Ok(edges
            .into_iter()
            .map(|(before, edge)| self.step(before, edge))
            .collect())
    }

    /// Follow reference names from `from`, each looked up first as an
    /// outbound reference of the current entity, then as an inbound one.
    ///
    /// Reaching an entity already on the path is rejected as a cycle. A self
    /// reference is the exception: it may be followed once, to the parent row.
    pub fn resolve_named_path(&self, from: &str, names: &[String]) -> Result<Vec<PathStep>> {
        let mut current = self.index_of(from)?;
        let mut visited: HashSet<usize> = HashSet::from([current]);
        let mut self_hops: HashSet<(usize, usize)> = HashSet::new();
        let mut steps = Vec::with_capacity(names.len());

        for name in names {
            let edge = self
                .edges_from(current)
                .into_iter()
                .find(|edge| {
                    let owner = &self.entities[edge.owner];
                    owner.references[edge.reference].name == *name
                })
                .ok_or_else(|| {
                    SqlGenError::compilation(
                        CompilationPhase::BuildingColumnInfo,
                        format!(
                            "entity '{}' has no reference '{name}' usable from it",
                            self.entities[current].name
                        ),
                    )
                })?;
            let fresh = if edge.to == current {
                self_hops.insert((edge.owner, edge.reference))
            } else {
                visited.insert(edge.to)
            };
            if !fresh {
                return Err(SqlGenError::CyclicReferencePath {
                    from: from.to_string(),
                    reference: name.clone(),
                });
            }
            steps.push(self.step(current, edge));
            current = edge.to;
        }
        Ok(steps)
    }

    /// The reverse hop from an inbound reference's target back to the entity
    /// declaring it.
    pub fn inbound_step(&self, inbound: &InboundReference) -> Result<PathStep> {
        let owner = self.index_of(&inbound.source_entity)?;
        let target = self.index_of(&inbound.reference.target)?;
        let position = self.entities[owner]
            .references
            .iter()
            .position(|r| r.name == inbound.reference.name)
            .ok_or_else(|| {
                SqlGenError::compilation(
                    CompilationPhase::BuildingColumnInfo,
                    format!(
                        "entity '{}' has no reference '{}'",
                        inbound.source_entity, inbound.reference.name
                    ),
                )
            })?;
        if !inbound.reference.source_column.is_on_base_table() {
            return Err(SqlGenError::compilation(
                CompilationPhase::BuildingColumnInfo,
                format!(
                    "reference '{}' of entity '{}' cannot be walked in reverse",
                    inbound.reference.name, inbound.source_entity
                ),
            ));
        }
        Ok(self.step(
            target,
            Edge {
                owner,
                reference: position,
                to: owner,
                direction: Direction::Reverse,
            },
        ))
    }

    fn index_of(&self, name: &str) -> Result<usize> {
        self.entities.get_index_of(name).ok_or_else(|| {
            SqlGenError::compilation(
                CompilationPhase::BuildingColumnInfo,
                format!("unknown entity '{name}'"),
            )
        })
    }

    /// Outbound references first, then inbound ones walkable in reverse.
    ///
    /// Reverse traversal needs the declaring side's column on its base table.
    fn edges_from(&self, index: usize) -> Vec<Edge> {
        let entity = &self.entities[index];
        let mut edges: Vec<Edge> = entity
            .references
            .iter()
            .enumerate()
            .filter_map(|(position, reference)| {
                self.entities.get_index_of(&reference.target).map(|to| Edge {
                    owner: index,
                    reference: position,
                    to,
                    direction: Direction::Forward,
                })
            })
            .collect();

        for (owner_index, owner) in self.entities.values().enumerate() {
            for (position, reference) in owner.references.iter().enumerate() {
                if reference.target == entity.name && reference.source_column.is_on_base_table() {
                    edges.push(Edge {
                        owner: owner_index,
                        reference: position,
                        to: owner_index,
                        direction: Direction::Reverse,
                    });
                }
            }
        }
        edges
    }

    fn step(&self, from: usize, edge: Edge) -> PathStep {
        let owner = Arc::clone(&self.entities[edge.owner]);
        PathStep {
            reference: owner.references[edge.reference].clone(),
            from: Arc::clone(&self.entities[from]),
            to: Arc::clone(&self.entities[edge.to]),
            owner,
            direction: edge.direction,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::{Cardinality, SqlType, TableSpec};

    fn entity(name: &str) -> EntitySpec {
        EntitySpec::new(
            name,
            TableSpec::new(name.to_lowercase()),
            ColumnSpec::varchar("patient_id"),
        )
        .with_proposition_id(name)
        .with_unique_id(ColumnSpec::varchar("id"))
    }

    fn reference(name: &str, target: &str, column: &str) -> ReferenceSpec {
        ReferenceSpec::new(
            name,
            target,
            ColumnSpec::varchar(column),
            ColumnSpec::varchar("id"),
            Cardinality::One,
        )
    }

    #[test]
    fn test_unknown_target_rejected() {
        let result = EntitySpecGraph::new(vec![
            entity("Encounter").with_reference(reference("patient", "Patient", "pat_id")),
        ]);
        assert!(matches!(result, Err(SqlGenError::InvalidSpec(msg)) if msg.contains("unknown entity")));
    }

    #[test]
    fn test_incompatible_reference_types_rejected() {
        let bad = ReferenceSpec::new(
            "patient",
            "Patient",
            ColumnSpec::new("pat_num", SqlType::Integer),
            ColumnSpec::varchar("id"),
            Cardinality::One,
        );
        let result =
            EntitySpecGraph::new(vec![entity("Patient"), entity("Encounter").with_reference(bad)]);
        assert!(matches!(result, Err(SqlGenError::InvalidSpec(_))));
    }

    #[test]
    fn test_shortest_path_forward_and_reverse() {
        let graph = EntitySpecGraph::new(vec![
            entity("Patient"),
            entity("Encounter").with_reference(reference("patient", "Patient", "pat_id")),
            entity("Lab").with_reference(reference("encounter", "Encounter", "enc_id")),
        ])
        .unwrap();

        let forward = graph.resolve_join_path("Lab", "Patient").unwrap();
        assert_eq!(forward.len(), 2);
        assert_eq!(forward[0].reference.name, "encounter");
        assert_eq!(forward[1].reference.name, "patient");
        assert!(forward.iter().all(|s| s.direction == Direction::Forward));

        let reverse = graph.resolve_join_path("Patient", "Encounter").unwrap();
        assert_eq!(reverse.len(), 1);
        assert_eq!(reverse[0].direction, Direction::Reverse);
        assert_eq!(reverse[0].owner.name, "Encounter");

        assert!(graph.resolve_join_path("Lab", "Lab").unwrap().is_empty());
    }

    #[test]
    fn test_ambiguous_path_fails() {
        let graph = EntitySpecGraph::new(vec![
            entity("Provider"),
            entity("Encounter")
                .with_reference(reference("attending", "Provider", "attending_id"))
                .with_reference(reference("admitting", "Provider", "admitting_id")),
        ])
        .unwrap();

        let result = graph.resolve_join_path("Encounter", "Provider");
        assert!(matches!(
            result,
            Err(SqlGenError::AmbiguousReferencePath { length: 1, .. })
        ));

        let named = graph
            .resolve_named_path("Encounter", &["admitting".to_string()])
            .unwrap();
        assert_eq!(named[0].reference.name, "admitting");
    }

    #[test]
    fn test_self_reference_terminates() {
        let graph = EntitySpecGraph::new(vec![
            entity("Diagnosis").with_reference(reference("parent", "Diagnosis", "parent_id")),
            entity("Patient"),
        ])
        .unwrap();

        let result = graph.resolve_join_path("Diagnosis", "Patient");
        assert!(matches!(result, Err(SqlGenError::Compilation { .. })));

        let once = graph
            .resolve_named_path("Diagnosis", &["parent".to_string()])
            .unwrap();
        assert_eq!(once.len(), 1);

        let twice = graph.resolve_named_path(
            "Diagnosis",
            &["parent".to_string(), "parent".to_string()],
        );
        assert!(matches!(twice, Err(SqlGenError::CyclicReferencePath { .. })));
    }

    #[test]
    fn test_named_path_back_to_start_is_cyclic() {
        let graph = EntitySpecGraph::new(vec![
            entity("Provider"),
            entity("Encounter")
                .with_reference(reference("attending", "Provider", "attending_id"))
                .with_reference(reference("admitting", "Provider", "admitting_id")),
        ])
        .unwrap();

        let result = graph.resolve_named_path(
            "Encounter",
            &["attending".to_string(), "admitting".to_string()],
        );
        assert!(matches!(
            result,
            Err(SqlGenError::CyclicReferencePath { reference, .. }) if reference == "admitting"
        ));
    }

    #[test]
    fn test_resolve_columns() {
        let spec = entity("Patient").with_property("gender", ColumnSpec::varchar("gender_cd"));
        let graph = EntitySpecGraph::new(vec![spec]).unwrap();
        let patient = graph.entity("Patient").unwrap();

        let columns = graph.resolve_columns(patient, &["gender"]).unwrap();
        assert_eq!(columns[0].column, "gender_cd");
        assert!(graph.resolve_columns(patient, &["race"]).is_err());
    }

    #[test]
    fn test_inbound_references() {
        let graph = EntitySpecGraph::new(vec![
            entity("Patient"),
            entity("Encounter").with_reference(reference("patient", "Patient", "pat_id")),
        ])
        .unwrap();
        let inbound = graph.inbound_references("Patient");
        assert_eq!(inbound.len(), 1);
        assert_eq!(inbound[0].source_entity, "Encounter");
        assert!(graph.inbound_references("Encounter").is_empty());

        let step = graph.inbound_step(&inbound[0]).unwrap();
        assert_eq!(step.direction, Direction::Reverse);
        assert_eq!(step.from.name, "Patient");
        assert_eq!(step.to.name, "Encounter");
    }

    #[test]
    fn test_from_toml() {
        let graph = EntitySpecGraph::from_toml_str(
            r#"
[[entity]]
name = "Patient"
proposition_ids = ["PatientDetails"]
table = { schema = "cdw", name = "patient" }
key_id = { column = "patient_id", sql_type = "varchar" }
unique_ids = [{ column = "patient_id", sql_type = "varchar" }]

[[entity.properties]]
name = "gender"
column = { column = "gender_cd", sql_type = "varchar", mappings = { M = "Male", F = "Female" } }
"#,
        )
        .unwrap();

        let patient = graph.entity("Patient").unwrap();
        assert_eq!(patient.table.qualified(), "cdw.patient");
        let gender = patient.property("gender").unwrap();
        assert_eq!(
            gender.column.mappings.as_ref().and_then(|m| m.decode("M")),
            Some("Male")
        );
        assert!(graph.entity_for_proposition("PatientDetails").is_some());
    }
}
