//! Dialect-aware SQL compilation for clinical proposition queries.
//!
//! This crate turns a declarative description of which propositions to read
//! (an [`EntitySpecGraph`], a [`Filter`] chain, key ids and an ordering) into
//! one SQL `SELECT` per entity, picks the dialect that matches the live
//! driver and database, and maps result rows back into [`Proposition`]s.
//!
//! # Example
//!
//! ```ignore
//! use tempus_sql::{GeneratorRegistry, SelectRequest, SelectStatement, ServerIdentity, Version};
//!
//! let registry = GeneratorRegistry::with_defaults();
//! let generator = registry.select_generator(&ServerIdentity::new(
//!     "postgresql",
//!     Version::parse("42.7.3")?,
//!     "PostgreSQL",
//!     Version::parse("15.4")?,
//! ))?;
//!
//! let sql = SelectStatement::new(&generator, &graph)
//!     .generate(&SelectRequest::new("Encounter").key_ids(["00001"]))?
//!     .sql;
//! ```
//!
//! # Architecture
//!
//! - [`version`]: versions, ranges and compatibility windows
//! - [`spec`]: entity, reference and column specs and path resolution
//! - [`filter`]: the AND-chain of query restrictions
//! - [`aliaser`] and [`column_info`]: per-compilation table aliases and column needs
//! - [`dialect`]: clause builders and the H2, MySQL and PostgreSQL plugins
//! - [`statement`]: the compiler
//! - [`registry`]: generator selection
//! - [`processor`]: row to proposition reconstruction
//! - [`executor`]: the driver seam and the data-source runner

pub mod aliaser;
pub mod column_info;
pub mod dialect;
pub mod error;
pub mod executor;
pub mod filter;
pub mod processor;
pub mod proposition;
pub mod registry;
pub mod row;
pub mod spec;
pub mod statement;
pub mod value;
pub mod version;

pub use column_info::{ColumnLayout, ColumnPurpose, ColumnSpecInfo};
pub use dialect::{Generator, KeyIdNormalizer};
pub use error::{ErrorCategory, Result, SqlGenError};
pub use executor::{DataSourceOptions, QueryExecutor, QueryRequest, SqlDataSource};
pub use filter::{
    Filter, FilterKind, Granularity, PositionBounds, PositionFilter, PropertyValueFilter,
    ValueFilter,
};
pub use processor::{
    ProcessorOptions, ProcessorOutput, PropositionProcessorFactory, ResultMode, ResultProcessor,
    ResultProcessorFactory,
};
pub use proposition::{Interval, KeyedPropositions, Proposition, UniqueId};
pub use registry::GeneratorRegistry;
pub use row::{CellValue, ResultRow};
pub use spec::{
    Cardinality, CodeSpec, ColumnSpec, EntitySpec, EntitySpecGraph, InboundReference, JoinSpec,
    Mappings, PropertySpec, ReferenceSpec, SqlType, StagingSpec, TableSpec,
};
pub use statement::{
    CompilationPhase, CompiledSelect, GeneratedSql, SelectRequest, SelectStatement, SqlOrderBy,
};
pub use value::{Comparator, Value};
pub use version::{CompatibilityWindow, ServerIdentity, Version, VersionRange};
