//! SensorThings data model.
//!
//! Describes the entity types, their addressable properties and the
//! navigation relations between them, plus how each maps onto the
//! PostgreSQL tables of a deployment.

pub mod catalog;
pub mod entity;
pub mod property;
pub mod relation;

pub use catalog::{Catalog, DEFAULT_SCHEMA, HISTORY_SUFFIX};
pub use entity::EntityType;
pub use property::{PropertyDef, PropertyKind, RESULT_COLUMNS, SYSTEM_TIME_VALIDITY};
pub use relation::{Cardinality, JoinShape, Relation, COMMIT_COLUMN};
