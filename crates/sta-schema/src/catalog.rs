//! Deployment-level view of the data model.
//!
//! The [`Catalog`] combines the static entity model with deployment settings
//! (database schema name, whether version history is kept) and answers the
//! lookups the parser and planner need.

use crate::entity::EntityType;
use crate::property::{
    static_properties, PropertyDef, PropertyKind, RESULT_COLUMNS, SYSTEM_TIME_PROPERTY,
};
use crate::relation::{commit_relation, static_relations, JoinShape, Relation};

/// Default database schema holding the SensorThings tables.
pub const DEFAULT_SCHEMA: &str = "sensorthings";

/// Suffix of the history tables that hold superseded row versions.
pub const HISTORY_SUFFIX: &str = "_traveltime";

/// Data model lookups for one deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Catalog {
    schema: String,
    versioning: bool,
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new(DEFAULT_SCHEMA)
    }
}

impl Catalog {
    /// Create a catalog over the given database schema, without versioning.
    pub fn new(schema: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            versioning: false,
        }
    }

    /// Enable or disable version history support.
    pub fn with_versioning(mut self, enabled: bool) -> Self {
        self.versioning = enabled;
        self
    }

    /// Database schema name.
    pub fn schema(&self) -> &str {
        &self.schema
    }

    /// Whether version history is kept.
    pub fn versioning(&self) -> bool {
        self.versioning
    }

    /// Entity types exposed by this deployment, ordered by collection name.
    pub fn entity_types(&self) -> Vec<EntityType> {
        let mut types = EntityType::COLLECTIONS.to_vec();
        if self.versioning {
            types.push(EntityType::Commit);
            types.sort_by_key(|e| e.collection_name());
        }
        types
    }

    /// Resolve a collection name, honoring whether `Commits` is exposed.
    pub fn resolve_collection(&self, name: &str) -> Option<EntityType> {
        EntityType::from_collection_name(name).filter(|e| self.is_exposed(*e))
    }

    /// Whether the entity type is addressable in this deployment.
    pub fn is_exposed(&self, entity: EntityType) -> bool {
        entity != EntityType::Commit || self.versioning
    }

    /// Properties of an entity type, including `systemTimeValidity` when
    /// versioning is on.
    pub fn properties(&self, entity: EntityType) -> Vec<PropertyDef> {
        let mut props = static_properties(entity).to_vec();
        if self.versioning && entity.is_versioned() {
            props.push(SYSTEM_TIME_PROPERTY);
        }
        props
    }

    /// Look up a property by name.
    pub fn property(&self, entity: EntityType, name: &str) -> Option<PropertyDef> {
        if self.versioning && entity.is_versioned() && name == SYSTEM_TIME_PROPERTY.name {
            return Some(SYSTEM_TIME_PROPERTY);
        }
        static_properties(entity).iter().find(|p| p.name == name).copied()
    }

    /// Navigation relations of an entity type.
    pub fn relations(&self, entity: EntityType) -> Vec<Relation> {
        let mut rels = static_relations(entity).to_vec();
        if self.versioning && entity.is_versioned() {
            rels.push(commit_relation(entity));
        }
        rels
    }

    /// Look up a navigation relation by name.
    pub fn relation(&self, entity: EntityType, name: &str) -> Option<Relation> {
        self.relations(entity).into_iter().find(|r| r.name == name)
    }

    /// Physical columns stored on the entity's table, in a stable order.
    ///
    /// Live and history tables share this column set, so it is what a
    /// `UNION ALL` across both must select.
    pub fn stored_columns(&self, entity: EntityType) -> Vec<&'static str> {
        let mut columns = Vec::new();
        for prop in self.properties(entity) {
            if prop.kind == PropertyKind::Result {
                columns.extend([
                    RESULT_COLUMNS.json,
                    RESULT_COLUMNS.number,
                    RESULT_COLUMNS.string,
                    RESULT_COLUMNS.boolean,
                ]);
            } else {
                columns.push(prop.column);
            }
        }
        for rel in self.relations(entity) {
            if let JoinShape::SourceKey { column } = rel.join {
                if !columns.contains(&column) {
                    columns.push(column);
                }
            }
        }
        columns
    }

    /// Quote an SQL identifier.
    pub fn quote_ident(ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }

    /// Fully qualified, quoted name of a live table.
    pub fn table_ref(&self, table: &str) -> String {
        format!("{}.{}", Self::quote_ident(&self.schema), Self::quote_ident(table))
    }

    /// Fully qualified live table of an entity type.
    pub fn entity_table(&self, entity: EntityType) -> String {
        self.table_ref(entity.table_name())
    }

    /// Fully qualified history table of an entity type.
    pub fn history_table(&self, entity: EntityType) -> String {
        self.table_ref(&format!("{}{}", entity.table_name(), HISTORY_SUFFIX))
    }
}
