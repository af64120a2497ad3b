//! Navigation relations between entity types.

use crate::entity::EntityType;

/// How many targets a navigation property yields per source entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    /// At most one target (e.g. `Observation/Datastream`).
    One,
    /// Any number of targets (e.g. `Datastream/Observations`).
    Many,
}

/// Physical shape of the join backing a relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinShape {
    /// The source row holds a foreign key to the target id.
    SourceKey {
        /// Foreign key column on the source table.
        column: &'static str,
    },
    /// The target row holds a foreign key to the source id.
    TargetKey {
        /// Foreign key column on the target table.
        column: &'static str,
    },
    /// A link table joins source and target ids.
    Link {
        /// Link table name.
        table: &'static str,
        /// Column referencing the source id.
        source_column: &'static str,
        /// Column referencing the target id.
        target_column: &'static str,
    },
}

/// A navigation property from one entity type to another.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Relation {
    /// Navigation property name (`Thing`, `Observations`, ...).
    pub name: &'static str,
    /// Entity type owning the navigation property.
    pub source: EntityType,
    /// Entity type reached through it.
    pub target: EntityType,
    /// Number of targets per source.
    pub cardinality: Cardinality,
    /// Join backing the relation.
    pub join: JoinShape,
}

impl Relation {
    const fn one(source: EntityType, target: EntityType, column: &'static str) -> Self {
        Self {
            name: target_singular(target),
            source,
            target,
            cardinality: Cardinality::One,
            join: JoinShape::SourceKey { column },
        }
    }

    const fn many(source: EntityType, target: EntityType, column: &'static str) -> Self {
        Self {
            name: target_collection(target),
            source,
            target,
            cardinality: Cardinality::Many,
            join: JoinShape::TargetKey { column },
        }
    }

    const fn link(
        source: EntityType,
        target: EntityType,
        table: &'static str,
        source_column: &'static str,
        target_column: &'static str,
    ) -> Self {
        Self {
            name: target_collection(target),
            source,
            target,
            cardinality: Cardinality::Many,
            join: JoinShape::Link {
                table,
                source_column,
                target_column,
            },
        }
    }

    /// Whether the relation yields at most one target.
    pub fn is_to_one(&self) -> bool {
        self.cardinality == Cardinality::One
    }
}

// `EntityType::collection_name` is not const; these mirror it for the tables below.
const fn target_collection(target: EntityType) -> &'static str {
    match target {
        EntityType::Thing => "Things",
        EntityType::Location => "Locations",
        EntityType::HistoricalLocation => "HistoricalLocations",
        EntityType::Datastream => "Datastreams",
        EntityType::Sensor => "Sensors",
        EntityType::ObservedProperty => "ObservedProperties",
        EntityType::Observation => "Observations",
        EntityType::FeatureOfInterest => "FeaturesOfInterest",
        EntityType::Commit => "Commits",
    }
}

const fn target_singular(target: EntityType) -> &'static str {
    match target {
        EntityType::Thing => "Thing",
        EntityType::Location => "Location",
        EntityType::HistoricalLocation => "HistoricalLocation",
        EntityType::Datastream => "Datastream",
        EntityType::Sensor => "Sensor",
        EntityType::ObservedProperty => "ObservedProperty",
        EntityType::Observation => "Observation",
        EntityType::FeatureOfInterest => "FeatureOfInterest",
        EntityType::Commit => "Commit",
    }
}

use EntityType::*;

const THING_LOCATION: &str = "Thing_Location";
const LOCATION_HISTORICAL_LOCATION: &str = "Location_HistoricalLocation";

const THING_RELATIONS: &[Relation] = &[
    Relation::link(Thing, Location, THING_LOCATION, "thing_id", "location_id"),
    Relation::many(Thing, HistoricalLocation, "thing_id"),
    Relation::many(Thing, Datastream, "thing_id"),
];

const LOCATION_RELATIONS: &[Relation] = &[
    Relation::link(Location, Thing, THING_LOCATION, "location_id", "thing_id"),
    Relation::link(
        Location,
        HistoricalLocation,
        LOCATION_HISTORICAL_LOCATION,
        "location_id",
        "historicallocation_id",
    ),
];

const HISTORICAL_LOCATION_RELATIONS: &[Relation] = &[
    Relation::one(HistoricalLocation, Thing, "thing_id"),
    Relation::link(
        HistoricalLocation,
        Location,
        LOCATION_HISTORICAL_LOCATION,
        "historicallocation_id",
        "location_id",
    ),
];

const DATASTREAM_RELATIONS: &[Relation] = &[
    Relation::one(Datastream, Thing, "thing_id"),
    Relation::one(Datastream, Sensor, "sensor_id"),
    Relation::one(Datastream, ObservedProperty, "observedproperty_id"),
    Relation::many(Datastream, Observation, "datastream_id"),
];

const SENSOR_RELATIONS: &[Relation] = &[Relation::many(Sensor, Datastream, "sensor_id")];

const OBSERVED_PROPERTY_RELATIONS: &[Relation] =
    &[Relation::many(ObservedProperty, Datastream, "observedproperty_id")];

const OBSERVATION_RELATIONS: &[Relation] = &[
    Relation::one(Observation, Datastream, "datastream_id"),
    Relation::one(Observation, FeatureOfInterest, "featuresofinterest_id"),
];

const FEATURE_OF_INTEREST_RELATIONS: &[Relation] =
    &[Relation::many(FeatureOfInterest, Observation, "featuresofinterest_id")];

/// Foreign key column referencing the Commit on versioned tables.
pub const COMMIT_COLUMN: &str = "commit_id";

/// The static (non-versioning) relations of an entity type.
pub fn static_relations(entity: EntityType) -> &'static [Relation] {
    match entity {
        Thing => THING_RELATIONS,
        Location => LOCATION_RELATIONS,
        HistoricalLocation => HISTORICAL_LOCATION_RELATIONS,
        Datastream => DATASTREAM_RELATIONS,
        Sensor => SENSOR_RELATIONS,
        ObservedProperty => OBSERVED_PROPERTY_RELATIONS,
        Observation => OBSERVATION_RELATIONS,
        FeatureOfInterest => FEATURE_OF_INTEREST_RELATIONS,
        Commit => &[],
    }
}

/// The relation from a versioned entity to the Commit that produced it.
pub fn commit_relation(source: EntityType) -> Relation {
    Relation::one(source, Commit, COMMIT_COLUMN)
}
