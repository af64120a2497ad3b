//! SensorThings entity types.

use std::fmt;

/// One of the addressable SensorThings entity types.
///
/// `Commit` is only addressable when the deployment keeps a version history;
/// the [`Catalog`](crate::Catalog) decides whether it is visible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityType {
    /// A physical or virtual object being observed.
    Thing,
    /// Last known location of a Thing.
    Location,
    /// Time-stamped association between a Thing and its Locations.
    HistoricalLocation,
    /// Group of Observations of one ObservedProperty made by one Sensor.
    Datastream,
    /// Instrument producing Observations.
    Sensor,
    /// The phenomenon being observed.
    ObservedProperty,
    /// A single measurement act and its result.
    Observation,
    /// The feature an Observation is about.
    FeatureOfInterest,
    /// Append-only record of a write operation (history only).
    Commit,
}

impl EntityType {
    /// The eight standard collections, ordered by collection name.
    pub const COLLECTIONS: [EntityType; 8] = [
        EntityType::Datastream,
        EntityType::FeatureOfInterest,
        EntityType::HistoricalLocation,
        EntityType::Location,
        EntityType::Observation,
        EntityType::ObservedProperty,
        EntityType::Sensor,
        EntityType::Thing,
    ];

    /// Collection name used in resource paths (e.g. `Things`).
    pub fn collection_name(self) -> &'static str {
        match self {
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

    /// Singular name used for to-one navigation properties (e.g. `Thing`).
    pub fn singular_name(self) -> &'static str {
        match self {
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

    /// Physical table name.
    pub fn table_name(self) -> &'static str {
        match self {
            EntityType::FeatureOfInterest => "FeaturesOfInterest",
            other => other.singular_name(),
        }
    }

    /// Look up an entity type by its collection name.
    ///
    /// This does not consult versioning settings; use
    /// [`Catalog::resolve_collection`](crate::Catalog::resolve_collection)
    /// to respect them.
    pub fn from_collection_name(name: &str) -> Option<Self> {
        match name {
            "Things" => Some(EntityType::Thing),
            "Locations" => Some(EntityType::Location),
            "HistoricalLocations" => Some(EntityType::HistoricalLocation),
            "Datastreams" => Some(EntityType::Datastream),
            "Sensors" => Some(EntityType::Sensor),
            "ObservedProperties" => Some(EntityType::ObservedProperty),
            "Observations" => Some(EntityType::Observation),
            "FeaturesOfInterest" => Some(EntityType::FeatureOfInterest),
            "Commits" => Some(EntityType::Commit),
            _ => None,
        }
    }

    /// Whether rows of this type carry a system-time validity range and a
    /// Commit reference.
    pub fn is_versioned(self) -> bool {
        !matches!(self, EntityType::Commit)
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.singular_name())
    }
}
