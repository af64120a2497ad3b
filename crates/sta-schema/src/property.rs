//! Addressable properties and their physical columns.

use crate::entity::EntityType;

/// Column name of the system-time validity range on versioned tables.
pub const SYSTEM_TIME_VALIDITY: &str = "systemTimeValidity";

/// Storage shape of a property, which drives both projection and filter
/// compilation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyKind {
    /// Integer primary key.
    Id,
    /// Text column.
    Text,
    /// JSON column; supports sub-path access in filters.
    Json,
    /// `timestamptz` column.
    Timestamp,
    /// `tstzrange` column with interval semantics.
    TimeRange,
    /// PostGIS geometry column, emitted as GeoJSON.
    Geometry,
    /// Observation result, stored both as JSON and as typed shadow columns.
    Result,
}

impl PropertyKind {
    /// Whether values of this kind can be ordered.
    pub fn is_orderable(self) -> bool {
        !matches!(self, PropertyKind::Geometry | PropertyKind::Json)
    }
}

/// Typed shadow columns backing the Observation `result` property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResultColumns {
    /// Column holding the result as JSON.
    pub json: &'static str,
    /// Numeric shadow column.
    pub number: &'static str,
    /// Text shadow column.
    pub string: &'static str,
    /// Boolean shadow column.
    pub boolean: &'static str,
}

/// The physical columns backing `Observation/result`.
pub const RESULT_COLUMNS: ResultColumns = ResultColumns {
    json: "result",
    number: "resultNumber",
    string: "resultString",
    boolean: "resultBoolean",
};

/// An addressable property of an entity type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertyDef {
    /// Name used in paths, `$select`, `$filter` and `$orderby`.
    pub name: &'static str,
    /// Physical column name.
    pub column: &'static str,
    /// Storage shape.
    pub kind: PropertyKind,
}

impl PropertyDef {
    /// Create a property whose column has the same name.
    pub const fn new(name: &'static str, kind: PropertyKind) -> Self {
        Self {
            name,
            column: name,
            kind,
        }
    }

    /// Create a property stored under a different column name.
    pub const fn with_column(name: &'static str, column: &'static str, kind: PropertyKind) -> Self {
        Self { name, column, kind }
    }

    /// Whether this is the identity property.
    pub fn is_id(&self) -> bool {
        self.kind == PropertyKind::Id
    }
}

const ID: PropertyDef = PropertyDef::new("id", PropertyKind::Id);
const NAME: PropertyDef = PropertyDef::new("name", PropertyKind::Text);
const DESCRIPTION: PropertyDef = PropertyDef::new("description", PropertyKind::Text);
const ENCODING_TYPE: PropertyDef = PropertyDef::new("encodingType", PropertyKind::Text);
const PROPERTIES: PropertyDef = PropertyDef::new("properties", PropertyKind::Json);

const THING: &[PropertyDef] = &[ID, NAME, DESCRIPTION, PROPERTIES];

const LOCATION: &[PropertyDef] = &[
    ID,
    NAME,
    DESCRIPTION,
    ENCODING_TYPE,
    PropertyDef::new("location", PropertyKind::Geometry),
    PROPERTIES,
];

const HISTORICAL_LOCATION: &[PropertyDef] = &[ID, PropertyDef::new("time", PropertyKind::Timestamp)];

const DATASTREAM: &[PropertyDef] = &[
    ID,
    NAME,
    DESCRIPTION,
    PropertyDef::new("unitOfMeasurement", PropertyKind::Json),
    PropertyDef::new("observationType", PropertyKind::Text),
    PropertyDef::new("observedArea", PropertyKind::Geometry),
    PropertyDef::new("phenomenonTime", PropertyKind::TimeRange),
    PropertyDef::new("resultTime", PropertyKind::TimeRange),
    PROPERTIES,
];

const SENSOR: &[PropertyDef] = &[
    ID,
    NAME,
    DESCRIPTION,
    ENCODING_TYPE,
    PropertyDef::new("metadata", PropertyKind::Json),
    PROPERTIES,
];

const OBSERVED_PROPERTY: &[PropertyDef] = &[
    ID,
    NAME,
    PropertyDef::new("definition", PropertyKind::Text),
    DESCRIPTION,
    PROPERTIES,
];

const OBSERVATION: &[PropertyDef] = &[
    ID,
    PropertyDef::new("phenomenonTime", PropertyKind::TimeRange),
    PropertyDef::new("resultTime", PropertyKind::Timestamp),
    PropertyDef::with_column("result", RESULT_COLUMNS.json, PropertyKind::Result),
    PropertyDef::new("resultQuality", PropertyKind::Json),
    PropertyDef::new("validTime", PropertyKind::TimeRange),
    PropertyDef::new("parameters", PropertyKind::Json),
];

const FEATURE_OF_INTEREST: &[PropertyDef] = &[
    ID,
    NAME,
    DESCRIPTION,
    ENCODING_TYPE,
    PropertyDef::new("feature", PropertyKind::Geometry),
    PROPERTIES,
];

const COMMIT: &[PropertyDef] = &[
    ID,
    PropertyDef::new("author", PropertyKind::Text),
    ENCODING_TYPE,
    PropertyDef::new("message", PropertyKind::Text),
    PropertyDef::new("date", PropertyKind::Timestamp),
    PropertyDef::new("actionType", PropertyKind::Text),
];

/// The system-time validity property exposed on versioned entities.
pub const SYSTEM_TIME_PROPERTY: PropertyDef =
    PropertyDef::new(SYSTEM_TIME_VALIDITY, PropertyKind::TimeRange);

/// Static properties of an entity type, excluding versioning columns.
pub fn static_properties(entity: EntityType) -> &'static [PropertyDef] {
    match entity {
        EntityType::Thing => THING,
        EntityType::Location => LOCATION,
        EntityType::HistoricalLocation => HISTORICAL_LOCATION,
        EntityType::Datastream => DATASTREAM,
        EntityType::Sensor => SENSOR,
        EntityType::ObservedProperty => OBSERVED_PROPERTY,
        EntityType::Observation => OBSERVATION,
        EntityType::FeatureOfInterest => FEATURE_OF_INTEREST,
        EntityType::Commit => COMMIT,
    }
}
