//! Service root document.

use serde_json::{json, Value};
use sta_schema::Catalog;

/// Conformance classes advertised under `serverSettings`.
pub const CONFORMANCE: &[&str] = &[
    "http://www.opengis.net/spec/iot_sensing/1.1/req/core",
    "http://www.opengis.net/spec/iot_sensing/1.1/req/resource-path/resource-path-to-entities",
    "http://www.opengis.net/spec/iot_sensing/1.1/req/request-data",
    "http://www.opengis.net/spec/iot_sensing/1.1/req/request-data/order",
    "http://www.opengis.net/spec/iot_sensing/1.1/req/request-data/expand",
    "http://www.opengis.net/spec/iot_sensing/1.1/req/request-data/select",
    "http://www.opengis.net/spec/iot_sensing/1.1/req/request-data/orderby",
    "http://www.opengis.net/spec/iot_sensing/1.1/req/request-data/top",
    "http://www.opengis.net/spec/iot_sensing/1.1/req/request-data/skip",
    "http://www.opengis.net/spec/iot_sensing/1.1/req/request-data/count",
    "http://www.opengis.net/spec/iot_sensing/1.1/req/request-data/filter",
    "http://www.opengis.net/spec/iot_sensing/1.1/req/request-data/built-in-filter-operations",
    "http://www.opengis.net/spec/iot_sensing/1.1/req/request-data/built-in-query-functions",
    "http://www.opengis.net/spec/iot_sensing/1.1/req/data-array/data-array",
    "http://www.opengis.net/spec/iot_sensing/1.1/req/thing",
    "http://www.opengis.net/spec/iot_sensing/1.1/req/location",
    "http://www.opengis.net/spec/iot_sensing/1.1/req/historical-location",
    "http://www.opengis.net/spec/iot_sensing/1.1/req/datastream",
    "http://www.opengis.net/spec/iot_sensing/1.1/req/sensor",
    "http://www.opengis.net/spec/iot_sensing/1.1/req/observed-property",
    "http://www.opengis.net/spec/iot_sensing/1.1/req/observation",
    "http://www.opengis.net/spec/iot_sensing/1.1/req/feature-of-interest",
    "http://www.opengis.net/spec/iot_sensing/1.1/req/entity-control-information",
    "http://www.opengis.net/spec/iot_sensing/1.1/req/navigation-properties",
    "http://www.opengis.net/spec/iot_sensing/1.1/req/resource-path/entity-property",
    "http://www.opengis.net/spec/iot_sensing/1.1/req/resource-path/value-of-property",
];

/// Build the service root listing every exposed collection.
pub fn service_root(base_url: &str, catalog: &Catalog) -> Value {
    let collections: Vec<Value> = catalog
        .entity_types()
        .into_iter()
        .filter(|entity| catalog.is_exposed(*entity))
        .map(|entity| {
            let name = entity.collection_name();
            json!({ "name": name, "url": format!("{}/{}", base_url, name) })
        })
        .collect();
    json!({
        "value": collections,
        "serverSettings": { "conformance": CONFORMANCE },
    })
}
