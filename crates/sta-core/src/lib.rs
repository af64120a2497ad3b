//! STA Core - SensorThings read engine over PostgreSQL.
//!
//! Requests flow through four stages:
//!
//! 1. [`sta_lang`] resolves the resource path and parses the query options.
//! 2. The [`planner`] turns them into a flat arena of parameterized SQL
//!    queries, one per entity level, honoring version history when asked.
//! 3. The [`count`] strategist decides how `@iot.count` is obtained.
//! 4. The stream producer runs the queries chunk by chunk and writes the
//!    JSON body into a bounded channel as rows arrive.
//!
//! The [`Engine`] ties these together behind a [`Store`], implemented for
//! PostgreSQL by [`PgStore`]. Every request runs on its own [`Session`].

pub mod config;
pub mod count;
pub mod engine;
pub mod error;
pub mod filter;
pub mod planner;
pub mod postgres;
pub mod root;
pub mod sql;
pub mod store;
mod stream;
pub mod versioning;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use config::{CountMode, EngineConfig};
pub use count::{CountInstruction, CountStrategist};
pub use engine::{BodyStream, Engine, Response};
pub use error::{Error, Result};
pub use planner::{Projection, QueryPlan, QueryPlanner, RequestPlan};
pub use postgres::{PgSession, PgStore};
pub use root::{service_root, CONFORMANCE};
pub use sql::{SqlParam, SqlQuery};
pub use store::{Row, RowStream, Session, Store};
pub use versioning::{TemporalIntent, VersioningResolver};
