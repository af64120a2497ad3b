//! The relational store seam.
//!
//! The engine only issues read queries shaped by the planner. Every row it
//! reads has the same four columns: `__id`, `__parent`, `__total` and the
//! JSON `body` carrying the selected properties.

use async_trait::async_trait;
use futures::stream::{BoxStream, TryStreamExt};
use serde_json::Value;

use crate::error::Result;
use crate::sql::SqlQuery;

/// One result row.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    /// Entity id.
    pub id: i64,
    /// Parent entity id for expansion rows, or the grouping key for
    /// `dataArray` rows.
    pub parent: Option<i64>,
    /// Rows in this row's parent group, for nested `@iot.count`.
    pub total: Option<i64>,
    /// Selected properties as a JSON object. `Null` marks a row that only
    /// carries its group's `total` and lies outside the requested page.
    pub body: Value,
}

/// A lazily produced sequence of rows. Dropping it releases the cursor.
pub type RowStream = BoxStream<'static, Result<Row>>;

/// Read access to the SensorThings tables.
#[async_trait]
pub trait Store: Send + Sync {
    /// Open the session one request runs all of its queries on.
    async fn session(&self) -> Result<Box<dyn Session>>;

    /// Check the store is reachable.
    async fn ping(&self) -> Result<()>;
}

/// The queries of a single request.
///
/// A session holds at most one database connection, however many cursors
/// are open on it. Dropping the session ends the request's transaction.
#[async_trait]
pub trait Session: Send + Sync {
    /// Stream the rows of a query.
    fn fetch(&self, query: SqlQuery) -> RowStream;

    /// Collect every row of a query.
    async fn fetch_all(&self, query: SqlQuery) -> Result<Vec<Row>> {
        self.fetch(query).try_collect().await
    }

    /// Run a query returning a single integer.
    async fn scalar(&self, query: SqlQuery) -> Result<i64>;

    /// Planner row estimate for a query, without executing it.
    async fn estimate(&self, query: SqlQuery) -> Result<i64>;
}
