//! PostgreSQL [`Store`] backed by an sqlx pool.
//!
//! Each request gets a [`PgSession`]: a read-only transaction on one pooled
//! connection. Streaming reads are server-side cursors fetched in batches,
//! so expansion and count queries run on the same connection between
//! batches and a request never waits on the pool for a second connection.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use sqlx::postgres::{PgArguments, PgPool, PgRow};
use sqlx::query::Query;
use sqlx::{Postgres, Row as _, Transaction};
use tokio::sync::{mpsc, Mutex};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::sql::{SqlParam, SqlQuery};
use crate::store::{Row, RowStream, Session, Store};

/// Rows buffered between the cursor task and its consumer.
const CURSOR_BUFFER: usize = 64;

/// Rows pulled per `FETCH`.
const CURSOR_BATCH: usize = 64;

/// A [`Store`] over a PostgreSQL connection pool.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Wrap an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Store for PgStore {
    async fn session(&self) -> Result<Box<dyn Session>> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION READ ONLY")
            .execute(&mut *tx)
            .await?;
        Ok(Box::new(PgSession {
            tx: Arc::new(Mutex::new(tx)),
            cursors: Arc::new(AtomicUsize::new(0)),
        }))
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// One request's transaction. Dropping the last handle rolls it back,
/// which closes any cursor still open, and returns the connection.
#[derive(Clone)]
pub struct PgSession {
    tx: Arc<Mutex<Transaction<'static, Postgres>>>,
    cursors: Arc<AtomicUsize>,
}

fn bind_params<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    params: &[SqlParam],
) -> Query<'q, Postgres, PgArguments> {
    for param in params {
        query = match param {
            SqlParam::Int(v) => query.bind(*v),
            SqlParam::Float(v) => query.bind(*v),
            SqlParam::Text(v) => query.bind(v.clone()),
            SqlParam::Bool(v) => query.bind(*v),
            SqlParam::Timestamp(v) => query.bind(*v),
            SqlParam::Date(v) => query.bind(*v),
            SqlParam::IntArray(v) => query.bind(v.clone()),
            SqlParam::TextArray(v) => query.bind(v.clone()),
        };
    }
    query
}

fn decode_row(row: &PgRow) -> Result<Row> {
    let body: Option<Value> = row.try_get("body")?;
    Ok(Row {
        id: row.try_get("__id")?,
        parent: row.try_get("__parent")?,
        total: row.try_get("__total")?,
        body: body.unwrap_or(Value::Null),
    })
}

/// Declare `name` over `query` and forward its rows into `rows` until the
/// cursor is exhausted or the consumer goes away.
async fn pump_cursor(
    tx: &Mutex<Transaction<'static, Postgres>>,
    name: &str,
    query: &SqlQuery,
    rows: &mpsc::Sender<Result<Row>>,
) -> Result<()> {
    let declare = format!("DECLARE \"{}\" NO SCROLL CURSOR FOR {}", name, query.sql);
    bind_params(sqlx::query(&declare).persistent(false), &query.params)
        .execute(&mut **tx.lock().await)
        .await?;

    let fetch = format!("FETCH FORWARD {} FROM \"{}\"", CURSOR_BATCH, name);
    loop {
        let batch = sqlx::query(&fetch)
            .persistent(false)
            .fetch_all(&mut **tx.lock().await)
            .await?;
        trace!(cursor = name, rows = batch.len(), "fetched batch");
        let exhausted = batch.len() < CURSOR_BATCH;
        for row in &batch {
            if rows.send(Ok(decode_row(row)?)).await.is_err() {
                debug!(cursor = name, "row consumer dropped, closing cursor");
                let close = format!("CLOSE \"{}\"", name);
                sqlx::query(&close)
                    .persistent(false)
                    .execute(&mut **tx.lock().await)
                    .await?;
                return Ok(());
            }
        }
        if exhausted {
            return Ok(());
        }
    }
}

#[async_trait]
impl Session for PgSession {
    fn fetch(&self, query: SqlQuery) -> RowStream {
        let tx = self.tx.clone();
        let name = format!("__cursor_{}", self.cursors.fetch_add(1, Ordering::Relaxed));
        let (rows, rx) = mpsc::channel(CURSOR_BUFFER);
        tokio::spawn(async move {
            if let Err(err) = pump_cursor(&tx, &name, &query, &rows).await {
                // dropped silently when the consumer is already gone
                let _ = rows.send(Err(err)).await;
            }
        });
        ReceiverStream::new(rx).boxed()
    }

    async fn fetch_all(&self, query: SqlQuery) -> Result<Vec<Row>> {
        let rows = bind_params(sqlx::query(&query.sql), &query.params)
            .fetch_all(&mut **self.tx.lock().await)
            .await?;
        rows.iter().map(decode_row).collect()
    }

    async fn scalar(&self, query: SqlQuery) -> Result<i64> {
        let row = bind_params(sqlx::query(&query.sql), &query.params)
            .fetch_one(&mut **self.tx.lock().await)
            .await?;
        Ok(row.try_get::<i64, _>(0)?)
    }

    async fn estimate(&self, query: SqlQuery) -> Result<i64> {
        let sql = format!("EXPLAIN (FORMAT JSON) {}", query.sql);
        let row = bind_params(sqlx::query(&sql), &query.params)
            .fetch_one(&mut **self.tx.lock().await)
            .await?;
        let plan: Value = row.try_get(0)?;
        plan_rows(&plan).ok_or_else(|| {
            warn!("planner output has no row estimate");
            Error::Execution("planner output has no \"Plan Rows\"".into())
        })
    }
}

/// Extract `[0].Plan."Plan Rows"` from `EXPLAIN (FORMAT JSON)` output.
fn plan_rows(plan: &Value) -> Option<i64> {
    let rows = plan.get(0)?.get("Plan")?.get("Plan Rows")?;
    rows.as_i64()
        .or_else(|| rows.as_f64().map(|f| f.round() as i64))
}
