//! Request entry point.
//!
//! [`Engine::execute`] parses, plans and starts producing one read request.
//! It resolves once the first body chunk is ready (or the request failed
//! before producing anything); the rest of the body follows as a stream.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde_json::Value;
use sta_lang::{parse_query_options, PathResolver};
use sta_schema::Catalog;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::planner::{QueryPlanner, RequestPlan};
use crate::root::service_root;
use crate::store::Store;
use crate::stream::produce;

/// Body chunks of a response.
pub type BodyStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// A response whose body is still being produced.
pub struct Response {
    pub content_type: &'static str,
    pub body: BodyStream,
}

impl std::fmt::Debug for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Response")
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

impl Response {
    /// Collect the whole body.
    pub async fn collect(self) -> Result<Bytes> {
        let mut body = Vec::new();
        let mut chunks = self.body;
        while let Some(chunk) = chunks.next().await {
            body.extend_from_slice(&chunk?);
        }
        Ok(Bytes::from(body))
    }
}

/// Read-only SensorThings engine over a [`Store`].
#[derive(Clone)]
pub struct Engine {
    store: Arc<dyn Store>,
    catalog: Arc<Catalog>,
    config: Arc<EngineConfig>,
}

impl Engine {
    /// Create an engine over the default schema.
    pub fn new(store: Arc<dyn Store>, config: EngineConfig) -> Self {
        let catalog = Catalog::default().with_versioning(config.versioning);
        Self {
            store,
            catalog: Arc::new(catalog),
            config: Arc::new(config),
        }
    }

    /// Use another database schema.
    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.catalog = Arc::new(Catalog::new(schema).with_versioning(self.config.versioning));
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Parse and plan a request without executing it.
    pub fn plan(&self, path: &str, query: &str) -> Result<RequestPlan> {
        let resolved = PathResolver::new(&self.catalog).resolve(path)?;
        let options = parse_query_options(query, self.config.lenient_options)?;
        QueryPlanner::new(&self.catalog, &self.config).plan(&resolved, &options, path)
    }

    /// Execute a read request. `path` is relative to the service root and
    /// `query` is the raw query string.
    pub async fn execute(&self, path: &str, query: &str) -> Result<Response> {
        let started = Instant::now();
        let timeout = self.config.request_timeout;
        let deadline = tokio::time::Instant::now() + timeout;

        let plan = self.plan(path, query)?;
        let content_type = plan.content_type();
        debug!(
            path,
            plans = plan.plans.len(),
            intent = ?plan.intent,
            "executing request"
        );

        let (tx, mut rx) = mpsc::channel(self.config.stream_buffer.max(1));
        let producer = produce(self.store.clone(), self.config.clone(), plan, tx.clone());
        let request_path = path.to_string();
        tokio::spawn(async move {
            // dropping the producer drops its session, cursors and pending queries
            tokio::select! {
                produced = tokio::time::timeout_at(deadline, producer) => {
                    if produced.is_err() {
                        warn!(path = %request_path, ?timeout, "request timed out");
                        let _ = tx.send(Err(Error::ExecutionTimeout(timeout))).await;
                    }
                }
                _ = tx.closed() => {
                    debug!(path = %request_path, "client disconnected, request abandoned");
                }
            }
        });

        let first = match rx.recv().await {
            Some(Ok(chunk)) => chunk,
            Some(Err(err)) => {
                debug!(path, error = %err, "request failed before output");
                return Err(err);
            }
            None => return Err(Error::Execution("response ended before any output".into())),
        };
        debug!(path, elapsed = ?started.elapsed(), "first chunk ready");

        let body = futures::stream::once(async move { Ok(first) }).chain(ReceiverStream::new(rx));
        Ok(Response {
            content_type,
            body: Box::pin(body),
        })
    }

    /// The service root document.
    pub fn service_root(&self) -> Value {
        service_root(&self.config.base_url, &self.catalog)
    }

    /// Check the store is reachable.
    pub async fn health(&self) -> Result<()> {
        self.store.ping().await
    }
}
