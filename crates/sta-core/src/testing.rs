//! Scripted in-memory [`Store`] for tests.
//!
//! Responses are registered against SQL fragments; the first rule whose
//! fragment occurs in the query text and whose kind fits the call wins.
//! Every call is recorded so tests can assert on the generated SQL.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::error::{Error, Result};
use crate::sql::SqlQuery;
use crate::store::{Row, RowStream, Session, Store};

/// A scripted answer.
#[derive(Debug, Clone)]
pub enum Answer {
    /// Rows for [`Store::fetch`].
    Rows(Vec<Row>),
    /// Value for [`Store::scalar`].
    Scalar(i64),
    /// Value for [`Store::estimate`].
    Estimate(i64),
    /// Fail any call with [`Error::StoreUnavailable`].
    Unavailable,
    /// Fail any call with [`Error::Execution`].
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Call {
    Fetch,
    Scalar,
    Estimate,
}

impl Answer {
    fn answers(&self, call: Call) -> bool {
        match self {
            Answer::Rows(_) => call == Call::Fetch,
            Answer::Scalar(_) => call == Call::Scalar,
            Answer::Estimate(_) => call == Call::Estimate,
            Answer::Unavailable | Answer::Failed(_) => true,
        }
    }

    fn error(&self) -> Option<Error> {
        match self {
            Answer::Unavailable => Some(Error::StoreUnavailable("scripted outage".into())),
            Answer::Failed(message) => Some(Error::Execution(message.clone())),
            _ => None,
        }
    }
}

#[derive(Debug)]
struct Rule {
    fragment: String,
    response: Answer,
    delay: Option<Duration>,
}

#[derive(Debug, Default)]
struct State {
    rules: Vec<Rule>,
    calls: Vec<(Call, SqlQuery)>,
    cancelled: usize,
    sessions: usize,
    healthy: bool,
}

/// A [`Store`] answering from registered rules.
#[derive(Debug, Clone)]
pub struct ScriptedStore {
    state: Arc<Mutex<State>>,
}

impl Default for ScriptedStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedStore {
    /// Create a store with no rules. Unmatched fetches yield no rows.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                healthy: true,
                ..State::default()
            })),
        }
    }

    /// Answer queries containing `fragment` with `response`.
    pub fn on(&self, fragment: impl Into<String>, response: Answer) -> &Self {
        self.push(fragment.into(), response, None)
    }

    /// Like [`ScriptedStore::on`], after waiting `delay`.
    pub fn on_delayed(
        &self,
        fragment: impl Into<String>,
        delay: Duration,
        response: Answer,
    ) -> &Self {
        self.push(fragment.into(), response, Some(delay))
    }

    /// Make [`Store::ping`] fail.
    pub fn set_healthy(&self, healthy: bool) {
        self.state.lock().healthy = healthy;
    }

    fn push(&self, fragment: String, response: Answer, delay: Option<Duration>) -> &Self {
        self.state.lock().rules.push(Rule {
            fragment,
            response,
            delay,
        });
        self
    }

    fn answer(&self, call: Call, query: &SqlQuery) -> Option<(Answer, Option<Duration>)> {
        let mut state = self.state.lock();
        state.calls.push((call, query.clone()));
        state
            .rules
            .iter()
            .find(|rule| query.sql.contains(&rule.fragment) && rule.response.answers(call))
            .map(|rule| (rule.response.clone(), rule.delay))
    }

    /// Queries passed to [`Store::fetch`], in call order.
    pub fn fetches(&self) -> Vec<SqlQuery> {
        self.calls_of(Call::Fetch)
    }

    /// Number of [`Store::scalar`] calls.
    pub fn scalars(&self) -> usize {
        self.calls_of(Call::Scalar).len()
    }

    /// Number of [`Store::estimate`] calls.
    pub fn estimates(&self) -> usize {
        self.calls_of(Call::Estimate).len()
    }

    /// Sessions opened so far.
    pub fn sessions(&self) -> usize {
        self.state.lock().sessions
    }

    /// Fetches whose consumer went away before every row was delivered.
    pub fn cancelled(&self) -> usize {
        self.state.lock().cancelled
    }

    fn calls_of(&self, call: Call) -> Vec<SqlQuery> {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|(c, _)| *c == call)
            .map(|(_, q)| q.clone())
            .collect()
    }
}

#[async_trait]
impl Store for ScriptedStore {
    async fn session(&self) -> Result<Box<dyn Session>> {
        self.state.lock().sessions += 1;
        Ok(Box::new(self.clone()))
    }

    async fn ping(&self) -> Result<()> {
        if self.state.lock().healthy {
            Ok(())
        } else {
            Err(Error::StoreUnavailable("scripted outage".into()))
        }
    }
}

#[async_trait]
impl Session for ScriptedStore {
    fn fetch(&self, query: SqlQuery) -> RowStream {
        let answer = self.answer(Call::Fetch, &query);
        let state = self.state.clone();
        let (tx, rx) = mpsc::channel(1);
        tokio::spawn(async move {
            let Some((response, delay)) = answer else {
                return;
            };
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            let items: Vec<Result<Row>> = match (response.error(), response) {
                (Some(err), _) => vec![Err(err)],
                (None, Answer::Rows(rows)) => rows.into_iter().map(Ok).collect(),
                (None, _) => Vec::new(),
            };
            for item in items {
                if tx.send(item).await.is_err() {
                    state.lock().cancelled += 1;
                    return;
                }
            }
        });
        ReceiverStream::new(rx).boxed()
    }

    async fn scalar(&self, query: SqlQuery) -> Result<i64> {
        self.scripted_value(Call::Scalar, query).await
    }

    async fn estimate(&self, query: SqlQuery) -> Result<i64> {
        self.scripted_value(Call::Estimate, query).await
    }
}

impl ScriptedStore {
    async fn scripted_value(&self, call: Call, query: SqlQuery) -> Result<i64> {
        let Some((response, delay)) = self.answer(call, &query) else {
            return Err(Error::Execution(format!("no scripted answer for {}", query.sql)));
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = response.error() {
            return Err(err);
        }
        match response {
            Answer::Scalar(value) | Answer::Estimate(value) => Ok(value),
            _ => Err(Error::Execution("scripted response has no value".into())),
        }
    }
}

/// A root row.
pub fn row(id: i64, body: Value) -> Row {
    Row {
        id,
        parent: None,
        total: None,
        body,
    }
}

/// An expansion row under `parent`, whose group holds `total` rows.
pub fn child_row(id: i64, parent: i64, total: i64, body: Value) -> Row {
    Row {
        id,
        parent: Some(parent),
        total: Some(total),
        body,
    }
}

/// An expansion row outside the requested page, carrying only the size of
/// its parent's group.
pub fn count_only_row(id: i64, parent: i64, total: i64) -> Row {
    Row {
        id,
        parent: Some(parent),
        total: Some(total),
        body: Value::Null,
    }
}
