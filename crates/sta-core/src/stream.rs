//! Response production.
//!
//! A [`Producer`] runs one [`RequestPlan`] against the store and pushes the
//! serialized response into a channel, chunk by chunk. Root rows are pulled
//! from the cursor `partition_chunk` at a time; each chunk's expansions are
//! fetched with the chunk's ids and folded into the chunk before it is
//! written. Nothing is sent until the first chunk is known, so a missing
//! entity still surfaces as an error rather than a truncated body.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use futures::StreamExt;
use serde_json::{Map, Value};
use sta_lang::{ResponseShape, ResultFormat, SubResource};
use sta_schema::EntityType;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::config::EngineConfig;
use crate::count::CountStrategist;
use crate::error::{Error, Result};
use crate::planner::{QueryPlan, RequestPlan};
use crate::store::{Row, RowStream, Session, Store};

/// The consumer went away; production stops quietly.
struct Disconnected;

/// Outcome of one production step.
enum Step {
    Failed(Error),
    Disconnected,
}

impl From<Error> for Step {
    fn from(err: Error) -> Self {
        Step::Failed(err)
    }
}

impl From<Disconnected> for Step {
    fn from(_: Disconnected) -> Self {
        Step::Disconnected
    }
}

/// An entity object under construction.
#[derive(Debug, Clone)]
struct Node {
    id: i64,
    parent: Option<i64>,
    total: Option<i64>,
    /// False for rows that only carry their group's total.
    in_page: bool,
    object: Map<String, Value>,
}

/// Open a session for `plan` and produce its response into `tx`.
pub(crate) async fn produce(
    store: Arc<dyn Store>,
    config: Arc<EngineConfig>,
    plan: RequestPlan,
    tx: mpsc::Sender<Result<Bytes>>,
) {
    match store.session().await {
        Ok(session) => Producer::new(session, config, plan, tx).run().await,
        Err(err) => {
            warn!(path = %plan.path, error = %err, "could not open a store session");
            let _ = tx.send(Err(err)).await;
        }
    }
}

/// Runs one request plan, writing body chunks into `tx`.
pub(crate) struct Producer {
    session: Box<dyn Session>,
    config: Arc<EngineConfig>,
    plan: RequestPlan,
    tx: mpsc::Sender<Result<Bytes>>,
}

impl Producer {
    pub(crate) fn new(
        session: Box<dyn Session>,
        config: Arc<EngineConfig>,
        plan: RequestPlan,
        tx: mpsc::Sender<Result<Bytes>>,
    ) -> Self {
        Self {
            session,
            config,
            plan,
            tx,
        }
    }

    /// Produce the whole response. Failures are delivered through the
    /// channel; a closed channel ends production early.
    pub(crate) async fn run(self) {
        let outcome = match (self.plan.shape, self.plan.result_format) {
            (ResponseShape::Collection, ResultFormat::DataArray) => self.data_array().await,
            (ResponseShape::Collection | ResponseShape::RefCollection, _) => {
                self.collection().await
            }
            (ResponseShape::Entity | ResponseShape::Ref, _) => self.entity().await,
            (ResponseShape::Property | ResponseShape::PropertyValue, _) => self.property().await,
        };
        match outcome {
            Ok(()) => trace!(path = %self.plan.path, "response complete"),
            Err(Step::Disconnected) => {
                debug!(path = %self.plan.path, "client disconnected, stopping")
            }
            Err(Step::Failed(err)) => {
                // the receiver may already be gone, nothing left to do then
                let _ = self.tx.send(Err(err)).await;
            }
        }
    }

    async fn emit(&self, chunk: impl Into<Bytes>) -> std::result::Result<(), Disconnected> {
        self.tx
            .send(Ok(chunk.into()))
            .await
            .map_err(|_| Disconnected)
    }

    async fn root_count(&self) -> Result<Option<i64>> {
        match &self.plan.count {
            Some(instruction) => {
                Ok(Some(CountStrategist::resolve(self.session.as_ref(), instruction).await?))
            }
            None => Ok(None),
        }
    }

    fn collection_link(&self) -> String {
        format!("{}{}", self.config.base_url, self.plan.path)
    }

    async fn collection(&self) -> std::result::Result<(), Step> {
        let count = self.root_count().await?;
        let root = self.plan.root();
        let limit = usize::try_from(root.top).unwrap_or(usize::MAX);
        let chunk_size = self.config.partition_chunk.max(1);
        let mut rows = self.session.fetch(root.query.clone());

        let mut seen = 0usize;
        let mut written = 0usize;
        let mut has_more = false;
        let mut started = false;
        loop {
            let want = chunk_size.min(limit.saturating_add(1) - seen);
            if want == 0 {
                break;
            }
            let mut chunk = next_chunk(&mut rows, want).await?;
            let exhausted = chunk.len() < want;
            seen += chunk.len();
            if seen > limit {
                has_more = true;
                chunk.truncate(chunk.len() - (seen - limit));
            }

            if !started {
                if seen == 0 && self.config.empty_collection_not_found {
                    return Err(Error::EntityNotFound.into());
                }
                self.emit(collection_header(count)).await?;
                started = true;
            }

            if !chunk.is_empty() {
                let mut buf = Vec::new();
                for object in self.resolve_chunk(chunk).await? {
                    if written > 0 {
                        buf.push(b',');
                    }
                    buf.extend(to_json(&object)?);
                    written += 1;
                }
                self.emit(buf).await?;
            }
            if exhausted || has_more {
                break;
            }
        }
        // release the cursor before the footer goes out
        drop(rows);

        let mut footer = String::from("]");
        // a zero-sized page never advances, so it gets no continuation
        if has_more && root.top > 0 {
            let link = next_link(&self.collection_link(), &root.raw_options, root.top, root.skip);
            footer.push_str(",\"@iot.nextLink\":");
            footer.push_str(&Value::String(link).to_string());
        }
        footer.push('}');
        debug!(path = %self.plan.path, rows = written, has_more, "collection streamed");
        self.emit(footer).await?;
        Ok(())
    }

    async fn single_row(&self) -> Result<Row> {
        let mut rows = self.session.fetch(self.plan.root().query.clone());
        let row = next_chunk(&mut rows, 1).await?.pop();
        row.ok_or(Error::EntityNotFound)
    }

    async fn entity(&self) -> std::result::Result<(), Step> {
        let row = self.single_row().await?;
        let object = self
            .resolve_chunk(vec![row])
            .await?
            .pop()
            .ok_or(Error::EntityNotFound)?;
        self.emit(to_json(&object)?).await?;
        Ok(())
    }

    async fn property(&self) -> std::result::Result<(), Step> {
        let row = self.single_row().await?;
        let name = match &self.plan.sub_resource {
            Some(SubResource::Property(name)) | Some(SubResource::PropertyValue(name)) => name,
            _ => {
                return Err(Error::Execution("property request without a property".into()).into())
            }
        };
        if self.plan.shape == ResponseShape::Property {
            self.emit(to_json(&row.body)?).await?;
            return Ok(());
        }
        let text = match row.body.get(name.as_str()) {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => Value::Null.to_string(),
        };
        self.emit(text).await?;
        Ok(())
    }

    /// Observations grouped per Datastream as component arrays.
    async fn data_array(&self) -> std::result::Result<(), Step> {
        let count = self.root_count().await?;
        let root = self.plan.root();
        let limit = usize::try_from(root.top).unwrap_or(usize::MAX);
        let mut rows = self.session.fetch(root.query.clone());
        let mut page = next_chunk(&mut rows, limit.saturating_add(1)).await?;
        drop(rows);

        let has_more = page.len() > limit;
        if page.is_empty() && self.config.empty_collection_not_found {
            return Err(Error::EntityNotFound.into());
        }
        page.truncate(limit);

        let mut groups: Vec<(i64, Vec<Value>)> = Vec::new();
        let mut index: HashMap<i64, usize> = HashMap::new();
        for row in page {
            let datastream = row.parent.unwrap_or_default();
            let slot = *index.entry(datastream).or_insert_with(|| {
                groups.push((datastream, Vec::new()));
                groups.len() - 1
            });
            let values = self
                .plan
                .components
                .iter()
                .map(|name| match name.as_str() {
                    "id" => Value::from(row.id),
                    other => row.body.get(other).cloned().unwrap_or(Value::Null),
                })
                .collect();
            groups[slot].1.push(Value::Array(values));
        }

        let components: Vec<Value> = self
            .plan
            .components
            .iter()
            .map(|c| Value::String(c.clone()))
            .collect();
        let value: Vec<Value> = groups
            .into_iter()
            .map(|(datastream, values)| {
                let mut group = Map::new();
                group.insert(
                    "Datastream@iot.navigationLink".into(),
                    Value::String(self_link(
                        &self.config.base_url,
                        EntityType::Datastream,
                        datastream,
                    )),
                );
                group.insert("components".into(), Value::Array(components.clone()));
                group.insert("dataArray@iot.count".into(), Value::from(values.len()));
                group.insert("dataArray".into(), Value::Array(values));
                Value::Object(group)
            })
            .collect();

        let mut doc = Map::new();
        if let Some(count) = count {
            doc.insert("@iot.count".into(), Value::from(count));
        }
        doc.insert("value".into(), Value::Array(value));
        if has_more && root.top > 0 {
            doc.insert(
                "@iot.nextLink".into(),
                Value::String(next_link(
                    &self.collection_link(),
                    &root.raw_options,
                    root.top,
                    root.skip,
                )),
            );
        }
        self.emit(to_json(&doc)?).await?;
        Ok(())
    }

    /// Fetch the expansions of a chunk of root rows and assemble the
    /// finished entity objects, in root row order.
    async fn resolve_chunk(&self, roots: Vec<Row>) -> Result<Vec<Map<String, Value>>> {
        let plans = &self.plan.plans;
        let mut fetched: Vec<Vec<Row>> = Vec::with_capacity(plans.len());
        fetched.push(roots);
        for plan in &plans[1..] {
            let parent = plan.parent.unwrap_or(0);
            let mut ids: Vec<i64> = fetched[parent]
                .iter()
                .filter(|r| !r.body.is_null())
                .map(|r| r.id)
                .collect();
            ids.sort_unstable();
            ids.dedup();
            if ids.is_empty() {
                fetched.push(Vec::new());
                continue;
            }
            trace!(entity = %plan.entity, parents = ids.len(), "fetching expansion");
            fetched.push(self.session.fetch_all(plan.query.with_parent_ids(ids)).await?);
        }

        let mut nodes: Vec<Vec<Node>> = fetched
            .into_iter()
            .zip(plans)
            .map(|(rows, plan)| {
                rows.into_iter()
                    .map(|row| self.node(plan, row))
                    .collect()
            })
            .collect();

        // children first, so every group is complete when it is attached
        for i in (1..plans.len()).rev() {
            let plan = &plans[i];
            let parent_index = plan.parent.unwrap_or(0);
            let parent_entity = plans[parent_index].entity;
            let mut groups: HashMap<i64, Vec<Node>> = HashMap::new();
            for child in std::mem::take(&mut nodes[i]) {
                groups
                    .entry(child.parent.unwrap_or_default())
                    .or_default()
                    .push(child);
            }
            for parent in nodes[parent_index].iter_mut() {
                let members = groups.get(&parent.id).map(Vec::as_slice).unwrap_or(&[]);
                self.attach(parent, parent_entity, plan, members);
            }
        }

        Ok(nodes
            .into_iter()
            .next()
            .unwrap_or_default()
            .into_iter()
            .map(|node| node.object)
            .collect())
    }

    fn node(&self, plan: &QueryPlan, row: Row) -> Node {
        if row.body.is_null() {
            return Node {
                id: row.id,
                parent: row.parent,
                total: row.total,
                in_page: false,
                object: Map::new(),
            };
        }
        let link = self_link(&self.config.base_url, plan.entity, row.id);
        let mut object = Map::new();
        if plan.projection.id {
            object.insert("@iot.id".into(), Value::from(row.id));
        }
        if plan.projection.self_link {
            object.insert("@iot.selfLink".into(), Value::String(link.clone()));
        }
        if let Value::Object(body) = row.body {
            object.extend(body);
        }
        for relation in &plan.projection.nav_links {
            object.insert(
                format!("{}@iot.navigationLink", relation),
                Value::String(format!("{}/{}", link, relation)),
            );
        }
        Node {
            id: row.id,
            parent: row.parent,
            total: row.total,
            in_page: true,
            object,
        }
    }

    fn attach(&self, parent: &mut Node, parent_entity: EntityType, plan: &QueryPlan, members: &[Node]) {
        let Some(relation) = plan.relation else {
            return;
        };
        let name = relation.name;
        if relation.is_to_one() {
            if let Some(first) = members.iter().find(|m| m.in_page) {
                parent
                    .object
                    .insert(name.to_string(), Value::Object(first.object.clone()));
            }
            return;
        }

        let top = usize::try_from(plan.top).unwrap_or(usize::MAX);
        if plan.with_count {
            let total = members.first().and_then(|m| m.total).unwrap_or(0);
            parent
                .object
                .insert(format!("{}@iot.count", name), Value::from(total));
        }
        let page: Vec<&Node> = members.iter().filter(|m| m.in_page).collect();
        let values = page
            .iter()
            .take(top)
            .map(|m| Value::Object(m.object.clone()))
            .collect();
        parent.object.insert(name.to_string(), Value::Array(values));
        if top > 0 && page.len() > top {
            let target = format!(
                "{}/{}",
                self_link(&self.config.base_url, parent_entity, parent.id),
                name
            );
            parent.object.insert(
                format!("{}@iot.nextLink", name),
                Value::String(next_link(&target, &plan.raw_options, plan.top, plan.skip)),
            );
        }
    }
}

async fn next_chunk(rows: &mut RowStream, size: usize) -> Result<Vec<Row>> {
    let mut chunk = Vec::with_capacity(size.min(1024));
    while chunk.len() < size {
        match rows.next().await {
            Some(row) => chunk.push(row?),
            None => break,
        }
    }
    Ok(chunk)
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| Error::Execution(format!("serializing response: {}", e)))
}

fn collection_header(count: Option<i64>) -> String {
    match count {
        Some(count) => format!("{{\"@iot.count\":{},\"value\":[", count),
        None => "{\"value\":[".to_string(),
    }
}

/// Canonical link of one entity.
pub(crate) fn self_link(base_url: &str, entity: EntityType, id: i64) -> String {
    format!("{}/{}({})", base_url, entity.collection_name(), id)
}

/// Continuation link for the page after `skip..skip + top`.
pub(crate) fn next_link(target: &str, raw: &[(String, String)], top: u64, skip: u64) -> String {
    let mut pairs: Vec<String> = raw
        .iter()
        .filter(|(key, _)| key != "$top" && key != "$skip")
        .map(|(key, value)| format!("{}={}", key, urlencoding::encode(value)))
        .collect();
    pairs.push(format!("$top={}", top));
    pairs.push(format!("$skip={}", skip.saturating_add(top)));
    format!("{}?{}", target, pairs.join("&"))
}
