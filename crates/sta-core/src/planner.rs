//! Request planning.
//!
//! A request becomes a flat arena of [`QueryPlan`]s. `plans[0]` answers the
//! resource path; every `$expand` term adds one plan that records the
//! index of its parent. The arena is filled breadth-first, so a parent
//! always precedes its children and the streamer can execute the plans in
//! index order.
//!
//! Expansion plans are parameterized by the ids of their parent rows
//! (`$1`) and page *within* each parent with `ROW_NUMBER()`, so a nested
//! `$top=3` yields up to three rows per parent rather than three in total.

use std::collections::VecDeque;

use sta_lang::{
    EntityId, ExpandNode, QueryOptions, ResolvedPath, ResponseShape, ResultFormat, SubResource,
};
use sta_schema::{Catalog, EntityType, JoinShape, PropertyDef, PropertyKind, Relation};
use tracing::debug;

use crate::config::EngineConfig;
use crate::count::{CountInstruction, CountStrategist};
use crate::error::{Error, Result};
use crate::filter::FilterCompiler;
use crate::sql::{column, string_literal, SqlBuilder, SqlParam, SqlQuery};
use crate::versioning::{TemporalIntent, VersioningResolver};

const ROOT: &str = "t0";

/// Annotations emitted alongside the selected properties.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Projection {
    /// Emit `@iot.id`.
    pub id: bool,
    /// Emit `@iot.selfLink`.
    pub self_link: bool,
    /// Relations that get a `Rel@iot.navigationLink`.
    pub nav_links: Vec<&'static str>,
}

/// The query for one entity type in the request.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    pub entity: EntityType,
    /// Index of the parent plan; `None` for the root.
    pub parent: Option<usize>,
    /// Relation followed from the parent plan's entity.
    pub relation: Option<Relation>,
    pub query: SqlQuery,
    pub top: u64,
    pub skip: u64,
    /// Emit a nested `Rel@iot.count`.
    pub with_count: bool,
    pub projection: Projection,
    /// Options of this level as given, used to build continuation links.
    pub raw_options: Vec<(String, String)>,
}

/// Everything needed to answer one request.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestPlan {
    /// Root plan first, parents before children.
    pub plans: Vec<QueryPlan>,
    pub shape: ResponseShape,
    pub sub_resource: Option<SubResource>,
    pub result_format: ResultFormat,
    /// Column names of a `dataArray` response.
    pub components: Vec<String>,
    /// Normalized resource path, e.g. `/Datastreams(3)/Observations`.
    pub path: String,
    pub intent: TemporalIntent,
    /// Root `@iot.count` instruction when `$count=true`.
    pub count: Option<CountInstruction>,
}

impl RequestPlan {
    /// The plan answering the resource path.
    pub fn root(&self) -> &QueryPlan {
        &self.plans[0]
    }

    /// Media type of the response.
    pub fn content_type(&self) -> &'static str {
        match self.shape {
            ResponseShape::PropertyValue => "text/plain; charset=utf-8",
            _ => "application/json",
        }
    }
}

/// Builds [`RequestPlan`]s.
pub struct QueryPlanner<'a> {
    catalog: &'a Catalog,
    config: &'a EngineConfig,
}

impl<'a> QueryPlanner<'a> {
    /// Create a planner.
    pub fn new(catalog: &'a Catalog, config: &'a EngineConfig) -> Self {
        Self { catalog, config }
    }

    /// Plan a resolved path with its parsed query options.
    pub fn plan(
        &self,
        path: &ResolvedPath,
        options: &QueryOptions,
        request_path: &str,
    ) -> Result<RequestPlan> {
        let intent = TemporalIntent::from_options(options, self.config.versioning)?;
        let versioning = VersioningResolver::new(self.catalog, intent);
        let entity = path.target().entity;

        if options.result_format == ResultFormat::DataArray {
            if entity != EntityType::Observation || path.shape != ResponseShape::Collection {
                return Err(Error::unsupported(
                    "$resultFormat",
                    "dataArray is only available for Observation collections",
                ));
            }
            if !options.expand.is_empty() {
                return Err(Error::unsupported(
                    "$resultFormat",
                    "dataArray cannot be combined with $expand",
                ));
            }
        }

        let (root, count) = self.root_plan(path, options, &versioning)?;
        debug!(
            entity = %entity,
            sql = %root.query.sql,
            params = root.query.params.len(),
            "planned root query"
        );

        let components = if options.result_format == ResultFormat::DataArray {
            let mut names = Vec::new();
            if root.projection.id {
                names.push("id".to_string());
            }
            names.extend(
                self.selected_properties(entity, options.select.as_deref())?
                    .0
                    .iter()
                    .map(|p| p.name.to_string()),
            );
            names
        } else {
            Vec::new()
        };

        let mut plans = vec![root];
        if matches!(path.shape, ResponseShape::Collection | ResponseShape::Entity) {
            self.plan_expansions(&options.expand, &versioning.for_related(), &mut plans)?;
        }

        Ok(RequestPlan {
            plans,
            shape: path.shape,
            sub_resource: path.sub_resource().cloned(),
            result_format: options.result_format,
            components,
            path: format!("/{}", request_path.trim_matches('/')),
            intent,
            count,
        })
    }

    fn root_plan(
        &self,
        path: &ResolvedPath,
        options: &QueryOptions,
        versioning: &VersioningResolver<'a>,
    ) -> Result<(QueryPlan, Option<CountInstruction>)> {
        let target = path.target();
        let entity = target.entity;
        let collection = path.shape.is_collection();
        let mut builder = SqlBuilder::new();
        let mut from = vec![format!("{} AS {}", versioning.source(entity), ROOT)];
        let mut conditions = Vec::new();

        if let Some(id) = &target.id {
            conditions.push(id_predicate(ROOT, id, &mut builder));
        }
        if let Some(restriction) = versioning.restrict(entity, ROOT, &mut builder) {
            conditions.push(restriction);
        }
        self.parent_chain(path, &versioning.for_related(), &mut builder, &mut from, &mut conditions)?;

        let mut order = Vec::new();
        {
            let mut compiler =
                FilterCompiler::new(self.catalog, versioning, &mut builder, entity, ROOT);
            if collection {
                if let Some(filter) = &options.filter {
                    conditions.push(compiler.compile(filter)?);
                }
                for term in &options.orderby {
                    order.extend(compiler.order_terms(term)?);
                }
            }
            from.extend(compiler.into_joins().into_iter().map(|join| join.sql));
        }
        if let Some(history) = versioning.history_order(entity, ROOT) {
            // a single entity read across history shows its latest version
            order.push(format!("{} {}", history, if collection { "ASC" } else { "DESC" }));
        }
        order.push(format!("{} ASC", column(ROOT, "id")));

        let from = from.join(" ");
        let filter = where_clause(&conditions);

        let count = if collection && options.count {
            let base = SqlQuery::new(
                format!("SELECT 1 FROM {}{}", from, filter),
                builder.params().to_vec(),
            );
            Some(CountStrategist::instruction(self.config, base))
        } else {
            None
        };

        let (properties, projection) = match path.sub_resource() {
            Some(SubResource::Property(name)) | Some(SubResource::PropertyValue(name)) => {
                let prop = self.catalog.property(entity, name).ok_or_else(|| {
                    Error::InvalidPath(format!("'{}' is not a property of {}", name, entity))
                })?;
                (vec![prop], Projection::none())
            }
            Some(SubResource::Ref) => (
                Vec::new(),
                Projection {
                    self_link: true,
                    ..Projection::none()
                },
            ),
            None => self.selected_properties(entity, options.select.as_deref())?,
        };

        let parent = if options.result_format == ResultFormat::DataArray {
            format!("{}::bigint", column(ROOT, "datastream_id"))
        } else {
            "NULL::bigint".to_string()
        };

        let (top, skip) = if collection {
            (self.config.effective_top(options.top), options.skip.unwrap_or(0))
        } else {
            (1, 0)
        };
        let limit = if collection {
            let limit = builder.bind(int_param(top.saturating_add(1)));
            let offset = builder.bind(int_param(skip));
            format!(" LIMIT {} OFFSET {}", limit, offset)
        } else {
            " LIMIT 1".to_string()
        };

        let sql = format!(
            "SELECT {}::bigint AS \"__id\", {} AS \"__parent\", NULL::bigint AS \"__total\", {} AS \"body\" FROM {}{} ORDER BY {}{}",
            column(ROOT, "id"),
            parent,
            body_sql(ROOT, &properties),
            from,
            filter,
            order.join(", "),
            limit
        );

        let plan = QueryPlan {
            entity,
            parent: None,
            relation: target.relation,
            query: builder.build(sql),
            top,
            skip,
            with_count: options.count,
            projection,
            raw_options: options.raw.clone(),
        };
        Ok((plan, count))
    }

    /// Join every earlier path segment to the addressed entity.
    fn parent_chain(
        &self,
        path: &ResolvedPath,
        related: &VersioningResolver<'a>,
        builder: &mut SqlBuilder,
        from: &mut Vec<String>,
        conditions: &mut Vec<String>,
    ) -> Result<()> {
        let segments = &path.segments;
        let mut child = ROOT.to_string();
        for (hop, i) in (1..segments.len()).rev().enumerate() {
            let parent = &segments[i - 1];
            let relation = segments[i].relation.ok_or_else(|| {
                Error::InvalidPath(format!("segment {} has no navigation property", i))
            })?;
            let alias = format!("p{}", hop + 1);
            let source = related.source(parent.entity);
            match relation.join {
                JoinShape::SourceKey { column: fk } => from.push(format!(
                    "JOIN {} AS {} ON {} = {}",
                    source,
                    alias,
                    column(&alias, fk),
                    column(&child, "id")
                )),
                JoinShape::TargetKey { column: fk } => from.push(format!(
                    "JOIN {} AS {} ON {} = {}",
                    source,
                    alias,
                    column(&child, fk),
                    column(&alias, "id")
                )),
                JoinShape::Link {
                    table,
                    source_column,
                    target_column,
                } => {
                    let link = format!("l{}", hop + 1);
                    from.push(format!(
                        "JOIN {} AS {} ON {} = {}",
                        self.catalog.table_ref(table),
                        link,
                        column(&link, target_column),
                        column(&child, "id")
                    ));
                    from.push(format!(
                        "JOIN {} AS {} ON {} = {}",
                        source,
                        alias,
                        column(&alias, "id"),
                        column(&link, source_column)
                    ));
                }
            }
            if let Some(id) = &parent.id {
                conditions.push(id_predicate(&alias, id, builder));
            }
            if let Some(restriction) = related.restrict(parent.entity, &alias, builder) {
                conditions.push(restriction);
            }
            child = alias;
        }
        Ok(())
    }

    /// Walk the expand tree breadth-first, appending one plan per node.
    fn plan_expansions(
        &self,
        expand: &[ExpandNode],
        related: &VersioningResolver<'a>,
        plans: &mut Vec<QueryPlan>,
    ) -> Result<()> {
        self.check_breadth(expand)?;
        let mut queue: VecDeque<(usize, usize, &ExpandNode)> =
            expand.iter().map(|node| (0, 1, node)).collect();

        while let Some((parent, depth, node)) = queue.pop_front() {
            if depth > self.config.max_expand_depth {
                return Err(Error::ExpandLimitExceeded(format!(
                    "$expand nests deeper than {} levels",
                    self.config.max_expand_depth
                )));
            }
            let parent_entity = plans[parent].entity;
            let relation = self
                .catalog
                .relation(parent_entity, &node.relation)
                .ok_or_else(|| {
                    Error::unsupported(
                        "$expand",
                        format!(
                            "'{}' is not a navigation property of {}",
                            node.relation, parent_entity
                        ),
                    )
                })?;
            let plan = self.expansion_plan(parent, relation, &node.options, related)?;
            debug!(
                relation = relation.name,
                depth,
                sql = %plan.query.sql,
                "planned expansion"
            );

            let index = plans.len();
            plans.push(plan);
            self.check_breadth(&node.options.expand)?;
            queue.extend(node.options.expand.iter().map(|child| (index, depth + 1, child)));
        }
        Ok(())
    }

    fn check_breadth(&self, expand: &[ExpandNode]) -> Result<()> {
        if expand.len() > self.config.max_expand_breadth {
            return Err(Error::ExpandLimitExceeded(format!(
                "$expand lists {} navigation properties on one level, at most {} allowed",
                expand.len(),
                self.config.max_expand_breadth
            )));
        }
        Ok(())
    }

    fn expansion_plan(
        &self,
        parent: usize,
        relation: Relation,
        options: &QueryOptions,
        related: &VersioningResolver<'a>,
    ) -> Result<QueryPlan> {
        let entity = relation.target;
        let mut builder = SqlBuilder::for_expansion();
        let mut from = vec![format!("{} AS {}", related.source(entity), ROOT)];
        let mut conditions = Vec::new();

        let parent_key = match relation.join {
            JoinShape::TargetKey { column: fk } => column(ROOT, fk),
            JoinShape::SourceKey { column: fk } => {
                from.push(format!(
                    "JOIN {} AS r0 ON {} = {}",
                    related.source(relation.source),
                    column("r0", fk),
                    column(ROOT, "id")
                ));
                if let Some(restriction) = related.restrict(relation.source, "r0", &mut builder) {
                    conditions.push(restriction);
                }
                column("r0", "id")
            }
            JoinShape::Link {
                table,
                source_column,
                target_column,
            } => {
                from.push(format!(
                    "JOIN {} AS l0 ON {} = {}",
                    self.catalog.table_ref(table),
                    column("l0", target_column),
                    column(ROOT, "id")
                ));
                column("l0", source_column)
            }
        };
        conditions.push(format!("{} = ANY($1)", parent_key));
        if let Some(restriction) = related.restrict(entity, ROOT, &mut builder) {
            conditions.push(restriction);
        }

        let mut order = Vec::new();
        {
            let mut compiler =
                FilterCompiler::new(self.catalog, related, &mut builder, entity, ROOT);
            if let Some(filter) = &options.filter {
                conditions.push(compiler.compile(filter)?);
            }
            for term in &options.orderby {
                order.extend(compiler.order_terms(term)?);
            }
            from.extend(compiler.into_joins().into_iter().map(|join| join.sql));
        }
        order.push(format!("{} ASC", column(ROOT, "id")));

        let (properties, projection) =
            self.selected_properties(entity, options.select.as_deref())?;
        let top = self.config.effective_top(options.top);
        let skip = options.skip.unwrap_or(0);

        let inner = format!(
            "SELECT {id}::bigint AS \"__id\", {key}::bigint AS \"__parent\", COUNT(*) OVER (PARTITION BY {key}) AS \"__total\", ROW_NUMBER() OVER (PARTITION BY {key} ORDER BY {order}) AS \"__rn\", {body} AS \"body\" FROM {from}{filter}",
            id = column(ROOT, "id"),
            key = parent_key,
            order = order.join(", "),
            body = body_sql(ROOT, &properties),
            from = from.join(" "),
            filter = where_clause(&conditions),
        );
        let (body, window) = if relation.is_to_one() {
            ("\"body\"".to_string(), String::new())
        } else {
            let after = builder.bind(int_param(skip));
            let until = builder.bind(int_param(skip.saturating_add(top).saturating_add(1)));
            let page = format!("\"__rn\" > {} AND \"__rn\" <= {}", after, until);
            if options.count && skip > 0 {
                // keep each group's first row so its total survives a skip past the end
                (
                    format!("CASE WHEN \"__rn\" > {} THEN \"body\" END AS \"body\"", after),
                    format!(" WHERE ({}) OR \"__rn\" = 1", page),
                )
            } else {
                ("\"body\"".to_string(), format!(" WHERE {}", page))
            }
        };
        let sql = format!(
            "SELECT \"__id\", \"__parent\", \"__total\", {} FROM ({}) AS \"__window\"{} ORDER BY \"__parent\", \"__rn\"",
            body, inner, window
        );

        Ok(QueryPlan {
            entity,
            parent: Some(parent),
            relation: Some(relation),
            query: builder.build(sql),
            top,
            skip,
            with_count: options.count,
            projection,
            raw_options: options.raw.clone(),
        })
    }

    /// Properties carried in the row body, and the annotations to emit,
    /// for a `$select` list (`None` selects everything).
    fn selected_properties(
        &self,
        entity: EntityType,
        select: Option<&[String]>,
    ) -> Result<(Vec<PropertyDef>, Projection)> {
        let relations = self.catalog.relations(entity);
        let Some(select) = select else {
            let properties = self
                .catalog
                .properties(entity)
                .into_iter()
                .filter(|p| !p.is_id())
                .collect();
            let projection = Projection {
                id: true,
                self_link: true,
                nav_links: relations.iter().map(|r| r.name).collect(),
            };
            return Ok((properties, projection));
        };

        let mut properties: Vec<PropertyDef> = Vec::new();
        let mut projection = Projection::none();
        for name in select {
            match name.as_str() {
                "id" => projection.id = true,
                "selfLink" | "@iot.selfLink" => projection.self_link = true,
                other => {
                    if let Some(relation) = relations.iter().find(|r| r.name == other) {
                        if !projection.nav_links.contains(&relation.name) {
                            projection.nav_links.push(relation.name);
                        }
                    } else if let Some(prop) = self.catalog.property(entity, other) {
                        if !properties.contains(&prop) {
                            properties.push(prop);
                        }
                    } else {
                        return Err(Error::unsupported(
                            "$select",
                            format!("'{}' is not a property of {}", other, entity),
                        ));
                    }
                }
            }
        }
        Ok((properties, projection))
    }
}

impl Projection {
    fn none() -> Self {
        Self {
            id: false,
            self_link: false,
            nav_links: Vec::new(),
        }
    }
}

fn int_param(value: u64) -> SqlParam {
    SqlParam::Int(i64::try_from(value).unwrap_or(i64::MAX))
}

fn where_clause(conditions: &[String]) -> String {
    if conditions.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", conditions.join(" AND "))
    }
}

fn id_predicate(alias: &str, id: &EntityId, builder: &mut SqlBuilder) -> String {
    match id {
        EntityId::Int(value) => {
            format!("{} = {}", column(alias, "id"), builder.bind(SqlParam::Int(*value)))
        }
        EntityId::Str(value) => format!(
            "{}::text = {}",
            column(alias, "id"),
            builder.bind(SqlParam::Text(value.clone()))
        ),
    }
}

fn timestamp_sql(expr: &str) -> String {
    format!(
        r#"to_char({} AT TIME ZONE 'UTC', 'YYYY-MM-DD"T"HH24:MI:SS.MS"Z"')"#,
        expr
    )
}

/// SQL producing the JSON value of a property.
fn value_sql(alias: &str, prop: &PropertyDef) -> String {
    let col = column(alias, prop.column);
    match prop.kind {
        PropertyKind::Id | PropertyKind::Text | PropertyKind::Json | PropertyKind::Result => col,
        PropertyKind::Timestamp => timestamp_sql(&col),
        PropertyKind::TimeRange => format!(
            "CASE WHEN {c} IS NULL THEN NULL WHEN lower({c}) = upper({c}) THEN {lo} ELSE {lo} || '/' || {hi} END",
            c = col,
            lo = timestamp_sql(&format!("lower({})", col)),
            hi = timestamp_sql(&format!("upper({})", col)),
        ),
        PropertyKind::Geometry => format!("ST_AsGeoJSON({})::json", col),
    }
}

/// `json_build_object(...)` over the given properties.
fn body_sql(alias: &str, properties: &[PropertyDef]) -> String {
    let pairs = properties
        .iter()
        .map(|p| format!("{}, {}", string_literal(p.name), value_sql(alias, p)))
        .collect::<Vec<_>>()
        .join(", ");
    format!("json_build_object({})", pairs)
}
