//! `$filter` and `$orderby` compilation.
//!
//! Lowers a parsed [`Expr`] into an SQL predicate over one entity alias.
//! Literals are always bound as parameters. Property paths that cross a
//! single-valued navigation (`Datastream/Thing/name`) add a `LEFT JOIN`,
//! collected as [`NavJoin`]s for the planner to splice into the `FROM`
//! clause.
//!
//! Typing happens during lowering. `result` and JSON sub-paths are
//! *flexible* operands: they take the type of whatever they are compared
//! against, which picks the matching typed shadow column or cast.

use chrono::Utc;
use sta_lang::{BinaryOp, Expr, ExprKind, Function, Literal, OrderBy, SortDirection, Span};
use sta_schema::{Catalog, EntityType, JoinShape, PropertyKind, Relation, RESULT_COLUMNS};

use crate::error::{Error, Result};
use crate::sql::{column, SqlBuilder, SqlParam};
use crate::versioning::VersioningResolver;

type Compile<T> = std::result::Result<T, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SqlType {
    Number,
    Text,
    Bool,
    Timestamp,
    Range,
    Date,
    Time,
    Geometry,
    Json,
    Null,
}

impl SqlType {
    fn name(self) -> &'static str {
        match self {
            SqlType::Number => "number",
            SqlType::Text => "string",
            SqlType::Bool => "boolean",
            SqlType::Timestamp => "datetime",
            SqlType::Range => "time interval",
            SqlType::Date => "date",
            SqlType::Time => "time",
            SqlType::Geometry => "geometry",
            SqlType::Json => "JSON object",
            SqlType::Null => "null",
        }
    }
}

#[derive(Debug, Clone)]
enum Operand {
    Typed { sql: String, ty: SqlType },
    /// Observation `result`; the comparison partner picks the shadow column.
    Result { alias: String },
    /// Text extracted from a JSON column.
    JsonText { sql: String },
}

impl Operand {
    fn typed(sql: impl Into<String>, ty: SqlType) -> Self {
        Operand::Typed {
            sql: sql.into(),
            ty,
        }
    }

    fn ty(&self) -> Option<SqlType> {
        match self {
            Operand::Typed { ty, .. } => Some(*ty),
            _ => None,
        }
    }

    fn is_null(&self) -> bool {
        self.ty() == Some(SqlType::Null)
    }

    /// Resolve to a concrete SQL expression of (ideally) type `want`.
    fn coerce(self, want: SqlType) -> (String, SqlType) {
        match self {
            Operand::Typed { sql, ty } => (sql, ty),
            Operand::Result { alias } => match want {
                SqlType::Number => (column(&alias, RESULT_COLUMNS.number), SqlType::Number),
                SqlType::Bool => (column(&alias, RESULT_COLUMNS.boolean), SqlType::Bool),
                SqlType::Timestamp => (
                    format!("({})::timestamptz", column(&alias, RESULT_COLUMNS.string)),
                    SqlType::Timestamp,
                ),
                SqlType::Date => (
                    format!("({})::date", column(&alias, RESULT_COLUMNS.string)),
                    SqlType::Date,
                ),
                _ => (column(&alias, RESULT_COLUMNS.string), SqlType::Text),
            },
            Operand::JsonText { sql } => match want {
                SqlType::Number => (format!("({})::double precision", sql), SqlType::Number),
                SqlType::Bool => (format!("({})::boolean", sql), SqlType::Bool),
                SqlType::Timestamp => (format!("({})::timestamptz", sql), SqlType::Timestamp),
                SqlType::Date => (format!("({})::date", sql), SqlType::Date),
                _ => (sql, SqlType::Text),
            },
        }
    }

    /// SQL used for `IS NULL` tests.
    fn null_test_sql(self) -> String {
        match self {
            Operand::Typed { sql, .. } | Operand::JsonText { sql } => sql,
            Operand::Result { alias } => column(&alias, RESULT_COLUMNS.json),
        }
    }
}

/// A single-valued navigation joined to evaluate a filter or sort key.
#[derive(Debug, Clone, PartialEq)]
pub struct NavJoin {
    /// Navigation names from the scoped entity up to and including this hop.
    pub path: Vec<String>,
    /// Alias of the joined relation.
    pub alias: String,
    /// Complete `LEFT JOIN ... ON ...` clause.
    pub sql: String,
}

/// Compiles filter and sort expressions scoped to one entity alias.
pub struct FilterCompiler<'a, 'b> {
    catalog: &'a Catalog,
    related: VersioningResolver<'a>,
    builder: &'b mut SqlBuilder,
    entity: EntityType,
    alias: String,
    joins: Vec<NavJoin>,
}

impl<'a, 'b> FilterCompiler<'a, 'b> {
    /// Create a compiler for `entity` rows bound to `alias`.
    ///
    /// Joined navigation targets are restricted with `versioning.for_related()`.
    pub fn new(
        catalog: &'a Catalog,
        versioning: &VersioningResolver<'a>,
        builder: &'b mut SqlBuilder,
        entity: EntityType,
        alias: &str,
    ) -> Self {
        Self {
            catalog,
            related: versioning.for_related(),
            builder,
            entity,
            alias: alias.to_string(),
            joins: Vec::new(),
        }
    }

    /// Compile a `$filter` expression into a boolean SQL predicate.
    pub fn compile(&mut self, expr: &Expr) -> Result<String> {
        self.predicate(expr).map_err(Error::InvalidFilterExpression)
    }

    /// Compile one `$orderby` term into SQL sort keys.
    pub fn order_terms(&mut self, order: &OrderBy) -> Result<Vec<String>> {
        let invalid = |message: String| Error::unsupported("$orderby", message);
        let (operand, hops) = self.property_operand(&order.path).map_err(invalid)?;
        if hops > 1 {
            return Err(invalid(format!(
                "'{}' crosses more than one navigation property",
                order.path.join("/")
            )));
        }
        let direction = match order.direction {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        };
        let keys = match operand {
            Operand::Typed { ty: SqlType::Geometry | SqlType::Json, .. } => {
                return Err(invalid(format!(
                    "'{}' is not an orderable property",
                    order.path.join("/")
                )))
            }
            Operand::Typed { sql, .. } | Operand::JsonText { sql } => vec![sql],
            Operand::Result { alias } => vec![
                column(&alias, RESULT_COLUMNS.number),
                column(&alias, RESULT_COLUMNS.string),
            ],
        };
        Ok(keys
            .into_iter()
            .map(|key| format!("{} {}", key, direction))
            .collect())
    }

    /// Joins required by everything compiled so far.
    pub fn into_joins(self) -> Vec<NavJoin> {
        self.joins
    }

    fn predicate(&mut self, expr: &Expr) -> Compile<String> {
        match &expr.kind {
            ExprKind::Binary { op, left, right } if matches!(op, BinaryOp::And | BinaryOp::Or) => {
                let keyword = if *op == BinaryOp::And { "AND" } else { "OR" };
                let left = self.predicate(left)?;
                let right = self.predicate(right)?;
                Ok(format!("({} {} {})", left, keyword, right))
            }
            ExprKind::Binary { op, left, right } if op.is_comparison() => {
                self.comparison(*op, left, right)
            }
            ExprKind::Not(inner) => Ok(format!("NOT ({})", self.predicate(inner)?)),
            ExprKind::In { expr: target, list } => self.membership(target, list),
            _ => {
                let operand = self.operand(expr)?;
                match operand.coerce(SqlType::Bool) {
                    (sql, SqlType::Bool) => Ok(sql),
                    (_, ty) => Err(format!(
                        "expression at position {} is a {}, not a condition",
                        expr.span.start,
                        ty.name()
                    )),
                }
            }
        }
    }

    fn operand(&mut self, expr: &Expr) -> Compile<Operand> {
        match &expr.kind {
            ExprKind::Literal(lit) => Ok(self.literal(lit)),
            ExprKind::Property(path) => self.property(path, expr.span),
            ExprKind::Binary { op, left, right } if op.is_arithmetic() => {
                let left = self.number(left)?;
                let right = self.number(right)?;
                let sql = match op {
                    BinaryOp::Add => format!("({} + {})", left, right),
                    BinaryOp::Sub => format!("({} - {})", left, right),
                    BinaryOp::Mul => format!("({} * {})", left, right),
                    BinaryOp::Div => format!("({} / {})", left, right),
                    _ => format!("mod(({})::numeric, ({})::numeric)", left, right),
                };
                Ok(Operand::typed(sql, SqlType::Number))
            }
            ExprKind::Call { function, args } => self.call(*function, args, expr.span),
            _ => Ok(Operand::typed(self.predicate(expr)?, SqlType::Bool)),
        }
    }

    fn literal(&mut self, lit: &Literal) -> Operand {
        match lit {
            Literal::Null => Operand::typed("NULL", SqlType::Null),
            Literal::Bool(b) => Operand::typed(self.builder.bind(SqlParam::Bool(*b)), SqlType::Bool),
            Literal::Int(i) => Operand::typed(self.builder.bind(SqlParam::Int(*i)), SqlType::Number),
            Literal::Float(f) => {
                Operand::typed(self.builder.bind(SqlParam::Float(*f)), SqlType::Number)
            }
            Literal::String(s) => {
                Operand::typed(self.builder.bind(SqlParam::Text(s.clone())), SqlType::Text)
            }
            Literal::DateTime(dt) => {
                let p = self.builder.bind(SqlParam::Timestamp(dt.with_timezone(&Utc)));
                Operand::typed(format!("{}::timestamptz", p), SqlType::Timestamp)
            }
            Literal::Date(d) => {
                let p = self.builder.bind(SqlParam::Date(*d));
                Operand::typed(format!("{}::date", p), SqlType::Date)
            }
            Literal::Interval(from, to) => {
                let from = self.builder.bind(SqlParam::Timestamp(from.with_timezone(&Utc)));
                let to = self.builder.bind(SqlParam::Timestamp(to.with_timezone(&Utc)));
                Operand::typed(
                    format!("tstzrange({}::timestamptz, {}::timestamptz)", from, to),
                    SqlType::Range,
                )
            }
            Literal::Geography(wkt) => {
                let p = self.builder.bind(SqlParam::Text(wkt.clone()));
                Operand::typed(format!("ST_GeomFromText({}, 4326)", p), SqlType::Geometry)
            }
        }
    }

    fn property(&mut self, path: &[String], span: Span) -> Compile<Operand> {
        self.property_operand(path)
            .map(|(operand, _)| operand)
            .map_err(|message| format!("{} at position {}", message, span.start))
    }

    /// Resolve a property path to an operand and the number of navigation
    /// hops it crossed.
    fn property_operand(&mut self, path: &[String]) -> Compile<(Operand, usize)> {
        let (entity, alias, rest, hops) = self.navigate(path)?;
        let name = &rest[0];
        let prop = self
            .catalog
            .property(entity, name)
            .ok_or_else(|| format!("unknown property '{}' on {}", name, entity))?;

        let sub_path = &rest[1..];
        if !sub_path.is_empty() {
            return match prop.kind {
                PropertyKind::Json | PropertyKind::Result => {
                    let p = self.builder.bind(SqlParam::TextArray(sub_path.to_vec()));
                    Ok((
                        Operand::JsonText {
                            sql: format!("({} #>> {})", column(&alias, prop.column), p),
                        },
                        hops,
                    ))
                }
                _ => Err(format!("property '{}' has no sub-properties", name)),
            };
        }

        let sql = column(&alias, prop.column);
        let operand = match prop.kind {
            PropertyKind::Id => Operand::typed(sql, SqlType::Number),
            PropertyKind::Text => Operand::typed(sql, SqlType::Text),
            PropertyKind::Json => Operand::typed(sql, SqlType::Json),
            PropertyKind::Timestamp => Operand::typed(sql, SqlType::Timestamp),
            PropertyKind::TimeRange => Operand::typed(sql, SqlType::Range),
            PropertyKind::Geometry => Operand::typed(sql, SqlType::Geometry),
            PropertyKind::Result => Operand::Result { alias },
        };
        Ok((operand, hops))
    }

    /// Follow leading navigation segments, joining each one.
    fn navigate<'p>(
        &mut self,
        path: &'p [String],
    ) -> Compile<(EntityType, String, &'p [String], usize)> {
        let mut entity = self.entity;
        let mut alias = self.alias.clone();
        let mut idx = 0;
        while idx < path.len() {
            let Some(relation) = self.catalog.relation(entity, &path[idx]) else {
                break;
            };
            if !relation.is_to_one() {
                return Err(format!(
                    "'{}' yields many {}; only single-valued navigation can be used here",
                    relation.name,
                    relation.target.collection_name()
                ));
            }
            alias = self.join(&path[..=idx], &alias, relation)?;
            entity = relation.target;
            idx += 1;
        }
        if idx == path.len() {
            return Err(format!("'{}' must end in a property", path.join("/")));
        }
        Ok((entity, alias, &path[idx..], idx))
    }

    fn join(&mut self, prefix: &[String], from: &str, relation: Relation) -> Compile<String> {
        if let Some(existing) = self.joins.iter().find(|j| j.path == prefix) {
            return Ok(existing.alias.clone());
        }
        let JoinShape::SourceKey { column: fk } = relation.join else {
            return Err(format!("'{}' cannot be joined here", relation.name));
        };
        let alias = format!("{}_j{}", self.alias, self.joins.len() + 1);
        let mut on = format!("{} = {}", column(&alias, "id"), column(from, fk));
        if let Some(restriction) = self.related.restrict(relation.target, &alias, self.builder) {
            on.push_str(" AND ");
            on.push_str(&restriction);
        }
        let sql = format!(
            "LEFT JOIN {} AS {} ON {}",
            self.related.source(relation.target),
            alias,
            on
        );
        self.joins.push(NavJoin {
            path: prefix.to_vec(),
            alias: alias.clone(),
            sql,
        });
        Ok(alias)
    }

    fn comparison(&mut self, op: BinaryOp, left: &Expr, right: &Expr) -> Compile<String> {
        let l = self.operand(left)?;
        let r = self.operand(right)?;

        if l.is_null() || r.is_null() {
            let other = if l.is_null() { r } else { l };
            return match op {
                BinaryOp::Eq => Ok(format!("{} IS NULL", other.null_test_sql())),
                BinaryOp::Ne => Ok(format!("{} IS NOT NULL", other.null_test_sql())),
                _ => Err(format!(
                    "null can only be compared with eq or ne (position {})",
                    left.span.merge(right.span).start
                )),
            };
        }

        let ((ls, lt), (rs, rt)) = match (l.ty(), r.ty()) {
            (Some(_), Some(_)) => (l.coerce(SqlType::Text), r.coerce(SqlType::Text)),
            (Some(lt), None) => (l.coerce(lt), r.coerce(lt)),
            (None, Some(rt)) => (l.coerce(rt), r.coerce(rt)),
            (None, None) => (l.coerce(SqlType::Text), r.coerce(SqlType::Text)),
        };
        typed_comparison(op, (&ls, lt), (&rs, rt))
    }

    fn membership(&mut self, target: &Expr, list: &[Expr]) -> Compile<String> {
        let target = self.operand(target)?;
        let items = list
            .iter()
            .map(|item| self.operand(item))
            .collect::<Compile<Vec<_>>>()?;
        let ty = target
            .ty()
            .or_else(|| items.iter().find_map(Operand::ty))
            .unwrap_or(SqlType::Text);
        if matches!(
            ty,
            SqlType::Range | SqlType::Geometry | SqlType::Json | SqlType::Null
        ) {
            return Err(format!("'in' does not support {} values", ty.name()));
        }

        let (lhs, _) = target.coerce(ty);
        let mut values = Vec::with_capacity(items.len());
        for item in items {
            let (sql, item_ty) = item.coerce(ty);
            if item_ty != ty {
                return Err(format!(
                    "'in' list mixes {} and {} values",
                    ty.name(),
                    item_ty.name()
                ));
            }
            values.push(sql);
        }
        Ok(format!("{} IN ({})", lhs, values.join(", ")))
    }

    fn call(&mut self, function: Function, args: &[Expr], span: Span) -> Compile<Operand> {
        use Function::*;
        let (min, max) = function.arity();
        if args.len() < min || args.len() > max {
            return Err(format!(
                "wrong number of arguments for function at position {}",
                span.start
            ));
        }

        let operand = match function {
            Substringof => {
                let needle = self.text(&args[0])?;
                let haystack = self.text(&args[1])?;
                Operand::typed(format!("strpos({}, {}) > 0", haystack, needle), SqlType::Bool)
            }
            Startswith | Endswith => {
                let value = self.text(&args[0])?;
                let affix = self.text(&args[1])?;
                let side = if function == Startswith { "left" } else { "right" };
                Operand::typed(
                    format!("{}({}, length({})) = {}", side, value, affix, affix),
                    SqlType::Bool,
                )
            }
            Indexof => {
                let value = self.text(&args[0])?;
                let needle = self.text(&args[1])?;
                Operand::typed(format!("(strpos({}, {}) - 1)", value, needle), SqlType::Number)
            }
            Length => Operand::typed(format!("length({})", self.text(&args[0])?), SqlType::Number),
            Tolower => Operand::typed(format!("lower({})", self.text(&args[0])?), SqlType::Text),
            Toupper => Operand::typed(format!("upper({})", self.text(&args[0])?), SqlType::Text),
            Trim => Operand::typed(format!("btrim({})", self.text(&args[0])?), SqlType::Text),
            Concat => {
                let left = self.text(&args[0])?;
                let right = self.text(&args[1])?;
                Operand::typed(format!("({} || {})", left, right), SqlType::Text)
            }
            Substring => {
                let value = self.text(&args[0])?;
                let start = self.number(&args[1])?;
                let sql = match args.get(2) {
                    Some(len) => {
                        let len = self.number(len)?;
                        format!("substr({}, ({})::int + 1, ({})::int)", value, start, len)
                    }
                    None => format!("substr({}, ({})::int + 1)", value, start),
                };
                Operand::typed(sql, SqlType::Text)
            }
            Year | Month | Day | Hour | Minute => {
                let field = match function {
                    Year => "YEAR",
                    Month => "MONTH",
                    Day => "DAY",
                    Hour => "HOUR",
                    _ => "MINUTE",
                };
                let instant = self.utc_instant(&args[0])?;
                Operand::typed(format!("EXTRACT({} FROM {})", field, instant), SqlType::Number)
            }
            Second => {
                let instant = self.utc_instant(&args[0])?;
                Operand::typed(
                    format!("floor(EXTRACT(SECOND FROM {}))", instant),
                    SqlType::Number,
                )
            }
            Fractionalseconds => {
                let instant = self.utc_instant(&args[0])?;
                Operand::typed(
                    format!(
                        "(EXTRACT(SECOND FROM {i}) - floor(EXTRACT(SECOND FROM {i})))",
                        i = instant
                    ),
                    SqlType::Number,
                )
            }
            Date => {
                let instant = self.utc_instant(&args[0])?;
                Operand::typed(format!("({})::date", instant), SqlType::Date)
            }
            Time => {
                let instant = self.utc_instant(&args[0])?;
                Operand::typed(format!("({})::time", instant), SqlType::Time)
            }
            Now => Operand::typed("now()", SqlType::Timestamp),
            Mindatetime => Operand::typed("'-infinity'::timestamptz", SqlType::Timestamp),
            Maxdatetime => Operand::typed("'infinity'::timestamptz", SqlType::Timestamp),
            Round | Floor | Ceiling => {
                let name = match function {
                    Round => "round",
                    Floor => "floor",
                    _ => "ceil",
                };
                Operand::typed(
                    format!("{}({})", name, self.number(&args[0])?),
                    SqlType::Number,
                )
            }
            GeoDistance => {
                let a = self.geometry(&args[0])?;
                let b = self.geometry(&args[1])?;
                Operand::typed(format!("ST_Distance({}, {})", a, b), SqlType::Number)
            }
            GeoLength => Operand::typed(
                format!("ST_Length({})", self.geometry(&args[0])?),
                SqlType::Number,
            ),
            GeoIntersects | StEquals | StDisjoint | StTouches | StWithin | StOverlaps
            | StCrosses | StIntersects | StContains => {
                let name = match function {
                    StEquals => "ST_Equals",
                    StDisjoint => "ST_Disjoint",
                    StTouches => "ST_Touches",
                    StWithin => "ST_Within",
                    StOverlaps => "ST_Overlaps",
                    StCrosses => "ST_Crosses",
                    StContains => "ST_Contains",
                    _ => "ST_Intersects",
                };
                let a = self.geometry(&args[0])?;
                let b = self.geometry(&args[1])?;
                Operand::typed(format!("{}({}, {})", name, a, b), SqlType::Bool)
            }
        };
        Ok(operand)
    }

    fn expect(&mut self, expr: &Expr, want: SqlType) -> Compile<String> {
        let (sql, ty) = self.operand(expr)?.coerce(want);
        if ty != want {
            return Err(format!(
                "expected a {} at position {}, found a {}",
                want.name(),
                expr.span.start,
                ty.name()
            ));
        }
        Ok(sql)
    }

    fn text(&mut self, expr: &Expr) -> Compile<String> {
        self.expect(expr, SqlType::Text)
    }

    fn number(&mut self, expr: &Expr) -> Compile<String> {
        self.expect(expr, SqlType::Number)
    }

    fn geometry(&mut self, expr: &Expr) -> Compile<String> {
        self.expect(expr, SqlType::Geometry)
    }

    /// A date/time argument as a UTC wall-clock timestamp.
    fn utc_instant(&mut self, expr: &Expr) -> Compile<String> {
        match self.operand(expr)?.coerce(SqlType::Timestamp) {
            (sql, SqlType::Timestamp) => Ok(format!("({} AT TIME ZONE 'UTC')", sql)),
            (sql, SqlType::Range) => Ok(format!("(lower({}) AT TIME ZONE 'UTC')", sql)),
            (sql, SqlType::Date) => Ok(format!("({})::timestamp", sql)),
            (_, ty) => Err(format!(
                "expected a date/time at position {}, found a {}",
                expr.span.start,
                ty.name()
            )),
        }
    }
}

fn scalar_op(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Eq => "=",
        BinaryOp::Ne => "<>",
        BinaryOp::Gt => ">",
        BinaryOp::Ge => ">=",
        BinaryOp::Lt => "<",
        _ => "<=",
    }
}

fn range_op(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Eq => "=",
        BinaryOp::Ne => "<>",
        BinaryOp::Gt => ">>",
        BinaryOp::Ge => "&>",
        BinaryOp::Lt => "<<",
        _ => "&<",
    }
}

/// Mirror an operator so its operands can be swapped.
fn flip(op: BinaryOp) -> BinaryOp {
    match op {
        BinaryOp::Gt => BinaryOp::Lt,
        BinaryOp::Ge => BinaryOp::Le,
        BinaryOp::Lt => BinaryOp::Gt,
        BinaryOp::Le => BinaryOp::Ge,
        other => other,
    }
}

/// Interval semantics for `range op instant`.
fn range_instant(op: BinaryOp, range: &str, instant: &str) -> String {
    match op {
        BinaryOp::Eq => format!("{} @> {}", range, instant),
        BinaryOp::Ne => format!("NOT ({} @> {})", range, instant),
        _ => format!(
            "{} {} tstzrange({i}, {i}, '[]')",
            range,
            range_op(op),
            i = instant
        ),
    }
}

fn date_start(date: &str) -> String {
    format!("({}::timestamp AT TIME ZONE 'UTC')", date)
}

fn typed_comparison(op: BinaryOp, left: (&str, SqlType), right: (&str, SqlType)) -> Compile<String> {
    use SqlType::*;
    let ((l, lt), (r, rt)) = (left, right);
    match (lt, rt) {
        (Range, Range) => Ok(format!("{} {} {}", l, range_op(op), r)),
        (Range, Timestamp) => Ok(range_instant(op, l, r)),
        (Timestamp, Range) => Ok(range_instant(flip(op), r, l)),
        (Range, Date) => Ok(range_instant(op, l, &date_start(r))),
        (Date, Range) => Ok(range_instant(flip(op), r, &date_start(l))),
        (Timestamp, Date) => Ok(format!(
            "({} AT TIME ZONE 'UTC')::date {} {}",
            l,
            scalar_op(op),
            r
        )),
        (Date, Timestamp) => Ok(format!(
            "{} {} ({} AT TIME ZONE 'UTC')::date",
            l,
            scalar_op(op),
            r
        )),
        (Geometry, _) | (_, Geometry) => {
            Err("geometries are compared with spatial functions such as st_equals".to_string())
        }
        (Json, _) | (_, Json) => Err(
            "JSON properties are compared through a sub-property path, e.g. properties/name"
                .to_string(),
        ),
        (a, b) if a == b => Ok(format!("{} {} {}", l, scalar_op(op), r)),
        (a, b) => Err(format!("cannot compare a {} with a {}", a.name(), b.name())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::versioning::TemporalIntent;
    use sta_lang::parse_filter;

    fn compile_with(
        catalog: &Catalog,
        intent: TemporalIntent,
        entity: EntityType,
        filter: &str,
    ) -> Result<(String, Vec<SqlParam>, Vec<NavJoin>)> {
        let expr = parse_filter(filter).unwrap();
        let versioning = VersioningResolver::new(catalog, intent);
        let mut builder = SqlBuilder::new();
        let mut compiler = FilterCompiler::new(catalog, &versioning, &mut builder, entity, "t0");
        let sql = compiler.compile(&expr)?;
        let joins = compiler.into_joins();
        Ok((sql, builder.params().to_vec(), joins))
    }

    fn compile(entity: EntityType, filter: &str) -> Result<(String, Vec<SqlParam>, Vec<NavJoin>)> {
        compile_with(&Catalog::default(), TemporalIntent::Current, entity, filter)
    }

    #[test]
    fn test_result_number_comparison() {
        let (sql, params, joins) = compile(EntityType::Observation, "result gt 10").unwrap();
        assert_eq!(sql, "t0.\"resultNumber\" > $1");
        assert_eq!(params, vec![SqlParam::Int(10)]);
        assert!(joins.is_empty());
    }

    #[test]
    fn test_result_string_and_bool() {
        let (sql, _, _) = compile(EntityType::Observation, "result eq 'high'").unwrap();
        assert_eq!(sql, "t0.\"resultString\" = $1");
        let (sql, _, _) = compile(EntityType::Observation, "result eq true").unwrap();
        assert_eq!(sql, "t0.\"resultBoolean\" = $1");
    }

    #[test]
    fn test_timestamp_comparison() {
        let (sql, params, _) =
            compile(EntityType::Observation, "resultTime gt 2024-01-01T00:00:00Z").unwrap();
        assert_eq!(sql, "t0.\"resultTime\" > $1::timestamptz");
        assert!(matches!(params[0], SqlParam::Timestamp(_)));
    }

    #[test]
    fn test_range_against_instant() {
        let (sql, _, _) =
            compile(EntityType::Observation, "phenomenonTime eq 2024-01-01T00:00:00Z").unwrap();
        assert_eq!(sql, "t0.\"phenomenonTime\" @> $1::timestamptz");

        let (sql, _, _) =
            compile(EntityType::Observation, "phenomenonTime lt 2024-01-01T00:00:00Z").unwrap();
        assert_eq!(
            sql,
            "t0.\"phenomenonTime\" << tstzrange($1::timestamptz, $1::timestamptz, '[]')"
        );

        // literal on the left mirrors the operator
        let (sql, _, _) =
            compile(EntityType::Observation, "2024-01-01T00:00:00Z lt phenomenonTime").unwrap();
        assert!(sql.starts_with("t0.\"phenomenonTime\" >> "));
    }

    #[test]
    fn test_null_comparison() {
        let (sql, params, _) = compile(EntityType::Thing, "description eq null").unwrap();
        assert_eq!(sql, "t0.\"description\" IS NULL");
        assert!(params.is_empty());
        let (sql, _, _) = compile(EntityType::Observation, "result ne null").unwrap();
        assert_eq!(sql, "t0.\"result\" IS NOT NULL");
        assert!(compile(EntityType::Thing, "name gt null").is_err());
    }

    #[test]
    fn test_logical_and_functions() {
        let (sql, params, _) = compile(
            EntityType::Thing,
            "startswith(name, 'Temp') and not (id in (1, 2))",
        )
        .unwrap();
        assert_eq!(
            sql,
            "(left(t0.\"name\", length($1)) = $1 AND NOT (t0.\"id\" IN ($2, $3)))"
        );
        assert_eq!(params.len(), 3);
        assert_eq!(params[0], SqlParam::Text("Temp".into()));
    }

    #[test]
    fn test_arithmetic() {
        let (sql, _, _) = compile(EntityType::Observation, "result mul 2 add 1 ge 9").unwrap();
        assert_eq!(sql, "((t0.\"resultNumber\" * $1) + $2) >= $3");
    }

    #[test]
    fn test_navigation_join() {
        let (sql, params, joins) =
            compile(EntityType::Observation, "Datastream/Thing/name eq 'boiler'").unwrap();
        assert_eq!(sql, "t0_j2.\"name\" = $1");
        assert_eq!(params, vec![SqlParam::Text("boiler".into())]);
        assert_eq!(joins.len(), 2);
        assert_eq!(
            joins[0].sql,
            "LEFT JOIN \"sensorthings\".\"Datastream\" AS t0_j1 ON t0_j1.\"id\" = t0.\"datastream_id\""
        );
        assert_eq!(
            joins[1].sql,
            "LEFT JOIN \"sensorthings\".\"Thing\" AS t0_j2 ON t0_j2.\"id\" = t0_j1.\"thing_id\""
        );
    }

    #[test]
    fn test_repeated_navigation_reuses_join() {
        let (_, _, joins) = compile(
            EntityType::Observation,
            "Datastream/name eq 'a' or Datastream/description eq 'b'",
        )
        .unwrap();
        assert_eq!(joins.len(), 1);
    }

    #[test]
    fn test_join_restricted_when_versioned() {
        let catalog = Catalog::default().with_versioning(true);
        let (_, _, joins) = compile_with(
            &catalog,
            TemporalIntent::Current,
            EntityType::Observation,
            "Datastream/name eq 'a'",
        )
        .unwrap();
        assert!(joins[0].sql.ends_with("AND t0_j1.\"systemTimeValidity\" @> now()"));
    }

    #[test]
    fn test_json_sub_property() {
        let (sql, params, _) = compile(EntityType::Thing, "properties/owner eq 'ops'").unwrap();
        assert_eq!(sql, "(t0.\"properties\" #>> $1) = $2");
        assert_eq!(params[0], SqlParam::TextArray(vec!["owner".into()]));

        let (sql, _, _) = compile(EntityType::Thing, "properties/floor gt 2").unwrap();
        assert_eq!(sql, "((t0.\"properties\" #>> $1))::double precision > $2");
    }

    #[test]
    fn test_spatial_functions() {
        let (sql, _, _) = compile(
            EntityType::Location,
            "st_within(location, geography'POLYGON((0 0, 0 1, 1 1, 0 0))')",
        )
        .unwrap();
        assert_eq!(
            sql,
            "ST_Within(t0.\"location\", ST_GeomFromText($1, 4326))"
        );

        let (sql, _, _) = compile(
            EntityType::Location,
            "geo.distance(location, geography'POINT(1 2)') lt 5",
        )
        .unwrap();
        assert_eq!(
            sql,
            "ST_Distance(t0.\"location\", ST_GeomFromText($1, 4326)) < $2"
        );
    }

    #[test]
    fn test_date_functions() {
        let (sql, _, _) = compile(EntityType::Observation, "year(resultTime) eq 2024").unwrap();
        assert_eq!(
            sql,
            "EXTRACT(YEAR FROM (t0.\"resultTime\" AT TIME ZONE 'UTC')) = $1"
        );
        let (sql, _, _) = compile(EntityType::Observation, "hour(phenomenonTime) eq 3").unwrap();
        assert!(sql.contains("lower(t0.\"phenomenonTime\")"));
    }

    #[test]
    fn test_compile_errors() {
        for filter in [
            "nope eq 1",
            "name eq 1",
            "Datastreams/name eq 'x'",
            "location eq 'x'",
            "properties eq 'x'",
            "name add 1 eq 2",
            "Datastream eq 1",
        ] {
            let entity = if filter.starts_with("location") {
                EntityType::Location
            } else {
                EntityType::Thing
            };
            assert!(
                matches!(
                    compile(entity, filter),
                    Err(Error::InvalidFilterExpression(_))
                ),
                "{} should not compile",
                filter
            );
        }
    }

    #[test]
    fn test_order_terms() {
        let catalog = Catalog::default();
        let versioning = VersioningResolver::new(&catalog, TemporalIntent::Current);
        let mut builder = SqlBuilder::new();
        let mut compiler = FilterCompiler::new(
            &catalog,
            &versioning,
            &mut builder,
            EntityType::Observation,
            "t0",
        );
        let order = |path: &str, direction| OrderBy {
            path: path.split('/').map(String::from).collect(),
            direction,
        };

        assert_eq!(
            compiler
                .order_terms(&order("phenomenonTime", SortDirection::Asc))
                .unwrap(),
            vec!["t0.\"phenomenonTime\" ASC"]
        );
        assert_eq!(
            compiler
                .order_terms(&order("result", SortDirection::Desc))
                .unwrap(),
            vec!["t0.\"resultNumber\" DESC", "t0.\"resultString\" DESC"]
        );
        assert_eq!(
            compiler
                .order_terms(&order("Datastream/name", SortDirection::Asc))
                .unwrap(),
            vec!["t0_j1.\"name\" ASC"]
        );
        assert!(matches!(
            compiler.order_terms(&order("parameters", SortDirection::Asc)),
            Err(Error::UnsupportedQueryOption { .. })
        ));
        assert!(compiler
            .order_terms(&order("Datastream/Thing/name", SortDirection::Asc))
            .is_err());
        assert_eq!(compiler.into_joins().len(), 2);
    }
}
