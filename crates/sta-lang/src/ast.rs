//! Syntax trees for `$filter` expressions and query options.

use crate::span::Span;
use chrono::{DateTime, FixedOffset, NaiveDate, Utc};

/// A literal value in a filter expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    DateTime(DateTime<FixedOffset>),
    Date(NaiveDate),
    /// Closed-open time interval.
    Interval(DateTime<FixedOffset>, DateTime<FixedOffset>),
    /// WKT geometry, e.g. `POINT(1 2)`.
    Geography(String),
}

/// Binary operators, in the grammar's vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    And,
    Or,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl BinaryOp {
    /// Whether the operator compares two operands.
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Gt | BinaryOp::Ge | BinaryOp::Lt | BinaryOp::Le
        )
    }

    /// Whether the operator is arithmetic.
    pub fn is_arithmetic(self) -> bool {
        matches!(
            self,
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod
        )
    }
}

/// Built-in filter functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    // String
    Substringof,
    Startswith,
    Endswith,
    Indexof,
    Length,
    Tolower,
    Toupper,
    Trim,
    Concat,
    Substring,
    // Date and time
    Year,
    Month,
    Day,
    Hour,
    Minute,
    Second,
    Fractionalseconds,
    Date,
    Time,
    Now,
    Mindatetime,
    Maxdatetime,
    // Math
    Round,
    Floor,
    Ceiling,
    // Geospatial
    GeoDistance,
    GeoLength,
    GeoIntersects,
    StEquals,
    StDisjoint,
    StTouches,
    StWithin,
    StOverlaps,
    StCrosses,
    StIntersects,
    StContains,
}

impl Function {
    /// Look up a function by its name in filter text.
    pub fn from_name(name: &str) -> Option<Self> {
        use Function::*;
        Some(match name {
            "substringof" => Substringof,
            "startswith" => Startswith,
            "endswith" => Endswith,
            "indexof" => Indexof,
            "length" => Length,
            "tolower" => Tolower,
            "toupper" => Toupper,
            "trim" => Trim,
            "concat" => Concat,
            "substring" => Substring,
            "year" => Year,
            "month" => Month,
            "day" => Day,
            "hour" => Hour,
            "minute" => Minute,
            "second" => Second,
            "fractionalseconds" => Fractionalseconds,
            "date" => Date,
            "time" => Time,
            "now" => Now,
            "mindatetime" => Mindatetime,
            "maxdatetime" => Maxdatetime,
            "round" => Round,
            "floor" => Floor,
            "ceiling" => Ceiling,
            "geo.distance" => GeoDistance,
            "geo.length" => GeoLength,
            "geo.intersects" => GeoIntersects,
            "st_equals" => StEquals,
            "st_disjoint" => StDisjoint,
            "st_touches" => StTouches,
            "st_within" => StWithin,
            "st_overlaps" => StOverlaps,
            "st_crosses" => StCrosses,
            "st_intersects" => StIntersects,
            "st_contains" => StContains,
            _ => return None,
        })
    }

    /// Minimum and maximum number of arguments.
    pub fn arity(self) -> (usize, usize) {
        use Function::*;
        match self {
            Now | Mindatetime | Maxdatetime => (0, 0),
            Length | Tolower | Toupper | Trim | Year | Month | Day | Hour | Minute | Second
            | Fractionalseconds | Date | Time | Round | Floor | Ceiling | GeoLength => (1, 1),
            Substring => (2, 3),
            _ => (2, 2),
        }
    }
}

/// A filter expression node.
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

/// Filter expression variants.
#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Literal(Literal),
    /// `/`-separated property path, e.g. `Datastream/Thing/name`.
    Property(Vec<String>),
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Not(Box<Expr>),
    Call {
        function: Function,
        args: Vec<Expr>,
    },
    In {
        expr: Box<Expr>,
        list: Vec<Expr>,
    },
}

impl Expr {
    /// Create a new expression node.
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Self { kind, span }
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

/// One `$orderby` term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    /// Property path; at most one navigation hop before the property.
    pub path: Vec<String>,
    pub direction: SortDirection,
}

/// Shape of a collection response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResultFormat {
    #[default]
    Default,
    DataArray,
}

/// Temporal window requested with `$from_to`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

/// Parsed query options for one level of the request.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct QueryOptions {
    pub filter: Option<Expr>,
    pub expand: Vec<ExpandNode>,
    /// `None` selects every property.
    pub select: Option<Vec<String>>,
    pub orderby: Vec<OrderBy>,
    pub top: Option<u64>,
    pub skip: Option<u64>,
    pub count: bool,
    pub result_format: ResultFormat,
    /// `$as_of`; only valid at the top level.
    pub as_of: Option<DateTime<Utc>>,
    /// `$from_to`; only valid at the top level.
    pub from_to: Option<TimeWindow>,
    /// Decoded `(key, value)` pairs as given, used to build continuation links.
    pub raw: Vec<(String, String)>,
}

/// One `$expand` term with its nested options.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpandNode {
    /// Navigation property name on the enclosing entity type.
    pub relation: String,
    pub options: QueryOptions,
}

impl ExpandNode {
    /// Create an expand node with default nested options.
    pub fn new(relation: impl Into<String>) -> Self {
        Self {
            relation: relation.into(),
            options: QueryOptions::default(),
        }
    }
}
