//! Parameterized SQL fragments.
//!
//! Every value that originates from a request is bound through
//! [`SqlBuilder::bind`]; the SQL text only ever contains `$n` placeholders,
//! quoted identifiers and constants produced by the planner itself.

use chrono::{DateTime, NaiveDate, Utc};
use sta_schema::Catalog;

/// A bound query parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Int(i64),
    Float(f64),
    Text(String),
    Bool(bool),
    Timestamp(DateTime<Utc>),
    Date(NaiveDate),
    IntArray(Vec<i64>),
    TextArray(Vec<String>),
}

/// SQL text plus its positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlQuery {
    pub sql: String,
    pub params: Vec<SqlParam>,
}

impl SqlQuery {
    /// Create a query from text and parameters.
    pub fn new(sql: impl Into<String>, params: Vec<SqlParam>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }

    /// Copy of this query with `$1` set to the given parent ids.
    ///
    /// Expansion queries reserve `$1` for the ids of the parent rows they
    /// are resolved against.
    pub fn with_parent_ids(&self, ids: Vec<i64>) -> Self {
        let mut query = self.clone();
        match query.params.first_mut() {
            Some(first) => *first = SqlParam::IntArray(ids),
            None => query.params.push(SqlParam::IntArray(ids)),
        }
        query
    }
}

/// Accumulates parameters while a statement is assembled.
#[derive(Debug, Default)]
pub struct SqlBuilder {
    params: Vec<SqlParam>,
}

impl SqlBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a builder whose `$1` is reserved for parent ids.
    pub fn for_expansion() -> Self {
        Self {
            params: vec![SqlParam::IntArray(Vec::new())],
        }
    }

    /// Bind a parameter and return its placeholder.
    pub fn bind(&mut self, param: SqlParam) -> String {
        self.params.push(param);
        format!("${}", self.params.len())
    }

    /// Parameters bound so far.
    pub fn params(&self) -> &[SqlParam] {
        &self.params
    }

    /// Number of parameters bound so far.
    pub fn len(&self) -> usize {
        self.params.len()
    }

    /// Whether no parameter has been bound.
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Finish with the given SQL text.
    pub fn build(self, sql: String) -> SqlQuery {
        SqlQuery {
            sql,
            params: self.params,
        }
    }
}

/// Quote an SQL identifier.
pub fn ident(name: &str) -> String {
    Catalog::quote_ident(name)
}

/// `alias."column"`
pub fn column(alias: &str, name: &str) -> String {
    format!("{}.{}", alias, ident(name))
}

/// Quote a string constant produced by the planner (never request input).
pub fn string_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
