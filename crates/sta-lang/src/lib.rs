//! SensorThings request language.
//!
//! This crate turns the two textual halves of a SensorThings read request
//! into typed structures:
//!
//! - the resource path (`/Datastreams(3)/Observations`) into a
//!   [`ResolvedPath`], validated against a [`sta_schema::Catalog`];
//! - the query string (`$filter=result gt 10&$top=2`) into
//!   [`QueryOptions`], with `$filter` parsed into an [`Expr`] tree.
//!
//! # Filter syntax
//!
//! ```text
//! result gt 10 and phenomenonTime ge 2024-01-01T00:00:00Z
//! Datastream/Thing/name eq 'boiler'
//! startswith(name, 'Temp') or not (id in (1, 2, 3))
//! st_within(location, geography'POLYGON((0 0, 0 1, 1 1, 0 0))')
//! ```
//!
//! # Usage
//!
//! ```rust
//! use sta_lang::{parse_query_options, PathResolver};
//! use sta_schema::Catalog;
//!
//! let catalog = Catalog::default();
//! let path = PathResolver::new(&catalog)
//!     .resolve("/Datastreams(3)/Observations")
//!     .unwrap();
//! let options = parse_query_options("$filter=result%20gt%2010&$top=2", false).unwrap();
//! assert_eq!(options.top, Some(2));
//! assert!(path.shape.is_collection());
//! ```

pub mod ast;
pub mod error;
pub mod lexer;
pub mod options;
pub mod parser;
pub mod path;
pub mod span;

pub use ast::{
    BinaryOp, ExpandNode, Expr, ExprKind, Function, Literal, OrderBy, QueryOptions, ResultFormat,
    SortDirection, TimeWindow,
};
pub use error::{LangError, ParseError};
pub use options::parse_query_options;
pub use parser::{parse_filter, parse_orderby, parse_select};
pub use path::{EntityId, PathResolver, PathSegment, ResolvedPath, ResponseShape, SubResource};
pub use span::{Span, Spanned};
