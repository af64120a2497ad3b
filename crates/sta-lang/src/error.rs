//! Error types for path and query-option parsing.

use crate::span::{offset_to_column, Span};
use thiserror::Error;

/// Error while lexing or parsing an expression.
#[derive(Debug, Clone, Error, PartialEq)]
pub struct ParseError {
    /// The error message.
    pub message: String,
    /// Source span where the error occurred.
    pub span: Span,
    /// Optional hint for fixing the error.
    pub hint: Option<String>,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl ParseError {
    /// Create a new parse error.
    pub fn new(message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span,
            hint: None,
        }
    }

    /// Add a hint to the error.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Format the error with the offending expression and a caret under
    /// the failing token.
    pub fn format_with_source(&self, source: &str) -> String {
        let col = offset_to_column(source, self.span.start);
        let mut result = format!("{} at position {}\n", self.message, col);
        result.push_str(&format!("  {}\n  ", source));
        for _ in 1..col {
            result.push(' ');
        }
        result.push('^');
        let width = source[self.span.start.min(source.len())..self.span.end.min(source.len())]
            .chars()
            .count();
        for _ in 1..width {
            result.push('~');
        }
        if let Some(hint) = &self.hint {
            result.push_str(&format!("\n  hint: {}", hint));
        }
        result
    }
}

/// Errors surfaced by path resolution and query-option parsing.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum LangError {
    /// Resource path is malformed or navigates illegally.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Query option is unknown, duplicated or has a malformed value.
    #[error("unsupported query option {option}: {message}")]
    UnsupportedQueryOption {
        /// Option name as it appeared in the query string.
        option: String,
        /// What is wrong with it.
        message: String,
    },

    /// `$filter` expression could not be parsed.
    #[error("invalid filter expression: {}", .error.format_with_source(.source_text))]
    InvalidFilter {
        /// The decoded filter text.
        source_text: String,
        /// Where and why parsing failed.
        error: ParseError,
    },
}

impl LangError {
    /// Create an invalid path error.
    pub fn invalid_path(message: impl Into<String>) -> Self {
        LangError::InvalidPath(message.into())
    }

    /// Create an unsupported query option error.
    pub fn unsupported(option: impl Into<String>, message: impl Into<String>) -> Self {
        LangError::UnsupportedQueryOption {
            option: option.into(),
            message: message.into(),
        }
    }

    /// Wrap a parse error together with the text it was raised against.
    pub fn invalid_filter(source_text: impl Into<String>, error: ParseError) -> Self {
        LangError::InvalidFilter {
            source_text: source_text.into(),
            error,
        }
    }
}
