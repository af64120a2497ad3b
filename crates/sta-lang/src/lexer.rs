//! Lexer for `$filter` expressions using logos.

use crate::error::ParseError;
use crate::span::Span;
use chrono::{DateTime, FixedOffset, NaiveDate};
use logos::Logos;

/// Token types of the filter grammar.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n]+")]
pub enum Token {
    // Comparison operators
    #[token("eq")]
    Eq,
    #[token("ne")]
    Ne,
    #[token("gt")]
    Gt,
    #[token("ge")]
    Ge,
    #[token("lt")]
    Lt,
    #[token("le")]
    Le,

    // Logical operators
    #[token("and")]
    And,
    #[token("or")]
    Or,
    #[token("not")]
    Not,

    // Arithmetic operators
    #[token("add")]
    Add,
    #[token("sub")]
    Sub,
    #[token("mul")]
    Mul,
    #[token("div")]
    Div,
    #[token("mod")]
    Mod,

    #[token("in")]
    In,

    // Sort direction, only meaningful in $orderby
    #[token("asc")]
    Asc,
    #[token("desc")]
    Desc,

    // Literals
    #[token("true")]
    True,
    #[token("false")]
    False,
    #[token("null")]
    Null,

    /// Identifier; dotted names cover `geo.distance` and friends.
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*(\.[a-zA-Z_][a-zA-Z0-9_]*)*", |lex| lex.slice().to_string())]
    #[token("@iot.id", |_| "id".to_string())]
    Ident(String),

    /// Single-quoted string; `''` escapes a quote.
    #[regex(r"'([^']|'')*'", |lex| {
        let s = lex.slice();
        s[1..s.len() - 1].replace("''", "'")
    })]
    String(String),

    #[regex(r"geography'[^']*'", |lex| {
        let s = lex.slice();
        s["geography'".len()..s.len() - 1].to_string()
    })]
    Geography(String),

    #[regex(r"-?[0-9]+", |lex| lex.slice().parse::<i64>().ok())]
    Int(i64),

    #[regex(r"-?[0-9]+\.[0-9]+([eE][+-]?[0-9]+)?", |lex| lex.slice().parse::<f64>().ok())]
    Float(f64),

    #[regex(
        r"[0-9]{4}-[0-9]{2}-[0-9]{2}T[0-9]{2}:[0-9]{2}:[0-9]{2}(\.[0-9]+)?(Z|[+-][0-9]{2}:[0-9]{2})",
        |lex| DateTime::parse_from_rfc3339(lex.slice()).ok()
    )]
    DateTime(DateTime<FixedOffset>),

    /// `start/end` time interval.
    #[regex(
        r"[0-9]{4}-[0-9]{2}-[0-9]{2}T[0-9]{2}:[0-9]{2}:[0-9]{2}(\.[0-9]+)?(Z|[+-][0-9]{2}:[0-9]{2})/[0-9]{4}-[0-9]{2}-[0-9]{2}T[0-9]{2}:[0-9]{2}:[0-9]{2}(\.[0-9]+)?(Z|[+-][0-9]{2}:[0-9]{2})",
        parse_interval
    )]
    Interval((DateTime<FixedOffset>, DateTime<FixedOffset>)),

    #[regex(r"[0-9]{4}-[0-9]{2}-[0-9]{2}", |lex| NaiveDate::parse_from_str(lex.slice(), "%Y-%m-%d").ok())]
    Date(NaiveDate),

    // Punctuation
    #[token("/")]
    Slash,
    #[token(",")]
    Comma,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
}

fn parse_interval(
    lex: &mut logos::Lexer<'_, Token>,
) -> Option<(DateTime<FixedOffset>, DateTime<FixedOffset>)> {
    let (start, end) = lex.slice().split_once('/')?;
    Some((
        DateTime::parse_from_rfc3339(start).ok()?,
        DateTime::parse_from_rfc3339(end).ok()?,
    ))
}

impl Token {
    /// Human-readable description used in diagnostics.
    pub fn describe(&self) -> String {
        match self {
            Token::Ident(name) => format!("identifier '{}'", name),
            Token::String(s) => format!("string '{}'", s),
            Token::Int(i) => format!("number {}", i),
            Token::Float(f) => format!("number {}", f),
            Token::DateTime(dt) => format!("datetime {}", dt.to_rfc3339()),
            Token::Interval(_) => "time interval".to_string(),
            Token::Date(d) => format!("date {}", d),
            Token::Geography(_) => "geography literal".to_string(),
            Token::Slash => "'/'".to_string(),
            Token::Comma => "','".to_string(),
            Token::LParen => "'('".to_string(),
            Token::RParen => "')'".to_string(),
            other => format!("'{}'", format!("{:?}", other).to_lowercase()),
        }
    }
}

/// A token with its span in the source.
#[derive(Debug, Clone, PartialEq)]
pub struct SpannedToken {
    pub token: Token,
    pub span: Span,
}

/// Lexer that produces spanned tokens.
///
/// An unrecognised character ends the token stream; the failure is kept
/// and reported through [`Lexer::take_error`].
pub struct Lexer<'source> {
    inner: logos::Lexer<'source, Token>,
    peeked: Option<Option<SpannedToken>>,
    error: Option<ParseError>,
}

impl<'source> Lexer<'source> {
    /// Create a new lexer for the given source.
    pub fn new(source: &'source str) -> Self {
        Self {
            inner: Token::lexer(source),
            peeked: None,
            error: None,
        }
    }

    /// Peek at the next token without consuming it.
    pub fn peek(&mut self) -> Option<&SpannedToken> {
        if self.peeked.is_none() {
            self.peeked = Some(self.next_inner());
        }
        self.peeked.as_ref().and_then(|o| o.as_ref())
    }

    /// Get the next token.
    pub fn next_token(&mut self) -> Option<SpannedToken> {
        if let Some(peeked) = self.peeked.take() {
            peeked
        } else {
            self.next_inner()
        }
    }

    fn next_inner(&mut self) -> Option<SpannedToken> {
        if self.error.is_some() {
            return None;
        }
        match self.inner.next() {
            Some(Ok(token)) => Some(SpannedToken {
                token,
                span: self.inner.span().into(),
            }),
            Some(Err(())) => {
                let span: Span = self.inner.span().into();
                self.error = Some(ParseError::new(
                    format!("unexpected input '{}'", self.inner.slice()),
                    span,
                ));
                None
            }
            None => None,
        }
    }

    /// Take the lexing failure, if the stream ended on one.
    pub fn take_error(&mut self) -> Option<ParseError> {
        self.error.take()
    }
}

impl Iterator for Lexer<'_> {
    type Item = SpannedToken;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_token()
    }
}

/// Tokenize a source string into a vector of spanned tokens.
pub fn tokenize(source: &str) -> Result<Vec<SpannedToken>, ParseError> {
    let mut lexer = Lexer::new(source);
    let tokens: Vec<_> = lexer.by_ref().collect();
    match lexer.take_error() {
        Some(err) => Err(err),
        None => Ok(tokens),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<Token> {
        tokenize(source)
            .unwrap()
            .into_iter()
            .map(|t| t.token)
            .collect()
    }

    #[test]
    fn test_comparison() {
        assert_eq!(
            kinds("result gt 10"),
            vec![Token::Ident("result".into()), Token::Gt, Token::Int(10)]
        );
    }

    #[test]
    fn test_keywords_do_not_swallow_identifiers() {
        assert_eq!(
            kinds("name eq 'x' and description ne null"),
            vec![
                Token::Ident("name".into()),
                Token::Eq,
                Token::String("x".into()),
                Token::And,
                Token::Ident("description".into()),
                Token::Ne,
                Token::Null,
            ]
        );
    }

    #[test]
    fn test_quote_escape() {
        assert_eq!(kinds("'it''s'"), vec![Token::String("it's".into())]);
    }

    #[test]
    fn test_temporal_literals() {
        let tokens = kinds("2024-01-01T00:00:00Z 2024-01-01 2024-01-01T00:00:00Z/2024-02-01T00:00:00+01:00");
        assert!(matches!(tokens[0], Token::DateTime(_)));
        assert!(matches!(tokens[1], Token::Date(_)));
        match &tokens[2] {
            Token::Interval((start, end)) => assert!(start < end),
            other => panic!("expected interval, got {:?}", other),
        }
    }

    #[test]
    fn test_navigation_path_and_functions() {
        assert_eq!(
            kinds("geo.distance(Thing/Locations/location, geography'POINT(1 2)')"),
            vec![
                Token::Ident("geo.distance".into()),
                Token::LParen,
                Token::Ident("Thing".into()),
                Token::Slash,
                Token::Ident("Locations".into()),
                Token::Slash,
                Token::Ident("location".into()),
                Token::Comma,
                Token::Geography("POINT(1 2)".into()),
                Token::RParen,
            ]
        );
    }

    #[test]
    fn test_numbers() {
        assert_eq!(
            kinds("-4 3.5 1.0e3"),
            vec![Token::Int(-4), Token::Float(3.5), Token::Float(1000.0)]
        );
    }

    #[test]
    fn test_iot_id_alias() {
        assert_eq!(kinds("@iot.id"), vec![Token::Ident("id".into())]);
    }

    #[test]
    fn test_invalid_character() {
        let err = tokenize("name eq #").unwrap_err();
        assert_eq!(err.span, Span::new(8, 9));
    }

    #[test]
    fn test_lexer_peek() {
        let mut lexer = Lexer::new("a eq b");
        assert_eq!(
            lexer.peek().map(|t| &t.token),
            Some(&Token::Ident("a".to_string()))
        );
        assert_eq!(
            lexer.next_token().map(|t| t.token),
            Some(Token::Ident("a".to_string()))
        );
        assert_eq!(lexer.next_token().map(|t| t.token), Some(Token::Eq));
    }
}
