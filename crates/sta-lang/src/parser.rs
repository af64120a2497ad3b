//! Recursive descent parser for `$filter`, `$orderby` and `$select` values.
//!
//! Operator precedence, loosest first:
//!
//! ```text
//! or
//! and
//! not
//! eq ne gt ge lt le in   (non-associative)
//! add sub
//! mul div mod
//! primary: literal | property path | function call | ( expr )
//! ```

use crate::ast::*;
use crate::error::ParseError;
use crate::lexer::{Lexer, SpannedToken, Token};
use crate::span::{Span, Spanned};

/// Deepest expression tree a filter may produce. Parentheses, `not`,
/// function calls and each link of an operator chain add one level.
pub const MAX_DEPTH: usize = 128;

/// Parser over a single option value.
pub struct Parser<'source> {
    lexer: Lexer<'source>,
    source: &'source str,
    depth: usize,
}

impl<'source> Parser<'source> {
    /// Create a new parser for the given source.
    pub fn new(source: &'source str) -> Self {
        Self {
            lexer: Lexer::new(source),
            source,
            depth: 0,
        }
    }

    /// Parse a complete filter expression.
    pub fn parse_filter(&mut self) -> Result<Expr, ParseError> {
        if self.peek_token().is_none() {
            self.check_lex_error()?;
            return Err(ParseError::new("empty filter expression", Span::eof(self.source)));
        }
        let expr = self.parse_or()?;
        self.expect_end()?;
        Ok(expr)
    }

    /// Parse a comma-separated `$orderby` list.
    pub fn parse_orderby(&mut self) -> Result<Vec<OrderBy>, ParseError> {
        let mut terms = Vec::new();
        loop {
            let path = self.parse_path()?;
            let direction = match self.peek_token() {
                Some(Token::Asc) => {
                    self.next_token()?;
                    SortDirection::Asc
                }
                Some(Token::Desc) => {
                    self.next_token()?;
                    SortDirection::Desc
                }
                _ => SortDirection::default(),
            };
            terms.push(OrderBy {
                path: path.value,
                direction,
            });
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect_end()?;
        Ok(terms)
    }

    /// Parse a comma-separated `$select` list.
    pub fn parse_select(&mut self) -> Result<Vec<String>, ParseError> {
        let mut names = Vec::new();
        loop {
            names.push(self.expect_ident()?.value);
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect_end()?;
        Ok(names)
    }

    fn parse_or(&mut self) -> Result<Expr, ParseError> {
        let mark = self.depth;
        let mut left = self.parse_and()?;
        while self.eat(&Token::Or) {
            self.enter(left.span)?;
            let right = self.parse_and()?;
            left = binary(BinaryOp::Or, left, right);
        }
        self.depth = mark;
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ParseError> {
        let mark = self.depth;
        let mut left = self.parse_not()?;
        while self.eat(&Token::And) {
            self.enter(left.span)?;
            let right = self.parse_not()?;
            left = binary(BinaryOp::And, left, right);
        }
        self.depth = mark;
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expr, ParseError> {
        if let Some(Token::Not) = self.peek_token() {
            let not = self.next_token()?;
            self.enter(not.span)?;
            let inner = self.parse_not()?;
            self.depth -= 1;
            let span = not.span.merge(inner.span);
            return Ok(Expr::new(ExprKind::Not(Box::new(inner)), span));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, ParseError> {
        let left = self.parse_additive()?;
        let op = match self.peek_token() {
            Some(Token::Eq) => BinaryOp::Eq,
            Some(Token::Ne) => BinaryOp::Ne,
            Some(Token::Gt) => BinaryOp::Gt,
            Some(Token::Ge) => BinaryOp::Ge,
            Some(Token::Lt) => BinaryOp::Lt,
            Some(Token::Le) => BinaryOp::Le,
            Some(Token::In) => return self.parse_in(left),
            _ => return Ok(left),
        };
        self.next_token()?;
        let right = self.parse_additive()?;
        Ok(binary(op, left, right))
    }

    fn parse_in(&mut self, left: Expr) -> Result<Expr, ParseError> {
        self.next_token()?; // in
        self.expect_token(Token::LParen)?;
        let mut list = vec![self.parse_additive()?];
        while self.eat(&Token::Comma) {
            list.push(self.parse_additive()?);
        }
        let close = self.expect_token(Token::RParen)?;
        let span = left.span.merge(close.span);
        Ok(Expr::new(
            ExprKind::In {
                expr: Box::new(left),
                list,
            },
            span,
        ))
    }

    fn parse_additive(&mut self) -> Result<Expr, ParseError> {
        let mark = self.depth;
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek_token() {
                Some(Token::Add) => BinaryOp::Add,
                Some(Token::Sub) => BinaryOp::Sub,
                _ => {
                    self.depth = mark;
                    return Ok(left);
                }
            };
            self.next_token()?;
            self.enter(left.span)?;
            let right = self.parse_multiplicative()?;
            left = binary(op, left, right);
        }
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, ParseError> {
        let mark = self.depth;
        let mut left = self.parse_primary()?;
        loop {
            let op = match self.peek_token() {
                Some(Token::Mul) => BinaryOp::Mul,
                Some(Token::Div) => BinaryOp::Div,
                Some(Token::Mod) => BinaryOp::Mod,
                _ => {
                    self.depth = mark;
                    return Ok(left);
                }
            };
            self.next_token()?;
            self.enter(left.span)?;
            let right = self.parse_primary()?;
            left = binary(op, left, right);
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        if let Some(Token::Ident(_)) = self.peek_token() {
            let path = self.parse_path()?;
            if path.value.len() == 1 && self.peek_token() == Some(&Token::LParen) {
                return self.parse_call(path);
            }
            return Ok(Expr::new(ExprKind::Property(path.value), path.span));
        }

        let tok = self.next_token()?;
        let literal = match tok.token {
            Token::LParen => {
                self.enter(tok.span)?;
                let inner = self.parse_or()?;
                let close = self.expect_token(Token::RParen)?;
                self.depth -= 1;
                return Ok(Expr::new(inner.kind, tok.span.merge(close.span)));
            }
            Token::Null => Literal::Null,
            Token::True => Literal::Bool(true),
            Token::False => Literal::Bool(false),
            Token::Int(i) => Literal::Int(i),
            Token::Float(f) => Literal::Float(f),
            Token::String(s) => Literal::String(s),
            Token::DateTime(dt) => Literal::DateTime(dt),
            Token::Date(d) => Literal::Date(d),
            Token::Interval((start, end)) => Literal::Interval(start, end),
            Token::Geography(wkt) => Literal::Geography(wkt),
            other => {
                return Err(ParseError::new(
                    format!("expected an operand, found {}", other.describe()),
                    tok.span,
                ))
            }
        };
        Ok(Expr::new(ExprKind::Literal(literal), tok.span))
    }

    fn parse_call(&mut self, name: Spanned<Vec<String>>) -> Result<Expr, ParseError> {
        let fname = name.value.join("/");
        let function = Function::from_name(&fname).ok_or_else(|| {
            ParseError::new(format!("unknown function '{}'", fname), name.span)
        })?;

        let open = self.expect_token(Token::LParen)?;
        self.enter(open.span)?;
        let mut args = Vec::new();
        if self.peek_token() != Some(&Token::RParen) {
            args.push(self.parse_or()?);
            while self.eat(&Token::Comma) {
                args.push(self.parse_or()?);
            }
        }
        let close = self.expect_token(Token::RParen)?;
        self.depth -= 1;
        let span = name.span.merge(close.span);

        let (min, max) = function.arity();
        if args.len() < min || args.len() > max {
            let expected = if min == max {
                min.to_string()
            } else {
                format!("{} to {}", min, max)
            };
            return Err(ParseError::new(
                format!(
                    "function '{}' takes {} argument(s), got {}",
                    fname,
                    expected,
                    args.len()
                ),
                span,
            ));
        }

        Ok(Expr::new(ExprKind::Call { function, args }, span))
    }

    /// Parse `Ident (/ Ident)*`.
    fn parse_path(&mut self) -> Result<Spanned<Vec<String>>, ParseError> {
        let first = self.expect_ident()?;
        let mut span = first.span;
        let mut segments = vec![first.value];
        while self.eat(&Token::Slash) {
            let next = self.expect_ident()?;
            span = span.merge(next.span);
            segments.push(next.value);
        }
        Ok(Spanned::new(segments, span))
    }

    /// Go one level deeper, failing past [`MAX_DEPTH`].
    fn enter(&mut self, span: Span) -> Result<(), ParseError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(ParseError::new(
                format!("expression is nested deeper than {} levels", MAX_DEPTH),
                span,
            )
            .with_hint("flatten long 'or' chains with 'in (...)'"));
        }
        Ok(())
    }

    fn peek_token(&mut self) -> Option<&Token> {
        self.lexer.peek().map(|t| &t.token)
    }

    /// Consume the next token if it matches.
    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek_token() == Some(expected) {
            self.lexer.next_token();
            true
        } else {
            false
        }
    }

    fn expect_ident(&mut self) -> Result<Spanned<String>, ParseError> {
        let tok = self.next_token()?;
        match tok.token {
            Token::Ident(name) => Ok(Spanned::new(name, tok.span)),
            other => Err(ParseError::new(
                format!("expected a property name, found {}", other.describe()),
                tok.span,
            )),
        }
    }

    fn expect_token(&mut self, expected: Token) -> Result<SpannedToken, ParseError> {
        let tok = self.next_token()?;
        if std::mem::discriminant(&tok.token) == std::mem::discriminant(&expected) {
            Ok(tok)
        } else {
            Err(ParseError::new(
                format!(
                    "expected {}, found {}",
                    expected.describe(),
                    tok.token.describe()
                ),
                tok.span,
            ))
        }
    }

    fn expect_end(&mut self) -> Result<(), ParseError> {
        self.check_lex_error()?;
        match self.lexer.next_token() {
            None => self.check_lex_error(),
            Some(tok) => Err(ParseError::new(
                format!("unexpected {}", tok.token.describe()),
                tok.span,
            )
            .with_hint("combine conditions with 'and' or 'or'")),
        }
    }

    fn check_lex_error(&mut self) -> Result<(), ParseError> {
        match self.lexer.take_error() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Get the next token or error if the input ended.
    fn next_token(&mut self) -> Result<SpannedToken, ParseError> {
        match self.lexer.next_token() {
            Some(tok) => Ok(tok),
            None => {
                self.check_lex_error()?;
                Err(ParseError::new(
                    "unexpected end of expression",
                    Span::eof(self.source),
                ))
            }
        }
    }
}

fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    let span = left.span.merge(right.span);
    Expr::new(
        ExprKind::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        },
        span,
    )
}

/// Parse a `$filter` value.
pub fn parse_filter(source: &str) -> Result<Expr, ParseError> {
    Parser::new(source).parse_filter()
}

/// Parse an `$orderby` value.
pub fn parse_orderby(source: &str) -> Result<Vec<OrderBy>, ParseError> {
    Parser::new(source).parse_orderby()
}

/// Parse a `$select` value.
pub fn parse_select(source: &str) -> Result<Vec<String>, ParseError> {
    Parser::new(source).parse_select()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn prop(path: &[&str]) -> ExprKind {
        ExprKind::Property(path.iter().map(|s| s.to_string()).collect())
    }

    fn binary_parts(expr: &Expr) -> (BinaryOp, &Expr, &Expr) {
        match &expr.kind {
            ExprKind::Binary { op, left, right } => (*op, left, right),
            other => panic!("expected binary, got {:?}", other),
        }
    }

    #[test]
    fn test_simple_comparison() {
        let expr = parse_filter("result gt 10").unwrap();
        let (op, left, right) = binary_parts(&expr);
        assert_eq!(op, BinaryOp::Gt);
        assert_eq!(left.kind, prop(&["result"]));
        assert_eq!(right.kind, ExprKind::Literal(Literal::Int(10)));
        assert_eq!(expr.span, Span::new(0, 12));
    }

    #[test]
    fn test_and_binds_tighter_than_or() {
        let expr = parse_filter("a eq 1 or b eq 2 and c eq 3").unwrap();
        let (op, _, right) = binary_parts(&expr);
        assert_eq!(op, BinaryOp::Or);
        assert_eq!(binary_parts(right).0, BinaryOp::And);
    }

    #[test]
    fn test_arithmetic_precedence() {
        let expr = parse_filter("result add 2 mul 3 gt 10").unwrap();
        let (op, left, _) = binary_parts(&expr);
        assert_eq!(op, BinaryOp::Gt);
        let (add, _, mul) = binary_parts(left);
        assert_eq!(add, BinaryOp::Add);
        assert_eq!(binary_parts(mul).0, BinaryOp::Mul);
    }

    #[test]
    fn test_deep_nesting_is_rejected() {
        let source = format!("{}name eq 'a'{}", "(".repeat(20_000), ")".repeat(20_000));
        let err = parse_filter(&source).unwrap_err();
        assert!(err.message.contains("nested deeper than"));

        let source = format!("{}name eq 'a'", "not ".repeat(20_000));
        assert!(parse_filter(&source).is_err());

        let source = vec!["id eq 1"; 20_000].join(" or ");
        assert!(parse_filter(&source).is_err());

        let source = format!("id eq {}", vec!["1"; 20_000].join(" add "));
        assert!(parse_filter(&source).is_err());
    }

    #[test]
    fn test_nesting_below_limit_parses() {
        let source = format!("{}name eq 'a'{}", "(".repeat(40), ")".repeat(40));
        assert!(parse_filter(&source).is_ok());

        // chains restart their count after each sibling
        let source = vec!["(id eq 1 or id eq 2)"; 60].join(" and ");
        assert!(parse_filter(&source).is_ok());
    }

    #[test]
    fn test_not_and_parentheses() {
        let expr = parse_filter("not (name eq 'a' or name eq 'b')").unwrap();
        match expr.kind {
            ExprKind::Not(inner) => assert_eq!(binary_parts(&inner).0, BinaryOp::Or),
            other => panic!("expected not, got {:?}", other),
        }
    }

    #[test]
    fn test_navigation_path() {
        let expr = parse_filter("Datastream/Thing/name eq 'boiler'").unwrap();
        let (_, left, _) = binary_parts(&expr);
        assert_eq!(left.kind, prop(&["Datastream", "Thing", "name"]));
    }

    #[test]
    fn test_function_calls() {
        let expr = parse_filter("startswith(name, 'Temp') and year(resultTime) eq 2024").unwrap();
        let (_, left, right) = binary_parts(&expr);
        match &left.kind {
            ExprKind::Call { function, args } => {
                assert_eq!(*function, Function::Startswith);
                assert_eq!(args.len(), 2);
            }
            other => panic!("expected call, got {:?}", other),
        }
        let (_, year, _) = binary_parts(right);
        assert!(matches!(
            year.kind,
            ExprKind::Call {
                function: Function::Year,
                ..
            }
        ));
    }

    #[test]
    fn test_geo_function() {
        let expr =
            parse_filter("geo.distance(location, geography'POINT(8.9 46.0)') lt 0.5").unwrap();
        let (_, left, _) = binary_parts(&expr);
        match &left.kind {
            ExprKind::Call { function, args } => {
                assert_eq!(*function, Function::GeoDistance);
                assert_eq!(
                    args[1].kind,
                    ExprKind::Literal(Literal::Geography("POINT(8.9 46.0)".into()))
                );
            }
            other => panic!("expected call, got {:?}", other),
        }
    }

    #[test]
    fn test_in_list() {
        let expr = parse_filter("id in (1, 2, 3)").unwrap();
        match expr.kind {
            ExprKind::In { list, .. } => assert_eq!(list.len(), 3),
            other => panic!("expected in, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_function() {
        let err = parse_filter("frobnicate(name) eq 1").unwrap_err();
        assert_eq!(err.message, "unknown function 'frobnicate'");
        assert_eq!(err.span, Span::new(0, 10));
    }

    #[test]
    fn test_arity_mismatch() {
        let err = parse_filter("startswith(name)").unwrap_err();
        assert!(err.message.contains("takes 2 argument(s), got 1"));
    }

    #[test]
    fn test_trailing_garbage() {
        let err = parse_filter("name eq 'a' name").unwrap_err();
        assert_eq!(err.span, Span::new(12, 16));
        assert!(err.hint.is_some());
    }

    #[test]
    fn test_missing_operand() {
        let err = parse_filter("result gt").unwrap_err();
        assert_eq!(err.message, "unexpected end of expression");
        assert_eq!(err.span, Span::new(9, 9));
    }

    #[test]
    fn test_orderby_list() {
        let terms = parse_orderby("phenomenonTime desc, Datastream/name, id asc").unwrap();
        assert_eq!(
            terms,
            vec![
                OrderBy {
                    path: vec!["phenomenonTime".into()],
                    direction: SortDirection::Desc,
                },
                OrderBy {
                    path: vec!["Datastream".into(), "name".into()],
                    direction: SortDirection::Asc,
                },
                OrderBy {
                    path: vec!["id".into()],
                    direction: SortDirection::Asc,
                },
            ]
        );
    }

    #[test]
    fn test_select_list() {
        assert_eq!(
            parse_select("@iot.id, name,description").unwrap(),
            vec!["id".to_string(), "name".into(), "description".into()]
        );
        assert!(parse_select("name,").is_err());
    }
}
