//! Query-string parsing into [`QueryOptions`].

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use crate::ast::{ExpandNode, QueryOptions, ResultFormat, TimeWindow};
use crate::error::LangError;
use crate::parser::{parse_filter, parse_orderby, parse_select};

/// Deepest `$expand` tree accepted, counting both `A/B` path hops and
/// `A($expand=B)` nesting.
pub const MAX_EXPAND_NESTING: usize = 32;

/// Where an option appears; nested levels come from `$expand(...)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Level {
    Top,
    Nested(usize),
}

impl Level {
    fn depth(self) -> usize {
        match self {
            Level::Top => 0,
            Level::Nested(depth) => depth,
        }
    }
}

/// Parse a raw (still percent-encoded) query string.
///
/// Unknown and duplicated options are rejected unless `lenient` is set, in
/// which case unknown options are ignored. Duplicates are always rejected.
pub fn parse_query_options(query: &str, lenient: bool) -> Result<QueryOptions, LangError> {
    let query = query.strip_prefix('?').unwrap_or(query);
    let mut options = QueryOptions::default();
    let mut seen = HashSet::new();

    for pair in split_top_level(query, '&') {
        if pair.is_empty() {
            continue;
        }
        let (raw_key, raw_value) = pair.split_once('=').unwrap_or((pair, ""));
        let key = decode(raw_key, raw_key)?;
        let value = decode(&key, raw_value)?;
        apply_option(&mut options, &mut seen, &key, &value, Level::Top, lenient)?;
    }

    Ok(options)
}

fn decode(option: &str, raw: &str) -> Result<String, LangError> {
    urlencoding::decode(raw)
        .map(|s| s.into_owned())
        .map_err(|_| LangError::unsupported(option, "value is not valid percent-encoded UTF-8"))
}

fn apply_option(
    options: &mut QueryOptions,
    seen: &mut HashSet<String>,
    key: &str,
    value: &str,
    level: Level,
    lenient: bool,
) -> Result<(), LangError> {
    let known = match key {
        "$filter" | "$expand" | "$select" | "$orderby" | "$top" | "$skip" | "$count" => true,
        "$resultFormat" | "$as_of" | "$from_to" => level == Level::Top,
        _ => false,
    };
    if !known {
        if lenient {
            tracing::debug!(option = key, "ignoring unknown query option");
            return Ok(());
        }
        let message = if level != Level::Top {
            "not supported inside $expand"
        } else {
            "unknown query option"
        };
        return Err(LangError::unsupported(key, message));
    }
    if !seen.insert(key.to_string()) {
        return Err(LangError::unsupported(key, "option given more than once"));
    }
    options.raw.push((key.to_string(), value.to_string()));

    match key {
        "$filter" => {
            let expr = parse_filter(value).map_err(|e| LangError::invalid_filter(value, e))?;
            options.filter = Some(expr);
        }
        "$expand" => options.expand = parse_expand(value, level.depth(), lenient)?,
        "$select" => {
            let names =
                parse_select(value).map_err(|e| LangError::unsupported(key, e.format_with_source(value)))?;
            options.select = Some(names);
        }
        "$orderby" => {
            options.orderby = parse_orderby(value)
                .map_err(|e| LangError::unsupported(key, e.format_with_source(value)))?;
        }
        "$top" => options.top = Some(parse_non_negative(key, value)?),
        "$skip" => options.skip = Some(parse_non_negative(key, value)?),
        "$count" => {
            options.count = match value.trim() {
                "true" => true,
                "false" => false,
                _ => return Err(LangError::unsupported(key, "expected 'true' or 'false'")),
            }
        }
        "$resultFormat" => {
            options.result_format = match value.trim() {
                "dataArray" => ResultFormat::DataArray,
                other => {
                    return Err(LangError::unsupported(
                        key,
                        format!("unknown result format '{}'", other),
                    ))
                }
            }
        }
        "$as_of" => options.as_of = Some(parse_instant(key, value.trim())?),
        "$from_to" => {
            let (from, to) = value
                .trim()
                .split_once('/')
                .ok_or_else(|| LangError::unsupported(key, "expected '<start>/<end>'"))?;
            let window = TimeWindow {
                from: parse_instant(key, from)?,
                to: parse_instant(key, to)?,
            };
            if window.from >= window.to {
                return Err(LangError::unsupported(key, "start must precede end"));
            }
            options.from_to = Some(window);
        }
        _ => unreachable!("option filtered above"),
    }
    Ok(())
}

fn parse_non_negative(key: &str, value: &str) -> Result<u64, LangError> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|_| LangError::unsupported(key, format!("expected a non-negative integer, got '{}'", value)))
}

fn parse_instant(key: &str, value: &str) -> Result<DateTime<Utc>, LangError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| LangError::unsupported(key, format!("'{}' is not an RFC 3339 timestamp", value)))
}

/// Parse an `$expand` value into a merged list of expand nodes.
fn parse_expand(value: &str, depth: usize, lenient: bool) -> Result<Vec<ExpandNode>, LangError> {
    let mut nodes: Vec<ExpandNode> = Vec::new();

    for term in split_top_level(value, ',') {
        let term = term.trim();
        if term.is_empty() {
            return Err(LangError::unsupported("$expand", "empty expand term"));
        }
        let (path, nested) = match term.find('(') {
            Some(open) => {
                if !term.ends_with(')') {
                    return Err(LangError::unsupported(
                        "$expand",
                        format!("unbalanced parentheses in '{}'", term),
                    ));
                }
                (&term[..open], Some(&term[open + 1..term.len() - 1]))
            }
            None => (term, None),
        };

        let segments: Vec<&str> = path.split('/').map(str::trim).collect();
        if let Some(bad) = segments.iter().find(|s| !is_identifier(s)) {
            return Err(LangError::unsupported(
                "$expand",
                format!("'{}' is not a navigation property name", bad),
            ));
        }

        let depth = depth + segments.len();
        if depth > MAX_EXPAND_NESTING {
            return Err(LangError::unsupported(
                "$expand",
                format!("expansions nest deeper than {} levels", MAX_EXPAND_NESTING),
            ));
        }

        let options = match nested {
            Some(inner) => parse_nested(inner, depth, lenient)?,
            None => QueryOptions::default(),
        };

        // `A/B/C(opts)` is `A($expand=B($expand=C(opts)))`.
        let mut node = ExpandNode {
            relation: segments[segments.len() - 1].to_string(),
            options,
        };
        for name in segments[..segments.len() - 1].iter().rev() {
            let mut parent = ExpandNode::new(*name);
            parent.options.expand.push(node);
            node = parent;
        }
        merge_expand(&mut nodes, node);
    }

    Ok(nodes)
}

fn parse_nested(inner: &str, depth: usize, lenient: bool) -> Result<QueryOptions, LangError> {
    let mut options = QueryOptions::default();
    let mut seen = HashSet::new();
    for part in split_top_level(inner, ';') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let (key, value) = part.split_once('=').unwrap_or((part, ""));
        apply_option(&mut options, &mut seen, key.trim(), value, Level::Nested(depth), lenient)?;
    }
    Ok(options)
}

/// Add `node` to `nodes`, folding it into an existing node for the same
/// relation. Options already set on the existing node win.
fn merge_expand(nodes: &mut Vec<ExpandNode>, node: ExpandNode) {
    let Some(idx) = nodes.iter().position(|n| n.relation == node.relation) else {
        nodes.push(node);
        return;
    };

    let into = &mut nodes[idx].options;
    let from = node.options;
    if into.filter.is_none() {
        into.filter = from.filter;
    }
    if into.select.is_none() {
        into.select = from.select;
    }
    if into.orderby.is_empty() {
        into.orderby = from.orderby;
    }
    into.top = into.top.or(from.top);
    into.skip = into.skip.or(from.skip);
    into.count |= from.count;
    for (key, value) in from.raw {
        if !into.raw.iter().any(|(k, _)| *k == key) {
            into.raw.push((key, value));
        }
    }
    for child in from.expand {
        merge_expand(&mut into.expand, child);
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Split on `sep` outside of parentheses and single-quoted strings.
fn split_top_level(s: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut in_quote = false;
    let mut start = 0;

    for (i, c) in s.char_indices() {
        match c {
            '\'' => in_quote = !in_quote,
            '(' if !in_quote => depth += 1,
            ')' if !in_quote => depth = depth.saturating_sub(1),
            c if c == sep && !in_quote && depth == 0 => {
                parts.push(&s[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&s[start..]);
    parts
}
