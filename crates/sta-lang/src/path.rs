//! Resource path resolution.
//!
//! Turns `/Datastreams(3)/Observations` into an ordered chain of
//! [`PathSegment`]s, checking every navigation hop against the catalog.

use std::fmt;

use sta_schema::{Catalog, EntityType, Relation};

use crate::error::LangError;

/// Entity key as written in a path segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityId {
    /// `(42)`
    Int(i64),
    /// `('abc')`
    Str(String),
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityId::Int(i) => write!(f, "{}", i),
            EntityId::Str(s) => write!(f, "'{}'", s.replace('\'', "''")),
        }
    }
}

/// What a path addresses below an entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubResource {
    /// `.../name`
    Property(String),
    /// `.../name/$value`
    PropertyValue(String),
    /// `.../$ref`
    Ref,
}

/// One hop of a resolved path.
#[derive(Debug, Clone, PartialEq)]
pub struct PathSegment {
    pub entity: EntityType,
    pub id: Option<EntityId>,
    /// Relation followed from the previous segment; `None` for the root.
    pub relation: Option<Relation>,
    /// Only ever set on the last segment.
    pub sub_resource: Option<SubResource>,
}

/// Shape of the response a path asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseShape {
    Collection,
    Entity,
    Property,
    PropertyValue,
    Ref,
    RefCollection,
}

impl ResponseShape {
    /// Whether the response is a `value` array.
    pub fn is_collection(self) -> bool {
        matches!(self, ResponseShape::Collection | ResponseShape::RefCollection)
    }
}

/// A validated resource path.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedPath {
    pub segments: Vec<PathSegment>,
    pub shape: ResponseShape,
}

impl ResolvedPath {
    /// The last segment, which determines the entity type returned.
    pub fn target(&self) -> &PathSegment {
        // resolve() never yields an empty chain
        &self.segments[self.segments.len() - 1]
    }

    /// The sub-resource addressed by the last segment, if any.
    pub fn sub_resource(&self) -> Option<&SubResource> {
        self.target().sub_resource.as_ref()
    }
}

/// Resolves resource paths against a [`Catalog`].
pub struct PathResolver<'a> {
    catalog: &'a Catalog,
}

impl<'a> PathResolver<'a> {
    /// Create a resolver over the given catalog.
    pub fn new(catalog: &'a Catalog) -> Self {
        Self { catalog }
    }

    /// Resolve a path relative to the service root, e.g.
    /// `/Things(1)/Datastreams`.
    ///
    /// `path` is taken as it appears in the request line, still
    /// percent-encoded. Each segment is decoded exactly once.
    pub fn resolve(&self, path: &str) -> Result<ResolvedPath, LangError> {
        let trimmed = path.trim_matches('/');
        if trimmed.is_empty() {
            return Err(LangError::invalid_path("empty resource path"));
        }

        let parts = split_segments(trimmed)
            .into_iter()
            .map(|raw| {
                urlencoding::decode(raw)
                    .map(|s| s.into_owned())
                    .map_err(|_| LangError::invalid_path(format!("segment '{}' is not valid UTF-8", raw)))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let (name, id) = split_key(&parts[0])?;
        let entity = self
            .catalog
            .resolve_collection(name)
            .ok_or_else(|| LangError::invalid_path(format!("unknown entity set '{}'", name)))?;
        let mut single = id.is_some();
        let mut segments = vec![PathSegment {
            entity,
            id,
            relation: None,
            sub_resource: None,
        }];

        let mut idx = 1;
        while idx < parts.len() {
            let part = parts[idx].as_str();
            let is_last = idx + 1 == parts.len();
            let current = segments[segments.len() - 1].entity;

            if part == "$ref" {
                if !is_last {
                    return Err(LangError::invalid_path("$ref must be the last segment"));
                }
                let shape = if single {
                    ResponseShape::Ref
                } else {
                    ResponseShape::RefCollection
                };
                set_sub_resource(&mut segments, SubResource::Ref);
                return Ok(ResolvedPath { segments, shape });
            }

            if !single {
                return Err(LangError::invalid_path(format!(
                    "'{}' cannot follow a collection; address a single {} first",
                    part, current
                )));
            }

            let (name, id) = split_key(part)?;
            if let Some(relation) = self.catalog.relation(current, name) {
                if id.is_some() && relation.is_to_one() {
                    return Err(LangError::invalid_path(format!(
                        "'{}' addresses a single entity and takes no key",
                        name
                    )));
                }
                single = relation.is_to_one() || id.is_some();
                segments.push(PathSegment {
                    entity: relation.target,
                    id,
                    relation: Some(relation),
                    sub_resource: None,
                });
                idx += 1;
                continue;
            }

            if id.is_none() && self.catalog.property(current, name).is_some() {
                let (sub, shape) = match parts.get(idx + 1).map(String::as_str) {
                    None => (SubResource::Property(name.to_string()), ResponseShape::Property),
                    Some("$value") if idx + 2 == parts.len() => (
                        SubResource::PropertyValue(name.to_string()),
                        ResponseShape::PropertyValue,
                    ),
                    Some(other) => {
                        return Err(LangError::invalid_path(format!(
                            "unexpected segment '{}' after property '{}'",
                            other, name
                        )))
                    }
                };
                set_sub_resource(&mut segments, sub);
                return Ok(ResolvedPath { segments, shape });
            }

            return Err(LangError::invalid_path(format!(
                "'{}' is neither a navigation property nor a property of {}",
                part, current
            )));
        }

        let shape = if single {
            ResponseShape::Entity
        } else {
            ResponseShape::Collection
        };
        Ok(ResolvedPath { segments, shape })
    }
}

fn set_sub_resource(segments: &mut [PathSegment], sub: SubResource) {
    if let Some(last) = segments.last_mut() {
        last.sub_resource = Some(sub);
    }
}

/// Split on `/` outside of quoted keys.
fn split_segments(path: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut in_quote = false;
    let mut start = 0;
    for (i, c) in path.char_indices() {
        match c {
            '\'' => in_quote = !in_quote,
            '/' if !in_quote => {
                parts.push(&path[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&path[start..]);
    parts
}

/// Split `Name(key)` into its name and parsed key.
fn split_key(segment: &str) -> Result<(&str, Option<EntityId>), LangError> {
    let Some(open) = segment.find('(') else {
        if segment.is_empty() {
            return Err(LangError::invalid_path("empty path segment"));
        }
        return Ok((segment, None));
    };
    if !segment.ends_with(')') {
        return Err(LangError::invalid_path(format!(
            "malformed key in '{}'",
            segment
        )));
    }
    let name = &segment[..open];
    let key = &segment[open + 1..segment.len() - 1];
    Ok((name, Some(parse_key(key).ok_or_else(|| {
        LangError::invalid_path(format!("malformed key '{}' in '{}'", key, segment))
    })?)))
}

fn parse_key(key: &str) -> Option<EntityId> {
    if let Some(quoted) = key.strip_prefix('\'').and_then(|k| k.strip_suffix('\'')) {
        if quoted.replace("''", "").contains('\'') {
            return None;
        }
        return Some(EntityId::Str(quoted.replace("''", "'")));
    }
    key.parse::<i64>().ok().map(EntityId::Int)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn resolve(path: &str) -> Result<ResolvedPath, LangError> {
        PathResolver::new(&Catalog::default()).resolve(path)
    }

    #[test]
    fn test_collection() {
        let path = resolve("/Things").unwrap();
        assert_eq!(path.shape, ResponseShape::Collection);
        assert_eq!(path.target().entity, EntityType::Thing);
        assert_eq!(path.target().id, None);
    }

    #[test]
    fn test_navigation_chain() {
        let path = resolve("/Datastreams(3)/Observations").unwrap();
        assert_eq!(path.shape, ResponseShape::Collection);
        assert_eq!(path.segments.len(), 2);
        assert_eq!(path.segments[0].id, Some(EntityId::Int(3)));
        assert_eq!(path.target().entity, EntityType::Observation);
        assert_eq!(
            path.target().relation.map(|r| r.name),
            Some("Observations")
        );
    }

    #[test]
    fn test_to_one_navigation_is_single() {
        let path = resolve("Observations(7)/Datastream/Thing").unwrap();
        assert_eq!(path.shape, ResponseShape::Entity);
        assert_eq!(path.target().entity, EntityType::Thing);
    }

    #[test]
    fn test_keyed_navigation() {
        let path = resolve("Things(1)/Datastreams(4)/Sensor").unwrap();
        assert_eq!(path.segments[1].id, Some(EntityId::Int(4)));
        assert_eq!(path.shape, ResponseShape::Entity);
    }

    #[test]
    fn test_property_and_value() {
        let path = resolve("Things(1)/name").unwrap();
        assert_eq!(path.shape, ResponseShape::Property);
        assert_eq!(
            path.sub_resource(),
            Some(&SubResource::Property("name".into()))
        );

        let path = resolve("Things(1)/name/$value").unwrap();
        assert_eq!(path.shape, ResponseShape::PropertyValue);
    }

    #[test]
    fn test_refs() {
        assert_eq!(
            resolve("Datastreams(1)/Observations/$ref").unwrap().shape,
            ResponseShape::RefCollection
        );
        assert_eq!(
            resolve("Datastreams(1)/Sensor/$ref").unwrap().shape,
            ResponseShape::Ref
        );
        assert_eq!(resolve("Things/$ref").unwrap().shape, ResponseShape::RefCollection);
        assert!(resolve("Things(1)/$ref/name").is_err());
    }

    #[test]
    fn test_string_key() {
        let path = resolve("Things('it''s')").unwrap();
        assert_eq!(path.target().id, Some(EntityId::Str("it's".into())));
        assert_eq!(path.target().id.as_ref().unwrap().to_string(), "'it''s'");
    }

    #[test]
    fn test_illegal_navigation() {
        let err = resolve("Datastreams(1)/Locations").unwrap_err();
        assert!(matches!(err, LangError::InvalidPath(_)));
    }

    #[test]
    fn test_invalid_paths() {
        for path in [
            "",
            "/Widgets",
            "/Things(abc)",
            "/Things(1",
            "/Things/Datastreams",
            "/Observations(1)/Datastream(2)",
            "/Things(1)/name/extra",
            "/Things(1)/$value",
            "/Commits",
        ] {
            assert!(
                matches!(resolve(path), Err(LangError::InvalidPath(_))),
                "{} should be rejected",
                path
            );
        }
    }

    #[test]
    fn test_commits_with_versioning() {
        let catalog = Catalog::default().with_versioning(true);
        let resolver = PathResolver::new(&catalog);
        let path = resolver.resolve("/Things(1)/Commit").unwrap();
        assert_eq!(path.target().entity, EntityType::Commit);
        assert!(resolver.resolve("/Commits(2)").is_ok());
    }

    #[test]
    fn test_percent_encoded_key() {
        let path = resolve("/Things(%27a%20b%27)").unwrap();
        assert_eq!(path.target().id, Some(EntityId::Str("a b".into())));

        let path = resolve("/Things('a%2525b')").unwrap();
        assert_eq!(path.target().id, Some(EntityId::Str("a%25b".into())));
    }
}
