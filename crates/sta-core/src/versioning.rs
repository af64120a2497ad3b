//! Temporal intent and system-time restrictions.
//!
//! Versioned rows carry a `systemTimeValidity` range. The live table holds
//! current versions; superseded versions live in `<Table>_traveltime`.
//! Reads that look into the past select from both.

use chrono::{DateTime, Utc};
use sta_lang::{QueryOptions, TimeWindow};
use sta_schema::{Catalog, EntityType, SYSTEM_TIME_VALIDITY};

use crate::error::{Error, Result};
use crate::sql::{column, ident, SqlBuilder, SqlParam};

/// Which row versions a request admits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemporalIntent {
    /// Rows valid now.
    Current,
    /// Rows valid at the given instant.
    AsOf(DateTime<Utc>),
    /// Every version, optionally those overlapping a window.
    AllVersions(Option<TimeWindow>),
}

impl TemporalIntent {
    /// Derive the intent from top-level `$as_of` / `$from_to`.
    pub fn from_options(options: &QueryOptions, versioning: bool) -> Result<Self> {
        let requested = match (options.as_of, options.from_to) {
            (Some(_), Some(_)) => {
                return Err(Error::unsupported(
                    "$as_of",
                    "cannot be combined with $from_to",
                ))
            }
            (Some(instant), None) => Some(("$as_of", TemporalIntent::AsOf(instant))),
            (None, Some(window)) => Some(("$from_to", TemporalIntent::AllVersions(Some(window)))),
            (None, None) => None,
        };

        match requested {
            None => Ok(TemporalIntent::Current),
            Some((option, _)) if !versioning => Err(Error::unsupported(
                option,
                "version history is not enabled on this service",
            )),
            Some((_, intent)) => Ok(intent),
        }
    }

    /// Whether rows may come from the history tables.
    pub fn reads_history(&self) -> bool {
        !matches!(self, TemporalIntent::Current)
    }
}

/// Folds a [`TemporalIntent`] into the SQL of one request.
#[derive(Debug, Clone, Copy)]
pub struct VersioningResolver<'a> {
    catalog: &'a Catalog,
    intent: TemporalIntent,
}

impl<'a> VersioningResolver<'a> {
    /// Create a resolver for the given intent.
    pub fn new(catalog: &'a Catalog, intent: TemporalIntent) -> Self {
        Self { catalog, intent }
    }

    /// The intent being applied.
    pub fn intent(&self) -> TemporalIntent {
        self.intent
    }

    /// Resolver for entities reached from the requested ones (expansions,
    /// path parents, filter joins). Full history applies to the addressed
    /// entities only; related rows resolve to their current version.
    pub fn for_related(&self) -> Self {
        let intent = match self.intent {
            TemporalIntent::AllVersions(_) => TemporalIntent::Current,
            other => other,
        };
        Self {
            catalog: self.catalog,
            intent,
        }
    }

    fn applies(&self, entity: EntityType) -> bool {
        self.catalog.versioning() && entity.is_versioned()
    }

    /// Relation expression to select `entity` rows from.
    pub fn source(&self, entity: EntityType) -> String {
        if !self.applies(entity) || !self.intent.reads_history() {
            return self.catalog.entity_table(entity);
        }
        let columns = self
            .catalog
            .stored_columns(entity)
            .iter()
            .map(|c| ident(c))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "(SELECT {cols} FROM {live} UNION ALL SELECT {cols} FROM {history})",
            cols = columns,
            live = self.catalog.entity_table(entity),
            history = self.catalog.history_table(entity),
        )
    }

    /// Predicate restricting `alias` to the admitted versions, if any.
    pub fn restrict(
        &self,
        entity: EntityType,
        alias: &str,
        builder: &mut SqlBuilder,
    ) -> Option<String> {
        if !self.applies(entity) {
            return None;
        }
        let validity = column(alias, SYSTEM_TIME_VALIDITY);
        match self.intent {
            TemporalIntent::Current => Some(format!("{} @> now()", validity)),
            TemporalIntent::AsOf(instant) => {
                let p = builder.bind(SqlParam::Timestamp(instant));
                Some(format!("{} @> {}::timestamptz", validity, p))
            }
            TemporalIntent::AllVersions(Some(window)) => {
                let from = builder.bind(SqlParam::Timestamp(window.from));
                let to = builder.bind(SqlParam::Timestamp(window.to));
                Some(format!(
                    "{} && tstzrange({}::timestamptz, {}::timestamptz)",
                    validity, from, to
                ))
            }
            TemporalIntent::AllVersions(None) => None,
        }
    }

    /// Sort key exposing history in validity order, without direction.
    pub fn history_order(&self, entity: EntityType, alias: &str) -> Option<String> {
        match self.intent {
            TemporalIntent::AllVersions(_) if self.applies(entity) => Some(format!(
                "lower({})",
                column(alias, SYSTEM_TIME_VALIDITY)
            )),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn instant(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_intent_from_options() {
        let mut options = QueryOptions::default();
        assert_eq!(
            TemporalIntent::from_options(&options, false).unwrap(),
            TemporalIntent::Current
        );

        options.as_of = Some(instant(1));
        assert!(matches!(
            TemporalIntent::from_options(&options, false),
            Err(Error::UnsupportedQueryOption { .. })
        ));
        assert_eq!(
            TemporalIntent::from_options(&options, true).unwrap(),
            TemporalIntent::AsOf(instant(1))
        );

        options.from_to = Some(TimeWindow {
            from: instant(1),
            to: instant(2),
        });
        assert!(TemporalIntent::from_options(&options, true).is_err());
    }

    #[test]
    fn test_current_is_noop_without_versioning() {
        let catalog = Catalog::default();
        let resolver = VersioningResolver::new(&catalog, TemporalIntent::Current);
        let mut builder = SqlBuilder::new();
        assert_eq!(resolver.restrict(EntityType::Thing, "t0", &mut builder), None);
        assert_eq!(
            resolver.source(EntityType::Thing),
            "\"sensorthings\".\"Thing\""
        );
    }

    #[test]
    fn test_as_of_reads_history() {
        let catalog = Catalog::default().with_versioning(true);
        let resolver = VersioningResolver::new(&catalog, TemporalIntent::AsOf(instant(3)));
        let mut builder = SqlBuilder::new();
        let predicate = resolver
            .restrict(EntityType::Thing, "t0", &mut builder)
            .unwrap();
        assert_eq!(predicate, "t0.\"systemTimeValidity\" @> $1::timestamptz");
        assert_eq!(builder.params(), &[SqlParam::Timestamp(instant(3))]);

        let source = resolver.source(EntityType::Thing);
        assert!(source.contains("UNION ALL"));
        assert!(source.contains("\"Thing_traveltime\""));
        assert!(source.contains("\"commit_id\""));

        // Commits are never versioned
        assert_eq!(resolver.restrict(EntityType::Commit, "c", &mut builder), None);
    }

    #[test]
    fn test_all_versions() {
        let catalog = Catalog::default().with_versioning(true);
        let window = TimeWindow {
            from: instant(1),
            to: instant(2),
        };
        let resolver =
            VersioningResolver::new(&catalog, TemporalIntent::AllVersions(Some(window)));
        let mut builder = SqlBuilder::new();
        let predicate = resolver
            .restrict(EntityType::Sensor, "t0", &mut builder)
            .unwrap();
        assert!(predicate.contains("&& tstzrange($1::timestamptz, $2::timestamptz)"));
        assert_eq!(
            resolver.history_order(EntityType::Sensor, "t0").as_deref(),
            Some("lower(t0.\"systemTimeValidity\")")
        );

        let unbounded = VersioningResolver::new(&catalog, TemporalIntent::AllVersions(None));
        assert_eq!(unbounded.restrict(EntityType::Sensor, "t0", &mut builder), None);

        let related = resolver.for_related();
        assert_eq!(related.intent(), TemporalIntent::Current);
        assert_eq!(related.history_order(EntityType::Sensor, "t0"), None);
    }
}
