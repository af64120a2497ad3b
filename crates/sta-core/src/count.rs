//! `@iot.count` strategy.
//!
//! Exact counts over large filtered sets cost a full scan. The estimate
//! modes bound that cost by consulting the store's planner statistics once
//! the matching set is known (or assumed) to be larger than a threshold.

use tracing::debug;

use crate::config::{CountMode, EngineConfig};
use crate::error::Result;
use crate::sql::SqlQuery;
use crate::store::Session;

/// How the count of one request is obtained.
#[derive(Debug, Clone, PartialEq)]
pub enum CountInstruction {
    /// Exact `COUNT(*)`.
    Exact { count: SqlQuery },
    /// Exact count capped at `threshold + 1`; the planner estimate is used
    /// when the cap is reached.
    Probe {
        probe: SqlQuery,
        estimate: SqlQuery,
        threshold: u64,
    },
    /// Planner estimate; an exact count is run when it is under
    /// `threshold`.
    EstimateFirst {
        estimate: SqlQuery,
        count: SqlQuery,
        threshold: u64,
    },
}

/// Chooses and resolves [`CountInstruction`]s.
pub struct CountStrategist;

impl CountStrategist {
    /// Build the instruction for `base`, a `SELECT 1 FROM ... WHERE ...`
    /// over the rows to count.
    pub fn instruction(config: &EngineConfig, base: SqlQuery) -> CountInstruction {
        let threshold = config.count_estimate_threshold;
        let exact = SqlQuery::new(
            format!("SELECT COUNT(*) FROM ({}) AS \"__count\"", base.sql),
            base.params.clone(),
        );
        match config.count_mode {
            CountMode::Full => CountInstruction::Exact { count: exact },
            CountMode::LimitEstimate => CountInstruction::Probe {
                probe: SqlQuery::new(
                    format!(
                        "SELECT COUNT(*) FROM ({} LIMIT {}) AS \"__count\"",
                        base.sql,
                        threshold.saturating_add(1)
                    ),
                    base.params.clone(),
                ),
                estimate: base,
                threshold,
            },
            CountMode::EstimateLimit => CountInstruction::EstimateFirst {
                estimate: base,
                count: exact,
                threshold,
            },
        }
    }

    /// Execute an instruction.
    pub async fn resolve(session: &dyn Session, instruction: &CountInstruction) -> Result<i64> {
        match instruction {
            CountInstruction::Exact { count } => session.scalar(count.clone()).await,
            CountInstruction::Probe {
                probe,
                estimate,
                threshold,
            } => {
                let counted = session.scalar(probe.clone()).await?;
                if !Self::saturated(counted, *threshold) {
                    return Ok(counted);
                }
                let estimated = session.estimate(estimate.clone()).await?;
                debug!(counted, estimated, threshold, "count probe saturated, using estimate");
                // the probe proves at least `counted` rows exist
                Ok(estimated.max(counted))
            }
            CountInstruction::EstimateFirst {
                estimate,
                count,
                threshold,
            } => {
                let estimated = session.estimate(estimate.clone()).await?;
                if Self::saturated(estimated, *threshold) {
                    debug!(estimated, threshold, "estimate over threshold, skipping exact count");
                    return Ok(estimated);
                }
                session.scalar(count.clone()).await
            }
        }
    }

    fn saturated(value: i64, threshold: u64) -> bool {
        u64::try_from(value).map_or(false, |v| v > threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::SqlParam;
    use crate::testing::{Answer, ScriptedStore};

    fn base() -> SqlQuery {
        SqlQuery::new(
            "SELECT 1 FROM \"sensorthings\".\"Observation\" AS t0 WHERE t0.\"id\" > $1",
            vec![SqlParam::Int(3)],
        )
    }

    #[test]
    fn test_instruction_per_mode() {
        let config = EngineConfig::default().with_count_estimate_threshold(100);
        match CountStrategist::instruction(&config, base()) {
            CountInstruction::Exact { count } => {
                assert!(count.sql.starts_with("SELECT COUNT(*) FROM (SELECT 1"));
                assert_eq!(count.params, vec![SqlParam::Int(3)]);
            }
            other => panic!("unexpected {:?}", other),
        }

        let config = config.with_count_mode(CountMode::LimitEstimate);
        match CountStrategist::instruction(&config, base()) {
            CountInstruction::Probe { probe, estimate, .. } => {
                assert!(probe.sql.contains("LIMIT 101) AS \"__count\""));
                assert_eq!(estimate, base());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_probe_under_threshold_is_exact() {
        let store = ScriptedStore::new();
        store.on("LIMIT 11", Answer::Scalar(7));
        let config = EngineConfig::default()
            .with_count_mode(CountMode::LimitEstimate)
            .with_count_estimate_threshold(10);
        let instruction = CountStrategist::instruction(&config, base());
        assert_eq!(CountStrategist::resolve(&store, &instruction).await.unwrap(), 7);
        assert_eq!(store.estimates(), 0);
    }

    #[tokio::test]
    async fn test_probe_saturated_uses_estimate() {
        let store = ScriptedStore::new();
        store.on("LIMIT 11", Answer::Scalar(11));
        store.on("SELECT 1 FROM", Answer::Estimate(52_000));
        let config = EngineConfig::default()
            .with_count_mode(CountMode::LimitEstimate)
            .with_count_estimate_threshold(10);
        let instruction = CountStrategist::instruction(&config, base());
        assert_eq!(
            CountStrategist::resolve(&store, &instruction).await.unwrap(),
            52_000
        );
    }

    #[tokio::test]
    async fn test_estimate_first() {
        let config = EngineConfig::default()
            .with_count_mode(CountMode::EstimateLimit)
            .with_count_estimate_threshold(1_000);
        let instruction = CountStrategist::instruction(&config, base());

        let small = ScriptedStore::new();
        small.on("SELECT 1 FROM", Answer::Estimate(40));
        small.on("COUNT(*)", Answer::Scalar(38));
        assert_eq!(CountStrategist::resolve(&small, &instruction).await.unwrap(), 38);

        let large = ScriptedStore::new();
        large.on("SELECT 1 FROM", Answer::Estimate(80_000));
        assert_eq!(
            CountStrategist::resolve(&large, &instruction).await.unwrap(),
            80_000
        );
        assert_eq!(large.scalars(), 0);
    }
}
