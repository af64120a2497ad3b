//! Engine configuration.
//!
//! An [`EngineConfig`] is built once at startup and shared behind an `Arc`;
//! every request reads the same immutable snapshot.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default page size when `$top` is absent.
pub const DEFAULT_TOP: u64 = 100;

/// Default upper bound for `$top`.
pub const DEFAULT_MAX_TOP: u64 = 10_000;

/// Default row threshold above which estimated counts are used.
pub const DEFAULT_COUNT_ESTIMATE_THRESHOLD: u64 = 10_000;

/// Default number of root rows resolved per chunk.
pub const DEFAULT_PARTITION_CHUNK: usize = 200;

/// Default request timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// How `@iot.count` is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CountMode {
    /// Always run an exact `COUNT(*)`.
    #[default]
    Full,
    /// Count exactly up to the threshold; fall back to the planner estimate
    /// when the probe saturates.
    LimitEstimate,
    /// Ask the planner first; count exactly only when the estimate is below
    /// the threshold.
    EstimateLimit,
}

impl FromStr for CountMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "FULL" => Ok(CountMode::Full),
            "LIMIT_ESTIMATE" => Ok(CountMode::LimitEstimate),
            "ESTIMATE_LIMIT" => Ok(CountMode::EstimateLimit),
            other => Err(format!(
                "unknown count mode '{}', expected FULL, LIMIT_ESTIMATE or ESTIMATE_LIMIT",
                other
            )),
        }
    }
}

impl fmt::Display for CountMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CountMode::Full => "FULL",
            CountMode::LimitEstimate => "LIMIT_ESTIMATE",
            CountMode::EstimateLimit => "ESTIMATE_LIMIT",
        })
    }
}

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Absolute URL of the service root, without trailing slash
    /// (e.g. `http://localhost:8018/v1.1`).
    pub base_url: String,

    /// Counting strategy for `$count=true`.
    pub count_mode: CountMode,

    /// Row threshold used by the estimate-preferring count modes.
    pub count_estimate_threshold: u64,

    /// Page size when `$top` is absent.
    pub default_top: u64,

    /// Upper bound `$top` is clamped to.
    pub max_top: u64,

    /// Maximum `$expand` nesting depth.
    pub max_expand_depth: usize,

    /// Maximum number of `$expand` terms on one level.
    pub max_expand_breadth: usize,

    /// Whether version history (`$as_of`, `$from_to`, Commits) is available.
    pub versioning: bool,

    /// Root rows pulled from the cursor before resolving their expansions.
    pub partition_chunk: usize,

    /// Bound on planning plus execution of one request.
    pub request_timeout: Duration,

    /// Ignore unknown query options instead of rejecting them.
    pub lenient_options: bool,

    /// Answer an empty collection with 404 rather than an empty `value`.
    pub empty_collection_not_found: bool,

    /// Chunks buffered between the producer task and the response body.
    pub stream_buffer: usize,
}

impl EngineConfig {
    /// Create a configuration for the given service root URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            count_mode: CountMode::default(),
            count_estimate_threshold: DEFAULT_COUNT_ESTIMATE_THRESHOLD,
            default_top: DEFAULT_TOP,
            max_top: DEFAULT_MAX_TOP,
            max_expand_depth: 5,
            max_expand_breadth: 10,
            versioning: false,
            partition_chunk: DEFAULT_PARTITION_CHUNK,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            lenient_options: false,
            empty_collection_not_found: true,
            stream_buffer: 16,
        }
    }

    /// Set the count mode.
    pub fn with_count_mode(mut self, mode: CountMode) -> Self {
        self.count_mode = mode;
        self
    }

    /// Set the estimate threshold.
    pub fn with_count_estimate_threshold(mut self, threshold: u64) -> Self {
        self.count_estimate_threshold = threshold;
        self
    }

    /// Set the default and maximum page sizes.
    pub fn with_page_sizes(mut self, default_top: u64, max_top: u64) -> Self {
        self.max_top = max_top.max(1);
        self.default_top = default_top.clamp(1, self.max_top);
        self
    }

    /// Set the expand depth and breadth limits.
    pub fn with_expand_limits(mut self, depth: usize, breadth: usize) -> Self {
        self.max_expand_depth = depth;
        self.max_expand_breadth = breadth;
        self
    }

    /// Enable or disable version history support.
    pub fn with_versioning(mut self, enabled: bool) -> Self {
        self.versioning = enabled;
        self
    }

    /// Set the partition chunk size.
    pub fn with_partition_chunk(mut self, chunk: usize) -> Self {
        self.partition_chunk = chunk.max(1);
        self
    }

    /// Set the request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Ignore unknown query options.
    pub fn with_lenient_options(mut self, lenient: bool) -> Self {
        self.lenient_options = lenient;
        self
    }

    /// Choose between 404 and an empty `value` for empty collections.
    pub fn with_empty_collection_not_found(mut self, not_found: bool) -> Self {
        self.empty_collection_not_found = not_found;
        self
    }

    /// Set the producer channel buffer.
    pub fn with_stream_buffer(mut self, buffer: usize) -> Self {
        self.stream_buffer = buffer.max(1);
        self
    }

    /// Clamp a requested page size to the configured bounds.
    pub fn effective_top(&self, requested: Option<u64>) -> u64 {
        requested.unwrap_or(self.default_top).min(self.max_top)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new("http://localhost:8018/v1.1")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_mode_parse() {
        assert_eq!("FULL".parse::<CountMode>(), Ok(CountMode::Full));
        assert_eq!(
            "limit_estimate".parse::<CountMode>(),
            Ok(CountMode::LimitEstimate)
        );
        assert!("SOMETIMES".parse::<CountMode>().is_err());
        assert_eq!(CountMode::EstimateLimit.to_string(), "ESTIMATE_LIMIT");
    }

    #[test]
    fn test_effective_top() {
        let config = EngineConfig::default().with_page_sizes(50, 200);
        assert_eq!(config.effective_top(None), 50);
        assert_eq!(config.effective_top(Some(10)), 10);
        assert_eq!(config.effective_top(Some(5_000)), 200);
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let config = EngineConfig::new("http://example.org/sta/v1.1/");
        assert_eq!(config.base_url, "http://example.org/sta/v1.1");
    }
}
