//! Gateway configuration.
//!
//! Every option can be given on the command line or through the
//! environment variable named next to it.

use std::time::Duration;

use clap::{ArgAction, Parser};
use sta_core::{CountMode, EngineConfig};

/// SensorThings gateway command line arguments.
#[derive(Debug, Parser)]
#[command(name = "sta-gateway")]
#[command(about = "SensorThings API gateway over PostgreSQL")]
pub struct Args {
    /// Address to listen on for HTTP requests.
    #[arg(short, long, env = "STA_LISTEN", default_value = "0.0.0.0:8018")]
    pub listen: String,

    /// Public scheme, host and port used in generated links.
    #[arg(long, env = "HOSTNAME", default_value = "http://localhost:8018")]
    pub hostname: String,

    /// Path prefix in front of the API version (e.g. `/istsos4`).
    #[arg(long, env = "SUBPATH", default_value = "")]
    pub subpath: String,

    /// API version path segment.
    #[arg(long = "api-version", env = "VERSION", default_value = "/v1.1")]
    pub api_version: String,

    /// Full connection URL; overrides the individual POSTGRES_* settings.
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: Option<String>,

    #[arg(long, env = "POSTGRES_HOST", default_value = "localhost")]
    pub postgres_host: String,

    #[arg(long, env = "POSTGRES_PORT", default_value_t = 5432)]
    pub postgres_port: u16,

    #[arg(long, env = "POSTGRES_DB", default_value = "sensorthings")]
    pub postgres_db: String,

    #[arg(long, env = "POSTGRES_USER", default_value = "postgres")]
    pub postgres_user: String,

    #[arg(long, env = "POSTGRES_PASSWORD", default_value = "")]
    pub postgres_password: String,

    /// Database schema holding the SensorThings tables.
    #[arg(long, env = "STA_SCHEMA", default_value = "sensorthings")]
    pub schema: String,

    /// Steady number of pooled connections.
    #[arg(long, env = "PG_POOL_SIZE", default_value_t = 10)]
    pub pg_pool_size: u32,

    /// Extra connections allowed on top of the pool size.
    #[arg(long, env = "PG_MAX_OVERFLOW", default_value_t = 0)]
    pub pg_max_overflow: u32,

    /// Seconds to wait for a pooled connection.
    #[arg(long, env = "PG_POOL_TIMEOUT", default_value_t = 30.0)]
    pub pg_pool_timeout: f64,

    /// FULL, LIMIT_ESTIMATE or ESTIMATE_LIMIT.
    #[arg(long, env = "COUNT_MODE", default_value = "FULL")]
    pub count_mode: CountMode,

    #[arg(long, env = "COUNT_ESTIMATE_THRESHOLD", default_value_t = sta_core::config::DEFAULT_COUNT_ESTIMATE_THRESHOLD)]
    pub count_estimate_threshold: u64,

    /// Page size when `$top` is absent.
    #[arg(long, env = "TOP_VALUE", default_value_t = sta_core::config::DEFAULT_TOP)]
    pub top_value: u64,

    /// Largest accepted `$top`.
    #[arg(long, env = "MAX_TOP", default_value_t = sta_core::config::DEFAULT_MAX_TOP)]
    pub max_top: u64,

    /// Root rows resolved per chunk.
    #[arg(long, env = "PARTITION_CHUNK", default_value_t = sta_core::config::DEFAULT_PARTITION_CHUNK)]
    pub partition_chunk: usize,

    /// Serve version history (`$as_of`, `$from_to`, Commits).
    #[arg(long, env = "VERSIONING", action = ArgAction::Set, default_value_t = false)]
    pub versioning: bool,

    #[arg(long, env = "MAX_EXPAND_DEPTH", default_value_t = 5)]
    pub max_expand_depth: usize,

    #[arg(long, env = "MAX_EXPAND_BREADTH", default_value_t = 10)]
    pub max_expand_breadth: usize,

    /// Bound on one request, in milliseconds.
    #[arg(long, env = "REQUEST_TIMEOUT_MS", default_value_t = sta_core::config::DEFAULT_REQUEST_TIMEOUT_SECS * 1000)]
    pub request_timeout_ms: u64,

    /// Ignore unknown query options instead of rejecting them.
    #[arg(long, env = "LENIENT_QUERY_OPTIONS", action = ArgAction::Set, default_value_t = false)]
    pub lenient_query_options: bool,

    /// Answer 404 when a collection matches nothing.
    #[arg(long, env = "EMPTY_COLLECTION_NOT_FOUND", action = ArgAction::Set, default_value_t = true)]
    pub empty_collection_not_found: bool,
}

/// Gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Address to listen on for HTTP requests.
    pub listen_addr: String,
    /// PostgreSQL connection URL.
    pub database_url: String,
    /// Database schema holding the SensorThings tables.
    pub schema: String,
    /// Path the API is served under, e.g. `/istsos4/v1.1`.
    pub route_prefix: String,
    pub pool_size: u32,
    pub pool_max_overflow: u32,
    /// Timeout when acquiring a pooled connection.
    pub pool_timeout: Duration,
    /// Engine settings shared by every request.
    pub engine: EngineConfig,
}

impl GatewayConfig {
    /// Upper bound on open connections.
    pub fn max_connections(&self) -> u32 {
        self.pool_size.saturating_add(self.pool_max_overflow).max(1)
    }
}

fn route_prefix(subpath: &str, version: &str) -> String {
    let mut prefix = String::new();
    for part in [subpath, version] {
        let part = part.trim_matches('/');
        if !part.is_empty() {
            prefix.push('/');
            prefix.push_str(part);
        }
    }
    prefix
}

impl From<&Args> for GatewayConfig {
    fn from(args: &Args) -> Self {
        let route_prefix = route_prefix(&args.subpath, &args.api_version);
        let base_url = format!("{}{}", args.hostname.trim_end_matches('/'), route_prefix);
        let database_url = args.database_url.clone().unwrap_or_else(|| {
            format!(
                "postgres://{}:{}@{}:{}/{}",
                args.postgres_user,
                args.postgres_password,
                args.postgres_host,
                args.postgres_port,
                args.postgres_db
            )
        });

        let engine = EngineConfig::new(base_url)
            .with_count_mode(args.count_mode)
            .with_count_estimate_threshold(args.count_estimate_threshold)
            .with_page_sizes(args.top_value, args.max_top)
            .with_expand_limits(args.max_expand_depth, args.max_expand_breadth)
            .with_versioning(args.versioning)
            .with_partition_chunk(args.partition_chunk)
            .with_request_timeout(Duration::from_millis(args.request_timeout_ms))
            .with_lenient_options(args.lenient_query_options)
            .with_empty_collection_not_found(args.empty_collection_not_found);

        Self {
            listen_addr: args.listen.clone(),
            database_url,
            schema: args.schema.clone(),
            route_prefix,
            pool_size: args.pg_pool_size,
            pool_max_overflow: args.pg_max_overflow,
            pool_timeout: Duration::from_secs_f64(args.pg_pool_timeout.max(0.0)),
            engine,
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8018".to_string(),
            database_url: "postgres://postgres:@localhost:5432/sensorthings".to_string(),
            schema: "sensorthings".to_string(),
            route_prefix: "/v1.1".to_string(),
            pool_size: 10,
            pool_max_overflow: 0,
            pool_timeout: Duration::from_secs(30),
            engine: EngineConfig::default(),
        }
    }
}
