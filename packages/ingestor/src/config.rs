//! Environment Configuration
//!
//! Reads the watcher's settings from environment variables. Everything except
//! the node endpoint has a default.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::filter::{RouterSet, RouterSetError};
use crate::sink::DEFAULT_CHANNEL;
use crate::source::{NodeConfig, DEFAULT_FETCH_TIMEOUT_MS};

/// Bundled router ABI, relative to the working directory
pub const DEFAULT_ABI_PATH: &str = "abis/UniswapV2Router.json";

/// Errors that can occur while reading configuration
#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("NODE_ENDPOINT is not set")]
    MissingEndpoint,

    #[error("Invalid ROUTER_ADDRESSES: {0}")]
    InvalidRouter(#[from] RouterSetError),

    #[error("Invalid {name}: `{value}` is not a non-negative integer")]
    InvalidNumber { name: &'static str, value: String },

    #[error("Invalid SINK: `{0}`, expected stdout, log or redis")]
    InvalidSink(String),

    #[error("SINK=redis requires REDIS_URL")]
    MissingRedisUrl,
}

/// Where records are written
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkKind {
    /// JSON lines on stdout
    Stdout,
    /// Info-level tracing events
    Log,
    /// Redis pub/sub at the given URL
    Redis(String),
}

/// Runtime settings for the watcher binary
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    pub node: NodeConfig,
    pub routers: RouterSet,
    pub abi_paths: Vec<PathBuf>,
    /// `None` disables the per-fetch timeout
    pub fetch_timeout: Option<Duration>,
    /// `None` leaves the number of in-flight hashes unbounded
    pub max_in_flight: Option<usize>,
    pub sink: SinkKind,
    pub redis_channel: String,
}

impl WatcherConfig {
    /// Read configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through an arbitrary variable lookup
    ///
    /// Empty values are treated as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let endpoint = get("NODE_ENDPOINT").ok_or(ConfigError::MissingEndpoint)?;
        let mut node = NodeConfig::with_endpoint(endpoint);
        if let Some(attempts) = parse_number::<u32>("MAX_RECONNECT_ATTEMPTS", get("MAX_RECONNECT_ATTEMPTS"))? {
            node.max_reconnect_attempts = attempts;
        }

        let routers = match get("ROUTER_ADDRESSES") {
            Some(list) => RouterSet::parse(split_list(&list))?,
            None => RouterSet::defaults(),
        };

        let abi_paths = match get("ABI_PATHS") {
            Some(list) => split_list(&list).into_iter().map(PathBuf::from).collect(),
            None => vec![PathBuf::from(DEFAULT_ABI_PATH)],
        };

        let fetch_timeout_ms =
            parse_number::<u64>("FETCH_TIMEOUT_MS", get("FETCH_TIMEOUT_MS"))?.unwrap_or(DEFAULT_FETCH_TIMEOUT_MS);
        let fetch_timeout = (fetch_timeout_ms > 0).then(|| Duration::from_millis(fetch_timeout_ms));

        let max_in_flight = parse_number::<usize>("MAX_IN_FLIGHT", get("MAX_IN_FLIGHT"))?.filter(|n| *n > 0);

        let redis_url = get("REDIS_URL");
        let sink = match get("SINK").map(|v| v.to_ascii_lowercase()).as_deref() {
            None => redis_url.map_or(SinkKind::Stdout, SinkKind::Redis),
            Some("stdout") => SinkKind::Stdout,
            Some("log") => SinkKind::Log,
            Some("redis") => SinkKind::Redis(redis_url.ok_or(ConfigError::MissingRedisUrl)?),
            Some(other) => return Err(ConfigError::InvalidSink(other.to_string())),
        };

        Ok(Self {
            node,
            routers,
            abi_paths,
            fetch_timeout,
            max_in_flight,
            sink,
            redis_channel: get("REDIS_CHANNEL").unwrap_or_else(|| DEFAULT_CHANNEL.to_string()),
        })
    }
}

fn split_list(list: &str) -> Vec<&str> {
    list.split(',').map(str::trim).filter(|s| !s.is_empty()).collect()
}

fn parse_number<T: std::str::FromStr>(name: &'static str, value: Option<String>) -> Result<Option<T>, ConfigError> {
    value
        .map(|v| v.parse::<T>().map_err(|_| ConfigError::InvalidNumber { name, value: v }))
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::address;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<WatcherConfig, ConfigError> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        WatcherConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_endpoint_is_required() {
        assert_eq!(config(&[]).unwrap_err(), ConfigError::MissingEndpoint);
        assert_eq!(config(&[("NODE_ENDPOINT", "  ")]).unwrap_err(), ConfigError::MissingEndpoint);
    }

    #[test]
    fn test_defaults() {
        let config = config(&[("NODE_ENDPOINT", "ws://127.0.0.1:8546")]).unwrap();

        assert_eq!(config.node.endpoint, "ws://127.0.0.1:8546");
        assert_eq!(config.node.max_reconnect_attempts, 10);
        assert_eq!(config.routers, RouterSet::defaults());
        assert_eq!(config.abi_paths, vec![PathBuf::from(DEFAULT_ABI_PATH)]);
        assert_eq!(config.fetch_timeout, Some(Duration::from_millis(10_000)));
        assert_eq!(config.max_in_flight, None);
        assert_eq!(config.sink, SinkKind::Stdout);
        assert_eq!(config.redis_channel, "router_calls");
    }

    #[test]
    fn test_overrides() {
        let config = config(&[
            ("NODE_ENDPOINT", "/tmp/geth.ipc"),
            ("ROUTER_ADDRESSES", "0x7a250d5630b4cf539739df2c5dacb4c659f2488d, 0xE592427A0AEce92De3Edee1F18E0157C05861564"),
            ("ABI_PATHS", "a.json,b.json"),
            ("FETCH_TIMEOUT_MS", "2500"),
            ("MAX_IN_FLIGHT", "64"),
            ("MAX_RECONNECT_ATTEMPTS", "3"),
            ("REDIS_URL", "redis://127.0.0.1:6379"),
            ("REDIS_CHANNEL", "calls"),
        ])
        .unwrap();

        assert_eq!(config.routers.len(), 2);
        assert!(config
            .routers
            .is_router(Some(&address!("E592427A0AEce92De3Edee1F18E0157C05861564"))));
        assert_eq!(config.abi_paths, vec![PathBuf::from("a.json"), PathBuf::from("b.json")]);
        assert_eq!(config.fetch_timeout, Some(Duration::from_millis(2500)));
        assert_eq!(config.max_in_flight, Some(64));
        assert_eq!(config.node.max_reconnect_attempts, 3);
        assert_eq!(config.sink, SinkKind::Redis("redis://127.0.0.1:6379".to_string()));
        assert_eq!(config.redis_channel, "calls");
    }

    #[test]
    fn test_zero_disables_limits() {
        let config = config(&[
            ("NODE_ENDPOINT", "ws://localhost:8546"),
            ("FETCH_TIMEOUT_MS", "0"),
            ("MAX_IN_FLIGHT", "0"),
        ])
        .unwrap();

        assert_eq!(config.fetch_timeout, None);
        assert_eq!(config.max_in_flight, None);
    }

    #[test]
    fn test_sink_selection() {
        let endpoint = ("NODE_ENDPOINT", "ws://localhost:8546");

        let log = config(&[endpoint, ("SINK", "log"), ("REDIS_URL", "redis://127.0.0.1:6379")]).unwrap();
        assert_eq!(log.sink, SinkKind::Log);

        let stdout = config(&[endpoint, ("SINK", "STDOUT")]).unwrap();
        assert_eq!(stdout.sink, SinkKind::Stdout);

        let redis = config(&[endpoint, ("SINK", "redis"), ("REDIS_URL", "redis://cache:6379")]).unwrap();
        assert_eq!(redis.sink, SinkKind::Redis("redis://cache:6379".to_string()));
    }

    #[test]
    fn test_invalid_sink_is_rejected() {
        let endpoint = ("NODE_ENDPOINT", "ws://localhost:8546");
        assert_eq!(
            config(&[endpoint, ("SINK", "kafka")]).unwrap_err(),
            ConfigError::InvalidSink("kafka".to_string())
        );
        assert_eq!(config(&[endpoint, ("SINK", "redis")]).unwrap_err(), ConfigError::MissingRedisUrl);
    }

    #[test]
    fn test_invalid_router_is_rejected() {
        let result = config(&[("NODE_ENDPOINT", "ws://localhost:8546"), ("ROUTER_ADDRESSES", "0x1234")]);
        assert!(matches!(result, Err(ConfigError::InvalidRouter(_))));
    }

    #[test]
    fn test_invalid_number_is_rejected() {
        let result = config(&[("NODE_ENDPOINT", "ws://localhost:8546"), ("FETCH_TIMEOUT_MS", "soon")]);
        assert_eq!(
            result.unwrap_err(),
            ConfigError::InvalidNumber {
                name: "FETCH_TIMEOUT_MS",
                value: "soon".to_string()
            }
        );
    }
}
