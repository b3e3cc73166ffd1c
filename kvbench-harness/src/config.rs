//! Configuration for the benchmark binary.
//!
//! Configuration can be loaded from multiple sources with the following precedence (highest to
//! lowest):
//!
//! 1. Environment variables (prefixed with `KVBENCH__`)
//! 2. YAML configuration file (specified via `-c` or `--config` flag)
//! 3. Defaults
//!
//! See [`Config`] for a description of all configuration fields and their defaults.
//!
//! # Environment Variables
//!
//! Environment variables use `KVBENCH__` as a prefix and double underscores (`__`) to denote
//! nested configuration structures. For example:
//!
//! - `KVBENCH__WORKERS=20` sets the number of workers per backend
//! - `KVBENCH__DURATION=10m` sets the run duration
//! - `KVBENCH__METRICS__TYPE=http` and `KVBENCH__METRICS__ENDPOINT=http://...` send metrics to
//!   a remote collector
//!
//! # YAML Configuration File
//!
//! ```yaml
//! workers: 10
//! duration: 4m
//!
//! backends:
//!   - label: Cached
//!     table: kvbench-cached
//!     store:
//!       type: cached
//!       ttl: 5m
//!       inner:
//!         type: filesystem
//!         path: data
//!   - label: Direct
//!     table: kvbench-direct
//!     store:
//!       type: filesystem
//!       path: data
//!
//! metrics:
//!   type: http
//!   endpoint: http://localhost:9090/metrics
//! ```

use std::borrow::Cow;
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use kvbench_service::{
    CachedStore, DEFAULT_CACHE_TTL, HttpSink, InMemoryStore, LocalFsStore, LogSink, MemorySink,
    MetricsSink, Store,
};
use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;

use crate::harness::{
    Benchmark, DEFAULT_NAMESPACE, DEFAULT_TICK_INTERVAL, DEFAULT_WRITE_EVERY, InvalidRunConfig,
    RunConfig,
};

/// Environment variable prefix for all configuration options.
const ENV_PREFIX: &str = "KVBENCH__";

/// Store configuration.
///
/// The `type` field in YAML or `__TYPE` in environment variables determines which variant is used.
#[derive(Debug, Deserialize, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StoreConfig {
    /// In-memory store (type `"memory"`).
    ///
    /// Records are lost when the process exits. Useful for dry runs of the harness itself.
    Memory,

    /// Direct filesystem store (type `"filesystem"`).
    ///
    /// Every record is one JSON file at `<path>/<table>/<key>.json`.
    FileSystem {
        /// Directory path for storing records.
        ///
        /// The directory will be created if it doesn't exist. Relative paths are resolved from the
        /// working directory.
        path: PathBuf,
    },

    /// Cache-fronted store (type `"cached"`).
    ///
    /// Puts a read-through, write-through item cache in front of another store.
    ///
    /// ```yaml
    /// store:
    ///   type: cached
    ///   ttl: 1m
    ///   inner:
    ///     type: filesystem
    ///     path: data
    /// ```
    Cached {
        /// How long cached entries, including cached misses, are served.
        ///
        /// # Default
        ///
        /// `5m`
        #[serde(default = "default_cache_ttl", with = "humantime_serde")]
        ttl: Duration,

        /// The store behind the cache.
        inner: Box<StoreConfig>,
    },
}

fn default_cache_ttl() -> Duration {
    DEFAULT_CACHE_TTL
}

impl StoreConfig {
    /// Creates the configured store.
    pub fn build(&self) -> Box<dyn Store> {
        match self {
            StoreConfig::Memory => Box::new(InMemoryStore::new()),
            StoreConfig::FileSystem { path } => Box::new(LocalFsStore::new(path)),
            StoreConfig::Cached { ttl, inner } => {
                Box::new(CachedStore::with_ttl(inner.build(), *ttl))
            }
        }
    }
}

/// A backend to benchmark.
///
/// Used in: [`Config::backends`]
#[derive(Debug, Deserialize, Serialize, PartialEq)]
pub struct BackendConfig {
    /// Label of the backend.
    ///
    /// Used as the `Backend` metric dimension and to derive worker identities
    /// (`"<label> worker <index>"`). Keep it stable across runs so that overlapping runs are
    /// detected.
    pub label: String,

    /// The table all workers of this backend address.
    pub table: String,

    /// The store holding the table.
    pub store: StoreConfig,
}

/// Metrics sink configuration.
///
/// Used in: [`Config::metrics`]
#[derive(Debug, Deserialize, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetricsConfig {
    /// Emit every observation as a log event (type `"log"`).
    Log,

    /// Post every observation as JSON to a remote collector (type `"http"`).
    Http {
        /// URL receiving `POST` requests.
        endpoint: String,

        /// Timeout for a single request.
        ///
        /// # Default
        ///
        /// `5s`
        #[serde(default = "default_http_timeout", with = "humantime_serde")]
        timeout: Duration,
    },

    /// Keep observations in memory and discard them on exit (type `"memory"`).
    Memory,
}

fn default_http_timeout() -> Duration {
    Duration::from_secs(5)
}

impl MetricsConfig {
    /// Creates the configured sink.
    pub fn build(&self) -> Result<Arc<dyn MetricsSink>> {
        let sink: Arc<dyn MetricsSink> = match self {
            MetricsConfig::Log => Arc::new(LogSink),
            MetricsConfig::Http { endpoint, timeout } => Arc::new(
                HttpSink::new(endpoint.as_str(), *timeout)
                    .context("failed to create HTTP metrics sink")?,
            ),
            MetricsConfig::Memory => Arc::new(MemorySink::new()),
        };
        Ok(sink)
    }
}

/// [Sentry](https://sentry.io/) error tracking configuration.
///
/// Sentry is disabled by default and only enabled when a DSN is provided.
///
/// Used in: [`Config::sentry`]
#[derive(Debug, Deserialize, Serialize)]
pub struct Sentry {
    /// Sentry DSN (Data Source Name).
    ///
    /// # Environment Variable
    ///
    /// `KVBENCH__SENTRY__DSN`
    pub dsn: Option<String>,

    /// Environment name for this deployment, e.g. "production".
    pub environment: Option<Cow<'static, str>>,

    /// Error event sampling rate.
    ///
    /// # Default
    ///
    /// `1.0` (send all errors)
    pub sample_rate: f32,
}

impl Sentry {
    /// Returns whether Sentry integration is enabled.
    pub fn is_enabled(&self) -> bool {
        self.dsn.is_some()
    }
}

impl Default for Sentry {
    fn default() -> Self {
        Self {
            dsn: None,
            environment: None,
            sample_rate: 1.0,
        }
    }
}

/// Log output format.
///
/// Controls how log messages are formatted. The format can be explicitly specified or
/// auto-detected based on whether output is to a TTY.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum LogFormat {
    /// Auto detect the best format.
    ///
    /// This chooses [`LogFormat::Pretty`] for TTY, otherwise [`LogFormat::Simplified`].
    Auto,

    /// Pretty printing with colors.
    Pretty,

    /// Simplified plain text output.
    Simplified,

    /// Dump out JSON lines.
    Json,
}

/// The logging format parse error.
#[derive(Clone, Debug)]
pub struct FormatParseError(String);

impl fmt::Display for FormatParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            r#"error parsing "{}" as format: expected one of "auto", "pretty", "simplified", "json""#,
            self.0
        )
    }
}

impl std::str::FromStr for LogFormat {
    type Err = FormatParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let result = match s {
            "" => LogFormat::Auto,
            s if s.eq_ignore_ascii_case("auto") => LogFormat::Auto,
            s if s.eq_ignore_ascii_case("pretty") => LogFormat::Pretty,
            s if s.eq_ignore_ascii_case("simplified") => LogFormat::Simplified,
            s if s.eq_ignore_ascii_case("json") => LogFormat::Json,
            s => return Err(FormatParseError(s.into())),
        };

        Ok(result)
    }
}

impl std::error::Error for FormatParseError {}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let format = match self {
            LogFormat::Auto => "auto",
            LogFormat::Pretty => "pretty",
            LogFormat::Simplified => "simplified",
            LogFormat::Json => "json",
        };
        f.write_str(format)
    }
}

mod display_fromstr {
    pub fn serialize<T, S>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
        T: std::fmt::Display,
    {
        serializer.collect_str(&value)
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<T, D::Error>
    where
        D: serde::Deserializer<'de>,
        T: std::str::FromStr,
        <T as std::str::FromStr>::Err: std::fmt::Display,
    {
        use serde::Deserialize;
        let s = <std::borrow::Cow<'de, str>>::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Logging configuration. Logs are always written to stderr.
///
/// Used in: [`Config::logging`]
#[derive(Debug, Deserialize, Serialize)]
pub struct Logging {
    /// Minimum log level to output.
    ///
    /// The `RUST_LOG` environment variable provides more granular control per module if needed.
    ///
    /// # Default
    ///
    /// `INFO`
    ///
    /// # Environment Variable
    ///
    /// `KVBENCH__LOGGING__LEVEL`
    #[serde(with = "display_fromstr")]
    pub level: LevelFilter,

    /// Log output format. See [`LogFormat`] for available options.
    ///
    /// # Default
    ///
    /// `Auto` (pretty for TTY, simplified otherwise)
    ///
    /// # Environment Variable
    ///
    /// `KVBENCH__LOGGING__FORMAT`
    #[serde(with = "display_fromstr")]
    pub format: LogFormat,
}

impl Default for Logging {
    fn default() -> Self {
        Self {
            level: LevelFilter::INFO,
            format: LogFormat::Auto,
        }
    }
}

/// Main configuration struct for the benchmark.
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Number of concurrent workers per backend.
    ///
    /// # Default
    ///
    /// `10`
    pub workers: usize,

    /// Wall-clock duration of the run.
    ///
    /// # Default
    ///
    /// `4m`
    #[serde(with = "humantime_serde")]
    pub duration: Duration,

    /// Interval between two ticks of a worker. Every tick performs one read.
    ///
    /// # Default
    ///
    /// `1s`
    #[serde(with = "humantime_serde")]
    pub tick_interval: Duration,

    /// A write is performed on every tick that is a multiple of this.
    ///
    /// # Default
    ///
    /// `10`
    pub write_every: u64,

    /// Metric namespace for all latency observations.
    ///
    /// # Default
    ///
    /// `"KvBenchmark"`
    pub namespace: String,

    /// The backends to benchmark side by side.
    ///
    /// # Default
    ///
    /// A cache-fronted and a direct filesystem store, both in `data`.
    pub backends: Vec<BackendConfig>,

    /// Where latency observations are sent.
    ///
    /// # Default
    ///
    /// `log`
    pub metrics: MetricsConfig,

    /// Logging configuration.
    pub logging: Logging,

    /// Sentry configuration.
    pub sentry: Sentry,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workers: 10,
            duration: Duration::from_secs(4 * 60),
            tick_interval: DEFAULT_TICK_INTERVAL,
            write_every: DEFAULT_WRITE_EVERY,
            namespace: DEFAULT_NAMESPACE.to_owned(),
            backends: vec![
                BackendConfig {
                    label: "Cached".to_owned(),
                    table: "kvbench-cached".to_owned(),
                    store: StoreConfig::Cached {
                        ttl: DEFAULT_CACHE_TTL,
                        inner: Box::new(StoreConfig::FileSystem {
                            path: PathBuf::from("data"),
                        }),
                    },
                },
                BackendConfig {
                    label: "Direct".to_owned(),
                    table: "kvbench-direct".to_owned(),
                    store: StoreConfig::FileSystem {
                        path: PathBuf::from("data"),
                    },
                },
            ],
            metrics: MetricsConfig::Log,
            logging: Logging::default(),
            sentry: Sentry::default(),
        }
    }
}

impl Config {
    /// Loads configuration from the provided arguments.
    ///
    /// Configuration is merged in the following order (later sources override earlier ones):
    /// 1. Default values
    /// 2. YAML configuration file (if provided)
    /// 3. Environment variables (prefixed with `KVBENCH__`)
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = figment::Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        let config = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract::<Self>()?;

        config.validate_backends()?;
        Ok(config)
    }

    /// Rejects backends that would derive the same worker identities in the same table.
    fn validate_backends(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for backend in &self.backends {
            if !seen.insert((backend.label.as_str(), backend.table.as_str())) {
                anyhow::bail!(
                    "backend {:?} is configured more than once for table {:?}",
                    backend.label,
                    backend.table
                );
            }
        }
        Ok(())
    }

    /// Returns the validated configuration of a single run.
    pub fn run_config(&self) -> Result<RunConfig, InvalidRunConfig> {
        RunConfig::new(self.workers, self.duration)?
            .with_tick_interval(self.tick_interval)?
            .with_write_every(self.write_every)
    }

    /// Creates one [`Benchmark`] per configured backend, all reporting into a single sink.
    pub fn benchmarks(&self) -> Result<Vec<Benchmark>> {
        let sink = self.metrics.build()?;

        let benchmarks = self
            .backends
            .iter()
            .map(|backend| {
                let store: Arc<dyn Store> = Arc::from(backend.store.build());
                Benchmark::new(&backend.label, &backend.table, store, Arc::clone(&sink))
                    .with_namespace(&self.namespace)
            })
            .collect();

        Ok(benchmarks)
    }
}
