use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::fs;
use std::path::Path;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use sentry::types::Dsn;
use serde::{Deserialize, Deserializer, de};
use tracing::level_filters::LevelFilter;

/// Controls the log format
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Auto detect (pretty for tty, simplified for other)
    Auto,
    /// With colors
    Pretty,
    /// Simplified log output
    Simplified,
    /// Dump out JSON lines
    Json,
}

/// Controls the logging system.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Logging {
    /// The log level.
    #[serde(deserialize_with = "deserialize_level_filter")]
    pub level: LevelFilter,
    /// Controls the log format.
    pub format: LogFormat,
    /// When set to true, backtraces are forced on.
    pub enable_backtraces: bool,
}

impl Default for Logging {
    fn default() -> Self {
        Logging {
            level: LevelFilter::INFO,
            format: LogFormat::Auto,
            enable_backtraces: true,
        }
    }
}

/// Control the metrics.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Metrics {
    /// host/port of statsd instance
    pub statsd: Option<String>,
    /// The prefix that should be added to all metrics.
    pub prefix: String,
    /// A map containing custom tags and their values.
    ///
    /// These tags will be appended to every metric.
    pub custom_tags: BTreeMap<String, String>,
}

impl Default for Metrics {
    fn default() -> Self {
        Metrics {
            statsd: env::var("STATSD_SERVER").ok(),
            prefix: "presently".into(),
            custom_tags: BTreeMap::new(),
        }
    }
}

/// Controls the compute scheduler.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct SchedulerConfig {
    /// The number of worker threads draining the queue.
    ///
    /// Defaults to the available parallelism of the machine.
    pub workers: usize,

    /// The name prefix of the worker threads.
    ///
    /// The notification thread is named `{thread_name}-notify`.
    pub thread_name: String,

    /// How long a synchronous realization may block before a warning is logged.
    ///
    /// The wait itself is never aborted.
    #[serde(with = "humantime_serde")]
    pub sync_wait_warning: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: thread::available_parallelism().map_or(1, |n| n.get()),
            thread_name: "presently-compute".into(),
            sync_wait_warning: Duration::from_secs(10),
        }
    }
}

/// Sizing of a single in-memory cache.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct MemCacheConfig {
    /// The maximum number of entries.
    ///
    /// Once a new entry would exceed it, the least recently used entry is evicted as soon as the
    /// new one has completed. A value of `None` disables eviction.
    pub capacity: Option<usize>,
}

/// Sizing of all in-memory caches.
///
/// Fields missing from a cache's section keep that cache's default.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CacheConfigs {
    /// The cache holding fetched source documents.
    ///
    /// Defaults to `64` entries.
    pub document_fetch: MemCacheConfig,

    /// The cache holding handles to asynchronously scheduled computations.
    ///
    /// Defaults to `1024` entries.
    pub async_results: MemCacheConfig,
}

impl Default for CacheConfigs {
    fn default() -> Self {
        Self {
            document_fetch: MemCacheConfig {
                capacity: Some(64),
            },
            async_results: MemCacheConfig {
                capacity: Some(1024),
            },
        }
    }
}

/// A cache section as written, where an absent `capacity` differs from `capacity: null`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct MemCacheSection {
    #[serde(deserialize_with = "deserialize_present")]
    capacity: Option<Option<usize>>,
}

impl MemCacheSection {
    fn or(self, default: MemCacheConfig) -> MemCacheConfig {
        MemCacheConfig {
            capacity: self.capacity.unwrap_or(default.capacity),
        }
    }
}

fn deserialize_present<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

impl<'de> Deserialize<'de> for CacheConfigs {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Default, Deserialize)]
        #[serde(default)]
        struct Sections {
            document_fetch: MemCacheSection,
            async_results: MemCacheSection,
        }

        let sections = Sections::deserialize(deserializer)?;
        let defaults = Self::default();
        Ok(Self {
            document_fetch: sections.document_fetch.or(defaults.document_fetch),
            async_results: sections.async_results.or(defaults.async_results),
        })
    }
}

#[derive(Clone, Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Configuration for internal logging.
    pub logging: Logging,

    /// Configuration for reporting metrics to a statsd instance.
    pub metrics: Metrics,

    /// DSN to report internal errors to
    pub sentry_dsn: Option<Dsn>,

    /// Configuration of the compute scheduler.
    pub scheduler: SchedulerConfig,

    /// Sizing of the in-memory caches.
    pub caches: CacheConfigs,
}

impl Config {
    pub fn get(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_reader(
                fs::File::open(path).context("failed to open configuration file")?,
            ),
            None => Ok(Config::default()),
        }
    }

    fn from_reader(mut reader: impl std::io::Read) -> Result<Self> {
        let mut config = String::new();
        reader
            .read_to_string(&mut config)
            .context("failed reading config file")?;
        // check for empty files explicitly
        if config.trim().is_empty() {
            anyhow::bail!("config file empty");
        }
        serde_yaml::from_str(&config).context("failed to parse config YAML")
    }
}

#[derive(Debug)]
struct LevelFilterVisitor;

impl de::Visitor<'_> for LevelFilterVisitor {
    type Value = LevelFilter;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> std::fmt::Result {
        write!(
            formatter,
            r#"one of the strings "off", "error", "warn", "info", "debug", or "trace""#
        )
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        match v {
            "off" => Ok(LevelFilter::OFF),
            "error" => Ok(LevelFilter::ERROR),
            "warn" => Ok(LevelFilter::WARN),
            "info" => Ok(LevelFilter::INFO),
            "debug" => Ok(LevelFilter::DEBUG),
            "trace" => Ok(LevelFilter::TRACE),
            _ => Err(de::Error::unknown_variant(
                v,
                &["off", "error", "warn", "info", "debug", "trace"],
            )),
        }
    }
}

fn deserialize_level_filter<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<LevelFilter, D::Error> {
    deserializer.deserialize_str(LevelFilterVisitor)
}
