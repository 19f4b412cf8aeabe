use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, de};
use tracing::level_filters::LevelFilter;

use crate::types::Culture;

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
            prefix: "sportsfeed".into(),
            custom_tags: BTreeMap::new(),
        }
    }
}

/// Expiration settings of a single [`CacheStore`](crate::CacheStore).
#[derive(Debug, Clone, Copy, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    /// Items not accessed for this long are evicted. Zero means never.
    #[serde(with = "humantime_serde")]
    pub sliding_expiration: Duration,

    /// Maximum number of items kept. Exceeding it triggers eviction of the least used items.
    pub max_capacity: Option<u64>,
}

impl StoreConfig {
    pub fn new(sliding_expiration: Duration, max_capacity: Option<u64>) -> Self {
        Self {
            sliding_expiration,
            max_capacity,
        }
    }

    /// A store whose items never expire and which is not bounded.
    pub fn unbounded() -> Self {
        Self::new(Duration::ZERO, None)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::new(Duration::from_secs(3600 * 24), None)
    }
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct CacheConfigs {
    /// Competitor and player profiles.
    pub profile: StoreConfig,
    /// Lazily fetched variant market descriptions.
    pub variant_markets: StoreConfig,
    /// The bulk variant description catalogue.
    pub variant_list: StoreConfig,
}

impl Default for CacheConfigs {
    fn default() -> Self {
        Self {
            profile: StoreConfig::new(Duration::from_secs(3600 * 24), None),
            variant_markets: StoreConfig::new(Duration::from_secs(3600 * 3), None),
            variant_list: StoreConfig::unbounded(),
        }
    }
}

/// Limits how often variant market descriptions are re-fetched.
#[derive(Debug, Clone, Copy, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct ThrottleConfig {
    /// After an attempt to fetch a culture of a variant, no further attempt is made for this long.
    #[serde(with = "humantime_serde")]
    pub cooldown: Duration,

    /// Once more attempts than this are tracked, attempts older than `cooldown` are discarded.
    pub compaction_threshold: usize,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_secs(30),
            compaction_threshold: 1000,
        }
    }
}

/// Controls the periodic reload of the variant description catalogue.
#[derive(Debug, Clone, Copy, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct RefreshConfig {
    #[serde(with = "humantime_serde")]
    pub interval: Duration,

    #[serde(with = "humantime_serde")]
    pub initial_delay: Duration,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3600 * 6),
            initial_delay: Duration::from_secs(5),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// The cultures loaded by bulk loads and periodic refreshes.
    pub cultures: Vec<Culture>,

    /// Fine-tune cache expiry.
    pub caches: CacheConfigs,

    /// Throttling of variant market description fetches.
    pub variant_market_throttle: ThrottleConfig,

    /// Periodic reload of the variant description catalogue.
    pub variant_list_refresh: RefreshConfig,

    /// Configuration for internal logging.
    pub logging: Logging,

    /// Configuration for reporting metrics to a statsd instance.
    pub metrics: Metrics,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            cultures: vec![Culture::new("en")],
            caches: CacheConfigs::default(),
            variant_market_throttle: ThrottleConfig::default(),
            variant_list_refresh: RefreshConfig::default(),
            logging: Logging::default(),
            metrics: Metrics::default(),
        }
    }
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

    pub fn from_reader(mut reader: impl std::io::Read) -> Result<Self> {
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
