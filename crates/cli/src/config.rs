//! Configuration loading from presence.toml.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use chrono::TimeDelta;
use query::Aliases;
use runtime::derive::{DEFAULT_GAP_MINUTES, DEFAULT_WINDOW_HOURS};
use runtime::{SessionDeriver, TopicFilter};
use serde::Deserialize;
use storage::{DEFAULT_HISTORY_LENGTH, SensorId};

/// Longest accepted session window: ten years.
const MAX_WINDOW_HOURS: u32 = 24 * 365 * 10;

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    /// Where events are kept.
    #[serde(default)]
    pub storage: StorageConfig,

    /// History length and session derivation parameters.
    #[serde(default)]
    pub sessions: SessionsConfig,

    /// Subscription the broker feed is filtered by.
    #[serde(default)]
    pub broker: BrokerConfig,

    /// Ingestion queue and workers.
    #[serde(default)]
    pub ingest: IngestConfig,

    /// Query server.
    #[serde(default)]
    pub http: HttpConfig,

    /// Display labels keyed by sensor id.
    #[serde(default)]
    pub aliases: HashMap<String, String>,
}

/// Storage backend selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Bounded ring per sensor, lost on exit.
    #[default]
    Memory,
    /// Durable SQLite database.
    Sqlite,
}

#[derive(Debug, Default, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: Backend,

    /// Database file. Defaults to the user data directory.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
pub struct SessionsConfig {
    /// Entries kept or returned per sensor in the recent history.
    #[serde(default = "default_history_length")]
    pub history_length: usize,

    /// Trailing window for session derivation.
    #[serde(default = "default_window_hours")]
    pub window_hours: u32,

    /// Largest gap between two events of the same session.
    #[serde(default = "default_gap_minutes")]
    pub gap_minutes: u32,
}

#[derive(Debug, Deserialize)]
pub struct BrokerConfig {
    /// MQTT-style topic filter, e.g. `/iot/cave/motion0/+`.
    #[serde(default = "default_topic")]
    pub topic: String,
}

#[derive(Debug, Deserialize)]
pub struct IngestConfig {
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    #[serde(default = "default_workers")]
    pub workers: usize,
}

#[derive(Debug, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            history_length: default_history_length(),
            window_hours: default_window_hours(),
            gap_minutes: default_gap_minutes(),
        }
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            topic: default_topic(),
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            workers: default_workers(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_history_length() -> usize {
    DEFAULT_HISTORY_LENGTH
}

fn default_window_hours() -> u32 {
    DEFAULT_WINDOW_HOURS as u32
}

fn default_gap_minutes() -> u32 {
    DEFAULT_GAP_MINUTES as u32
}

fn default_topic() -> String {
    "/iot/cave/motion0/+".to_string()
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_workers() -> usize {
    1
}

fn default_bind() -> String {
    "0.0.0.0:5000".to_string()
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML string.
    pub fn parse(toml: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(toml).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.sessions.history_length == 0 {
            return Err(ConfigError::Invalid(
                "sessions.history_length must be at least 1".into(),
            ));
        }
        if !(1..=MAX_WINDOW_HOURS).contains(&self.sessions.window_hours) {
            return Err(ConfigError::Invalid(format!(
                "sessions.window_hours must be between 1 and {MAX_WINDOW_HOURS}"
            )));
        }
        if self.ingest.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "ingest.queue_capacity must be at least 1".into(),
            ));
        }
        self.bind_addr()?;
        Ok(())
    }

    /// Session deriver for the configured window and gap.
    pub fn deriver(&self) -> SessionDeriver {
        SessionDeriver::new(
            TimeDelta::hours(i64::from(self.sessions.window_hours)),
            TimeDelta::minutes(i64::from(self.sessions.gap_minutes)),
        )
    }

    pub fn topic_filter(&self) -> TopicFilter {
        TopicFilter::new(&self.broker.topic)
    }

    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.http
            .bind
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("http.bind '{}' is not an address", self.http.bind)))
    }

    /// Configured labels. Labels stored in the database fill the gaps.
    pub fn aliases(&self, stored: HashMap<SensorId, String>) -> Aliases {
        self.aliases
            .iter()
            .map(|(id, label)| (SensorId::new(id.as_str()), label.clone()))
            .collect::<Aliases>()
            .merge(stored)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}
