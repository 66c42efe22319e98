use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::core::attr::{DEFAULT_DEPTH, MAX_NAME_LEN};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSettings {
    pub default_depth: u32,
    pub max_name_len: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollSettings {
    pub interval_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentSettings {
    /// The device process runs inside an externally configured memory group.
    pub share_group: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingSettings {
    pub filter: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub queue: QueueSettings,
    pub poll: PollSettings,
    pub environment: EnvironmentSettings,
    pub logging: LoggingSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self::from_file(FileConfig::default())
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
struct FileQueue {
    default_depth: Option<u32>,
    max_name_len: Option<usize>,
}

#[derive(Debug, Deserialize, Clone, Default)]
struct FilePoll {
    interval_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Clone, Default)]
struct FileEnvironment {
    share_group: Option<bool>,
}

#[derive(Debug, Deserialize, Clone, Default)]
struct FileLogging {
    filter: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
struct FileConfig {
    #[serde(default)]
    queue: FileQueue,
    #[serde(default)]
    poll: FilePoll,
    #[serde(default)]
    environment: FileEnvironment,
    #[serde(default)]
    logging: FileLogging,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("config parse error: {0}")]
    Parse(String),
}

fn parse_flag(v: &str) -> bool {
    matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

impl Settings {
    fn from_file(file: FileConfig) -> Self {
        Self {
            queue: QueueSettings {
                default_depth: file.queue.default_depth.unwrap_or(DEFAULT_DEPTH),
                max_name_len: file.queue.max_name_len.unwrap_or(MAX_NAME_LEN),
            },
            poll: PollSettings {
                interval_ms: file.poll.interval_ms.unwrap_or(1),
            },
            environment: EnvironmentSettings {
                share_group: file.environment.share_group.unwrap_or(false),
            },
            logging: LoggingSettings {
                filter: file.logging.filter.unwrap_or_else(|| "info".to_string()),
            },
        }
    }

    /// Parses settings from TOML text; absent keys take their defaults.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let file: FileConfig = toml::from_str(raw)?;
        let settings = Self::from_file(file);
        settings.validate()?;
        Ok(settings)
    }

    fn load_file<P: AsRef<Path>>(path: P) -> Result<FileConfig, ConfigError> {
        let raw = fs::read_to_string(path)?;
        let cfg: FileConfig = toml::from_str(&raw)?;
        Ok(cfg)
    }

    /// Load settings from an optional file path and environment variables.
    ///
    /// Precedence: file values provide defaults, environment variables override.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let env_path = env::var("QUEUELINK_CONFIG").ok();
        let effective_path = path.map(|s| s.to_string()).or(env_path);

        let file_cfg = if let Some(p) = effective_path {
            Self::load_file(p)?
        } else {
            FileConfig::default()
        };
        let mut settings = Self::from_file(file_cfg);

        // Env overrides.
        if let Ok(v) = env::var("QUEUELINK_SHARE_GROUP") {
            settings.environment.share_group = parse_flag(&v);
        }

        if let Ok(v) = env::var("QUEUELINK_POLL_INTERVAL_MS") {
            settings.poll.interval_ms = v
                .parse()
                .map_err(|e| ConfigError::Parse(format!("QUEUELINK_POLL_INTERVAL_MS: {e}")))?;
        }

        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.queue.default_depth == 0 {
            return Err(ConfigError::Parse("queue.default_depth must be positive".into()));
        }
        if self.queue.max_name_len == 0 || self.queue.max_name_len > MAX_NAME_LEN {
            return Err(ConfigError::Parse(format!(
                "queue.max_name_len must be in 1..={MAX_NAME_LEN}"
            )));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll.interval_ms)
    }
}
