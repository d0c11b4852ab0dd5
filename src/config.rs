use serde::{Deserialize, Serialize};
use std::{fs::File, io::BufReader, path::Path, time::Duration};

use crate::error::{GatewayError, GatewayResult};
use crate::model::ConsistencyLevel;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Capacity of the bounded command queue.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    #[serde(default = "default_event_buffer_size")]
    pub event_buffer_size: usize,

    /// Upper bound on a single command's execution on the worker.
    #[serde(default = "default_command_timeout", with = "duration_ms")]
    pub command_timeout: Duration,

    #[serde(default = "default_join_timeout", with = "duration_ms")]
    pub join_timeout: Duration,

    #[serde(default = "default_shutdown_grace", with = "duration_ms")]
    pub shutdown_grace: Duration,

    #[serde(default)]
    pub whiteboard: WhiteboardConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            event_buffer_size: default_event_buffer_size(),
            command_timeout: default_command_timeout(),
            join_timeout: default_join_timeout(),
            shutdown_grace: default_shutdown_grace(),
            whiteboard: WhiteboardConfig::default(),
            cache: CacheConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl GatewayConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> GatewayResult<Self> {
        let file = File::open(path.as_ref()).map_err(|e| {
            GatewayError::Config(format!(
                "Failed to open config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        let config: GatewayConfig = serde_json::from_reader(BufReader::new(file))
            .map_err(|e| GatewayError::Config(format!("Failed to parse config file: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json(s: &str) -> GatewayResult<Self> {
        let config: GatewayConfig = serde_json::from_str(s)
            .map_err(|e| GatewayError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> GatewayResult<()> {
        if self.queue_capacity == 0 {
            return Err(GatewayError::Config(
                "queue_capacity must be greater than 0".to_string(),
            ));
        }
        if self.event_buffer_size == 0 {
            return Err(GatewayError::Config(
                "event_buffer_size must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Bounds on calls into southbound handlers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhiteboardConfig {
    #[serde(default = "default_pull_timeout", with = "duration_ms")]
    pub pull_timeout: Duration,

    #[serde(default = "default_push_timeout", with = "duration_ms")]
    pub push_timeout: Duration,

    #[serde(default = "default_act_timeout", with = "duration_ms")]
    pub act_timeout: Duration,
}

impl Default for WhiteboardConfig {
    fn default() -> Self {
        Self {
            pull_timeout: default_pull_timeout(),
            push_timeout: default_push_timeout(),
            act_timeout: default_act_timeout(),
        }
    }
}

/// Defaults applied to resources whose schema declares no cache policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub default_consistency: ConsistencyLevel,

    #[serde(default = "default_cache_duration", with = "duration_ms")]
    pub default_cache_duration: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_consistency: ConsistencyLevel::default(),
            default_cache_duration: default_cache_duration(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

fn default_queue_capacity() -> usize {
    4096
}

fn default_event_buffer_size() -> usize {
    1000
}

fn default_command_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_join_timeout() -> Duration {
    Duration::from_millis(500)
}

fn default_shutdown_grace() -> Duration {
    Duration::from_secs(2)
}

fn default_pull_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_push_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_act_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_cache_duration() -> Duration {
    Duration::from_secs(1)
}

fn default_log_level() -> String {
    "info".to_string()
}

pub mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
