use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Path to SQLite database
    pub database_path: PathBuf,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Task generation and retry settings
    pub tasks: TaskConfig,

    /// Agent liveness settings
    pub agents: AgentConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LogFormat {
    Pretty,
    Json,
    Compact,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    /// Keyspace units per generated task
    pub chunk_size: i64,
    /// Estimated-task ceiling for synchronous generation; larger campaigns
    /// go through the generation queue lane
    pub inline_task_threshold: i64,
    /// Retry budget before a task is failed permanently
    pub max_retries: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Seconds without a heartbeat before an agent's assigned tasks are reclaimed
    pub stale_threshold_seconds: u32,
    /// Interval between reaper passes
    pub reap_interval_seconds: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("hashhive.db"),
            logging: LoggingConfig {
                level: "info".to_string(),
                format: LogFormat::Pretty,
            },
            tasks: TaskConfig {
                chunk_size: 10_000_000,
                inline_task_threshold: 50,
                max_retries: 3,
            },
            agents: AgentConfig {
                stale_threshold_seconds: 300,
                reap_interval_seconds: 60,
            },
        }
    }
}

impl ServerConfig {
    pub fn from_file(path: &PathBuf) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ServerConfig = toml::from_str(&content)
            .map_err(|e| crate::HiveError::Config(e.to_string()))?;
        Ok(config)
    }

    pub fn save_to_file(&self, path: &PathBuf) -> crate::Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::HiveError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
