pub mod campaign;
pub mod config;
pub mod database;
pub mod events;
pub mod graph;
pub mod logging;
pub mod queue;
pub mod server;
pub mod store;
pub mod tasks;

pub use config::ServerConfig;
pub use server::HiveCore;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum HiveError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Invalid campaign transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Task {task_id} is not owned by agent {agent_id} or already terminal")]
    NotOwned { task_id: i64, agent_id: String },

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl HiveError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound { kind, id: id.into() }
    }

    /// Transient faults are recovered by the reaper/retry machinery and
    /// must not surface as caller-facing failures.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ServiceUnavailable(_))
    }
}

pub type Result<T> = std::result::Result<T, HiveError>;
