use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Campaign {
    pub id: String,
    pub project_id: String,
    pub name: String,
    pub description: Option<String>,
    pub status: CampaignStatus,
    /// 1-10, lower is more urgent
    pub priority: i64,
    pub hash_list_id: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub total_tasks: i64,
    pub completed_tasks: i64,
    pub overall_progress: f64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum CampaignStatus {
    Draft,
    Running,
    Paused,
    Completed,
    Cancelled,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Attack {
    pub id: String,
    pub campaign_id: String,
    pub project_id: String,
    pub name: String,
    pub mode: String,
    /// Total candidate count as text; None or non-positive means unknown
    pub keyspace: Option<String>,
    /// Ids of other attacks in the same campaign this one depends on
    pub dependencies: Json<Vec<String>>,
    pub status: AttackStatus,
    pub created_at: DateTime<Utc>,
}

impl Attack {
    /// Parsed keyspace, if present and positive.
    pub fn keyspace_units(&self) -> Option<i64> {
        self.keyspace
            .as_deref()
            .and_then(|k| k.trim().parse::<i64>().ok())
            .filter(|k| *k > 0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AttackStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub attack_id: String,
    pub campaign_id: String,
    pub agent_id: Option<String>,
    pub status: TaskStatus,
    pub work_range: Json<WorkRange>,
    pub progress: Json<TaskProgress>,
    pub result_stats: Json<ResultStats>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Assigned,
    Running,
    Completed,
    Failed,
    Exhausted,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Assigned => "assigned",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Exhausted => "exhausted",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Half-open [start, end) slice of an attack's keyspace. A size-unknown
/// attack gets the degenerate (0, 0, 0) range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkRange {
    pub start: i64,
    pub end: i64,
    pub total: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct TaskProgress {
    pub keyspace_progress: f64,
    pub speed: Option<f64>,
    pub temperature: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ResultStats {
    pub retry_count: i64,
    pub last_failure: Option<String>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub project_id: String,
    pub name: String,
    pub status: AgentStatus,
    pub last_seen_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Active,
    Offline,
    Error,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct AgentError {
    pub id: i64,
    pub agent_id: String,
    pub task_id: Option<i64>,
    pub severity: ErrorSeverity,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    Warning,
    Fatal,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct HashList {
    pub id: String,
    pub project_id: String,
    pub name: String,
    pub storage_ref: Option<String>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Wordlist {
    pub id: String,
    pub project_id: String,
    pub name: String,
    pub storage_ref: Option<String>,
}

/// One (hash, plaintext) pair submitted by an agent with task results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrackedHash {
    pub hash_value: String,
    pub plaintext: String,
}
