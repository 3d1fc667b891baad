//! Keyspace partitioning into bounded task rows.

use crate::database::models::{Attack, ResultStats, Task, TaskProgress, TaskStatus, WorkRange};
use crate::database::repository::{AttackRepository, TaskRepository};
use crate::{HiveError, Result};
use chrono::Utc;
use sqlx::types::Json;

/// Tile [0, keyspace) into consecutive half-open chunks. An unknown or
/// non-positive keyspace yields the single indivisible (0, 0, 0) range.
pub fn partition_keyspace(keyspace: Option<i64>, chunk_size: i64) -> Vec<WorkRange> {
    let Some(keyspace) = keyspace.filter(|k| *k > 0) else {
        return vec![WorkRange {
            start: 0,
            end: 0,
            total: 0,
        }];
    };

    let mut ranges = Vec::with_capacity(((keyspace + chunk_size - 1) / chunk_size) as usize);
    let mut start = 0;
    while start < keyspace {
        let end = (start + chunk_size).min(keyspace);
        ranges.push(WorkRange {
            start,
            end,
            total: end - start,
        });
        start = end;
    }

    ranges
}

/// Expected task count across a campaign's attacks: Σ max(1, ceil(K/C)).
pub fn estimate_task_count(attacks: &[Attack], chunk_size: i64) -> i64 {
    attacks
        .iter()
        .map(|attack| match attack.keyspace_units() {
            Some(k) => (k + chunk_size - 1) / chunk_size,
            None => 1,
        })
        .map(|n| n.max(1))
        .sum()
}

#[derive(Clone)]
pub struct TaskGenerator {
    attacks: AttackRepository,
    tasks: TaskRepository,
}

impl TaskGenerator {
    pub fn new(attacks: AttackRepository, tasks: TaskRepository) -> Self {
        Self { attacks, tasks }
    }

    /// Create pending, unassigned tasks covering the attack's keyspace.
    /// Returns the number of tasks created.
    pub async fn generate_for_attack(&self, attack_id: &str, chunk_size: i64) -> Result<u64> {
        if chunk_size <= 0 {
            return Err(HiveError::Validation(format!(
                "chunk size must be positive, got {}",
                chunk_size
            )));
        }

        let attack = self
            .attacks
            .get_by_id(attack_id)
            .await?
            .ok_or_else(|| HiveError::not_found("attack", attack_id))?;

        let now = Utc::now();
        let rows: Vec<Task> = partition_keyspace(attack.keyspace_units(), chunk_size)
            .into_iter()
            .map(|range| Task {
                id: 0, // assigned by the database
                attack_id: attack.id.clone(),
                campaign_id: attack.campaign_id.clone(),
                agent_id: None,
                status: TaskStatus::Pending,
                work_range: Json(range),
                progress: Json(TaskProgress::default()),
                result_stats: Json(ResultStats::default()),
                assigned_at: None,
                started_at: None,
                completed_at: None,
                failure_reason: None,
                created_at: now,
            })
            .collect();

        let created = self.tasks.create_batch(&rows).await?;

        tracing::info!(
            attack_id = %attack.id,
            campaign_id = %attack.campaign_id,
            tasks = created,
            "Generated tasks"
        );

        Ok(created)
    }
}
