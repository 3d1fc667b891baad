//! Agent-reported status/progress/result ingestion.

use crate::campaign::progress;
use crate::database::models::{CrackedHash, Task, TaskProgress, TaskStatus};
use crate::database::repository::{CampaignRepository, TaskRepository};
use crate::events::{EventBus, EventType};
use crate::store::HashListRepository;
use crate::{HiveError, Result};
use chrono::Utc;
use std::sync::Arc;

/// States an agent may report for a task it owns. Failures go through the
/// failure handler instead so retry accounting stays in one place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportStatus {
    Running,
    Completed,
    Exhausted,
}

#[derive(Debug, Clone, Default)]
pub struct TaskReport {
    pub progress: Option<TaskProgress>,
    pub cracked: Vec<CrackedHash>,
}

#[derive(Clone)]
pub struct ReportIngestor {
    tasks: TaskRepository,
    campaigns: CampaignRepository,
    hash_lists: HashListRepository,
    bus: Arc<EventBus>,
}

impl ReportIngestor {
    pub fn new(
        tasks: TaskRepository,
        campaigns: CampaignRepository,
        hash_lists: HashListRepository,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            tasks,
            campaigns,
            hash_lists,
            bus,
        }
    }

    /// Apply one agent report. Rejects reports from a non-owning agent and
    /// reports against terminal tasks; an agent that kept working past a
    /// cancellation simply sees this rejection.
    pub async fn report(
        &self,
        task_id: i64,
        agent_id: &str,
        status: ReportStatus,
        report: TaskReport,
    ) -> Result<Task> {
        let task = self
            .tasks
            .get_by_id(task_id)
            .await?
            .ok_or_else(|| HiveError::not_found("task", task_id.to_string()))?;

        let owned = task.agent_id.as_deref() == Some(agent_id)
            && matches!(task.status, TaskStatus::Assigned | TaskStatus::Running);
        if !owned {
            return Err(HiveError::NotOwned {
                task_id,
                agent_id: agent_id.to_string(),
            });
        }

        let campaign = self
            .campaigns
            .get_by_id(&task.campaign_id)
            .await?
            .ok_or_else(|| HiveError::not_found("campaign", task.campaign_id.clone()))?;

        let now = Utc::now();
        // The repository writes carry the ownership/liveness guard in the
        // UPDATE itself, so a stop or reap landing after the check above
        // makes the write match zero rows instead of reviving the task.
        let applied = match status {
            ReportStatus::Running => {
                let mut progress = report.progress.unwrap_or(task.progress.0);
                progress.keyspace_progress = progress.keyspace_progress.clamp(0.0, 1.0);
                // started_at is stamped on the first running report only
                // (COALESCE in the repository keeps the original).
                self.tasks
                    .update_running(task_id, agent_id, &progress, Some(now))
                    .await?
            }
            ReportStatus::Completed => {
                self.tasks
                    .mark_terminal(task_id, TaskStatus::Completed, now, None, Some(agent_id))
                    .await?
            }
            ReportStatus::Exhausted => {
                self.tasks
                    .mark_terminal(task_id, TaskStatus::Exhausted, now, None, Some(agent_id))
                    .await?
            }
        };

        if !applied {
            return Err(HiveError::NotOwned {
                task_id,
                agent_id: agent_id.to_string(),
            });
        }

        if !report.cracked.is_empty() {
            match &campaign.hash_list_id {
                Some(hash_list_id) => {
                    let inserted = self
                        .hash_lists
                        .insert_cracked(hash_list_id, &report.cracked, now)
                        .await?;

                    // Count-only payload; plaintext never leaves the store
                    // through the event channel.
                    self.bus
                        .publish(
                            EventType::CrackResult,
                            &campaign.project_id,
                            serde_json::json!({
                                "campaign_id": campaign.id,
                                "task_id": task_id,
                                "cracked_count": inserted,
                            }),
                        )
                        .await;

                    tracing::info!(
                        task_id = task_id,
                        campaign_id = %campaign.id,
                        cracked = inserted,
                        "Cracked results ingested"
                    );
                }
                None => {
                    tracing::warn!(
                        task_id = task_id,
                        campaign_id = %campaign.id,
                        "Cracked results reported for campaign without hash list"
                    );
                }
            }
        }

        let updated = self
            .tasks
            .get_by_id(task_id)
            .await?
            .ok_or_else(|| HiveError::not_found("task", task_id.to_string()))?;

        self.bus
            .publish(
                EventType::TaskUpdate,
                &campaign.project_id,
                serde_json::json!({
                    "task_id": task_id,
                    "campaign_id": campaign.id,
                    "status": updated.status.as_str(),
                    "keyspace_progress": updated.progress.0.keyspace_progress,
                }),
            )
            .await;

        progress::recompute(&self.campaigns, &self.tasks, &campaign.id).await?;

        Ok(updated)
    }
}
