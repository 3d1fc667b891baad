//! Per-task retry accounting and permanent-failure decisions.

use crate::campaign::progress;
use crate::database::models::{ErrorSeverity, TaskStatus};
use crate::database::repository::{AgentRepository, CampaignRepository, TaskRepository};
use crate::events::{EventBus, EventType};
use crate::{HiveError, Result};
use chrono::Utc;
use std::sync::Arc;

#[derive(Clone)]
pub struct FailureHandler {
    tasks: TaskRepository,
    campaigns: CampaignRepository,
    agents: AgentRepository,
    bus: Arc<EventBus>,
    max_retries: i64,
}

impl FailureHandler {
    pub fn new(
        tasks: TaskRepository,
        campaigns: CampaignRepository,
        agents: AgentRepository,
        bus: Arc<EventBus>,
        max_retries: i64,
    ) -> Self {
        Self {
            tasks,
            campaigns,
            agents,
            bus,
            max_retries,
        }
    }

    /// Record one failure against the task's retry budget. Under budget the
    /// task goes back to pending with its work range untouched, so the same
    /// keyspace chunk is redone; at budget it is failed permanently.
    /// Returns true when the task was retried.
    pub async fn fail(&self, task_id: i64, reason: &str) -> Result<bool> {
        let task = self
            .tasks
            .get_by_id(task_id)
            .await?
            .ok_or_else(|| HiveError::not_found("task", task_id.to_string()))?;

        let campaign = self
            .campaigns
            .get_by_id(&task.campaign_id)
            .await?
            .ok_or_else(|| HiveError::not_found("campaign", task.campaign_id.clone()))?;

        let mut stats = task.result_stats.0.clone();

        if stats.retry_count < self.max_retries {
            stats.retry_count += 1;
            stats.last_failure = Some(reason.to_string());

            if !self.tasks.return_to_pending(task_id, &stats).await? {
                // Cancelled or reaped since we loaded the row; the guarded
                // UPDATE matched nothing and the task keeps its status.
                tracing::debug!(task_id = task_id, "Task no longer active, retry skipped");
                return Ok(false);
            }

            tracing::warn!(
                task_id = task_id,
                retry_count = stats.retry_count,
                reason = %reason,
                "Task returned to pending"
            );

            self.bus
                .publish(
                    EventType::TaskUpdate,
                    &campaign.project_id,
                    serde_json::json!({
                        "task_id": task_id,
                        "campaign_id": campaign.id,
                        "status": TaskStatus::Pending.as_str(),
                        "retry_count": stats.retry_count,
                        "reason": reason,
                    }),
                )
                .await;

            Ok(true)
        } else {
            let applied = self
                .tasks
                .mark_terminal(task_id, TaskStatus::Failed, Utc::now(), Some(reason), None)
                .await?;
            if !applied {
                tracing::debug!(task_id = task_id, "Task no longer active, failure skipped");
                return Ok(false);
            }

            tracing::error!(
                task_id = task_id,
                retry_count = stats.retry_count,
                reason = %reason,
                "Task failed permanently"
            );

            self.bus
                .publish(
                    EventType::TaskUpdate,
                    &campaign.project_id,
                    serde_json::json!({
                        "task_id": task_id,
                        "campaign_id": campaign.id,
                        "status": TaskStatus::Failed.as_str(),
                        "reason": reason,
                    }),
                )
                .await;

            // A permanently failed task leaves the campaign running with
            // partial coverage; remediation is the caller's call.
            progress::recompute(&self.campaigns, &self.tasks, &campaign.id).await?;

            Ok(false)
        }
    }

    /// A fatal condition on an agent's heartbeat channel: record it, then
    /// route every task that agent holds through the per-task failure path
    /// so each task's own retry budget is tracked independently.
    pub async fn handle_agent_fatal(&self, agent_id: &str, message: &str) -> Result<u64> {
        self.agents
            .record_error(agent_id, None, ErrorSeverity::Fatal, message)
            .await?;

        if let Some(agent) = self.agents.get_by_id(agent_id).await? {
            self.bus
                .publish(
                    EventType::AgentStatus,
                    &agent.project_id,
                    serde_json::json!({
                        "agent_id": agent_id,
                        "severity": "fatal",
                    }),
                )
                .await;
        }

        let held = self.tasks.list_active_for_agent(agent_id).await?;
        let count = held.len() as u64;

        for task in held {
            let reason = format!("fatal agent error: {}", message);
            self.fail(task.id, &reason).await?;
        }

        if count > 0 {
            tracing::warn!(
                agent_id = %agent_id,
                tasks = count,
                "Routed agent's tasks through failure handling after fatal error"
            );
        }

        Ok(count)
    }
}
