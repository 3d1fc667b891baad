//! Concurrency-safe task assignment for polling agents.

use crate::database::models::{AgentStatus, Task};
use crate::database::repository::{AgentRepository, CampaignRepository, TaskRepository};
use crate::Result;
use chrono::Utc;

#[derive(Clone)]
pub struct TaskDispatcher {
    agents: AgentRepository,
    tasks: TaskRepository,
    campaigns: CampaignRepository,
}

impl TaskDispatcher {
    pub fn new(
        agents: AgentRepository,
        tasks: TaskRepository,
        campaigns: CampaignRepository,
    ) -> Self {
        Self {
            agents,
            tasks,
            campaigns,
        }
    }

    /// Hand the highest-priority pending task in the agent's project to the
    /// agent, or None when the agent is unknown/inactive or no work exists.
    ///
    /// The claim itself is a single conditional UPDATE (see
    /// `TaskRepository::claim_next`): two concurrent callers can never both
    /// win one row, and neither blocks behind the other's unrelated claim.
    pub async fn assign_next(&self, agent_id: &str) -> Result<Option<Task>> {
        let Some(agent) = self.agents.get_by_id(agent_id).await? else {
            tracing::debug!(agent_id = %agent_id, "Claim from unknown agent");
            return Ok(None);
        };

        if agent.status != AgentStatus::Active {
            return Ok(None);
        }

        let Some(task) = self
            .tasks
            .claim_next(agent_id, &agent.project_id, Utc::now())
            .await?
        else {
            return Ok(None);
        };

        // Invariant check: the claimed task's campaign must live in the
        // agent's project. The claim query already scopes by project, so a
        // mismatch means corrupted rows; release and hand out nothing.
        let campaign = self.campaigns.get_by_id(&task.campaign_id).await?;
        match campaign {
            Some(c) if c.project_id == agent.project_id => {
                tracing::info!(
                    task_id = task.id,
                    agent_id = %agent_id,
                    campaign_id = %task.campaign_id,
                    "Task assigned"
                );
                Ok(Some(task))
            }
            _ => {
                tracing::error!(
                    task_id = task.id,
                    agent_id = %agent_id,
                    campaign_id = %task.campaign_id,
                    "Claimed task failed project verification, releasing"
                );
                self.tasks.release_claim(task.id).await?;
                Ok(None)
            }
        }
    }
}
