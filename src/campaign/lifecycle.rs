//! Campaign state machine and start/stop orchestration.

use crate::config::TaskConfig;
use crate::database::models::{Attack, AttackStatus, Campaign, CampaignStatus};
use crate::database::repository::{AttackRepository, CampaignRepository, TaskRepository};
use crate::events::{EventBus, EventType};
use crate::graph::{self, AttackNode};
use crate::queue::{lane_for_priority, JobMessage, JobQueueRouter, Lane};
use crate::tasks::TaskGenerator;
use crate::tasks::generator;
use crate::{HiveError, Result};
use chrono::Utc;
use sqlx::types::Json;
use std::sync::Arc;
use uuid::Uuid;

/// Fixed allowed-transitions table. Completed and cancelled are terminal.
pub fn transition_allowed(from: CampaignStatus, to: CampaignStatus) -> bool {
    use CampaignStatus::*;
    match from {
        Draft => matches!(to, Running | Cancelled),
        Running => matches!(to, Paused | Completed | Cancelled | Draft),
        Paused => matches!(to, Running | Cancelled | Draft),
        Completed | Cancelled => false,
    }
}

#[derive(Debug, Clone)]
pub struct NewCampaign {
    pub project_id: String,
    pub name: String,
    pub description: Option<String>,
    pub priority: i64,
    pub hash_list_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewAttack {
    pub campaign_id: String,
    pub name: String,
    pub mode: String,
    pub keyspace: Option<String>,
    pub dependencies: Vec<String>,
}

/// Sparse campaign update: only provided fields change, merged one by one.
#[derive(Debug, Clone, Default)]
pub struct CampaignPatch {
    pub name: Option<String>,
    pub description: Option<Option<String>>,
    pub priority: Option<i64>,
    pub hash_list_id: Option<Option<String>>,
}

#[derive(Clone)]
pub struct LifecycleController {
    campaigns: CampaignRepository,
    attacks: AttackRepository,
    tasks: TaskRepository,
    generator: TaskGenerator,
    router: JobQueueRouter,
    bus: Arc<EventBus>,
    task_config: TaskConfig,
}

impl LifecycleController {
    pub fn new(
        campaigns: CampaignRepository,
        attacks: AttackRepository,
        tasks: TaskRepository,
        generator: TaskGenerator,
        router: JobQueueRouter,
        bus: Arc<EventBus>,
        task_config: TaskConfig,
    ) -> Self {
        Self {
            campaigns,
            attacks,
            tasks,
            generator,
            router,
            bus,
            task_config,
        }
    }

    pub async fn create_campaign(&self, new: NewCampaign) -> Result<Campaign> {
        let campaign = Campaign {
            id: Uuid::new_v4().to_string(),
            project_id: new.project_id,
            name: new.name,
            description: new.description,
            status: CampaignStatus::Draft,
            priority: new.priority.clamp(1, 10),
            hash_list_id: new.hash_list_id,
            started_at: None,
            completed_at: None,
            total_tasks: 0,
            completed_tasks: 0,
            overall_progress: 0.0,
            created_at: Utc::now(),
        };

        self.campaigns.create(&campaign).await?;
        tracing::info!(campaign_id = %campaign.id, project_id = %campaign.project_id, "Campaign created");
        Ok(campaign)
    }

    /// Attach an attack. The campaign's dependency graph, including the new
    /// node, must stay a DAG with no dangling references.
    pub async fn create_attack(&self, new: NewAttack) -> Result<Attack> {
        let campaign = self
            .campaigns
            .get_by_id(&new.campaign_id)
            .await?
            .ok_or_else(|| HiveError::not_found("campaign", new.campaign_id.clone()))?;

        let attack = Attack {
            id: Uuid::new_v4().to_string(),
            campaign_id: campaign.id.clone(),
            project_id: campaign.project_id.clone(),
            name: new.name,
            mode: new.mode,
            keyspace: new.keyspace,
            dependencies: Json(new.dependencies),
            status: AttackStatus::Pending,
            created_at: Utc::now(),
        };

        let existing = self.attacks.list_by_campaign(&campaign.id).await?;
        let mut nodes: Vec<AttackNode> = existing.iter().map(AttackNode::from).collect();
        nodes.push(AttackNode::from(&attack));
        graph::validate_dependencies(&nodes)?;

        self.attacks.create(&attack).await?;
        tracing::info!(attack_id = %attack.id, campaign_id = %campaign.id, "Attack created");
        Ok(attack)
    }

    pub async fn update_campaign(&self, campaign_id: &str, patch: CampaignPatch) -> Result<Campaign> {
        let mut campaign = self
            .campaigns
            .get_by_id(campaign_id)
            .await?
            .ok_or_else(|| HiveError::not_found("campaign", campaign_id))?;

        if let Some(name) = patch.name {
            campaign.name = name;
        }
        if let Some(description) = patch.description {
            campaign.description = description;
        }
        if let Some(priority) = patch.priority {
            campaign.priority = priority.clamp(1, 10);
        }
        if let Some(hash_list_id) = patch.hash_list_id {
            campaign.hash_list_id = hash_list_id;
        }

        self.campaigns.save(&campaign).await?;
        Ok(campaign)
    }

    /// Drive the campaign to a requested state, enforcing the transition
    /// table and running the side effects each transition carries.
    pub async fn transition(&self, campaign_id: &str, to: CampaignStatus) -> Result<Campaign> {
        let campaign = self
            .campaigns
            .get_by_id(campaign_id)
            .await?
            .ok_or_else(|| HiveError::not_found("campaign", campaign_id))?;

        if !transition_allowed(campaign.status, to) {
            return Err(HiveError::InvalidTransition {
                from: campaign.status.as_str().to_string(),
                to: to.as_str().to_string(),
            });
        }

        match to {
            CampaignStatus::Running => self.start(campaign).await,
            CampaignStatus::Paused => self.set_status(campaign, CampaignStatus::Paused).await,
            CampaignStatus::Completed => self.finish(campaign, CampaignStatus::Completed).await,
            CampaignStatus::Cancelled => self.finish(campaign, CampaignStatus::Cancelled).await,
            CampaignStatus::Draft => self.stop(campaign).await,
        }
    }

    /// Enter running: pre-checks, status flip, task generation (inline for
    /// small campaigns, queued for the rest). The "running" event fires only
    /// after generation/enqueue succeeded; a failure after the status row
    /// flipped rolls the whole transition back.
    async fn start(&self, campaign: Campaign) -> Result<Campaign> {
        let attacks = self.attacks.list_by_campaign(&campaign.id).await?;
        if attacks.is_empty() {
            return Err(HiveError::Validation(format!(
                "campaign {} has no attacks to run",
                campaign.id
            )));
        }

        let nodes: Vec<AttackNode> = attacks.iter().map(AttackNode::from).collect();
        graph::validate_dependencies(&nodes)?;

        self.router.ensure_available().await?;

        let resuming = campaign.status == CampaignStatus::Paused;
        if !resuming {
            // A fresh start after a stop/reset replaces any prior task rows
            // so each attack's keyspace is tiled exactly once.
            self.tasks.delete_for_campaign(&campaign.id).await?;
        }

        let snapshot = campaign.clone();
        let mut updated = campaign;
        updated.status = CampaignStatus::Running;
        if updated.started_at.is_none() {
            updated.started_at = Some(Utc::now());
        }
        self.campaigns.save(&updated).await?;

        let outcome = if resuming {
            // Tasks already exist from the first start; nothing to generate.
            Ok(())
        } else {
            self.generate_or_enqueue(&updated, &attacks).await
        };

        // Wake-up hint for distribution consumers on the campaign's tier.
        let outcome = match outcome {
            Ok(()) => {
                self.router
                    .submit(
                        lane_for_priority(updated.priority),
                        JobMessage::DistributeCampaign {
                            campaign_id: updated.id.clone(),
                        },
                    )
                    .await
            }
            err => err,
        };

        if let Err(e) = outcome {
            if !resuming {
                self.tasks.delete_for_campaign(&updated.id).await?;
            }
            self.campaigns.save(&snapshot).await?;
            tracing::error!(
                campaign_id = %updated.id,
                error = %e,
                "Running transition rolled back"
            );
            return Err(e);
        }

        let updated = self
            .campaigns
            .get_by_id(&updated.id)
            .await?
            .ok_or_else(|| HiveError::not_found("campaign", updated.id.clone()))?;

        self.emit_status(&updated).await;
        tracing::info!(campaign_id = %updated.id, "Campaign running");
        Ok(updated)
    }

    async fn generate_or_enqueue(&self, campaign: &Campaign, attacks: &[Attack]) -> Result<()> {
        let chunk_size = self.task_config.chunk_size;
        let estimate = generator::estimate_task_count(attacks, chunk_size);

        if estimate <= self.task_config.inline_task_threshold {
            // Small campaign: generate synchronously, in parallel across
            // attacks, blocking this transition until every task exists.
            let results = futures::future::join_all(
                attacks
                    .iter()
                    .map(|attack| self.generator.generate_for_attack(&attack.id, chunk_size)),
            )
            .await;

            let mut created = 0u64;
            for result in results {
                created += result?;
            }

            self.campaigns
                .update_progress(&campaign.id, created as i64, 0, 0.0)
                .await?;
        } else {
            let attack_ids = attacks.iter().map(|a| a.id.clone()).collect();
            self.router
                .submit(
                    Lane::TaskGeneration,
                    JobMessage::GenerateTasks {
                        attack_ids,
                        chunk_size,
                    },
                )
                .await?;
        }

        Ok(())
    }

    async fn set_status(&self, campaign: Campaign, to: CampaignStatus) -> Result<Campaign> {
        let mut updated = campaign;
        updated.status = to;
        self.campaigns.save(&updated).await?;
        self.emit_status(&updated).await;
        tracing::info!(campaign_id = %updated.id, status = to.as_str(), "Campaign transitioned");
        Ok(updated)
    }

    async fn finish(&self, campaign: Campaign, to: CampaignStatus) -> Result<Campaign> {
        if to == CampaignStatus::Cancelled {
            let cancelled = self.tasks.cancel_open_for_campaign(&campaign.id).await?;
            if cancelled > 0 {
                tracing::info!(
                    campaign_id = %campaign.id,
                    tasks = cancelled,
                    "Cancelled in-flight tasks"
                );
            }
        }

        let mut updated = campaign;
        updated.status = to;
        updated.completed_at = Some(Utc::now());
        self.campaigns.save(&updated).await?;
        self.emit_status(&updated).await;
        tracing::info!(campaign_id = %updated.id, status = to.as_str(), "Campaign finished");
        Ok(updated)
    }

    /// "Stop": back to draft, cancelling anything still in flight and
    /// clearing the run's timestamps and progress snapshot.
    async fn stop(&self, campaign: Campaign) -> Result<Campaign> {
        let cancelled = self.tasks.cancel_open_for_campaign(&campaign.id).await?;

        let mut updated = campaign;
        updated.status = CampaignStatus::Draft;
        updated.started_at = None;
        updated.completed_at = None;
        updated.total_tasks = 0;
        updated.completed_tasks = 0;
        updated.overall_progress = 0.0;
        self.campaigns.save(&updated).await?;

        self.emit_status(&updated).await;
        tracing::info!(
            campaign_id = %updated.id,
            cancelled = cancelled,
            "Campaign stopped and reset to draft"
        );
        Ok(updated)
    }

    async fn emit_status(&self, campaign: &Campaign) {
        self.bus
            .publish(
                EventType::CampaignStatus,
                &campaign.project_id,
                serde_json::json!({
                    "campaign_id": campaign.id,
                    "status": campaign.status.as_str(),
                }),
            )
            .await;
    }
}
