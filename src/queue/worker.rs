//! Queue-lane consumers. Workers share no in-process state with the
//! request path; coordination happens through rows and queue messages.

use super::JobMessage;
use crate::campaign::progress;
use crate::database::repository::{AttackRepository, CampaignRepository, TaskRepository};
use crate::store::HashListRepository;
use crate::tasks::{HeartbeatReaper, TaskGenerator};
use crate::{HiveError, Result};
use std::collections::HashSet;
use tokio::sync::mpsc;

/// Consumes the task-generation lane for campaigns too large to partition
/// inline. One message carries a whole campaign's attack ids; a failing
/// attack is logged and skipped, never aborting the rest of the batch.
pub struct GenerationWorker {
    generator: TaskGenerator,
    attacks: AttackRepository,
    campaigns: CampaignRepository,
    tasks: TaskRepository,
}

impl GenerationWorker {
    pub fn new(
        generator: TaskGenerator,
        attacks: AttackRepository,
        campaigns: CampaignRepository,
        tasks: TaskRepository,
    ) -> Self {
        Self {
            generator,
            attacks,
            campaigns,
            tasks,
        }
    }

    pub async fn run(self, mut rx: mpsc::UnboundedReceiver<JobMessage>) {
        while let Some(message) = rx.recv().await {
            match message {
                JobMessage::GenerateTasks {
                    attack_ids,
                    chunk_size,
                } => {
                    self.generate_batch(&attack_ids, chunk_size).await;
                }
                other => {
                    tracing::debug!(message = ?other, "Ignoring message on generation lane");
                }
            }
        }

        tracing::info!("Generation worker lane closed, exiting");
    }

    async fn generate_batch(&self, attack_ids: &[String], chunk_size: i64) {
        let mut created = 0u64;
        let mut touched_campaigns: HashSet<String> = HashSet::new();

        for attack_id in attack_ids {
            match self.generator.generate_for_attack(attack_id, chunk_size).await {
                Ok(count) => {
                    created += count;
                    if let Ok(Some(attack)) = self.attacks.get_by_id(attack_id).await {
                        touched_campaigns.insert(attack.campaign_id);
                    }
                }
                Err(e) => {
                    tracing::error!(
                        attack_id = %attack_id,
                        error = %e,
                        "Task generation failed for attack"
                    );
                }
            }
        }

        for campaign_id in &touched_campaigns {
            if let Err(e) = progress::recompute(&self.campaigns, &self.tasks, campaign_id).await {
                tracing::error!(
                    campaign_id = %campaign_id,
                    error = %e,
                    "Progress snapshot update failed after generation"
                );
            }
        }

        tracing::info!(
            attacks = attack_ids.len(),
            tasks = created,
            "Generation batch finished"
        );
    }
}

/// Consumes the hashlist-parse lane: reads an uploaded file and registers
/// its hash values as uncracked items.
pub struct ParseWorker {
    hash_lists: HashListRepository,
}

impl ParseWorker {
    pub fn new(hash_lists: HashListRepository) -> Self {
        Self { hash_lists }
    }

    pub async fn run(self, mut rx: mpsc::UnboundedReceiver<JobMessage>) {
        while let Some(message) = rx.recv().await {
            match message {
                JobMessage::ParseHashList { hash_list_id } => {
                    match self.parse(&hash_list_id).await {
                        Ok(count) => {
                            tracing::info!(
                                hash_list_id = %hash_list_id,
                                hashes = count,
                                "Hash list parsed"
                            );
                        }
                        Err(e) => {
                            tracing::error!(
                                hash_list_id = %hash_list_id,
                                error = %e,
                                "Hash list parse failed"
                            );
                        }
                    }
                }
                other => {
                    tracing::debug!(message = ?other, "Ignoring message on parse lane");
                }
            }
        }

        tracing::info!("Parse worker lane closed, exiting");
    }

    /// One line per hash; blank lines are skipped and duplicates collapse
    /// against the store's unique key. Returns hashes newly registered.
    pub async fn parse(&self, hash_list_id: &str) -> Result<u64> {
        use crate::store::ResourceAccess;

        let list = self
            .hash_lists
            .get_by_id(hash_list_id)
            .await?
            .ok_or_else(|| HiveError::not_found("hash list", hash_list_id.to_string()))?;

        let storage_ref = list.storage_ref.ok_or_else(|| {
            HiveError::Validation(format!("hash list {} has no uploaded file", hash_list_id))
        })?;

        let contents = tokio::fs::read_to_string(&storage_ref).await?;
        let hashes: Vec<String> = contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();

        self.hash_lists.register_hashes(hash_list_id, &hashes).await
    }
}

/// Consumes heartbeat-monitor triggers: each message runs one reap pass.
pub struct MonitorWorker {
    reaper: HeartbeatReaper,
}

impl MonitorWorker {
    pub fn new(reaper: HeartbeatReaper) -> Self {
        Self { reaper }
    }

    pub async fn run(self, mut rx: mpsc::UnboundedReceiver<JobMessage>) {
        while let Some(message) = rx.recv().await {
            match message {
                JobMessage::CheckHeartbeats => {
                    if let Err(e) = self.reaper.reap().await {
                        tracing::error!(error = %e, "Reaper pass failed");
                    }
                }
                other => {
                    tracing::debug!(message = ?other, "Ignoring message on monitor lane");
                }
            }
        }

        tracing::info!("Monitor worker lane closed, exiting");
    }
}
