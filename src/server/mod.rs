//! Composition root: wires the persistence layer, the queue substrate and
//! every orchestration component, and drives the background loops.

use crate::campaign::LifecycleController;
use crate::config::ServerConfig;
use crate::database::repository::{
    AgentRepository, AttackRepository, CampaignRepository, TaskRepository,
};
use crate::database::{init_database, DbPool};
use crate::events::EventBus;
use crate::queue::worker::{GenerationWorker, MonitorWorker, ParseWorker};
use crate::queue::{InProcessQueue, JobMessage, JobQueueRouter, Lane};
use crate::store::{HashListRepository, ResourceAccess, WordlistRepository};
use crate::tasks::{
    FailureHandler, HeartbeatReaper, ReportIngestor, TaskDispatcher, TaskGenerator,
};
use std::sync::Arc;
use tokio::signal;

pub struct HiveCore {
    pub config: ServerConfig,
    pub pool: DbPool,
    pub bus: Arc<EventBus>,
    pub queue: Arc<InProcessQueue>,
    pub router: JobQueueRouter,
    pub campaigns: CampaignRepository,
    pub attacks: AttackRepository,
    pub tasks: TaskRepository,
    pub agents: AgentRepository,
    pub hash_lists: HashListRepository,
    pub wordlists: WordlistRepository,
    pub lifecycle: LifecycleController,
    pub dispatcher: TaskDispatcher,
    pub ingestor: ReportIngestor,
    pub failures: FailureHandler,
    pub reaper: HeartbeatReaper,
}

impl HiveCore {
    pub async fn new(config: ServerConfig) -> crate::Result<Self> {
        let pool = init_database(&config.database_path).await?;
        Ok(Self::with_pool(config, pool))
    }

    /// Wire everything against an already-initialized pool.
    pub fn with_pool(config: ServerConfig, pool: DbPool) -> Self {
        let campaigns = CampaignRepository::new(pool.clone());
        let attacks = AttackRepository::new(pool.clone());
        let tasks = TaskRepository::new(pool.clone());
        let agents = AgentRepository::new(pool.clone());
        let hash_lists = HashListRepository::new(pool.clone());
        let wordlists = WordlistRepository::new(pool.clone());

        let bus = Arc::new(EventBus::new());
        let queue = Arc::new(InProcessQueue::new());
        let router = JobQueueRouter::new(queue.clone());

        let generator = TaskGenerator::new(attacks.clone(), tasks.clone());

        let lifecycle = LifecycleController::new(
            campaigns.clone(),
            attacks.clone(),
            tasks.clone(),
            generator,
            router.clone(),
            bus.clone(),
            config.tasks.clone(),
        );

        let dispatcher = TaskDispatcher::new(agents.clone(), tasks.clone(), campaigns.clone());
        let ingestor = ReportIngestor::new(
            tasks.clone(),
            campaigns.clone(),
            hash_lists.clone(),
            bus.clone(),
        );
        let failures = FailureHandler::new(
            tasks.clone(),
            campaigns.clone(),
            agents.clone(),
            bus.clone(),
            config.tasks.max_retries,
        );
        let reaper = HeartbeatReaper::new(tasks.clone(), config.agents.stale_threshold_seconds);

        Self {
            config,
            pool,
            bus,
            queue,
            router,
            campaigns,
            attacks,
            tasks,
            agents,
            hash_lists,
            wordlists,
            lifecycle,
            dispatcher,
            ingestor,
            failures,
            reaper,
        }
    }

    /// Record an uploaded hash-list file and queue it for parsing. The
    /// parse worker turns its lines into uncracked store items.
    pub async fn record_hash_list_upload(
        &self,
        hash_list_id: &str,
        storage_ref: &str,
    ) -> crate::Result<()> {
        self.hash_lists.upload_file(hash_list_id, storage_ref).await?;
        self.router
            .submit(
                Lane::HashlistParse,
                JobMessage::ParseHashList {
                    hash_list_id: hash_list_id.to_string(),
                },
            )
            .await
    }

    /// Start the lane consumers and the reaper interval, then run until a
    /// shutdown signal arrives.
    pub async fn run(self) -> crate::Result<()> {
        tracing::info!("HashHive core starting");

        let generator = TaskGenerator::new(self.attacks.clone(), self.tasks.clone());
        let generation_worker = GenerationWorker::new(
            generator,
            self.attacks.clone(),
            self.campaigns.clone(),
            self.tasks.clone(),
        );
        let generation_rx = self
            .queue
            .take_receiver(Lane::TaskGeneration)
            .await
            .ok_or_else(|| {
                crate::HiveError::ServiceUnavailable(
                    "generation lane already has a consumer".to_string(),
                )
            })?;
        tokio::spawn(generation_worker.run(generation_rx));

        let parse_worker = ParseWorker::new(self.hash_lists.clone());
        let parse_rx = self
            .queue
            .take_receiver(Lane::HashlistParse)
            .await
            .ok_or_else(|| {
                crate::HiveError::ServiceUnavailable(
                    "hashlist-parse lane already has a consumer".to_string(),
                )
            })?;
        tokio::spawn(parse_worker.run(parse_rx));

        let monitor_worker = MonitorWorker::new(self.reaper.clone());
        let monitor_rx = self
            .queue
            .take_receiver(Lane::HeartbeatMonitor)
            .await
            .ok_or_else(|| {
                crate::HiveError::ServiceUnavailable(
                    "heartbeat-monitor lane already has a consumer".to_string(),
                )
            })?;
        tokio::spawn(monitor_worker.run(monitor_rx));

        let reaper = self.reaper.clone();
        let reap_interval =
            std::time::Duration::from_secs(self.config.agents.reap_interval_seconds as u64);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(reap_interval);
            loop {
                interval.tick().await;
                match reaper.reap().await {
                    Ok(count) if count > 0 => {
                        tracing::info!(reassigned = count, "Reaper pass reclaimed tasks");
                    }
                    Ok(_) => {}
                    Err(e) => tracing::error!(error = %e, "Reaper pass failed"),
                }
            }
        });

        signal::ctrl_c().await?;
        tracing::info!("Shutdown signal received");
        Ok(())
    }
}
