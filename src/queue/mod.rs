//! Priority-lane job routing over a pluggable queue substrate.
//!
//! Callers treat a false `enqueue` or a non-healthy report as a hard
//! outage: the work is refused with a retryable error, never dropped.

pub mod worker;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

use crate::{HiveError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Lane {
    TasksHigh,
    TasksNormal,
    TasksLow,
    HashlistParse,
    TaskGeneration,
    HeartbeatMonitor,
}

impl Lane {
    pub const ALL: [Lane; 6] = [
        Lane::TasksHigh,
        Lane::TasksNormal,
        Lane::TasksLow,
        Lane::HashlistParse,
        Lane::TaskGeneration,
        Lane::HeartbeatMonitor,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::TasksHigh => "tasks.high",
            Self::TasksNormal => "tasks.normal",
            Self::TasksLow => "tasks.low",
            Self::HashlistParse => "hashlist.parse",
            Self::TaskGeneration => "tasks.generate",
            Self::HeartbeatMonitor => "agents.monitor",
        }
    }
}

/// Map a numeric campaign priority (1-10, lower is more urgent) onto a
/// distribution tier: <=1 high, >=10 low, otherwise the nearest of the
/// 1/5/10 buckets with ties going to normal.
pub fn lane_for_priority(priority: i64) -> Lane {
    if priority <= 1 {
        return Lane::TasksHigh;
    }
    if priority >= 10 {
        return Lane::TasksLow;
    }

    let to_high = (priority - 1).abs();
    let to_normal = (priority - 5).abs();
    let to_low = (priority - 10).abs();

    if to_high < to_normal && to_high < to_low {
        Lane::TasksHigh
    } else if to_low < to_normal && to_low < to_high {
        Lane::TasksLow
    } else {
        Lane::TasksNormal
    }
}

/// Small, idempotent-to-redeliver queue payloads: ids and scalars only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobMessage {
    GenerateTasks {
        attack_ids: Vec<String>,
        chunk_size: i64,
    },
    ParseHashList {
        hash_list_id: String,
    },
    DistributeCampaign {
        campaign_id: String,
    },
    CheckHeartbeats,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueHealth {
    Healthy,
    Degraded,
    Disconnected,
}

#[async_trait]
pub trait QueueBackend: Send + Sync {
    async fn push(&self, lane: Lane, message: JobMessage) -> bool;
    async fn health(&self) -> QueueHealth;
}

/// In-process substrate: one unbounded channel per lane. Workers take the
/// receiving half; a lane whose consumer is gone reports degraded.
pub struct InProcessQueue {
    senders: DashMap<Lane, mpsc::UnboundedSender<JobMessage>>,
    receivers: Mutex<HashMap<Lane, mpsc::UnboundedReceiver<JobMessage>>>,
}

impl InProcessQueue {
    pub fn new() -> Self {
        let senders = DashMap::new();
        let mut receivers = HashMap::new();

        for lane in Lane::ALL {
            let (tx, rx) = mpsc::unbounded_channel();
            senders.insert(lane, tx);
            receivers.insert(lane, rx);
        }

        Self {
            senders,
            receivers: Mutex::new(receivers),
        }
    }

    /// Hand a lane's receiver to its worker. Each lane has exactly one
    /// consumer; a second take returns None.
    pub async fn take_receiver(&self, lane: Lane) -> Option<mpsc::UnboundedReceiver<JobMessage>> {
        self.receivers.lock().await.remove(&lane)
    }
}

impl Default for InProcessQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueueBackend for InProcessQueue {
    async fn push(&self, lane: Lane, message: JobMessage) -> bool {
        match self.senders.get(&lane) {
            Some(tx) => tx.send(message).is_ok(),
            None => false,
        }
    }

    async fn health(&self) -> QueueHealth {
        let closed = self
            .senders
            .iter()
            .filter(|entry| entry.value().is_closed())
            .count();

        if closed == 0 {
            QueueHealth::Healthy
        } else if closed < self.senders.len() {
            QueueHealth::Degraded
        } else {
            QueueHealth::Disconnected
        }
    }
}

/// Routes generation/parsing/monitor work onto named lanes.
#[derive(Clone)]
pub struct JobQueueRouter {
    backend: Arc<dyn QueueBackend>,
}

impl JobQueueRouter {
    pub fn new(backend: Arc<dyn QueueBackend>) -> Self {
        Self { backend }
    }

    pub async fn enqueue(&self, lane: Lane, message: JobMessage) -> bool {
        let accepted = self.backend.push(lane, message).await;
        if !accepted {
            tracing::error!(lane = lane.name(), "Queue refused message");
        }
        accepted
    }

    pub async fn health(&self) -> QueueHealth {
        self.backend.health().await
    }

    /// Degraded or disconnected substrate is treated like a hard outage.
    pub async fn ensure_available(&self) -> Result<()> {
        match self.health().await {
            QueueHealth::Healthy => Ok(()),
            other => Err(HiveError::ServiceUnavailable(format!(
                "job queue is {:?}",
                other
            ))),
        }
    }

    /// Enqueue-or-error: refusal surfaces as a retryable condition.
    pub async fn submit(&self, lane: Lane, message: JobMessage) -> Result<()> {
        self.ensure_available().await?;
        if self.enqueue(lane, message).await {
            Ok(())
        } else {
            Err(HiveError::ServiceUnavailable(format!(
                "lane {} rejected message",
                lane.name()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_maps_to_nearest_tier() {
        assert_eq!(lane_for_priority(1), Lane::TasksHigh);
        assert_eq!(lane_for_priority(0), Lane::TasksHigh);
        assert_eq!(lane_for_priority(2), Lane::TasksHigh);
        // Equidistant between high and normal falls back to normal.
        assert_eq!(lane_for_priority(3), Lane::TasksNormal);
        assert_eq!(lane_for_priority(5), Lane::TasksNormal);
        assert_eq!(lane_for_priority(7), Lane::TasksNormal);
        assert_eq!(lane_for_priority(8), Lane::TasksLow);
        assert_eq!(lane_for_priority(10), Lane::TasksLow);
        assert_eq!(lane_for_priority(99), Lane::TasksLow);
    }

    #[tokio::test]
    async fn in_process_queue_round_trips_messages() {
        let queue = Arc::new(InProcessQueue::new());
        let router = JobQueueRouter::new(queue.clone());

        let mut rx = queue.take_receiver(Lane::TaskGeneration).await.unwrap();
        router
            .submit(
                Lane::TaskGeneration,
                JobMessage::GenerateTasks {
                    attack_ids: vec!["a1".to_string()],
                    chunk_size: 1000,
                },
            )
            .await
            .unwrap();

        match rx.recv().await.unwrap() {
            JobMessage::GenerateTasks { attack_ids, chunk_size } => {
                assert_eq!(attack_ids, vec!["a1".to_string()]);
                assert_eq!(chunk_size, 1000);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    struct DeadBackend;

    #[async_trait]
    impl QueueBackend for DeadBackend {
        async fn push(&self, _lane: Lane, _message: JobMessage) -> bool {
            false
        }

        async fn health(&self) -> QueueHealth {
            QueueHealth::Disconnected
        }
    }

    #[tokio::test]
    async fn dead_backend_surfaces_service_unavailable() {
        let router = JobQueueRouter::new(Arc::new(DeadBackend));
        let err = router
            .submit(Lane::HeartbeatMonitor, JobMessage::CheckHeartbeats)
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }
}
