//! Reclamation of tasks held by silent agents.

use crate::database::repository::TaskRepository;
use crate::Result;
use chrono::{Duration, Utc};

#[derive(Clone)]
pub struct HeartbeatReaper {
    tasks: TaskRepository,
    stale_threshold: Duration,
}

impl HeartbeatReaper {
    pub fn new(tasks: TaskRepository, stale_threshold_seconds: u32) -> Self {
        Self {
            tasks,
            stale_threshold: Duration::seconds(stale_threshold_seconds as i64),
        }
    }

    /// One reaper pass: every assigned task whose agent has not been seen
    /// within the threshold goes back to pending. Bypasses the retry
    /// counter so a flaky agent does not burn the work's retry budget.
    /// This is the only guarantee of forward progress when an agent
    /// disappears without reporting failure.
    pub async fn reap(&self) -> Result<u64> {
        let cutoff = Utc::now() - self.stale_threshold;
        let reassigned = self.tasks.reap_stale(cutoff).await?;

        if reassigned > 0 {
            tracing::info!(reassigned = reassigned, "Reclaimed tasks from stale agents");
        }

        Ok(reassigned)
    }
}
