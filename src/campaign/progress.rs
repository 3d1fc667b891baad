//! Campaign progress recomputation, denormalized onto the campaign row.

use crate::database::models::{TaskProgress, TaskStatus};
use crate::database::repository::{CampaignRepository, TaskRepository};
use crate::Result;

/// Per-task contribution to overall campaign progress.
pub fn contribution(status: TaskStatus, progress: &TaskProgress) -> f64 {
    match status {
        TaskStatus::Completed | TaskStatus::Exhausted => 1.0,
        TaskStatus::Running => progress.keyspace_progress.clamp(0.0, 1.0),
        _ => 0.0,
    }
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

/// Recompute a campaign's (total, completed, overall) snapshot from its
/// task rows and write it back for cheap reads.
pub async fn recompute(
    campaigns: &CampaignRepository,
    tasks: &TaskRepository,
    campaign_id: &str,
) -> Result<(i64, i64, f64)> {
    let rows = tasks.status_progress_for_campaign(campaign_id).await?;

    let total = rows.len() as i64;
    if total == 0 {
        campaigns.update_progress(campaign_id, 0, 0, 0.0).await?;
        return Ok((0, 0, 0.0));
    }

    let completed = rows
        .iter()
        .filter(|(status, _)| matches!(status, TaskStatus::Completed | TaskStatus::Exhausted))
        .count() as i64;

    let sum: f64 = rows
        .iter()
        .map(|(status, progress)| contribution(*status, &progress.0))
        .sum();

    let overall = round4(sum / total as f64);
    campaigns
        .update_progress(campaign_id, total, completed, overall)
        .await?;

    Ok((total, completed, overall))
}
