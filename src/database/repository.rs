use super::models::*;
use super::DbPool;
use crate::Result;
use chrono::{DateTime, Utc};
use sqlx::types::Json;

#[derive(Clone)]
pub struct CampaignRepository {
    pool: DbPool,
}

impl CampaignRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, campaign: &Campaign) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO campaigns (id, project_id, name, description, status, priority,
                                   hash_list_id, started_at, completed_at,
                                   total_tasks, completed_tasks, overall_progress, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&campaign.id)
        .bind(&campaign.project_id)
        .bind(&campaign.name)
        .bind(&campaign.description)
        .bind(campaign.status)
        .bind(campaign.priority)
        .bind(&campaign.hash_list_id)
        .bind(campaign.started_at)
        .bind(campaign.completed_at)
        .bind(campaign.total_tasks)
        .bind(campaign.completed_tasks)
        .bind(campaign.overall_progress)
        .bind(campaign.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_by_id(&self, id: &str) -> Result<Option<Campaign>> {
        let campaign = sqlx::query_as::<_, Campaign>(r#"SELECT * FROM campaigns WHERE id = ?"#)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(campaign)
    }

    pub async fn list_by_project(&self, project_id: &str) -> Result<Vec<Campaign>> {
        let campaigns = sqlx::query_as::<_, Campaign>(
            r#"SELECT * FROM campaigns WHERE project_id = ? ORDER BY created_at DESC"#,
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(campaigns)
    }

    /// Full-row write. Used by the lifecycle controller both for normal
    /// transitions and for restoring a snapshot on rollback.
    pub async fn save(&self, campaign: &Campaign) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE campaigns
            SET name = ?, description = ?, status = ?, priority = ?, hash_list_id = ?,
                started_at = ?, completed_at = ?,
                total_tasks = ?, completed_tasks = ?, overall_progress = ?
            WHERE id = ?
            "#,
        )
        .bind(&campaign.name)
        .bind(&campaign.description)
        .bind(campaign.status)
        .bind(campaign.priority)
        .bind(&campaign.hash_list_id)
        .bind(campaign.started_at)
        .bind(campaign.completed_at)
        .bind(campaign.total_tasks)
        .bind(campaign.completed_tasks)
        .bind(campaign.overall_progress)
        .bind(&campaign.id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Denormalized progress snapshot for cheap reads.
    pub async fn update_progress(
        &self,
        id: &str,
        total_tasks: i64,
        completed_tasks: i64,
        overall_progress: f64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE campaigns
            SET total_tasks = ?, completed_tasks = ?, overall_progress = ?
            WHERE id = ?
            "#,
        )
        .bind(total_tasks)
        .bind(completed_tasks)
        .bind(overall_progress)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[derive(Clone)]
pub struct AttackRepository {
    pool: DbPool,
}

impl AttackRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, attack: &Attack) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO attacks (id, campaign_id, project_id, name, mode, keyspace,
                                 dependencies, status, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&attack.id)
        .bind(&attack.campaign_id)
        .bind(&attack.project_id)
        .bind(&attack.name)
        .bind(&attack.mode)
        .bind(&attack.keyspace)
        .bind(&attack.dependencies)
        .bind(attack.status)
        .bind(attack.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_by_id(&self, id: &str) -> Result<Option<Attack>> {
        let attack = sqlx::query_as::<_, Attack>(r#"SELECT * FROM attacks WHERE id = ?"#)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(attack)
    }

    pub async fn list_by_campaign(&self, campaign_id: &str) -> Result<Vec<Attack>> {
        let attacks = sqlx::query_as::<_, Attack>(
            r#"SELECT * FROM attacks WHERE campaign_id = ? ORDER BY created_at ASC"#,
        )
        .bind(campaign_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(attacks)
    }
}

#[derive(Clone)]
pub struct TaskRepository {
    pool: DbPool,
}

impl TaskRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Insert a batch of freshly generated tasks in one transaction.
    /// Returns the number of rows created.
    pub async fn create_batch(&self, tasks: &[Task]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        for task in tasks {
            sqlx::query(
                r#"
                INSERT INTO tasks (attack_id, campaign_id, agent_id, status,
                                   work_range, progress, result_stats, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&task.attack_id)
            .bind(&task.campaign_id)
            .bind(&task.agent_id)
            .bind(task.status)
            .bind(&task.work_range)
            .bind(&task.progress)
            .bind(&task.result_stats)
            .bind(task.created_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(tasks.len() as u64)
    }

    pub async fn get_by_id(&self, id: i64) -> Result<Option<Task>> {
        let task = sqlx::query_as::<_, Task>(r#"SELECT * FROM tasks WHERE id = ?"#)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(task)
    }

    /// Atomically claim the next pending task visible to an agent's project.
    ///
    /// The conditional UPDATE against a priority-ordered subselect is the
    /// whole claim: SQLite serializes writers, and the `status = 'pending'`
    /// guard means a row already flipped by a concurrent claimer simply
    /// yields no row here instead of a double assignment.
    pub async fn claim_next(
        &self,
        agent_id: &str,
        project_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Task>> {
        let task = sqlx::query_as::<_, Task>(
            r#"
            UPDATE tasks
            SET status = 'assigned', agent_id = ?, assigned_at = ?
            WHERE id = (
                SELECT t.id FROM tasks t
                JOIN campaigns c ON c.id = t.campaign_id
                WHERE t.status = 'pending' AND t.agent_id IS NULL
                  AND c.project_id = ? AND c.status = 'running'
                ORDER BY c.priority ASC, t.id ASC
                LIMIT 1
            ) AND status = 'pending'
            RETURNING *
            "#,
        )
        .bind(agent_id)
        .bind(now)
        .bind(project_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(task)
    }

    /// Undo a claim that failed post-selection verification.
    pub async fn release_claim(&self, task_id: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE tasks SET status = 'pending', agent_id = NULL, assigned_at = NULL
            WHERE id = ? AND status = 'assigned'
            "#,
        )
        .bind(task_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Record a running-progress report. The guard is part of the UPDATE
    /// itself, the same idiom as `claim_next`: a task that was cancelled,
    /// reaped or reassigned between the caller's check and this write
    /// matches zero rows instead of being flipped back to running.
    /// Returns whether the write landed.
    pub async fn update_running(
        &self,
        task_id: i64,
        agent_id: &str,
        progress: &TaskProgress,
        started_at: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET status = 'running', progress = ?,
                started_at = COALESCE(started_at, ?)
            WHERE id = ? AND agent_id = ? AND status IN ('assigned', 'running')
            "#,
        )
        .bind(Json(*progress))
        .bind(started_at)
        .bind(task_id)
        .bind(agent_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Move an active task to a terminal status. Only `assigned`/`running`
    /// rows match; a task already cancelled or reaped stays as it is and
    /// the caller sees `false`. When `owner` is given the row must still be
    /// bound to that agent.
    pub async fn mark_terminal(
        &self,
        task_id: i64,
        status: TaskStatus,
        completed_at: DateTime<Utc>,
        failure_reason: Option<&str>,
        owner: Option<&str>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET status = ?, completed_at = ?, failure_reason = COALESCE(?, failure_reason)
            WHERE id = ? AND status IN ('assigned', 'running')
              AND (? IS NULL OR agent_id = ?)
            "#,
        )
        .bind(status)
        .bind(completed_at)
        .bind(failure_reason)
        .bind(task_id)
        .bind(owner)
        .bind(owner)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Hand a task back to the pending pool. The work range stays as
    /// generated so the same keyspace chunk gets redone. Guarded like
    /// `mark_terminal`: a concurrently cancelled task is never resurrected.
    pub async fn return_to_pending(&self, task_id: i64, stats: &ResultStats) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET status = 'pending', agent_id = NULL, assigned_at = NULL, started_at = NULL,
                result_stats = ?
            WHERE id = ? AND status IN ('assigned', 'running')
            "#,
        )
        .bind(Json(stats.clone()))
        .bind(task_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Active (assigned or running) tasks currently bound to an agent.
    pub async fn list_active_for_agent(&self, agent_id: &str) -> Result<Vec<Task>> {
        let tasks = sqlx::query_as::<_, Task>(
            r#"
            SELECT * FROM tasks
            WHERE agent_id = ? AND status IN ('assigned', 'running')
            ORDER BY id ASC
            "#,
        )
        .bind(agent_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(tasks)
    }

    /// Return assigned tasks whose owning agent has not been seen since
    /// the cutoff. Bypasses retry accounting on purpose: the work, not
    /// the agent, is presumed healthy.
    pub async fn reap_stale(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET status = 'pending', agent_id = NULL, assigned_at = NULL
            WHERE status = 'assigned'
              AND agent_id IN (SELECT id FROM agents WHERE last_seen_at < ?)
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Cancel every non-terminal task of a campaign ("stop" semantics).
    pub async fn cancel_open_for_campaign(&self, campaign_id: &str) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET status = 'cancelled', agent_id = NULL, assigned_at = NULL
            WHERE campaign_id = ? AND status IN ('pending', 'assigned', 'running')
            "#,
        )
        .bind(campaign_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Compensation path for a failed running-transition: drop whatever the
    /// aborted generation pass managed to insert.
    pub async fn delete_for_campaign(&self, campaign_id: &str) -> Result<u64> {
        let result = sqlx::query(r#"DELETE FROM tasks WHERE campaign_id = ?"#)
            .bind(campaign_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    pub async fn list_by_campaign(&self, campaign_id: &str) -> Result<Vec<Task>> {
        let tasks = sqlx::query_as::<_, Task>(
            r#"SELECT * FROM tasks WHERE campaign_id = ? ORDER BY id ASC"#,
        )
        .bind(campaign_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(tasks)
    }

    pub async fn list_by_attack(&self, attack_id: &str) -> Result<Vec<Task>> {
        let tasks = sqlx::query_as::<_, Task>(
            r#"SELECT * FROM tasks WHERE attack_id = ? ORDER BY id ASC"#,
        )
        .bind(attack_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(tasks)
    }

    /// (status, progress) pairs for a campaign, enough for the progress
    /// recomputation without dragging whole rows around.
    pub async fn status_progress_for_campaign(
        &self,
        campaign_id: &str,
    ) -> Result<Vec<(TaskStatus, Json<TaskProgress>)>> {
        let rows = sqlx::query_as::<_, (TaskStatus, Json<TaskProgress>)>(
            r#"SELECT status, progress FROM tasks WHERE campaign_id = ?"#,
        )
        .bind(campaign_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}

#[derive(Clone)]
pub struct AgentRepository {
    pool: DbPool,
}

impl AgentRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, agent: &Agent) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO agents (id, project_id, name, status, last_seen_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&agent.id)
        .bind(&agent.project_id)
        .bind(&agent.name)
        .bind(agent.status)
        .bind(agent.last_seen_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_by_id(&self, id: &str) -> Result<Option<Agent>> {
        let agent = sqlx::query_as::<_, Agent>(r#"SELECT * FROM agents WHERE id = ?"#)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(agent)
    }

    /// Heartbeat touch. Agent registration and status management belong to
    /// the agent subsystem; the core only refreshes liveness.
    pub async fn touch(&self, id: &str, seen_at: DateTime<Utc>) -> Result<()> {
        sqlx::query(r#"UPDATE agents SET last_seen_at = ? WHERE id = ?"#)
            .bind(seen_at)
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn set_status(&self, id: &str, status: AgentStatus) -> Result<()> {
        sqlx::query(r#"UPDATE agents SET status = ? WHERE id = ?"#)
            .bind(status)
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn record_error(
        &self,
        agent_id: &str,
        task_id: Option<i64>,
        severity: ErrorSeverity,
        message: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO agent_errors (agent_id, task_id, severity, message, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(agent_id)
        .bind(task_id)
        .bind(severity)
        .bind(message)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn list_errors(&self, agent_id: &str) -> Result<Vec<AgentError>> {
        let errors = sqlx::query_as::<_, AgentError>(
            r#"SELECT * FROM agent_errors WHERE agent_id = ? ORDER BY id ASC"#,
        )
        .bind(agent_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(errors)
    }
}
