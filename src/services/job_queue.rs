//! Database-backed job queue
//!
//! A row per job in `job_queue`. Claiming uses `FOR UPDATE SKIP LOCKED` so
//! any number of workers can poll the same queue without handing the same
//! job to two of them.

use std::collections::HashMap;

use serde::Serialize;
use sqlx::PgPool;

use crate::models::{Job, JobStatus};

/// Stuck `running` rows older than this are re-queued at worker startup.
const STUCK_JOB_MINUTES: i32 = 20;

#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueStats {
    pub pending: i64,
    pub running: i64,
    pub completed: i64,
    pub failed: i64,
}

#[derive(Clone)]
pub struct JobQueueService {
    pool: PgPool,
}

impl JobQueueService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a pending job and return its id.
    pub async fn create_job(
        &self,
        job_type: &str,
        params: serde_json::Value,
        priority: i32,
        max_retries: i32,
    ) -> anyhow::Result<i64> {
        let (job_id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO job_queue (job_type, params, priority, max_retries)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
        )
        .bind(job_type)
        .bind(&params)
        .bind(priority)
        .bind(max_retries)
        .fetch_one(&self.pool)
        .await?;

        tracing::info!(job_id, job_type, priority, "job created");
        Ok(job_id)
    }

    /// Atomically claim the highest-priority, oldest pending job and flip it
    /// to `running`. `SKIP LOCKED` guarantees two concurrent workers never
    /// claim the same row; returns None when the queue is empty.
    pub async fn claim_pending(&self, worker_id: &str) -> anyhow::Result<Option<Job>> {
        let job = sqlx::query_as::<_, Job>(
            r#"
            UPDATE job_queue
            SET status     = 'running',
                started_at = NOW(),
                worker_id  = $1
            WHERE id = (
                SELECT id FROM job_queue
                WHERE  status = 'pending'
                ORDER  BY priority DESC, created_at ASC
                LIMIT  1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING *
            "#,
        )
        .bind(worker_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(job)
    }

    /// Atomically claim one specific pending job (one-shot mode). Returns
    /// None when the job is missing, no longer pending, or was claimed by
    /// another worker in the meantime.
    pub async fn claim_job(&self, job_id: i64, worker_id: &str) -> anyhow::Result<Option<Job>> {
        let job = sqlx::query_as::<_, Job>(
            r#"
            UPDATE job_queue
            SET status     = 'running',
                started_at = NOW(),
                worker_id  = $2
            WHERE id = $1 AND status = 'pending'
            RETURNING *
            "#,
        )
        .bind(job_id)
        .bind(worker_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(job)
    }

    /// Merge result/error COALESCE-style and stamp `completed_at` on
    /// terminal states.
    pub async fn update_status(
        &self,
        job_id: i64,
        status: JobStatus,
        result: Option<serde_json::Value>,
        error_msg: Option<&str>,
    ) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE job_queue
            SET status       = $2,
                completed_at = CASE WHEN $2 IN ('completed','failed','cancelled')
                                    THEN NOW() ELSE completed_at END,
                result       = COALESCE($3, result),
                error_msg    = COALESCE($4, error_msg)
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .bind(status.as_str())
        .bind(result)
        .bind(error_msg)
        .execute(&self.pool)
        .await?;

        tracing::debug!(job_id, status = status.as_str(), "job status updated");
        Ok(())
    }

    /// Increment the retry counter. The row flips to `failed` once the
    /// budget is spent; otherwise it is re-queued with cleared worker
    /// fields. Returns the new count.
    pub async fn increment_retry(&self, job_id: i64) -> anyhow::Result<i32> {
        let (retry_count,): (i32,) = sqlx::query_as(
            r#"
            UPDATE job_queue
            SET retry_count = retry_count + 1,
                status      = CASE WHEN retry_count + 1 >= max_retries
                                   THEN 'failed' ELSE 'pending' END,
                error_msg   = NULL,
                started_at  = NULL,
                worker_id   = NULL
            WHERE id = $1
            RETURNING retry_count
            "#,
        )
        .bind(job_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(retry_count)
    }

    /// Reset jobs stuck in `running` (crashed worker) back to `pending`.
    /// Run once at worker startup.
    pub async fn recover_stuck_jobs(&self) -> anyhow::Result<Vec<i64>> {
        let rows: Vec<(i64,)> = sqlx::query_as(
            r#"
            UPDATE job_queue
            SET status     = 'pending',
                worker_id  = NULL,
                started_at = NULL
            WHERE status = 'running'
              AND started_at < NOW() - make_interval(mins => $1)
            RETURNING id
            "#,
        )
        .bind(STUCK_JOB_MINUTES)
        .fetch_all(&self.pool)
        .await?;

        let ids: Vec<i64> = rows.into_iter().map(|(id,)| id).collect();
        if !ids.is_empty() {
            tracing::info!(?ids, "recovered stuck jobs");
        }
        Ok(ids)
    }

    pub async fn get_job(&self, job_id: i64) -> anyhow::Result<Option<Job>> {
        Ok(sqlx::query_as::<_, Job>("SELECT * FROM job_queue WHERE id = $1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?)
    }

    pub async fn list_recent(&self, limit: i64) -> anyhow::Result<Vec<Job>> {
        Ok(sqlx::query_as::<_, Job>(
            "SELECT * FROM job_queue ORDER BY created_at DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?)
    }

    /// Zero-filled per-status counts for the dashboard.
    pub async fn queue_stats(&self) -> anyhow::Result<QueueStats> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM job_queue GROUP BY status")
                .fetch_all(&self.pool)
                .await?;

        let counts: HashMap<String, i64> = rows.into_iter().collect();
        Ok(QueueStats {
            pending: counts.get("pending").copied().unwrap_or(0),
            running: counts.get("running").copied().unwrap_or(0),
            completed: counts.get("completed").copied().unwrap_or(0),
            failed: counts.get("failed").copied().unwrap_or(0),
        })
    }

    /// Cancel a pending job. Running or finished jobs are untouched.
    pub async fn cancel_job(&self, job_id: i64) -> anyhow::Result<bool> {
        let row: Option<(i64,)> = sqlx::query_as(
            r#"
            UPDATE job_queue SET status = 'cancelled'
            WHERE id = $1 AND status = 'pending'
            RETURNING id
            "#,
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.is_some())
    }
}
