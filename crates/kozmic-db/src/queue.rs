//! Job queue backed by PostgreSQL.
//!
//! Webhook ingress enqueues a job id; workers claim entries with
//! `FOR UPDATE SKIP LOCKED` so several workers never run the same job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::DbResult;

/// A queue entry pointing at a job record.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct QueuedJob {
    pub id: i64,
    pub job_id: i64,
    pub status: String,
    pub claimed_by: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

pub struct JobQueue {
    pool: PgPool,
}

impl JobQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Enqueue a job for execution.
    pub async fn enqueue(&self, job_id: i64) -> DbResult<QueuedJob> {
        let entry = sqlx::query_as::<_, QueuedJob>(
            r#"
            INSERT INTO job_queue (job_id, status, created_at)
            VALUES ($1, 'pending', NOW())
            RETURNING *
            "#,
        )
        .bind(job_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(entry)
    }

    /// Claim the next available job.
    /// Uses SKIP LOCKED to prevent contention between workers.
    pub async fn claim(&self, worker_id: &str) -> DbResult<Option<QueuedJob>> {
        let entry = sqlx::query_as::<_, QueuedJob>(
            r#"
            UPDATE job_queue
            SET status = 'claimed', claimed_by = $1, claimed_at = NOW()
            WHERE id = (
                SELECT id FROM job_queue
                WHERE status = 'pending'
                ORDER BY created_at ASC
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING *
            "#,
        )
        .bind(worker_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(entry)
    }

    /// Mark a queue entry as completed.
    pub async fn complete(&self, id: i64) -> DbResult<()> {
        sqlx::query("UPDATE job_queue SET status = 'completed' WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Mark a queue entry as failed.
    pub async fn fail(&self, id: i64, error: &str) -> DbResult<()> {
        sqlx::query("UPDATE job_queue SET status = 'failed', error = $2 WHERE id = $1")
            .bind(id)
            .bind(error)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
