//! Job records.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use kozmic_core::model::{Build, Hook, Job, Project, TrackedFile};

use crate::{DbError, DbResult};

/// Everything a job runner needs to execute one job, loaded in one go.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub job: Job,
    pub hook: Hook,
    pub build: Build,
    pub project: Project,
    pub tracked_files: Vec<TrackedFile>,
}

#[async_trait]
pub trait JobRepo: Send + Sync {
    async fn create(&self, build_id: i64, hook_call_id: i64, task_uuid: Uuid) -> DbResult<Job>;

    async fn get(&self, id: i64) -> DbResult<Option<Job>>;

    async fn get_by_task_uuid(&self, task_uuid: Uuid) -> DbResult<Option<Job>>;

    /// Load the job together with its hook, build, project and tracked
    /// files. Fails if the hook has been deleted since the call was made.
    async fn get_context(&self, id: i64) -> DbResult<JobContext>;

    /// Record that the job has started.
    async fn start(&self, id: i64, at: DateTime<Utc>) -> DbResult<()>;

    /// Write the job's terminal fields.
    async fn finish(
        &self,
        id: i64,
        return_code: i32,
        stdout: &[u8],
        at: DateTime<Utc>,
    ) -> DbResult<()>;

    async fn delete(&self, id: i64) -> DbResult<()>;

    /// All jobs of a build, used to derive the build status.
    async fn list_for_build(&self, build_id: i64) -> DbResult<Vec<Job>>;
}

pub struct PgJobRepo {
    pool: PgPool,
}

impl PgJobRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobRepo for PgJobRepo {
    async fn create(&self, build_id: i64, hook_call_id: i64, task_uuid: Uuid) -> DbResult<Job> {
        let job = sqlx::query_as::<_, Job>(
            r#"
            INSERT INTO jobs (build_id, hook_call_id, task_uuid)
            VALUES ($1, $2, $3)
            RETURNING *
            "#,
        )
        .bind(build_id)
        .bind(hook_call_id)
        .bind(task_uuid)
        .fetch_one(&self.pool)
        .await?;
        Ok(job)
    }

    async fn get(&self, id: i64) -> DbResult<Option<Job>> {
        let job = sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(job)
    }

    async fn get_by_task_uuid(&self, task_uuid: Uuid) -> DbResult<Option<Job>> {
        let job = sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE task_uuid = $1")
            .bind(task_uuid)
            .fetch_optional(&self.pool)
            .await?;
        Ok(job)
    }

    async fn get_context(&self, id: i64) -> DbResult<JobContext> {
        let job = self
            .get(id)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("job {id}")))?;

        let hook_id: Option<i64> =
            sqlx::query_scalar("SELECT hook_id FROM hook_calls WHERE id = $1")
                .bind(job.hook_call_id)
                .fetch_optional(&self.pool)
                .await?
                .ok_or_else(|| DbError::NotFound(format!("hook call {}", job.hook_call_id)))?;
        let hook_id = hook_id
            .ok_or_else(|| DbError::NotFound(format!("hook of job {id} has been deleted")))?;

        let hook = sqlx::query_as::<_, Hook>("SELECT * FROM hooks WHERE id = $1")
            .bind(hook_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("hook {hook_id}")))?;

        let build = sqlx::query_as::<_, Build>("SELECT * FROM builds WHERE id = $1")
            .bind(job.build_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("build {}", job.build_id)))?;

        let project = sqlx::query_as::<_, Project>("SELECT * FROM projects WHERE id = $1")
            .bind(build.project_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("project {}", build.project_id)))?;

        let tracked_files = sqlx::query_as::<_, TrackedFile>(
            "SELECT * FROM tracked_files WHERE hook_id = $1 ORDER BY path",
        )
        .bind(hook.id)
        .fetch_all(&self.pool)
        .await?;

        Ok(JobContext {
            job,
            hook,
            build,
            project,
            tracked_files,
        })
    }

    async fn start(&self, id: i64, at: DateTime<Utc>) -> DbResult<()> {
        sqlx::query("UPDATE jobs SET started_at = $2, finished_at = NULL WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn finish(
        &self,
        id: i64,
        return_code: i32,
        stdout: &[u8],
        at: DateTime<Utc>,
    ) -> DbResult<()> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET finished_at = $2, return_code = $3, stdout = $4
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(at)
        .bind(return_code)
        .bind(stdout)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, id: i64) -> DbResult<()> {
        sqlx::query("DELETE FROM jobs WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_for_build(&self, build_id: i64) -> DbResult<Vec<Job>> {
        let jobs = sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE build_id = $1")
            .bind(build_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(jobs)
    }
}
