//! Build and hook-call records.

use async_trait::async_trait;
use sqlx::PgPool;

use kozmic_core::model::{Build, HookCall};

use crate::error::map_insert_err;
use crate::{DbError, DbResult};

/// Fields of a build about to be inserted. The build number is computed
/// inside the insert.
#[derive(Debug, Clone)]
pub struct NewBuild {
    pub project_id: i64,
    pub gh_commit_ref: String,
    pub gh_commit_sha: String,
    pub gh_commit_author: String,
    pub gh_commit_message: String,
}

#[async_trait]
pub trait BuildRepo: Send + Sync {
    async fn get_by_id(&self, id: i64) -> DbResult<Build>;

    async fn find_by_ref_and_sha(
        &self,
        project_id: i64,
        gh_commit_ref: &str,
        gh_commit_sha: &str,
    ) -> DbResult<Option<Build>>;

    /// Insert an enqueued build with the next per-project number.
    /// A concurrent insert of the same `(ref, sha)` surfaces as
    /// `DbError::Duplicate` via `unique_ref_and_sha_within_project`.
    async fn create(&self, new: NewBuild) -> DbResult<Build>;

    /// Record a hook call against a build. A duplicate
    /// `(build_id, hook_id)` pair surfaces as `DbError::Duplicate` via
    /// `unique_hook_call_within_build`.
    async fn create_hook_call(
        &self,
        hook_id: i64,
        build_id: i64,
        gh_payload: serde_json::Value,
    ) -> DbResult<HookCall>;

    async fn set_status(&self, build_id: i64, status: &str) -> DbResult<()>;

    /// The most recent build for a ref, used by the badge endpoint.
    async fn latest_for_ref(&self, project_id: i64, gh_commit_ref: &str)
    -> DbResult<Option<Build>>;
}

pub struct PgBuildRepo {
    pool: PgPool,
}

impl PgBuildRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BuildRepo for PgBuildRepo {
    async fn get_by_id(&self, id: i64) -> DbResult<Build> {
        sqlx::query_as::<_, Build>("SELECT * FROM builds WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("build {id}")))
    }

    async fn find_by_ref_and_sha(
        &self,
        project_id: i64,
        gh_commit_ref: &str,
        gh_commit_sha: &str,
    ) -> DbResult<Option<Build>> {
        let build = sqlx::query_as::<_, Build>(
            r#"
            SELECT * FROM builds
            WHERE project_id = $1 AND gh_commit_ref = $2 AND gh_commit_sha = $3
            "#,
        )
        .bind(project_id)
        .bind(gh_commit_ref)
        .bind(gh_commit_sha)
        .fetch_optional(&self.pool)
        .await?;
        Ok(build)
    }

    async fn create(&self, new: NewBuild) -> DbResult<Build> {
        let build = sqlx::query_as::<_, Build>(
            r#"
            INSERT INTO builds
                (project_id, number, gh_commit_ref, gh_commit_sha,
                 gh_commit_author, gh_commit_message, created_at, status)
            VALUES
                ($1,
                 (SELECT COALESCE(MAX(number), 0) + 1 FROM builds WHERE project_id = $1),
                 $2, $3, $4, $5, NOW(), 'enqueued')
            RETURNING *
            "#,
        )
        .bind(new.project_id)
        .bind(&new.gh_commit_ref)
        .bind(&new.gh_commit_sha)
        .bind(&new.gh_commit_author)
        .bind(&new.gh_commit_message)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_insert_err(e, "build for this ref and sha already exists"))?;
        Ok(build)
    }

    async fn create_hook_call(
        &self,
        hook_id: i64,
        build_id: i64,
        gh_payload: serde_json::Value,
    ) -> DbResult<HookCall> {
        let hook_call = sqlx::query_as::<_, HookCall>(
            r#"
            INSERT INTO hook_calls (hook_id, build_id, created_at, gh_payload)
            VALUES ($1, $2, NOW(), $3)
            RETURNING *
            "#,
        )
        .bind(hook_id)
        .bind(build_id)
        .bind(gh_payload)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_insert_err(e, "hook call for this build already exists"))?;
        Ok(hook_call)
    }

    async fn set_status(&self, build_id: i64, status: &str) -> DbResult<()> {
        sqlx::query("UPDATE builds SET status = $2 WHERE id = $1")
            .bind(build_id)
            .bind(status)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn latest_for_ref(
        &self,
        project_id: i64,
        gh_commit_ref: &str,
    ) -> DbResult<Option<Build>> {
        let build = sqlx::query_as::<_, Build>(
            r#"
            SELECT * FROM builds
            WHERE project_id = $1 AND gh_commit_ref = $2
            ORDER BY number DESC
            LIMIT 1
            "#,
        )
        .bind(project_id)
        .bind(gh_commit_ref)
        .fetch_optional(&self.pool)
        .await?;
        Ok(build)
    }
}
