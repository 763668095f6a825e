//! Hook records and their tracked files.

use async_trait::async_trait;
use sqlx::PgPool;

use kozmic_core::model::{Hook, TrackedFile};

use crate::DbResult;

#[async_trait]
pub trait HookRepo: Send + Sync {
    async fn get_by_id(&self, id: i64) -> DbResult<Option<Hook>>;

    /// Tracked files of a hook, ordered by path.
    async fn tracked_files(&self, hook_id: i64) -> DbResult<Vec<TrackedFile>>;
}

pub struct PgHookRepo {
    pool: PgPool,
}

impl PgHookRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl HookRepo for PgHookRepo {
    async fn get_by_id(&self, id: i64) -> DbResult<Option<Hook>> {
        let hook = sqlx::query_as::<_, Hook>("SELECT * FROM hooks WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(hook)
    }

    async fn tracked_files(&self, hook_id: i64) -> DbResult<Vec<TrackedFile>> {
        let files = sqlx::query_as::<_, TrackedFile>(
            "SELECT * FROM tracked_files WHERE hook_id = $1 ORDER BY path",
        )
        .bind(hook_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(files)
    }
}
