//! Project records.

use async_trait::async_trait;
use sqlx::PgPool;

use kozmic_core::model::Project;

use crate::{DbError, DbResult};

#[async_trait]
pub trait ProjectRepo: Send + Sync {
    async fn get_by_id(&self, id: i64) -> DbResult<Project>;

    /// Lookup by the GitHub owner login and repository name, as used by the
    /// badge endpoint.
    async fn get_by_owner_and_name(
        &self,
        gh_login: &str,
        gh_name: &str,
    ) -> DbResult<Option<Project>>;
}

pub struct PgProjectRepo {
    pool: PgPool,
}

impl PgProjectRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProjectRepo for PgProjectRepo {
    async fn get_by_id(&self, id: i64) -> DbResult<Project> {
        sqlx::query_as::<_, Project>("SELECT * FROM projects WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("project {id}")))
    }

    async fn get_by_owner_and_name(
        &self,
        gh_login: &str,
        gh_name: &str,
    ) -> DbResult<Option<Project>> {
        let project = sqlx::query_as::<_, Project>(
            "SELECT * FROM projects WHERE gh_login = $1 AND gh_name = $2",
        )
        .bind(gh_login)
        .bind(gh_name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(project)
    }
}
