//! Persistence layer: projects, hooks, builds, hook calls and jobs live in
//! PostgreSQL; this crate is the collaborator the core talks to. Schema
//! management happens outside this codebase.

pub mod error;
pub mod queue;
pub mod repo;

pub use error::{DbError, DbResult};
pub use queue::{JobQueue, QueuedJob};
pub use repo::*;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

/// Create a new database connection pool.
pub async fn create_pool(database_url: &str) -> DbResult<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;
    Ok(pool)
}
