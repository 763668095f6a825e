//! Repository traits and PostgreSQL implementations.

pub mod builds;
pub mod hooks;
pub mod jobs;
pub mod projects;

pub use builds::{BuildRepo, NewBuild, PgBuildRepo};
pub use hooks::{HookRepo, PgHookRepo};
pub use jobs::{JobContext, JobRepo, PgJobRepo};
pub use projects::{PgProjectRepo, ProjectRepo};
