//! Application state.
//!
//! The container driver, the pub/sub client and the configuration are
//! initialized once at process start and passed in explicitly.

use std::sync::Arc;

use sqlx::PgPool;

use kozmic_bus::Bus;
use kozmic_config::Config;
use kozmic_core::codehost::CodeHost;
use kozmic_core::driver::ContainerDriver;
use kozmic_core::notify::Notifier;
use kozmic_db::{
    BuildRepo, HookRepo, JobQueue, JobRepo, PgBuildRepo, PgHookRepo, PgJobRepo, PgProjectRepo,
    ProjectRepo,
};
use kozmic_runner::{JobRunner, RunnerConfig};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub projects: Arc<dyn ProjectRepo>,
    pub hooks: Arc<dyn HookRepo>,
    pub builds: Arc<dyn BuildRepo>,
    pub jobs: Arc<dyn JobRepo>,
    pub queue: Arc<JobQueue>,
    pub bus: Arc<dyn Bus>,
    pub code_host: Arc<dyn CodeHost>,
    pub runner: Arc<JobRunner>,
}

impl AppState {
    pub fn new(
        pool: PgPool,
        config: Config,
        driver: Arc<dyn ContainerDriver>,
        bus: Arc<dyn Bus>,
        code_host: Arc<dyn CodeHost>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let projects = Arc::new(PgProjectRepo::new(pool.clone()));
        let hooks = Arc::new(PgHookRepo::new(pool.clone()));
        let builds: Arc<dyn BuildRepo> = Arc::new(PgBuildRepo::new(pool.clone()));
        let jobs: Arc<dyn JobRepo> = Arc::new(PgJobRepo::new(pool.clone()));
        let queue = Arc::new(JobQueue::new(pool));

        let runner = Arc::new(JobRunner::new(
            driver,
            bus.clone(),
            code_host.clone(),
            jobs.clone(),
            builds.clone(),
            notifier,
            RunnerConfig::from_config(&config),
        ));

        Self {
            config: Arc::new(config),
            projects,
            hooks,
            builds,
            jobs,
            queue,
            bus,
            code_host,
            runner,
        }
    }
}
