//! Worker that executes jobs from the queue.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{info, warn};

use kozmic_db::JobQueue;

use crate::JobRunner;

/// Claims queued jobs and runs them to completion, one at a time. Several
/// workers run in parallel, bounded only by the engine's capacity.
pub struct Worker {
    id: String,
    queue: Arc<JobQueue>,
    runner: Arc<JobRunner>,
}

impl Worker {
    pub fn new(id: impl Into<String>, queue: Arc<JobQueue>, runner: Arc<JobRunner>) -> Self {
        Self {
            id: id.into(),
            queue,
            runner,
        }
    }

    /// Run the worker loop.
    pub async fn run(&self) {
        info!(worker_id = %self.id, "starting worker");

        loop {
            match self.queue.claim(&self.id).await {
                Ok(Some(entry)) => {
                    info!(worker_id = %self.id, job_id = entry.job_id, "claimed job");
                    match self.runner.run(entry.job_id).await {
                        Ok(()) => {
                            if let Err(e) = self.queue.complete(entry.id).await {
                                warn!(job_id = entry.job_id, error = %e, "failed to mark queue entry complete");
                            }
                        }
                        Err(e) => {
                            // The job itself is already finalized; only the
                            // queue entry is left to update.
                            warn!(job_id = entry.job_id, error = %e, "job failed");
                            if let Err(e) = self.queue.fail(entry.id, &e.to_string()).await {
                                warn!(job_id = entry.job_id, error = %e, "failed to mark queue entry failed");
                            }
                        }
                    }
                }
                Ok(None) => {
                    // No jobs available, wait before polling again.
                    sleep(Duration::from_secs(1)).await;
                }
                Err(e) => {
                    warn!(error = %e, "failed to claim a job");
                    sleep(Duration::from_secs(5)).await;
                }
            }
        }
    }
}
