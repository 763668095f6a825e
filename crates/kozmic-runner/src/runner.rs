//! The job runner: executes one queued job end to end.
//!
//! Per phase it spawns the builder, waits for the container over the
//! rendezvous (60 s timeout), starts the tailer over the phase's log file,
//! acknowledges so the builder may start the container, joins the builder
//! and stops the tailer. All failures funnel into finalization, which
//! closes the pub/sub channel, removes the workspace, writes the job's
//! terminal fields and propagates the build status.

use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{error, info, warn};
use uuid::Uuid;

use kozmic_bus::{Bus, Publisher};
use kozmic_core::codehost::{CodeHost, CommitState};
use kozmic_core::driver::{ContainerDriver, ContainerHandle};
use kozmic_core::model::{BuildStatus, DeployKey, Job, cache_image_repo};
use kozmic_core::notify::{BuildFailure, Notifier};
use kozmic_core::{Error, Result};
use kozmic_db::{BuildRepo, JobContext, JobRepo};

use crate::builder::{Builder, LOG_FILE};
use crate::fingerprint::compute_fingerprint;
use crate::tailer::{DEFAULT_KILL_TIMEOUT, Tailer};

const RENDEZVOUS_TIMEOUT: Duration = Duration::from_secs(60);
const SKIP_INSTALL_MESSAGE: &str = "Skipping install script as tracked files did not change...";
const GENERIC_FAILURE_MESSAGE: &str =
    "Sorry, something went wrong on our side. We are looking into it.";

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Kill the container when the log grows by nothing for this long.
    pub stall_timeout: Duration,
    /// How long the runner waits for the builder to produce a container.
    pub rendezvous_timeout: Duration,
    /// Tailer poll interval.
    pub read_timeout: Duration,
    /// Process secret; deploy-key passphrases derive from it.
    pub secret_key: String,
    pub enable_email_notifications: bool,
}

impl RunnerConfig {
    pub fn new(secret_key: impl Into<String>) -> Self {
        Self {
            stall_timeout: DEFAULT_KILL_TIMEOUT,
            rendezvous_timeout: RENDEZVOUS_TIMEOUT,
            read_timeout: Duration::from_millis(500),
            secret_key: secret_key.into(),
            enable_email_notifications: false,
        }
    }

    pub fn from_config(config: &kozmic_config::Config) -> Self {
        Self {
            stall_timeout: Duration::from_secs(config.stall_timeout),
            enable_email_notifications: config.enable_email_notifications,
            ..Self::new(config.secret_key.clone())
        }
    }
}

pub struct JobRunner {
    driver: Arc<dyn ContainerDriver>,
    bus: Arc<dyn Bus>,
    code_host: Arc<dyn CodeHost>,
    jobs: Arc<dyn JobRepo>,
    builds: Arc<dyn BuildRepo>,
    notifier: Arc<dyn Notifier>,
    config: RunnerConfig,
}

/// Accumulates the job's stdout while mirroring runner-authored lines onto
/// the pub/sub channel. Phase logs reach the channel through the tailer and
/// are absorbed here afterwards.
struct JobLog {
    publisher: Publisher,
    stdout: String,
}

impl JobLog {
    fn new(publisher: Publisher) -> Self {
        Self {
            publisher,
            stdout: String::new(),
        }
    }

    async fn say(&mut self, line: &str) {
        self.stdout.push_str(line);
        self.stdout.push('\n');
        if let Err(e) = self.publisher.publish([line]).await {
            warn!(error = %e, "failed to publish a runner message");
        }
    }

    fn absorb(&mut self, text: &str) {
        self.stdout.push_str(text);
    }
}

struct PhaseOutcome {
    return_code: i32,
    container: ContainerHandle,
}

impl JobRunner {
    pub fn new(
        driver: Arc<dyn ContainerDriver>,
        bus: Arc<dyn Bus>,
        code_host: Arc<dyn CodeHost>,
        jobs: Arc<dyn JobRepo>,
        builds: Arc<dyn BuildRepo>,
        notifier: Arc<dyn Notifier>,
        config: RunnerConfig,
    ) -> Self {
        Self {
            driver,
            bus,
            code_host,
            jobs,
            builds,
            notifier,
            config,
        }
    }

    /// Execute a job to completion. Returns `Err` only after finalization:
    /// the channel key is deleted, the workspace is removed and the job's
    /// terminal fields are written on every exit path, panics included.
    pub async fn run(&self, job_id: i64) -> Result<()> {
        let cx = self.jobs.get_context(job_id).await?;
        info!(job_id, task_uuid = %cx.job.task_uuid, "job has started");

        let publisher = Publisher::new(self.bus.clone(), cx.job.task_uuid.to_string());
        let mut log = JobLog::new(publisher.clone());

        if let Err(e) = self.jobs.start(job_id, Utc::now()).await {
            let _ = publisher.finish().await;
            return Err(e.into());
        }
        self.set_build_status(
            &cx,
            BuildStatus::Pending,
            &format!("Kozmic build #{} is pending", cx.build.number),
        )
        .await;

        let executed = AssertUnwindSafe(self.execute(&cx, &mut log))
            .catch_unwind()
            .await;
        let (return_code, run_error) = match executed {
            Ok(Ok(rc)) => (rc, None),
            Ok(Err(e)) => (1, Some(e)),
            Err(_) => (1, Some(Error::Internal(format!("job {job_id} panicked")))),
        };

        if let Some(e) = &run_error {
            error!(job_id, error = %e, "job failed before its container finished");
            let note = match e {
                Error::RemoteApi(_) => format!("Failed to prepare the build: {e}"),
                _ => GENERIC_FAILURE_MESSAGE.to_string(),
            };
            log.say(&note).await;
        }

        // The channel key must be gone whatever happened above.
        if let Err(e) = publisher.finish().await {
            error!(job_id, error = %e, "failed to close the log channel");
        }

        if let Err(e) = self
            .jobs
            .finish(job_id, return_code, log.stdout.as_bytes(), Utc::now())
            .await
        {
            error!(job_id, error = %e, "failed to write the job's terminal fields");
            return Err(e.into());
        }
        self.finalize_build(&cx, return_code).await;

        info!(job_id, return_code, "job has finished");
        match run_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Delete a finished job and re-execute it synchronously under a fresh
    /// task uuid.
    pub async fn restart(&self, job_id: i64) -> Result<Job> {
        let job = self
            .jobs
            .get(job_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("job {job_id}")))?;
        if !job.is_finished() {
            return Err(Error::Restart(format!("job {job_id} has not finished yet")));
        }

        self.jobs.delete(job_id).await?;
        let new_job = self
            .jobs
            .create(job.build_id, job.hook_call_id, Uuid::new_v4())
            .await?;
        self.run(new_job.id).await?;
        let refreshed = self
            .jobs
            .get(new_job.id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("job {}", new_job.id)))?;
        Ok(refreshed)
    }

    async fn execute(&self, cx: &JobContext, log: &mut JobLog) -> Result<i32> {
        // Setup: the workspace lives until this function returns, which
        // also covers unwinding out of it.
        let workspace = tempfile::tempdir()?;
        let clone_url = cx.project.clone_url().to_string();
        let deploy_key = cx.project.deploy_key(&self.config.secret_key);

        log.say(&format!(
            "Pulling \"{}\" Docker image...",
            cx.hook.docker_image
        ))
        .await;
        let image_digest = match self.pull_and_inspect(&cx.hook.docker_image).await {
            Ok(digest) => digest,
            Err(e @ (Error::ImagePull(_) | Error::ImageMissing(_))) => {
                log.say(&e.to_string()).await;
                return Ok(1);
            }
            Err(e) => return Err(e),
        };

        let mut base_image = cx.hook.docker_image.clone();
        let mut cache: Option<(String, String, String)> = None;
        let mut used_cache = false;
        if let Some(install_script) = cx.hook.effective_install_script() {
            let install_script = install_script.to_string();
            let tracked: Vec<String> =
                cx.tracked_files.iter().map(|t| t.path.clone()).collect();
            let fingerprint = compute_fingerprint(
                self.code_host.as_ref(),
                &cx.project.gh_full_name,
                &cx.build.gh_commit_sha,
                &image_digest,
                &install_script,
                &tracked,
            )
            .await?;
            let cache_repo = cache_image_repo(&fingerprint);
            let cache_tag = cx.project.id.to_string();

            if self.driver.image_exists(&cache_repo, &cache_tag).await? {
                log.say(SKIP_INSTALL_MESSAGE).await;
                used_cache = true;
            } else {
                let rc = self
                    .install_phase(
                        cx,
                        workspace.path(),
                        &install_script,
                        &cache_repo,
                        &cache_tag,
                        &clone_url,
                        deploy_key.clone(),
                        log,
                    )
                    .await?;
                if rc != 0 {
                    return Ok(rc);
                }
            }
            base_image = format!("{cache_repo}:{cache_tag}");
            cache = Some((cache_repo, cache_tag, install_script));
        }

        let first_attempt = self
            .build_phase(cx, workspace.path(), &base_image, &clone_url, deploy_key.clone(), log)
            .await;
        let return_code = match (first_attempt, used_cache, &cache) {
            // The cached image was swept between the hit check and the
            // container creation: redo the install phase once and retry.
            (Err(Error::ImageMissing(_)), true, Some((cache_repo, cache_tag, install_script))) => {
                log.say("The cached image has disappeared, re-running the install script...")
                    .await;
                let rc = self
                    .install_phase(
                        cx,
                        workspace.path(),
                        install_script,
                        cache_repo,
                        cache_tag,
                        &clone_url,
                        deploy_key.clone(),
                        log,
                    )
                    .await?;
                if rc != 0 {
                    return Ok(rc);
                }
                self.build_phase(cx, workspace.path(), &base_image, &clone_url, deploy_key, log)
                    .await?
            }
            (result, _, _) => result?,
        };
        Ok(return_code)
    }

    async fn pull_and_inspect(&self, image: &str) -> Result<String> {
        self.driver.pull(image).await?;
        self.driver.inspect_image(image).await
    }

    #[allow(clippy::too_many_arguments)]
    async fn install_phase(
        &self,
        cx: &JobContext,
        workspace: &Path,
        install_script: &str,
        cache_repo: &str,
        cache_tag: &str,
        clone_url: &str,
        deploy_key: Option<DeployKey>,
        log: &mut JobLog,
    ) -> Result<i32> {
        let outcome = self
            .run_phase(
                cx,
                workspace,
                "install",
                &cx.hook.docker_image,
                install_script,
                clone_url,
                deploy_key,
                log,
            )
            .await?;
        let commit_result = if outcome.return_code == 0 {
            self.driver
                .commit(&outcome.container, cache_repo, cache_tag)
                .await
        } else {
            Ok(())
        };
        // The install container is removed on both outcomes.
        self.driver.remove_container(&outcome.container).await?;
        commit_result?;
        Ok(outcome.return_code)
    }

    async fn build_phase(
        &self,
        cx: &JobContext,
        workspace: &Path,
        image: &str,
        clone_url: &str,
        deploy_key: Option<DeployKey>,
        log: &mut JobLog,
    ) -> Result<i32> {
        let outcome = self
            .run_phase(
                cx,
                workspace,
                "build",
                image,
                &cx.hook.build_script,
                clone_url,
                deploy_key,
                log,
            )
            .await?;
        self.driver.remove_container(&outcome.container).await?;
        Ok(outcome.return_code)
    }

    /// One builder/tailer round: exactly one of the phase's return code or
    /// an error comes out of it.
    #[allow(clippy::too_many_arguments)]
    async fn run_phase(
        &self,
        cx: &JobContext,
        workspace: &Path,
        phase: &str,
        image: &str,
        script: &str,
        clone_url: &str,
        deploy_key: Option<DeployKey>,
        log: &mut JobLog,
    ) -> Result<PhaseOutcome> {
        let phase_dir = workspace.join(phase);
        tokio::fs::create_dir_all(&phase_dir).await?;

        let builder = Builder::new(
            self.driver.clone(),
            image,
            script,
            deploy_key,
            clone_url,
            &cx.build.gh_commit_sha,
            phase_dir.clone(),
        );
        let (handle_tx, handle_rx) = oneshot::channel();
        let (ack_tx, ack_rx) = oneshot::channel();
        let builder_task = tokio::spawn(builder.run(handle_tx, ack_rx));

        let container = match timeout(self.config.rendezvous_timeout, handle_rx).await {
            Ok(Ok(container)) => container,
            // The sender was dropped: the builder failed before creating
            // the container. Surface its error.
            Ok(Err(_)) => {
                let e = match builder_task.await {
                    Ok(Err(e)) => e,
                    Ok(Ok(_)) => Error::Internal("builder finished without a container".into()),
                    Err(join) => Error::Internal(format!("builder task failed: {join}")),
                };
                return Err(e);
            }
            Err(_) => {
                builder_task.abort();
                let _ = builder_task.await;
                return Err(Error::Timeout(format!(
                    "builder produced no container within {:?}",
                    self.config.rendezvous_timeout
                )));
            }
        };

        let log_path = phase_dir.join(LOG_FILE);
        let tailer = Tailer::new(
            log_path.clone(),
            log.publisher.clone(),
            self.driver.clone(),
            container.clone(),
        )
        .with_kill_timeout(self.config.stall_timeout)
        .with_read_timeout(self.config.read_timeout);
        let tailer_stop = tailer.stop_handle();
        let tailer_task = tokio::spawn(tailer.run());

        if ack_tx.send(()).is_err() {
            tailer_stop.stop();
            let _ = tailer_task.await;
            let _ = self.driver.remove_container(&container).await;
            return Err(Error::Internal("builder went away before the ack".into()));
        }

        let build_result = builder_task.await;
        tailer_stop.stop();
        let report = tailer_task.await.unwrap_or_default();

        match tokio::fs::read(&log_path).await {
            Ok(bytes) => log.absorb(&String::from_utf8_lossy(&bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(error = %e, "failed to read the phase log"),
        }

        let return_code = match build_result {
            Ok(Ok(rc)) => rc,
            Ok(Err(e)) => {
                let _ = self.driver.remove_container(&container).await;
                return Err(e);
            }
            Err(join) => {
                let _ = self.driver.remove_container(&container).await;
                return Err(Error::Internal(format!("builder task failed: {join}")));
            }
        };

        if report.killed_container {
            log.say(&stall_banner(self.config.stall_timeout)).await;
        }

        Ok(PhaseOutcome {
            return_code,
            container,
        })
    }

    /// Derive and persist the build status once this job has its terminal
    /// fields, then propagate it to the hosted-git service and, for
    /// negative outcomes, to the notifier.
    async fn finalize_build(&self, cx: &JobContext, return_code: i32) {
        let (status, description) = if return_code != 0 {
            (
                BuildStatus::Failure,
                format!(
                    "Kozmic build #{} has failed because of the \"{}\" job",
                    cx.build.number, cx.hook.title
                ),
            )
        } else {
            let jobs = match self.jobs.list_for_build(cx.build.id).await {
                Ok(jobs) => jobs,
                Err(e) => {
                    error!(build_id = cx.build.id, error = %e, "failed to list build jobs");
                    return;
                }
            };
            let all_green = jobs
                .iter()
                .all(|j| j.is_finished() && j.return_code == Some(0));
            if !all_green {
                // Sibling jobs are still running; the build stays pending.
                return;
            }
            (
                BuildStatus::Success,
                format!("Kozmic build #{} has passed", cx.build.number),
            )
        };

        self.set_build_status(cx, status, &description).await;

        if status.is_negative() && self.config.enable_email_notifications {
            let failure = BuildFailure {
                project_full_name: cx.project.gh_full_name.clone(),
                build_number: cx.build.number,
                status: status.as_str().to_string(),
                gh_commit_ref: cx.build.gh_commit_ref.clone(),
                gh_commit_sha: cx.build.gh_commit_sha.clone(),
                description,
            };
            if let Err(e) = self.notifier.build_failed(&failure).await {
                error!(build_id = cx.build.id, error = %e, "failed to notify about the build");
            }
        }
    }

    async fn set_build_status(&self, cx: &JobContext, status: BuildStatus, description: &str) {
        if let Err(e) = self.builds.set_status(cx.build.id, status.as_str()).await {
            error!(build_id = cx.build.id, error = %e, "failed to persist the build status");
            return;
        }
        // Status-post failures are logged but never alter the job outcome.
        if let Err(e) = self
            .code_host
            .create_status(
                &cx.project.gh_full_name,
                &cx.build.gh_commit_sha,
                commit_state(status),
                "",
                description,
            )
            .await
        {
            warn!(build_id = cx.build.id, error = %e, "failed to post the commit status");
        }
    }
}

fn commit_state(status: BuildStatus) -> CommitState {
    match status {
        BuildStatus::Enqueued | BuildStatus::Pending => CommitState::Pending,
        BuildStatus::Success => CommitState::Success,
        BuildStatus::Failure => CommitState::Failure,
        BuildStatus::Error => CommitState::Error,
    }
}

fn stall_banner(stall_timeout: Duration) -> String {
    format!(
        "Your script has not printed anything for {} seconds and the container has been killed.",
        stall_timeout.as_secs()
    )
}
