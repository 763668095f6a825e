//! Notification seam. Mail templating and delivery are external
//! collaborators; the core only decides *when* to notify.

use async_trait::async_trait;

use crate::Result;

/// A negative build outcome worth telling project members about.
#[derive(Debug, Clone)]
pub struct BuildFailure {
    pub project_full_name: String,
    pub build_number: i32,
    pub status: String,
    pub gh_commit_ref: String,
    pub gh_commit_sha: String,
    pub description: String,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn build_failed(&self, failure: &BuildFailure) -> Result<()>;
}

/// Default notifier: records the failure in the process log. Stands in for
/// the mail collaborator when notifications are disabled or unconfigured.
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn build_failed(&self, failure: &BuildFailure) -> Result<()> {
        tracing::warn!(
            project = %failure.project_full_name,
            build = failure.build_number,
            status = %failure.status,
            r#ref = %failure.gh_commit_ref,
            sha = %failure.gh_commit_sha,
            "{}",
            failure.description,
        );
        Ok(())
    }
}
