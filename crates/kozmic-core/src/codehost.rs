//! The narrow hosted-git surface the core consumes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;

/// Contents of a repository path at a specific commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepoContents {
    /// A regular file and its blob sha.
    File { blob_sha: String },
    /// A directory and its immediate entries.
    Dir { entries: Vec<DirEntry> },
    /// The path does not exist at that commit.
    Missing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// Repository-relative path of the entry.
    pub path: String,
    pub blob_sha: String,
}

#[derive(Debug, Clone)]
pub struct CommitInfo {
    pub sha: String,
    pub message: String,
    pub author_name: String,
}

/// Commit status states understood by the hosted-git service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitState {
    Pending,
    Success,
    Failure,
    Error,
}

impl CommitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommitState::Pending => "pending",
            CommitState::Success => "success",
            CommitState::Failure => "failure",
            CommitState::Error => "error",
        }
    }
}

/// Hosted-git API client surface.
///
/// Failures surface as `Error::RemoteApi`. Callers decide whether that is
/// fatal: the fingerprint path fails the job, status posting does not.
#[async_trait]
pub trait CodeHost: Send + Sync {
    /// Contents of `path` in `repo_full_name` at commit `git_ref`.
    async fn contents(
        &self,
        repo_full_name: &str,
        path: &str,
        git_ref: &str,
    ) -> Result<RepoContents>;

    /// Commit metadata for `sha`.
    async fn git_commit(&self, repo_full_name: &str, sha: &str) -> Result<CommitInfo>;

    /// Post a commit status.
    async fn create_status(
        &self,
        repo_full_name: &str,
        sha: &str,
        state: CommitState,
        target_url: &str,
        description: &str,
    ) -> Result<()>;
}
