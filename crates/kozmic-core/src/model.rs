//! Records the job execution core reads and writes.
//!
//! Storage and indexing are owned by the persistence layer; the core sees
//! these as plain records. A job's status is not stored — it is derived
//! from `(started_at, finished_at, return_code)`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::{Error, Result};

/// Image namespace used for cached post-install images. A cached image is
/// named `kozmic-cache/<fingerprint>:<project_id>`.
pub const CACHE_IMAGE_NAMESPACE: &str = "kozmic-cache";

/// Repository name for a cached install-phase image.
pub fn cache_image_repo(fingerprint: &str) -> String {
    format!("{}/{}", CACHE_IMAGE_NAMESPACE, fingerprint)
}

/// A GitHub repository that is being watched by Kozmic.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Project {
    pub id: i64,
    /// GitHub repo id.
    pub gh_id: i64,
    /// GitHub repo owner login.
    pub gh_login: String,
    /// GitHub repo name (i.e., kozmic).
    pub gh_name: String,
    /// GitHub repo full name (i.e., aromanovich/kozmic).
    pub gh_full_name: String,
    /// HTTPS clone URL, used for public repositories.
    pub gh_https_clone_url: String,
    /// SSH clone URL, used together with the deploy key for private ones.
    pub gh_ssh_clone_url: String,
    pub is_private: bool,
    /// RSA private deploy key in PEM format.
    pub rsa_private_key: String,
    /// RSA public deploy key in OpenSSH format.
    pub rsa_public_key: String,
}

impl Project {
    /// Passphrase of the deploy key, derived deterministically from the
    /// repository id and the process secret so it never has to be stored.
    pub fn passphrase(&self, secret_key: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(format!("{}:{}", self.gh_id, secret_key));
        hex::encode(hasher.finalize())
    }

    /// Clone URL for this project: HTTPS for public repositories, SSH for
    /// private ones (which require the deploy key).
    pub fn clone_url(&self) -> &str {
        if self.is_private {
            &self.gh_ssh_clone_url
        } else {
            &self.gh_https_clone_url
        }
    }

    /// Deploy-key material handed to the builder for private repositories.
    pub fn deploy_key(&self, secret_key: &str) -> Option<DeployKey> {
        self.is_private.then(|| DeployKey {
            private_key: self.rsa_private_key.clone(),
            passphrase: self.passphrase(secret_key),
        })
    }
}

/// Key material staged into the workspace when the repository is private.
/// Never persisted outside the project record.
#[derive(Debug, Clone)]
pub struct DeployKey {
    pub private_key: String,
    pub passphrase: String,
}

/// A user-configured hook: a script pair, a base image and tracked files.
/// Immutable within a run.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Hook {
    pub id: i64,
    pub project_id: i64,
    /// GitHub hook id.
    pub gh_id: i64,
    pub title: String,
    /// Script run in the cacheable install phase, if any.
    pub install_script: Option<String>,
    /// Script run in the build phase.
    pub build_script: String,
    /// Docker image the scripts run in (for example, "ubuntu:24.04").
    pub docker_image: String,
    /// Optional webhook HMAC secret.
    pub secret: Option<String>,
}

impl Hook {
    /// An absent or blank install script bypasses the install phase.
    pub fn effective_install_script(&self) -> Option<&str> {
        match self.install_script.as_deref() {
            Some(s) if !s.trim().is_empty() => Some(s),
            _ => None,
        }
    }
}

/// A repository path whose content participates in the install-phase cache
/// fingerprint.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TrackedFile {
    pub id: i64,
    pub hook_id: i64,
    /// Path within the git repository.
    pub path: String,
}

/// Build status, stored as text; `error` is reserved for infrastructural
/// failures surfaced outside any job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildStatus {
    Enqueued,
    Pending,
    Success,
    Failure,
    Error,
}

impl BuildStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildStatus::Enqueued => "enqueued",
            BuildStatus::Pending => "pending",
            BuildStatus::Success => "success",
            BuildStatus::Failure => "failure",
            BuildStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "enqueued" => Ok(BuildStatus::Enqueued),
            "pending" => Ok(BuildStatus::Pending),
            "success" => Ok(BuildStatus::Success),
            "failure" => Ok(BuildStatus::Failure),
            "error" => Ok(BuildStatus::Error),
            other => Err(Error::InvalidInput(format!("unknown build status {other:?}"))),
        }
    }

    pub fn is_negative(&self) -> bool {
        matches!(self, BuildStatus::Failure | BuildStatus::Error)
    }
}

impl std::fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The set of jobs triggered by one webhook delivery for one commit.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Build {
    pub id: i64,
    pub project_id: i64,
    /// Build number within the project.
    pub number: i32,
    /// Branch the commit was pushed to.
    pub gh_commit_ref: String,
    pub gh_commit_sha: String,
    pub gh_commit_author: String,
    pub gh_commit_message: String,
    pub created_at: DateTime<Utc>,
    pub status: String,
}

impl Build {
    pub fn status(&self) -> Result<BuildStatus> {
        BuildStatus::parse(&self.status)
    }
}

/// The fact that the hosted-git service triggered a hook.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct HookCall {
    pub id: i64,
    /// Nullable so hook calls survive hook deletion.
    pub hook_id: Option<i64>,
    pub build_id: i64,
    pub created_at: DateTime<Utc>,
    /// Raw JSON payload of the webhook request.
    pub gh_payload: serde_json::Value,
}

/// Derived job state; never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Enqueued,
    Pending,
    Success,
    Failure,
}

impl JobState {
    pub fn is_finished(&self) -> bool {
        matches!(self, JobState::Success | JobState::Failure)
    }
}

/// One execution of a hook's script pair against a specific commit.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Job {
    pub id: i64,
    pub build_id: i64,
    pub hook_call_id: i64,
    /// Also the name of the job's pub/sub channel; globally unique.
    pub task_uuid: Uuid,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub return_code: Option<i32>,
    /// The captured log, appended once when the job finishes.
    pub stdout: Option<Vec<u8>>,
}

impl Job {
    pub fn state(&self) -> JobState {
        match (self.started_at, self.finished_at, self.return_code) {
            (None, _, _) => JobState::Enqueued,
            (Some(_), None, _) => JobState::Pending,
            (Some(_), Some(_), Some(0)) => JobState::Success,
            (Some(_), Some(_), _) => JobState::Failure,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.state().is_finished()
    }
}

/// A `repository[:tag]` image reference. The tag defaults to `latest`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    pub repo: String,
    pub tag: String,
}

impl ImageRef {
    /// Splits on the last `:` unless it belongs to a registry host:port
    /// prefix (i.e. appears before the last `/`).
    pub fn parse(image: &str) -> Self {
        let slash = image.rfind('/').map(|i| i + 1).unwrap_or(0);
        match image[slash..].rfind(':') {
            Some(colon) => ImageRef {
                repo: image[..slash + colon].to_string(),
                tag: image[slash + colon + 1..].to_string(),
            },
            None => ImageRef {
                repo: image.to_string(),
                tag: "latest".to_string(),
            },
        }
    }
}

impl std::fmt::Display for ImageRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.repo, self.tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(
        started: Option<DateTime<Utc>>,
        finished: Option<DateTime<Utc>>,
        rc: Option<i32>,
    ) -> Job {
        Job {
            id: 1,
            build_id: 1,
            hook_call_id: 1,
            task_uuid: Uuid::new_v4(),
            started_at: started,
            finished_at: finished,
            return_code: rc,
            stdout: None,
        }
    }

    #[test]
    fn job_state_is_derived_from_timestamps_and_return_code() {
        let now = Utc::now();
        assert_eq!(job(None, None, None).state(), JobState::Enqueued);
        assert_eq!(job(Some(now), None, None).state(), JobState::Pending);
        assert_eq!(job(Some(now), Some(now), Some(0)).state(), JobState::Success);
        assert_eq!(job(Some(now), Some(now), Some(1)).state(), JobState::Failure);
        assert!(job(Some(now), Some(now), Some(137)).is_finished());
        assert!(!job(Some(now), None, None).is_finished());
    }

    #[test]
    fn passphrase_is_deterministic_and_secret_dependent() {
        let project = Project {
            id: 1,
            gh_id: 42,
            gh_login: "aromanovich".into(),
            gh_name: "kozmic".into(),
            gh_full_name: "aromanovich/kozmic".into(),
            gh_https_clone_url: "https://github.com/aromanovich/kozmic.git".into(),
            gh_ssh_clone_url: "git@github.com:aromanovich/kozmic.git".into(),
            is_private: true,
            rsa_private_key: "key".into(),
            rsa_public_key: "pub".into(),
        };
        assert_eq!(project.passphrase("s3cret"), project.passphrase("s3cret"));
        assert_ne!(project.passphrase("s3cret"), project.passphrase("other"));
        assert_eq!(project.passphrase("s3cret").len(), 64);
    }

    #[test]
    fn private_projects_clone_over_ssh_with_a_deploy_key() {
        let mut project = Project {
            id: 1,
            gh_id: 42,
            gh_login: "a".into(),
            gh_name: "r".into(),
            gh_full_name: "a/r".into(),
            gh_https_clone_url: "https://github.com/a/r.git".into(),
            gh_ssh_clone_url: "git@github.com:a/r.git".into(),
            is_private: true,
            rsa_private_key: "PEM".into(),
            rsa_public_key: "pub".into(),
        };
        assert_eq!(project.clone_url(), "git@github.com:a/r.git");
        assert!(project.deploy_key("k").is_some());

        project.is_private = false;
        assert_eq!(project.clone_url(), "https://github.com/a/r.git");
        assert!(project.deploy_key("k").is_none());
    }

    #[test]
    fn blank_install_script_is_treated_as_absent() {
        let mut hook = Hook {
            id: 1,
            project_id: 1,
            gh_id: 1,
            title: "tests".into(),
            install_script: Some("  \n".into()),
            build_script: "make test".into(),
            docker_image: "ubuntu".into(),
            secret: None,
        };
        assert_eq!(hook.effective_install_script(), None);
        hook.install_script = Some("pip install -r requirements.txt".into());
        assert_eq!(
            hook.effective_install_script(),
            Some("pip install -r requirements.txt")
        );
        hook.install_script = None;
        assert_eq!(hook.effective_install_script(), None);
    }

    #[test]
    fn image_ref_parsing() {
        assert_eq!(
            ImageRef::parse("u:12"),
            ImageRef { repo: "u".into(), tag: "12".into() }
        );
        assert_eq!(
            ImageRef::parse("ubuntu"),
            ImageRef { repo: "ubuntu".into(), tag: "latest".into() }
        );
        assert_eq!(
            ImageRef::parse("registry.local:5000/team/app:v1"),
            ImageRef {
                repo: "registry.local:5000/team/app".into(),
                tag: "v1".into()
            }
        );
        assert_eq!(
            ImageRef::parse("registry.local:5000/team/app"),
            ImageRef {
                repo: "registry.local:5000/team/app".into(),
                tag: "latest".into()
            }
        );
        assert_eq!(ImageRef::parse("u:12").to_string(), "u:12");
    }

    #[test]
    fn cache_image_repo_is_namespaced() {
        assert_eq!(cache_image_repo("abc123"), "kozmic-cache/abc123");
    }
}
