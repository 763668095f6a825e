//! Webhook ingress.
//!
//! Deduplication leans on the database's unique constraints: a concurrent
//! delivery of the same `(ref, sha)` loses the insert race and is answered
//! with OK, enqueuing nothing.

use std::sync::OnceLock;

use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::routing::post;
use hmac::{Hmac, Mac};
use regex::Regex;
use sha2::Sha256;
use tracing::{info, warn};
use uuid::Uuid;

use kozmic_db::NewBuild;

use crate::AppState;
use crate::error::ApiError;

pub fn router() -> Router<AppState> {
    Router::new().route("/_hooks/hook/{id}", post(hook))
}

async fn hook(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<&'static str, ApiError> {
    let hook = state
        .hooks
        .get_by_id(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("hook {id}")))?;

    if let Some(secret) = &hook.secret {
        let signature = headers
            .get("X-Hub-Signature-256")
            .and_then(|v| v.to_str().ok());
        if !verify_signature(secret, &body, signature) {
            warn!(hook_id = id, "invalid webhook signature");
            return Err(ApiError::Unauthorized("invalid signature".into()));
        }
    }

    let event = headers
        .get("X-GitHub-Event")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("push");
    info!(hook_id = id, event = %event, "received webhook");

    if event == "ping" {
        // The hook id matched; that is all a ping asks.
        return Ok("OK");
    }

    let payload: serde_json::Value = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("invalid JSON: {e}")))?;

    let Some((gh_ref, sha)) = extract_ref_and_sha(event, &payload) else {
        return Ok("OK");
    };
    if matches_skip_ci(&skip_marker_text(event, &payload)) {
        info!(hook_id = id, sha = %sha, "commit asks to be skipped");
        return Ok("OK");
    }

    let project = state.projects.get_by_id(hook.project_id).await?;
    let commit = state
        .code_host
        .git_commit(&project.gh_full_name, &sha)
        .await?;

    let build = match state
        .builds
        .find_by_ref_and_sha(project.id, &gh_ref, &commit.sha)
        .await?
    {
        Some(build) => build,
        None => {
            let new = NewBuild {
                project_id: project.id,
                gh_commit_ref: gh_ref.clone(),
                gh_commit_sha: commit.sha.clone(),
                gh_commit_author: commit.author_name.clone(),
                gh_commit_message: commit.message.clone(),
            };
            match state.builds.create(new).await {
                Ok(build) => build,
                // Another delivery won the race; nothing more to do.
                Err(e) if e.is_duplicate() => return Ok("OK"),
                Err(e) => return Err(e.into()),
            }
        }
    };

    let hook_call = match state
        .builds
        .create_hook_call(hook.id, build.id, payload)
        .await
    {
        Ok(hook_call) => hook_call,
        Err(e) if e.is_duplicate() => return Ok("OK"),
        Err(e) => return Err(e.into()),
    };

    let job = state
        .jobs
        .create(build.id, hook_call.id, Uuid::new_v4())
        .await?;
    state.queue.enqueue(job.id).await?;
    info!(hook_id = id, build_id = build.id, job_id = job.id, "job enqueued");

    Ok("OK")
}

/// `(branch, sha)` of a delivery worth building, if any. Pushes to
/// non-branch refs and pull-request actions other than opened/synchronize
/// are ignored.
fn extract_ref_and_sha(event: &str, payload: &serde_json::Value) -> Option<(String, String)> {
    match event {
        "push" => {
            let full_ref = payload.get("ref")?.as_str()?;
            let branch = full_ref.strip_prefix("refs/heads/")?;
            let sha = payload.get("head_commit")?.get("id")?.as_str()?;
            Some((branch.to_string(), sha.to_string()))
        }
        "pull_request" => {
            let action = payload.get("action")?.as_str()?;
            if !matches!(action, "opened" | "synchronize") {
                return None;
            }
            let head = payload.get("pull_request")?.get("head")?;
            let branch = head.get("ref")?.as_str()?;
            let sha = head.get("sha")?.as_str()?;
            Some((branch.to_string(), sha.to_string()))
        }
        _ => None,
    }
}

/// Text the skip markers are searched in: the commit message for a push,
/// the title and body for a pull request.
fn skip_marker_text(event: &str, payload: &serde_json::Value) -> String {
    let text = |v: &serde_json::Value| v.as_str().unwrap_or("").to_string();
    match event {
        "push" => payload
            .get("head_commit")
            .and_then(|c| c.get("message"))
            .map(text)
            .unwrap_or_default(),
        "pull_request" => {
            let pr = payload.get("pull_request");
            let title = pr.and_then(|p| p.get("title")).map(text).unwrap_or_default();
            let body = pr.and_then(|p| p.get("body")).map(text).unwrap_or_default();
            format!("{title}\n{body}")
        }
        _ => String::new(),
    }
}

fn matches_skip_ci(text: &str) -> bool {
    static SKIP_CI: OnceLock<Regex> = OnceLock::new();
    let re = SKIP_CI.get_or_init(|| {
        Regex::new(r"(?i)\[ci\s+skip\]|\[skip\s+ci\]|skip_ci|ci_skip")
            .expect("skip-ci pattern is valid")
    });
    re.is_match(text)
}

/// Verify a GitHub webhook signature.
fn verify_signature(secret: &str, body: &[u8], signature: Option<&str>) -> bool {
    let Some(signature) = signature else {
        return false;
    };

    // Signature format: "sha256=<hex>"
    let Some(sig_hex) = signature.strip_prefix("sha256=") else {
        return false;
    };

    let Ok(sig_bytes) = hex::decode(sig_hex) else {
        return false;
    };

    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("HMAC can take any size key");
    mac.update(body);

    mac.verify_slice(&sig_bytes).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn push_payloads_yield_branch_and_head_commit() {
        let payload = json!({
            "ref": "refs/heads/master",
            "head_commit": {"id": "abc123", "message": "Fix the tests"}
        });
        assert_eq!(
            extract_ref_and_sha("push", &payload),
            Some(("master".to_string(), "abc123".to_string()))
        );
    }

    #[test]
    fn pushes_to_non_branch_refs_are_ignored() {
        let payload = json!({
            "ref": "refs/tags/v1.0",
            "head_commit": {"id": "abc123"}
        });
        assert_eq!(extract_ref_and_sha("push", &payload), None);
    }

    #[test]
    fn pull_request_opened_and_synchronize_yield_the_head() {
        let payload = json!({
            "action": "synchronize",
            "pull_request": {"head": {"ref": "feature", "sha": "def456"}}
        });
        assert_eq!(
            extract_ref_and_sha("pull_request", &payload),
            Some(("feature".to_string(), "def456".to_string()))
        );

        let closed = json!({
            "action": "closed",
            "pull_request": {"head": {"ref": "feature", "sha": "def456"}}
        });
        assert_eq!(extract_ref_and_sha("pull_request", &closed), None);
    }

    #[test]
    fn skip_ci_markers() {
        assert!(matches_skip_ci("chore: bump deps [ci skip]"));
        assert!(matches_skip_ci("[skip  CI] formatting"));
        assert!(matches_skip_ci("wip skip_ci"));
        assert!(matches_skip_ci("CI_SKIP experiments"));
        assert!(!matches_skip_ci("ship the ci improvements"));
        assert!(!matches_skip_ci("plain commit message"));
    }

    #[test]
    fn skip_text_covers_pr_title_and_body() {
        let payload = json!({
            "action": "opened",
            "pull_request": {"title": "WIP", "body": "[ci skip] please"}
        });
        assert!(matches_skip_ci(&skip_marker_text("pull_request", &payload)));
    }

    #[test]
    fn signature_verification_round_trip() {
        let secret = "s3cret";
        let body = br#"{"zen": "Design for failure."}"#;

        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        let signature = format!("sha256={}", hex::encode(mac.finalize().into_bytes()));

        assert!(verify_signature(secret, body, Some(&signature)));
        assert!(!verify_signature(secret, body, Some("sha256=deadbeef")));
        assert!(!verify_signature(secret, body, Some("not-a-signature")));
        assert!(!verify_signature(secret, body, None));
        assert!(!verify_signature("other", body, Some(&signature)));
    }
}
