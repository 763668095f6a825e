//! GitHub implementation of the hosted-git surface the core consumes:
//! contents at a commit (for the cache fingerprint), commit metadata and
//! commit statuses.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use kozmic_core::codehost::{CodeHost, CommitInfo, CommitState, DirEntry, RepoContents};
use kozmic_core::{Error, Result};

const API_BASE: &str = "https://api.github.com";
const USER_AGENT: &str = "kozmic-ci";

pub struct GitHubClient {
    client: reqwest::Client,
    base_url: String,
    access_token: String,
}

impl GitHubClient {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: API_BASE.to_string(),
            access_token: access_token.into(),
        }
    }

    /// Point the client at a different API root (GitHub Enterprise, tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        self.request(self.client.get(url))
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .header("Authorization", format!("Bearer {}", self.access_token))
            .header("User-Agent", USER_AGENT)
            .header("Accept", "application/vnd.github+json")
    }

    fn contents_url(&self, repo_full_name: &str, path: &str, git_ref: &str) -> String {
        let encoded: Vec<String> = path
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect();
        format!(
            "{}/repos/{}/contents/{}?ref={}",
            self.base_url,
            repo_full_name,
            encoded.join("/"),
            git_ref
        )
    }
}

#[derive(Debug, Deserialize)]
struct ContentsEntry {
    path: String,
    sha: String,
}

/// The contents endpoint answers with an object for a file and an array for
/// a directory.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ContentsResponse {
    Dir(Vec<ContentsEntry>),
    File(ContentsEntry),
}

#[derive(Debug, Deserialize)]
struct GitCommitResponse {
    sha: String,
    message: String,
    author: GitCommitAuthor,
}

#[derive(Debug, Deserialize)]
struct GitCommitAuthor {
    name: String,
}

fn remote_err(context: &str, e: impl std::fmt::Display) -> Error {
    Error::RemoteApi(format!("{context}: {e}"))
}

#[async_trait]
impl CodeHost for GitHubClient {
    async fn contents(
        &self,
        repo_full_name: &str,
        path: &str,
        git_ref: &str,
    ) -> Result<RepoContents> {
        let url = self.contents_url(repo_full_name, path, git_ref);
        debug!(url = %url, "fetching repository contents");
        let response = self
            .get(&url)
            .send()
            .await
            .map_err(|e| remote_err("contents request failed", e))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(RepoContents::Missing);
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(remote_err(
                "contents request",
                format!("{status}: {body}"),
            ));
        }

        let contents: ContentsResponse = response
            .json()
            .await
            .map_err(|e| remote_err("contents response", e))?;
        Ok(match contents {
            ContentsResponse::File(entry) => RepoContents::File { blob_sha: entry.sha },
            ContentsResponse::Dir(entries) => RepoContents::Dir {
                entries: entries
                    .into_iter()
                    .map(|e| DirEntry {
                        path: e.path,
                        blob_sha: e.sha,
                    })
                    .collect(),
            },
        })
    }

    async fn git_commit(&self, repo_full_name: &str, sha: &str) -> Result<CommitInfo> {
        let url = format!("{}/repos/{}/git/commits/{}", self.base_url, repo_full_name, sha);
        let response = self
            .get(&url)
            .send()
            .await
            .map_err(|e| remote_err("commit request failed", e))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(remote_err("commit request", format!("{status}: {body}")));
        }
        let commit: GitCommitResponse = response
            .json()
            .await
            .map_err(|e| remote_err("commit response", e))?;
        Ok(CommitInfo {
            sha: commit.sha,
            message: commit.message,
            author_name: commit.author.name,
        })
    }

    async fn create_status(
        &self,
        repo_full_name: &str,
        sha: &str,
        state: CommitState,
        target_url: &str,
        description: &str,
    ) -> Result<()> {
        let url = format!("{}/repos/{}/statuses/{}", self.base_url, repo_full_name, sha);
        let body = serde_json::json!({
            "state": state.as_str(),
            "target_url": target_url,
            "description": description,
            "context": "kozmic",
        });
        let response = self
            .request(self.client.post(&url))
            .json(&body)
            .send()
            .await
            .map_err(|e| remote_err("status post failed", e))?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(remote_err("status post", format!("{status}: {text}")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contents_url_encodes_segments_and_keeps_separators() {
        let client = GitHubClient::new("t");
        assert_eq!(
            client.contents_url("a/r", "dir with space/file.txt", "abc123"),
            "https://api.github.com/repos/a/r/contents/dir%20with%20space/file.txt?ref=abc123"
        );
        // The repository root maps to the bare contents endpoint.
        assert_eq!(
            client.contents_url("a/r", "", "abc123"),
            "https://api.github.com/repos/a/r/contents/?ref=abc123"
        );
    }

    #[test]
    fn contents_response_shapes() {
        let file: ContentsResponse =
            serde_json::from_str(r#"{"path": "Gemfile", "sha": "f00d", "type": "file"}"#).unwrap();
        assert!(matches!(file, ContentsResponse::File(_)));

        let dir: ContentsResponse = serde_json::from_str(
            r#"[{"path": "deps/a.txt", "sha": "aa"}, {"path": "deps/b.txt", "sha": "bb"}]"#,
        )
        .unwrap();
        match dir {
            ContentsResponse::Dir(entries) => {
                assert_eq!(entries.len(), 2);
                assert_eq!(entries[0].path, "deps/a.txt");
            }
            _ => panic!("expected a directory listing"),
        }
    }

    #[test]
    fn git_commit_response_shape() {
        let commit: GitCommitResponse = serde_json::from_str(
            r#"{"sha": "abc", "message": "Fix tests", "author": {"name": "Jo", "email": "jo@example.com"}}"#,
        )
        .unwrap();
        assert_eq!(commit.sha, "abc");
        assert_eq!(commit.author.name, "Jo");
    }
}
