//! Cache fingerprint for the install phase.
//!
//! The fingerprint changes exactly when the base image digest, the install
//! script bytes, the set of tracked paths or any tracked path's content or
//! existence changes. It tags the cached post-install image.

use sha2::{Digest, Sha256};

use kozmic_core::codehost::{CodeHost, RepoContents};
use kozmic_core::{Error, Result};

/// Compute the 256-bit hex digest identifying a cache-eligible install
/// context. `image_digest` must be the resolved immutable image id, not the
/// tag the user configured.
pub async fn compute_fingerprint(
    code_host: &dyn CodeHost,
    repo_full_name: &str,
    commit_sha: &str,
    image_digest: &str,
    install_script: &str,
    tracked_paths: &[String],
) -> Result<String> {
    let mut hasher = Sha256::new();
    hasher.update(image_digest.as_bytes());
    hasher.update(install_script.as_bytes());

    let mut paths = tracked_paths
        .iter()
        .map(|p| normalize_tracked_path(p))
        .collect::<Result<Vec<_>>>()?;
    paths.sort();
    paths.dedup();

    for path in &paths {
        match code_host.contents(repo_full_name, path, commit_sha).await? {
            RepoContents::File { blob_sha } => {
                hasher.update(path.as_bytes());
                hasher.update(blob_sha.as_bytes());
            }
            RepoContents::Dir { mut entries } => {
                entries.sort_by(|a, b| a.path.cmp(&b.path));
                for entry in entries {
                    hasher.update(entry.path.as_bytes());
                    hasher.update(entry.blob_sha.as_bytes());
                }
            }
            // A missing path still participates so that deletions change
            // the fingerprint.
            RepoContents::Missing => hasher.update(path.as_bytes()),
        }
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Collapse `.` and `..` components into a repository-relative path.
/// Escaping the repository root is rejected; the root itself normalizes to
/// the empty string.
pub fn normalize_tracked_path(path: &str) -> Result<String> {
    let mut parts: Vec<&str> = Vec::new();
    for component in path.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                if parts.pop().is_none() {
                    return Err(Error::InvalidInput(format!(
                        "tracked path {path:?} escapes the repository"
                    )));
                }
            }
            other => parts.push(other),
        }
    }
    Ok(parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MapCodeHost;
    use kozmic_core::codehost::DirEntry;

    const REPO: &str = "acme/widgets";
    const SHA: &str = "deadbeef";

    async fn fp(
        host: &MapCodeHost,
        image_digest: &str,
        script: &str,
        tracked: &[&str],
    ) -> String {
        let tracked: Vec<String> = tracked.iter().map(|s| s.to_string()).collect();
        compute_fingerprint(host, REPO, SHA, image_digest, script, &tracked)
            .await
            .unwrap()
    }

    #[test]
    fn path_normalization() {
        assert_eq!(normalize_tracked_path("./Gemfile").unwrap(), "Gemfile");
        assert_eq!(normalize_tracked_path("a/./b").unwrap(), "a/b");
        assert_eq!(normalize_tracked_path("a/x/../b").unwrap(), "a/b");
        assert_eq!(normalize_tracked_path(".").unwrap(), "");
        assert_eq!(normalize_tracked_path("").unwrap(), "");
        assert!(normalize_tracked_path("../etc/passwd").is_err());
        assert!(normalize_tracked_path("a/../../b").is_err());
    }

    #[tokio::test]
    async fn identical_inputs_give_identical_fingerprints() {
        let host = MapCodeHost::new();
        host.insert("Gemfile", RepoContents::File { blob_sha: "aa".into() });

        let a = fp(&host, "sha256:img", "bundle install", &["Gemfile"]).await;
        let b = fp(&host, "sha256:img", "bundle install", &["Gemfile"]).await;
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[tokio::test]
    async fn any_input_change_changes_the_fingerprint() {
        let host = MapCodeHost::new();
        host.insert("Gemfile", RepoContents::File { blob_sha: "aa".into() });

        let base = fp(&host, "sha256:img", "bundle install", &["Gemfile"]).await;
        assert_ne!(
            base,
            fp(&host, "sha256:other", "bundle install", &["Gemfile"]).await
        );
        assert_ne!(
            base,
            fp(&host, "sha256:img", "bundle install --quiet", &["Gemfile"]).await
        );
        assert_ne!(base, fp(&host, "sha256:img", "bundle install", &[]).await);

        host.insert("Gemfile", RepoContents::File { blob_sha: "bb".into() });
        assert_ne!(
            base,
            fp(&host, "sha256:img", "bundle install", &["Gemfile"]).await
        );
    }

    #[tokio::test]
    async fn tracked_path_order_does_not_matter() {
        let host = MapCodeHost::new();
        host.insert("a", RepoContents::File { blob_sha: "aa".into() });
        host.insert("b", RepoContents::File { blob_sha: "bb".into() });

        assert_eq!(
            fp(&host, "d", "s", &["a", "b"]).await,
            fp(&host, "d", "s", &["b", "a"]).await
        );
    }

    #[tokio::test]
    async fn a_missing_path_contributes_its_path_only() {
        let host = MapCodeHost::new();
        // "gone" resolves to Missing by default.
        let with_missing = fp(&host, "d", "s", &["gone"]).await;
        let without = fp(&host, "d", "s", &[]).await;
        assert_ne!(with_missing, without);
    }

    #[tokio::test]
    async fn directories_contribute_their_entries() {
        let host = MapCodeHost::new();
        host.insert(
            "deps",
            RepoContents::Dir {
                entries: vec![
                    DirEntry { path: "deps/b.txt".into(), blob_sha: "bb".into() },
                    DirEntry { path: "deps/a.txt".into(), blob_sha: "aa".into() },
                ],
            },
        );
        let base = fp(&host, "d", "s", &["deps"]).await;

        // Entry order is normalized, so a reordered listing is identical.
        host.insert(
            "deps",
            RepoContents::Dir {
                entries: vec![
                    DirEntry { path: "deps/a.txt".into(), blob_sha: "aa".into() },
                    DirEntry { path: "deps/b.txt".into(), blob_sha: "bb".into() },
                ],
            },
        );
        assert_eq!(base, fp(&host, "d", "s", &["deps"]).await);

        // A changed entry is not.
        host.insert(
            "deps",
            RepoContents::Dir {
                entries: vec![
                    DirEntry { path: "deps/a.txt".into(), blob_sha: "aa".into() },
                    DirEntry { path: "deps/b.txt".into(), blob_sha: "cc".into() },
                ],
            },
        );
        assert_ne!(base, fp(&host, "d", "s", &["deps"]).await);
    }

    #[tokio::test]
    async fn remote_api_failures_propagate() {
        let host = MapCodeHost::new();
        host.fail_contents();
        let tracked = vec!["Gemfile".to_string()];
        let err = compute_fingerprint(&host, REPO, SHA, "d", "s", &tracked)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RemoteApi(_)));
    }
}
