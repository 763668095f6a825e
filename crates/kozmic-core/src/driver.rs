//! Container driver trait.
//!
//! A thin contract over a local container engine. The Docker implementation
//! lives in `kozmic-docker`; tests substitute mocks.

use async_trait::async_trait;

use crate::Result;

/// Opaque handle to a created container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHandle {
    pub id: String,
}

/// Summary of a locally present image, as reported by the engine.
#[derive(Debug, Clone)]
pub struct ImageSummary {
    pub id: String,
    /// `repo:tag` names pointing at this image.
    pub repo_tags: Vec<String>,
    /// Creation time, seconds since the epoch.
    pub created: i64,
}

/// Thin contract over a local container engine.
///
/// Every operation either succeeds or returns a typed error; `ImagePull`
/// and `ImageMissing` are fatal for the job that hit them. `kill` and the
/// `remove_*` operations are idempotent.
#[async_trait]
pub trait ContainerDriver: Send + Sync {
    /// Pull `image` from the registry. Blocking from the caller's point of
    /// view; fails with `Error::ImagePull` on network or registry failure.
    async fn pull(&self, image: &str) -> Result<()>;

    /// Verify a post-pull presence and return the immutable image digest.
    /// Fails with `Error::ImageMissing` if the image is not present.
    async fn inspect_image(&self, image: &str) -> Result<String>;

    /// Whether an image with the exact `repo:tag` name exists locally.
    async fn image_exists(&self, repo: &str, tag: &str) -> Result<bool>;

    /// Digest of the image with the exact `repo:tag` name, if present.
    async fn image_id(&self, repo: &str, tag: &str) -> Result<Option<String>>;

    /// Create a container running `command`, with the host `bind` directory
    /// mounted at `mount`. The container is not started.
    async fn create(
        &self,
        image: &str,
        command: &[String],
        bind: &str,
        mount: &str,
    ) -> Result<ContainerHandle>;

    /// Begin execution. Non-blocking.
    async fn start(&self, handle: &ContainerHandle) -> Result<()>;

    /// Block until the container exits; returns its exit code.
    async fn wait(&self, handle: &ContainerHandle) -> Result<i32>;

    /// Full captured stdout/stderr. Diagnostics only — live streaming goes
    /// through the log file and the pub/sub bus.
    async fn logs(&self, handle: &ContainerHandle) -> Result<String>;

    /// Force termination. Idempotent.
    async fn kill(&self, handle: &ContainerHandle) -> Result<()>;

    /// Snapshot the container into an image named `repo:tag`.
    async fn commit(&self, handle: &ContainerHandle, repo: &str, tag: &str) -> Result<()>;

    /// Remove the container. Idempotent.
    async fn remove_container(&self, handle: &ContainerHandle) -> Result<()>;

    /// Remove an image by id. Idempotent.
    async fn remove_image(&self, id: &str) -> Result<()>;

    /// Locally present images whose repository starts with `repo_prefix`.
    /// Used by the cache sweeper.
    async fn list_images(&self, repo_prefix: &str) -> Result<Vec<ImageSummary>>;
}
