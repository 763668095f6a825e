//! Cache sweeper: bounds the per-project count of cached install images.
//!
//! Operational tool, not on the job path. Cached images are named
//! `kozmic-cache/<fingerprint>:<project_id>`, so the tag identifies the
//! project. Per project, all but the most recently created `limit` images
//! are untagged.

use std::collections::HashMap;

use tracing::info;

use kozmic_core::Result;
use kozmic_core::driver::ContainerDriver;
use kozmic_core::model::CACHE_IMAGE_NAMESPACE;

#[derive(Debug, Default)]
pub struct SweepReport {
    /// Cached images found, across all projects.
    pub examined: usize,
    /// `repo:tag` names that were removed.
    pub removed: Vec<String>,
}

pub async fn sweep_cache(driver: &dyn ContainerDriver, limit: usize) -> Result<SweepReport> {
    let prefix = format!("{}/", CACHE_IMAGE_NAMESPACE);
    let images = driver.list_images(&prefix).await?;

    // (created, repo:tag) per project tag.
    let mut by_project: HashMap<String, Vec<(i64, String)>> = HashMap::new();
    let mut examined = 0;
    for image in &images {
        for repo_tag in &image.repo_tags {
            let Some((repo, tag)) = repo_tag.rsplit_once(':') else {
                continue;
            };
            if !repo.starts_with(&prefix) {
                continue;
            }
            examined += 1;
            by_project
                .entry(tag.to_string())
                .or_default()
                .push((image.created, repo_tag.clone()));
        }
    }

    let mut removed = Vec::new();
    for (project, mut entries) in by_project {
        entries.sort_by(|a, b| b.0.cmp(&a.0));
        for (_, repo_tag) in entries.drain(..).skip(limit) {
            info!(project = %project, image = %repo_tag, "removing cached image");
            driver.remove_image(&repo_tag).await?;
            removed.push(repo_tag);
        }
    }

    Ok(SweepReport { examined, removed })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use kozmic_core::driver::{ContainerHandle, ImageSummary};
    use std::sync::Mutex;

    struct FakeDriver {
        images: Vec<ImageSummary>,
        removed: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ContainerDriver for FakeDriver {
        async fn pull(&self, _image: &str) -> Result<()> {
            unimplemented!()
        }
        async fn inspect_image(&self, _image: &str) -> Result<String> {
            unimplemented!()
        }
        async fn image_exists(&self, _repo: &str, _tag: &str) -> Result<bool> {
            unimplemented!()
        }
        async fn image_id(&self, _repo: &str, _tag: &str) -> Result<Option<String>> {
            unimplemented!()
        }
        async fn create(
            &self,
            _image: &str,
            _command: &[String],
            _bind: &str,
            _mount: &str,
        ) -> Result<ContainerHandle> {
            unimplemented!()
        }
        async fn start(&self, _handle: &ContainerHandle) -> Result<()> {
            unimplemented!()
        }
        async fn wait(&self, _handle: &ContainerHandle) -> Result<i32> {
            unimplemented!()
        }
        async fn logs(&self, _handle: &ContainerHandle) -> Result<String> {
            unimplemented!()
        }
        async fn kill(&self, _handle: &ContainerHandle) -> Result<()> {
            unimplemented!()
        }
        async fn commit(&self, _handle: &ContainerHandle, _repo: &str, _tag: &str) -> Result<()> {
            unimplemented!()
        }
        async fn remove_container(&self, _handle: &ContainerHandle) -> Result<()> {
            unimplemented!()
        }
        async fn remove_image(&self, id: &str) -> Result<()> {
            self.removed.lock().unwrap().push(id.to_string());
            Ok(())
        }
        async fn list_images(&self, _repo_prefix: &str) -> Result<Vec<ImageSummary>> {
            Ok(self.images.clone())
        }
    }

    fn cached(fingerprint: &str, project: &str, created: i64) -> ImageSummary {
        ImageSummary {
            id: format!("sha256:{fingerprint}"),
            repo_tags: vec![format!("kozmic-cache/{fingerprint}:{project}")],
            created,
        }
    }

    #[tokio::test]
    async fn keeps_the_most_recent_images_per_project() {
        let driver = FakeDriver {
            images: vec![
                cached("aaa", "1", 100),
                cached("bbb", "1", 200),
                cached("ccc", "1", 300),
                cached("ddd", "2", 50),
            ],
            removed: Mutex::new(vec![]),
        };

        let report = sweep_cache(&driver, 2).await.unwrap();

        assert_eq!(report.examined, 4);
        assert_eq!(report.removed, vec!["kozmic-cache/aaa:1".to_string()]);
        assert_eq!(
            *driver.removed.lock().unwrap(),
            vec!["kozmic-cache/aaa:1".to_string()]
        );
    }

    #[tokio::test]
    async fn under_the_limit_nothing_is_removed() {
        let driver = FakeDriver {
            images: vec![cached("aaa", "1", 100)],
            removed: Mutex::new(vec![]),
        };
        let report = sweep_cache(&driver, 3).await.unwrap();
        assert!(report.removed.is_empty());
    }
}
