//! Docker implementation of the container driver.

use std::collections::HashMap;

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, KillContainerOptions, LogOutput, LogsOptions,
    RemoveContainerOptions, StartContainerOptions, WaitContainerOptions,
};
use bollard::image::{CommitContainerOptions, CreateImageOptions, ListImagesOptions};
use bollard::models::HostConfig;
use bollard::{ClientVersion, Docker};
use futures::StreamExt;
use tracing::{debug, info};

use kozmic_config::DockerConfig;
use kozmic_core::driver::{ContainerDriver, ContainerHandle, ImageSummary};
use kozmic_core::{Error, Result};

const CONNECT_TIMEOUT_SECS: u64 = 120;

pub struct DockerDriver {
    docker: Docker,
}

impl DockerDriver {
    /// Connect to the daemon named by `DOCKER_URL`/`DOCKER_API_VERSION`.
    pub fn connect(config: &DockerConfig) -> Result<Self> {
        let version = parse_api_version(&config.api_version)?;
        let docker = if config.url.starts_with("unix://") {
            Docker::connect_with_unix(&config.url, CONNECT_TIMEOUT_SECS, &version)
        } else {
            Docker::connect_with_http(&config.url, CONNECT_TIMEOUT_SECS, &version)
        }
        .map_err(|e| Error::Engine(e.to_string()))?;
        Ok(Self { docker })
    }

    /// Connect with the engine's local defaults. Development only.
    pub fn connect_with_local_defaults() -> Result<Self> {
        let docker =
            Docker::connect_with_local_defaults().map_err(|e| Error::Engine(e.to_string()))?;
        Ok(Self { docker })
    }

    pub fn with_client(docker: Docker) -> Self {
        Self { docker }
    }
}

fn parse_api_version(version: &str) -> Result<ClientVersion> {
    let invalid = || Error::InvalidInput(format!("invalid Docker API version {version:?}"));
    let (major, minor) = version.split_once('.').ok_or_else(invalid)?;
    Ok(ClientVersion {
        major_version: major.parse().map_err(|_| invalid())?,
        minor_version: minor.parse().map_err(|_| invalid())?,
    })
}

fn is_not_found(e: &bollard::errors::Error) -> bool {
    matches!(
        e,
        bollard::errors::Error::DockerResponseServerError { status_code: 404, .. }
    )
}

fn engine_err(e: bollard::errors::Error) -> Error {
    Error::Engine(e.to_string())
}

#[async_trait]
impl ContainerDriver for DockerDriver {
    async fn pull(&self, image: &str) -> Result<()> {
        info!(image = %image, "pulling image");
        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };
        let mut stream = self.docker.create_image(Some(options), None, None);
        while let Some(progress) = stream.next().await {
            match progress {
                Ok(info) => {
                    if let Some(status) = info.status {
                        debug!(image = %image, status = %status, "pull progress");
                    }
                }
                Err(e) => return Err(Error::ImagePull(e.to_string())),
            }
        }
        info!(image = %image, "image pulled");
        Ok(())
    }

    async fn inspect_image(&self, image: &str) -> Result<String> {
        let inspect = self.docker.inspect_image(image).await.map_err(|e| {
            if is_not_found(&e) {
                Error::ImageMissing(image.to_string())
            } else {
                engine_err(e)
            }
        })?;
        inspect
            .id
            .ok_or_else(|| Error::Engine(format!("no id in inspect of {image}")))
    }

    async fn image_exists(&self, repo: &str, tag: &str) -> Result<bool> {
        Ok(self.image_id(repo, tag).await?.is_some())
    }

    async fn image_id(&self, repo: &str, tag: &str) -> Result<Option<String>> {
        let reference = format!("{repo}:{tag}");
        let options = ListImagesOptions {
            filters: HashMap::from([("reference".to_string(), vec![reference.clone()])]),
            ..Default::default()
        };
        let images = self
            .docker
            .list_images(Some(options))
            .await
            .map_err(engine_err)?;
        // The reference filter matches patterns; insist on the exact name.
        for image in images {
            if image.repo_tags.iter().any(|t| *t == reference) {
                return Ok(Some(image.id));
            }
        }
        Ok(None)
    }

    async fn create(
        &self,
        image: &str,
        command: &[String],
        bind: &str,
        mount: &str,
    ) -> Result<ContainerHandle> {
        let host_config = HostConfig {
            binds: Some(vec![format!("{bind}:{mount}")]),
            ..Default::default()
        };
        let config = Config {
            image: Some(image.to_string()),
            cmd: Some(command.to_vec()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            tty: Some(false),
            host_config: Some(host_config),
            ..Default::default()
        };
        let created = self
            .docker
            .create_container(None::<CreateContainerOptions<String>>, config)
            .await
            .map_err(|e| {
                if is_not_found(&e) {
                    Error::ImageMissing(image.to_string())
                } else {
                    engine_err(e)
                }
            })?;
        info!(container = %created.id, image = %image, "container created");
        Ok(ContainerHandle { id: created.id })
    }

    async fn start(&self, handle: &ContainerHandle) -> Result<()> {
        self.docker
            .start_container(&handle.id, None::<StartContainerOptions<String>>)
            .await
            .map_err(engine_err)
    }

    async fn wait(&self, handle: &ContainerHandle) -> Result<i32> {
        let options = WaitContainerOptions {
            condition: "not-running",
        };
        let mut stream = self.docker.wait_container(&handle.id, Some(options));
        match stream.next().await {
            Some(Ok(response)) => Ok(response.status_code as i32),
            // bollard reports a nonzero exit code as an error variant.
            Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => {
                Ok(code as i32)
            }
            Some(Err(e)) => Err(engine_err(e)),
            None => Err(Error::Engine(format!(
                "wait stream ended without a status for {}",
                handle.id
            ))),
        }
    }

    async fn logs(&self, handle: &ContainerHandle) -> Result<String> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            ..Default::default()
        };
        let mut stream = self.docker.logs(&handle.id, Some(options));
        let mut out = String::new();
        while let Some(chunk) = stream.next().await {
            match chunk.map_err(engine_err)? {
                LogOutput::StdOut { message }
                | LogOutput::StdErr { message }
                | LogOutput::Console { message }
                | LogOutput::StdIn { message } => {
                    out.push_str(&String::from_utf8_lossy(&message));
                }
            }
        }
        Ok(out)
    }

    async fn kill(&self, handle: &ContainerHandle) -> Result<()> {
        match self
            .docker
            .kill_container(&handle.id, None::<KillContainerOptions<String>>)
            .await
        {
            Ok(()) => Ok(()),
            // Already gone or already stopped: kill is idempotent.
            Err(e) if is_not_found(&e) => Ok(()),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 409, ..
            }) => Ok(()),
            Err(e) => Err(engine_err(e)),
        }
    }

    async fn commit(&self, handle: &ContainerHandle, repo: &str, tag: &str) -> Result<()> {
        let options = CommitContainerOptions {
            container: handle.id.clone(),
            repo: repo.to_string(),
            tag: tag.to_string(),
            ..Default::default()
        };
        self.docker
            .commit_container(options, Config::<String>::default())
            .await
            .map_err(engine_err)?;
        info!(container = %handle.id, image = %format!("{repo}:{tag}"), "container committed");
        Ok(())
    }

    async fn remove_container(&self, handle: &ContainerHandle) -> Result<()> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        match self.docker.remove_container(&handle.id, Some(options)).await {
            Ok(()) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(engine_err(e)),
        }
    }

    async fn remove_image(&self, id: &str) -> Result<()> {
        match self.docker.remove_image(id, None, None).await {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(engine_err(e)),
        }
    }

    async fn list_images(&self, repo_prefix: &str) -> Result<Vec<ImageSummary>> {
        let options = ListImagesOptions {
            filters: HashMap::from([(
                "reference".to_string(),
                vec![format!("{repo_prefix}*")],
            )]),
            ..Default::default()
        };
        let images = self
            .docker
            .list_images(Some(options))
            .await
            .map_err(engine_err)?;
        Ok(images
            .into_iter()
            .map(|image| ImageSummary {
                id: image.id,
                repo_tags: image.repo_tags,
                created: image.created,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_version_parsing() {
        let v = parse_api_version("1.43").unwrap();
        assert_eq!((v.major_version, v.minor_version), (1, 43));
        assert!(parse_api_version("latest").is_err());
        assert!(parse_api_version("1").is_err());
    }
}

/// Integration tests that need a running Docker daemon.
/// Run with: cargo test -- --ignored
#[cfg(test)]
mod integration_tests {
    use super::*;

    #[tokio::test]
    #[ignore]
    async fn container_lifecycle() {
        let driver = DockerDriver::connect_with_local_defaults().unwrap();
        driver.pull("alpine:latest").await.unwrap();
        driver.inspect_image("alpine:latest").await.unwrap();

        let tmp = std::env::temp_dir();
        let handle = driver
            .create(
                "alpine:latest",
                &["/bin/sh".into(), "-c".into(), "echo hi".into()],
                tmp.to_str().unwrap(),
                "/kozmic",
            )
            .await
            .unwrap();
        driver.start(&handle).await.unwrap();
        let rc = driver.wait(&handle).await.unwrap();
        assert_eq!(rc, 0);

        let logs = driver.logs(&handle).await.unwrap();
        assert!(logs.contains("hi"));

        driver.remove_container(&handle).await.unwrap();
        // Idempotent on a container that is already gone.
        driver.remove_container(&handle).await.unwrap();
    }

    #[tokio::test]
    #[ignore]
    async fn nonzero_exit_code_is_reported() {
        let driver = DockerDriver::connect_with_local_defaults().unwrap();
        let tmp = std::env::temp_dir();
        let handle = driver
            .create(
                "alpine:latest",
                &["/bin/sh".into(), "-c".into(), "exit 42".into()],
                tmp.to_str().unwrap(),
                "/kozmic",
            )
            .await
            .unwrap();
        driver.start(&handle).await.unwrap();
        assert_eq!(driver.wait(&handle).await.unwrap(), 42);
        driver.remove_container(&handle).await.unwrap();
    }

    #[tokio::test]
    #[ignore]
    async fn missing_image_is_a_typed_error() {
        let driver = DockerDriver::connect_with_local_defaults().unwrap();
        let err = driver
            .inspect_image("kozmic-test/definitely-not-here:1")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ImageMissing(_)));
    }
}
