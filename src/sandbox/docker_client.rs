//! Docker API wrapper using the bollard crate.
//!
//! Thin, typed layer over the handful of Docker operations the container
//! provider needs: image builds, container lifecycle, exec, archive upload
//! and commit.

use std::collections::HashMap;
use std::time::Duration;

use bollard::container::{
    Config, CreateContainerOptions, LogOutput, RemoveContainerOptions, StartContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::{BuildImageOptions, CommitContainerOptions, RemoveImageOptions};
use bollard::models::HostConfig;
use bollard::Docker;
use futures::StreamExt;
use tracing::{debug, trace};

use crate::error::SandboxError;
use crate::task::EnvironmentConfig;

use super::CommandOutput;

/// Configuration for creating a trial container.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    /// Container name.
    pub name: String,
    /// Image to instantiate.
    pub image: String,
    /// Resource limits.
    pub limits: EnvironmentConfig,
    /// Whether to pass the storage limit to the daemon (needs a quota-capable driver).
    pub enforce_storage_quota: bool,
    /// Network mode (e.g., "bridge", "none").
    pub network_mode: String,
}

impl ContainerSpec {
    /// Creates a spec with default limits and bridge networking.
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            limits: EnvironmentConfig::default(),
            enforce_storage_quota: false,
            network_mode: "bridge".to_string(),
        }
    }

    /// Sets resource limits.
    pub fn with_limits(mut self, limits: EnvironmentConfig) -> Self {
        self.limits = limits;
        self
    }

    /// Enables or disables the storage quota.
    pub fn with_storage_quota(mut self, enforce: bool) -> Self {
        self.enforce_storage_quota = enforce;
        self
    }

    /// Sets the network mode.
    pub fn with_network_mode(mut self, mode: impl Into<String>) -> Self {
        self.network_mode = mode.into();
        self
    }

    fn host_config(&self) -> HostConfig {
        let storage_opt = if self.enforce_storage_quota && self.limits.storage_mb > 0 {
            let mut opts = HashMap::new();
            opts.insert("size".to_string(), format!("{}M", self.limits.storage_mb));
            Some(opts)
        } else {
            None
        };

        HostConfig {
            memory: Some(self.limits.memory_bytes()),
            nano_cpus: Some(self.limits.nano_cpus()),
            network_mode: Some(self.network_mode.clone()),
            storage_opt,
            ..Default::default()
        }
    }
}

/// Docker client wrapper for container operations.
#[derive(Debug, Clone)]
pub struct DockerClient {
    docker: Docker,
}

impl DockerClient {
    /// Connects to the local Docker daemon and verifies it responds.
    ///
    /// # Errors
    ///
    /// Returns `SandboxError::RuntimeUnavailable` if the daemon is not reachable.
    pub async fn connect() -> Result<Self, SandboxError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| SandboxError::RuntimeUnavailable(format!("Failed to connect: {e}")))?;
        docker
            .ping()
            .await
            .map_err(|e| SandboxError::RuntimeUnavailable(format!("Ping failed: {e}")))?;
        Ok(Self { docker })
    }

    /// Creates a client from an existing bollard Docker instance.
    pub fn from_docker(docker: Docker) -> Self {
        Self { docker }
    }

    /// Builds an image from a gzipped tar build context.
    ///
    /// Fails fast with the daemon's error text if any build step fails, and
    /// with `BuildTimeout` if the build exceeds `timeout`.
    pub async fn build_image(
        &self,
        context: Vec<u8>,
        dockerfile: &str,
        tag: &str,
        timeout: Duration,
    ) -> Result<(), SandboxError> {
        let options = BuildImageOptions {
            dockerfile: dockerfile.to_string(),
            t: tag.to_string(),
            rm: true,
            forcerm: true,
            ..Default::default()
        };

        let build = async {
            let mut stream = self.docker.build_image(options, None, Some(context.into()));
            while let Some(item) = stream.next().await {
                let info = item.map_err(|e| SandboxError::BuildFailed(e.to_string()))?;
                if let Some(error) = info.error {
                    return Err(SandboxError::BuildFailed(error));
                }
                if let Some(line) = info.stream {
                    let line = line.trim_end();
                    if !line.is_empty() {
                        trace!(image = %tag, "{}", line);
                    }
                }
            }
            Ok(())
        };

        tokio::time::timeout(timeout, build)
            .await
            .map_err(|_| SandboxError::BuildTimeout(timeout))?
    }

    /// Creates and starts a long-lived container that idles until removed.
    ///
    /// # Returns
    ///
    /// The container ID on success.
    pub async fn start_container(&self, spec: &ContainerSpec) -> Result<String, SandboxError> {
        let config = Config {
            image: Some(spec.image.clone()),
            cmd: Some(vec!["sleep".to_string(), "infinity".to_string()]),
            host_config: Some(spec.host_config()),
            tty: Some(false),
            attach_stdout: Some(false),
            attach_stderr: Some(false),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };

        let response = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| SandboxError::Setup(format!("Failed to create container: {e}")))?;

        if let Err(e) = self
            .docker
            .start_container(&response.id, None::<StartContainerOptions<String>>)
            .await
        {
            self.remove_container(&response.id).await;
            return Err(SandboxError::Setup(format!("Failed to start container: {e}")));
        }

        debug!(container = %response.id, image = %spec.image, "Container started");
        Ok(response.id)
    }

    /// Executes `sh -c <command>` inside a running container.
    ///
    /// A nonzero exit code inside the container is returned as `Ok`; only a
    /// failure to run the exec at all is an error.
    pub async fn exec(
        &self,
        container_id: &str,
        command: &str,
        env: &[String],
    ) -> Result<CommandOutput, SandboxError> {
        let exec_options = CreateExecOptions {
            cmd: Some(vec!["sh".to_string(), "-c".to_string(), command.to_string()]),
            env: if env.is_empty() {
                None
            } else {
                Some(env.to_vec())
            },
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            tty: Some(false),
            ..Default::default()
        };

        let exec = self
            .docker
            .create_exec(container_id, exec_options)
            .await
            .map_err(|e| SandboxError::Execution(format!("Failed to create exec: {e}")))?;

        let start_result = self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| SandboxError::Execution(format!("Failed to start exec: {e}")))?;

        let mut stdout = String::new();
        let mut stderr = String::new();

        if let StartExecResults::Attached { mut output, .. } = start_result {
            while let Some(chunk) = output.next().await {
                match chunk {
                    Ok(LogOutput::StdOut { message }) => {
                        stdout.push_str(&String::from_utf8_lossy(&message));
                    }
                    Ok(LogOutput::StdErr { message }) => {
                        stderr.push_str(&String::from_utf8_lossy(&message));
                    }
                    Ok(_) => {}
                    Err(e) => {
                        return Err(SandboxError::Execution(format!(
                            "Error reading exec output: {e}"
                        )));
                    }
                }
            }
        }

        let exec_info = self
            .docker
            .inspect_exec(&exec.id)
            .await
            .map_err(|e| SandboxError::Execution(format!("Failed to inspect exec: {e}")))?;

        Ok(CommandOutput {
            stdout,
            stderr,
            exit_code: exec_info.exit_code.unwrap_or(-1),
        })
    }

    /// Extracts an uncompressed tar archive at `path` inside the container.
    pub async fn upload_archive(
        &self,
        container_id: &str,
        path: &str,
        archive: Vec<u8>,
    ) -> Result<(), SandboxError> {
        let options = bollard::container::UploadToContainerOptions {
            path: path.to_string(),
            ..Default::default()
        };
        self.docker
            .upload_to_container(container_id, Some(options), archive.into())
            .await
            .map_err(|e| SandboxError::Setup(format!("Failed to upload archive to {path}: {e}")))
    }

    /// Commits a container's filesystem as `repo:tag`.
    pub async fn commit(&self, container_id: &str, repo: &str, tag: &str) -> Result<(), SandboxError> {
        let options = CommitContainerOptions {
            container: container_id.to_string(),
            repo: repo.to_string(),
            tag: tag.to_string(),
            pause: true,
            ..Default::default()
        };
        self.docker
            .commit_container(options, Config::<String>::default())
            .await
            .map_err(|e| SandboxError::Setup(format!("Failed to commit container: {e}")))?;
        Ok(())
    }

    /// Force-removes a container. Missing containers are not an error.
    pub async fn remove_container(&self, container_id: &str) {
        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };

        match self.docker.remove_container(container_id, Some(options)).await {
            Ok(()) => debug!(container = %container_id, "Container removed"),
            Err(e) if is_not_found(&e) => {
                debug!(container = %container_id, "Container already removed")
            }
            Err(e) => tracing::warn!(
                container = %container_id,
                error = %e,
                "Failed to remove container"
            ),
        }
    }

    /// Removes an image. Missing images are not an error.
    pub async fn remove_image(&self, image: &str) {
        match self
            .docker
            .remove_image(image, Some(RemoveImageOptions::default()), None)
            .await
        {
            Ok(_) => debug!(image = %image, "Image removed"),
            Err(e) if is_not_found(&e) => debug!(image = %image, "Image already removed"),
            Err(e) => tracing::warn!(image = %image, error = %e, "Failed to remove image"),
        }
    }
}

/// Returns true for daemon 404 responses.
fn is_not_found(error: &BollardError) -> bool {
    matches!(
        error,
        BollardError::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}
