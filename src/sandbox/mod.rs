//! Isolated execution environments for trials.
//!
//! An [`EnvironmentProvider`] creates a [`Workspace`] per trial, runs shell
//! commands inside it, and releases it afterwards. Two realizations exist:
//!
//! - [`LocalProvider`]: a private copy of the task directory on the host,
//!   commands run as subprocesses in their own process group.
//! - [`DockerProvider`]: a fresh container per trial, instantiated from an image
//!   that is built once per (task, skillset) and shared behind a reference count.
//!
//! # Lifecycle
//!
//! ```text
//! workspace_id ─► setup ─► run_command* ─► cleanup   (exactly once, every path)
//!                   │
//!                   └─ error ─────────────► cleanup   (releases partial resources)
//! ```
//!
//! The caller chooses the workspace id before `setup`, so `cleanup` can release
//! whatever a failed `setup` left behind.
//!
//! # Example
//!
//! ```ignore
//! use skill_forge::sandbox::{EnvVars, EnvironmentProvider, Provider, ProviderKind, ProviderOptions};
//!
//! let provider = Provider::create(ProviderKind::Local, ProviderOptions::default()).await?;
//! let ws = provider.setup("trial-1", &task, &skills, &EnvVars::new()).await?;
//! let out = provider.run_command(&ws, "ls -la", &EnvVars::new()).await?;
//! provider.cleanup(&ws.id).await;
//! ```

pub mod docker;
pub mod docker_client;
pub mod local;
pub mod skills;
pub mod workspace;

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::SandboxError;
use crate::task::Task;

pub use docker::{DockerProvider, DockerProviderConfig, ImageRefCounts};
pub use docker_client::{ContainerSpec, DockerClient};
pub use local::LocalProvider;
pub use skills::{skill_names, Skill, SKILL_DISCOVERY_DIRS};
pub use workspace::{CommandOutput, Workspace, WorkspaceLocation};

/// Environment variables passed to sandboxed commands.
pub type EnvVars = BTreeMap<String, String>;

/// Provider realization tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Local,
    Docker,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderKind::Local => write!(f, "local"),
            ProviderKind::Docker => write!(f, "docker"),
        }
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" => Ok(ProviderKind::Local),
            "docker" => Ok(ProviderKind::Docker),
            other => Err(format!(
                "Unknown provider '{}'. Use 'local' or 'docker'",
                other
            )),
        }
    }
}

/// Capability interface shared by every sandbox realization.
#[async_trait]
pub trait EnvironmentProvider: Send + Sync {
    /// Realization tag.
    fn kind(&self) -> ProviderKind;

    /// Materializes an isolated copy of the task with every skill injected.
    ///
    /// Secrets are never written into the workspace; they are only passed to
    /// `run_command` through the process or exec environment.
    async fn setup(
        &self,
        workspace_id: &str,
        task: &Task,
        skills: &[PathBuf],
        secret_env: &EnvVars,
    ) -> Result<Workspace, SandboxError>;

    /// Runs `sh -c <command>` in the workspace and waits for it.
    ///
    /// A nonzero exit inside the sandbox is `Ok`. `Err` means the command could
    /// not be started at all.
    async fn run_command(
        &self,
        workspace: &Workspace,
        command: &str,
        env: &EnvVars,
    ) -> Result<CommandOutput, SandboxError>;

    /// Releases everything registered under `workspace_id`. Idempotent, never fails.
    async fn cleanup(&self, workspace_id: &str);

    /// Releases provider-level resources once no more trials will run.
    async fn shutdown(&self) {}
}

/// Options used by [`Provider::create`].
#[derive(Debug, Clone, Default)]
pub struct ProviderOptions {
    /// Base directory for local workspaces (defaults to the system temp dir).
    pub local_base_dir: Option<PathBuf>,
    /// Container provider settings.
    pub docker: DockerProviderConfig,
}

/// Closed set of provider realizations selected by tag.
pub enum Provider {
    Local(LocalProvider),
    Docker(DockerProvider),
}

impl Provider {
    /// Constructs the provider for `kind`.
    ///
    /// # Errors
    ///
    /// Fails only if the sandbox runtime itself is unreachable, which is fatal
    /// to the whole run.
    pub async fn create(kind: ProviderKind, options: ProviderOptions) -> Result<Self, SandboxError> {
        match kind {
            ProviderKind::Local => {
                let provider = match options.local_base_dir {
                    Some(dir) => LocalProvider::with_base_dir(dir),
                    None => LocalProvider::new(),
                };
                Ok(Provider::Local(provider))
            }
            ProviderKind::Docker => Ok(Provider::Docker(
                DockerProvider::connect(options.docker).await?,
            )),
        }
    }

    fn inner(&self) -> &dyn EnvironmentProvider {
        match self {
            Provider::Local(p) => p,
            Provider::Docker(p) => p,
        }
    }
}

#[async_trait]
impl EnvironmentProvider for Provider {
    fn kind(&self) -> ProviderKind {
        self.inner().kind()
    }

    async fn setup(
        &self,
        workspace_id: &str,
        task: &Task,
        skills: &[PathBuf],
        secret_env: &EnvVars,
    ) -> Result<Workspace, SandboxError> {
        self.inner()
            .setup(workspace_id, task, skills, secret_env)
            .await
    }

    async fn run_command(
        &self,
        workspace: &Workspace,
        command: &str,
        env: &EnvVars,
    ) -> Result<CommandOutput, SandboxError> {
        self.inner().run_command(workspace, command, env).await
    }

    async fn cleanup(&self, workspace_id: &str) {
        self.inner().cleanup(workspace_id).await
    }

    async fn shutdown(&self) {
        self.inner().shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_provider_kind_parse() {
        assert_eq!("local".parse::<ProviderKind>().unwrap(), ProviderKind::Local);
        assert_eq!("Docker".parse::<ProviderKind>().unwrap(), ProviderKind::Docker);
        assert!("vm".parse::<ProviderKind>().is_err());
        assert_eq!(ProviderKind::Docker.to_string(), "docker");
    }

    #[tokio::test]
    async fn test_create_local_provider() {
        let temp = TempDir::new().unwrap();
        let options = ProviderOptions {
            local_base_dir: Some(temp.path().to_path_buf()),
            ..Default::default()
        };
        let provider = Provider::create(ProviderKind::Local, options).await.unwrap();
        assert_eq!(provider.kind(), ProviderKind::Local);
        provider.shutdown().await;
    }
}
