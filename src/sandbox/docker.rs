//! Container-based environment provider.
//!
//! # Image lifecycle
//!
//! ```text
//! build base image ──(skills?)──► throwaway container ─► upload skills ─► commit
//!        │                                                                 │
//!        └────────────(no skills)──────────────► prepared image ◄──────────┘
//!                                                     │
//!                  setup: +1 ref, fresh container ◄───┤
//!                  cleanup: remove container, -1 ref ─┤
//!                  shutdown: drop provider pin ───────┘ (delete at zero)
//! ```
//!
//! The image is built once per (task, skillset) pair. The provider holds one
//! reference on each image it prepares so that sequential trials reuse it;
//! the pin is released by `shutdown`, and the image is deleted when the last
//! reference goes away. A failed build is remembered per key so the remaining
//! trials of that pair fail at once instead of rebuilding.

use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use flate2::write::GzEncoder;
use flate2::Compression;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::error::SandboxError;
use crate::task::Task;

use super::docker_client::{ContainerSpec, DockerClient};
use super::local::slug;
use super::skills::{skills_archive, Skill};
use super::{CommandOutput, EnvVars, EnvironmentProvider, ProviderKind, Workspace};

/// Image repository prefix for prepared images.
const IMAGE_REPO_PREFIX: &str = "skill-forge";

/// Options for the container provider.
#[derive(Debug, Clone)]
pub struct DockerProviderConfig {
    /// Directory inside the container under which skill discovery dirs live.
    pub skills_root: String,
    /// Network mode for trial containers.
    pub network_mode: String,
    /// Whether to apply the storage limit (requires a quota-capable storage driver).
    pub enforce_storage_quota: bool,
}

impl Default for DockerProviderConfig {
    fn default() -> Self {
        Self {
            skills_root: "/root".to_string(),
            network_mode: "bridge".to_string(),
            enforce_storage_quota: false,
        }
    }
}

#[derive(Debug, Default)]
struct TrialContainer {
    container_id: Option<String>,
    image: Option<String>,
}

#[derive(Debug, Default)]
struct RefState {
    counts: HashMap<String, usize>,
    pinned: HashSet<String>,
}

/// Reference counts keyed by image identity, plus the set of images the
/// provider itself pins.
///
/// Local to one provider instance, so separate evaluation runs never share
/// counts. Guarded by a mutex because trials may run on parallel tasks.
/// A pin is one reference like any other; it is tracked separately so that
/// unpinning twice never drops a reference held by a trial.
#[derive(Debug, Default)]
pub struct ImageRefCounts {
    state: Mutex<RefState>,
}

impl ImageRefCounts {
    fn lock(&self) -> std::sync::MutexGuard<'_, RefState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Adds a reference and returns the new count.
    pub fn acquire(&self, image: &str) -> usize {
        let mut state = self.lock();
        let count = state.counts.entry(image.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    /// Drops a reference. Returns true if this was the last one.
    pub fn release(&self, image: &str) -> bool {
        let mut state = self.lock();
        let last = match state.counts.get_mut(image) {
            Some(count) if *count > 1 => {
                *count -= 1;
                false
            }
            Some(_) => {
                state.counts.remove(image);
                true
            }
            None => false,
        };
        if last {
            state.pinned.remove(image);
        }
        last
    }

    /// Takes the provider pin on `image` unless it is already held.
    /// Returns true if a reference was added.
    pub fn pin(&self, image: &str) -> bool {
        let mut state = self.lock();
        if !state.pinned.insert(image.to_string()) {
            return false;
        }
        *state.counts.entry(image.to_string()).or_insert(0) += 1;
        true
    }

    /// Drops the provider pin on `image`. Returns true if that was the last
    /// reference; false if the image was not pinned or trials still hold it.
    pub fn unpin(&self, image: &str) -> bool {
        if !self.lock().pinned.remove(image) {
            return false;
        }
        self.release(image)
    }

    /// Images currently pinned, sorted.
    pub fn pinned(&self) -> Vec<String> {
        let mut images: Vec<String> = self.lock().pinned.iter().cloned().collect();
        images.sort();
        images
    }

    /// Current count for an image.
    pub fn get(&self, image: &str) -> usize {
        self.lock().counts.get(image).copied().unwrap_or(0)
    }
}

/// Build outcomes per (task, skillset) key.
#[derive(Debug, Default)]
struct PreparedImages {
    images: HashMap<String, String>,
    /// Build errors, so later trials of the same key fail without rebuilding.
    failures: HashMap<String, String>,
}

/// Provider that runs each trial in a fresh container from a shared prepared image.
pub struct DockerProvider {
    client: DockerClient,
    config: DockerProviderConfig,
    /// Held across builds so that concurrent setups of the same key wait for
    /// one build, and across releases so a cache hit never races a deletion.
    prepared: tokio::sync::Mutex<PreparedImages>,
    refs: ImageRefCounts,
    trials: Mutex<HashMap<String, TrialContainer>>,
}

impl DockerProvider {
    /// Connects to the local daemon.
    ///
    /// # Errors
    ///
    /// An unreachable daemon is fatal to the whole run.
    pub async fn connect(config: DockerProviderConfig) -> Result<Self, SandboxError> {
        let client = DockerClient::connect().await?;
        Ok(Self::with_client(client, config))
    }

    /// Creates a provider around an existing client.
    pub fn with_client(client: DockerClient, config: DockerProviderConfig) -> Self {
        Self {
            client,
            config,
            prepared: tokio::sync::Mutex::new(PreparedImages::default()),
            refs: ImageRefCounts::default(),
            trials: Mutex::new(HashMap::new()),
        }
    }

    /// Reference counts for prepared images.
    pub fn image_refs(&self) -> &ImageRefCounts {
        &self.refs
    }

    fn trials(&self) -> std::sync::MutexGuard<'_, HashMap<String, TrialContainer>> {
        self.trials.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Returns the prepared image for this task and skillset with one trial
    /// reference taken on it, building the image on first use.
    async fn acquire_image(&self, task: &Task, skills: &[Skill]) -> Result<String, SandboxError> {
        let key = prepare_key(&task.root, skills);
        let mut prepared = self.prepared.lock().await;
        if let Some(reason) = prepared.failures.get(&key) {
            return Err(SandboxError::BuildFailed(format!(
                "previous build failed: {}",
                reason
            )));
        }

        let image = match prepared.images.get(&key).cloned() {
            Some(image) => image,
            None => {
                let tag = key[..12].to_string();
                let image = format!("{}/{}:{}", IMAGE_REPO_PREFIX, slug(&task.name), tag);
                if let Err(e) = self.build_prepared(task, skills, &image, &tag).await {
                    prepared.failures.insert(key, e.to_string());
                    return Err(e);
                }
                prepared.images.insert(key, image.clone());
                info!(image = %image, "Task image ready");
                image
            }
        };

        // Provider pin, released by `shutdown`.
        self.refs.pin(&image);
        let count = self.refs.acquire(&image);
        debug!(image = %image, refs = count, "Image reference acquired");
        Ok(image)
    }

    async fn build_prepared(
        &self,
        task: &Task,
        skills: &[Skill],
        image: &str,
        tag: &str,
    ) -> Result<(), SandboxError> {
        info!(image = %image, skills = skills.len(), "Preparing task image");
        let (context, dockerfile) = build_context(&task.root)?;
        let timeout = task.config.environment.build_timeout();

        if skills.is_empty() {
            return self
                .client
                .build_image(context, &dockerfile, image, timeout)
                .await;
        }

        let repo = format!("{}/{}", IMAGE_REPO_PREFIX, slug(&task.name));
        let base = format!("{}:{}-base", repo, tag);
        self.client
            .build_image(context, &dockerfile, &base, timeout)
            .await?;
        let injected = self.inject_skills(&base, &repo, tag, skills).await;
        self.client.remove_image(&base).await;
        injected
    }

    /// Bakes skills into `repo:tag` via a throwaway container committed on top of `base`.
    async fn inject_skills(
        &self,
        base: &str,
        repo: &str,
        tag: &str,
        skills: &[Skill],
    ) -> Result<(), SandboxError> {
        let archive = skills_archive(skills)?;
        let name = format!("{}-inject-{}", IMAGE_REPO_PREFIX, uuid::Uuid::new_v4());
        let container = self
            .client
            .start_container(&ContainerSpec::new(name, base))
            .await?;

        let result = async {
            self.client
                .upload_archive(&container, &self.config.skills_root, archive)
                .await?;
            self.client.commit(&container, repo, tag).await
        }
        .await;

        self.client.remove_container(&container).await;
        result
    }

    /// Drops one trial reference to `image`, deleting it if that was the last.
    async fn release_image(&self, image: &str) {
        let mut prepared = self.prepared.lock().await;
        if self.refs.release(image) {
            prepared.images.retain(|_, v| v != image);
            info!(image = %image, "Last reference released, removing image");
            self.client.remove_image(image).await;
        }
    }
}

#[async_trait]
impl EnvironmentProvider for DockerProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Docker
    }

    async fn setup(
        &self,
        workspace_id: &str,
        task: &Task,
        skills: &[PathBuf],
        _secret_env: &EnvVars,
    ) -> Result<Workspace, SandboxError> {
        self.trials()
            .insert(workspace_id.to_string(), TrialContainer::default());

        let skills = Skill::resolve_all(skills)?;
        let image = self.acquire_image(task, &skills).await?;
        if let Some(entry) = self.trials().get_mut(workspace_id) {
            entry.image = Some(image.clone());
        }

        let spec = ContainerSpec::new(format!("{}-{}", IMAGE_REPO_PREFIX, workspace_id), &image)
            .with_limits(task.config.environment.clone())
            .with_storage_quota(self.config.enforce_storage_quota)
            .with_network_mode(&self.config.network_mode);
        let container_id = self.client.start_container(&spec).await?;
        if let Some(entry) = self.trials().get_mut(workspace_id) {
            entry.container_id = Some(container_id.clone());
        }

        info!(workspace = %workspace_id, container = %container_id, "Container workspace ready");
        Ok(Workspace::container(workspace_id, container_id, image))
    }

    async fn run_command(
        &self,
        workspace: &Workspace,
        command: &str,
        env: &EnvVars,
    ) -> Result<CommandOutput, SandboxError> {
        let container_id = workspace
            .container_id()
            .ok_or_else(|| SandboxError::UnknownWorkspace(workspace.id.clone()))?;
        let env: Vec<String> = env.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        self.client.exec(container_id, command, &env).await
    }

    async fn cleanup(&self, workspace_id: &str) {
        let Some(entry) = self.trials().remove(workspace_id) else {
            debug!(workspace = %workspace_id, "Workspace already cleaned up");
            return;
        };

        if let Some(container_id) = &entry.container_id {
            self.client.remove_container(container_id).await;
        }
        if let Some(image) = &entry.image {
            self.release_image(image).await;
        }
    }

    async fn shutdown(&self) {
        let mut prepared = self.prepared.lock().await;
        for image in self.refs.pinned() {
            if self.refs.unpin(&image) {
                prepared.images.retain(|_, v| *v != image);
                info!(image = %image, "Provider pin released, removing image");
                self.client.remove_image(&image).await;
            } else {
                debug!(image = %image, refs = self.refs.get(&image), "Image still referenced");
            }
        }
    }
}

/// Stable key for a (task, skillset) pair.
fn prepare_key(task_root: &Path, skills: &[Skill]) -> String {
    let mut hasher = Sha256::new();
    let root = task_root
        .canonicalize()
        .unwrap_or_else(|_| task_root.to_path_buf());
    hasher.update(root.to_string_lossy().as_bytes());
    let mut names: Vec<String> = skills
        .iter()
        .map(|s| {
            let path = s.path.canonicalize().unwrap_or_else(|_| s.path.clone());
            format!("{}={}", s.name, path.display())
        })
        .collect();
    names.sort();
    for name in names {
        hasher.update([0u8]);
        hasher.update(name.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Packs the task directory as a gzipped build context.
///
/// Returns the archive and the Dockerfile path inside it: `environment/Dockerfile`
/// when present, otherwise a root `Dockerfile`.
fn build_context(task_root: &Path) -> Result<(Vec<u8>, String), SandboxError> {
    let dockerfile = if task_root.join("environment/Dockerfile").is_file() {
        "environment/Dockerfile"
    } else if task_root.join("Dockerfile").is_file() {
        "Dockerfile"
    } else {
        return Err(SandboxError::BuildFailed(format!(
            "No environment/Dockerfile or Dockerfile in {}",
            task_root.display()
        )));
    };

    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut tar = tar::Builder::new(encoder);
    tar.append_dir_all(".", task_root)?;
    let mut encoder = tar.into_inner()?;
    encoder.flush()?;
    let bytes = encoder.finish()?;

    Ok((bytes, dockerfile.to_string()))
}
