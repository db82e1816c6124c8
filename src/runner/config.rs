//! Configuration for evaluation runs.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::sandbox::{EnvVars, ProviderKind};

/// Default minimum secret length for redaction.
pub const DEFAULT_REDACTION_MIN_LENGTH: usize = 8;

/// Configuration for one evaluation run of a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Number of trials.
    pub trials: usize,
    /// Maximum trials in flight at once.
    pub parallel: usize,
    /// Sandbox realization.
    pub provider: ProviderKind,
    /// Skill bundle directories injected into every workspace.
    pub skills: Vec<PathBuf>,
    /// Directory the report is written to.
    pub output_dir: PathBuf,
    /// Names of environment variables forwarded into the sandbox as secrets.
    pub secret_env_names: Vec<String>,
    /// Explicit secret values, merged over the named variables.
    #[serde(skip)]
    pub secret_env: EnvVars,
    /// Secrets of this length or shorter are not redacted.
    pub redaction_min_length: usize,
    /// `k` for pass@k and pass^k. Defaults to the number of trials.
    pub k: Option<usize>,
    /// Whether to write the report to `output_dir`.
    pub persist: bool,
}

impl RunConfig {
    /// Creates a run configuration with defaults.
    pub fn new() -> Self {
        Self {
            trials: 5,
            parallel: 1,
            provider: ProviderKind::Local,
            skills: Vec::new(),
            output_dir: PathBuf::from("./results"),
            secret_env_names: Vec::new(),
            secret_env: EnvVars::new(),
            redaction_min_length: DEFAULT_REDACTION_MIN_LENGTH,
            k: None,
            persist: true,
        }
    }

    /// Sets the number of trials.
    pub fn with_trials(mut self, trials: usize) -> Self {
        self.trials = trials;
        self
    }

    /// Sets the parallelism degree (at least 1).
    pub fn with_parallel(mut self, parallel: usize) -> Self {
        self.parallel = parallel.max(1);
        self
    }

    /// Sets the provider kind.
    pub fn with_provider(mut self, provider: ProviderKind) -> Self {
        self.provider = provider;
        self
    }

    /// Adds a skill bundle.
    pub fn with_skill(mut self, path: impl Into<PathBuf>) -> Self {
        self.skills.push(path.into());
        self
    }

    /// Replaces the skill list.
    pub fn with_skills(mut self, paths: Vec<PathBuf>) -> Self {
        self.skills = paths;
        self
    }

    /// Sets the output directory.
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    /// Forwards an environment variable of the current process as a secret.
    pub fn with_secret_env_name(mut self, name: impl Into<String>) -> Self {
        self.secret_env_names.push(name.into());
        self
    }

    /// Adds an explicit secret.
    pub fn with_secret(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.secret_env.insert(name.into(), value.into());
        self
    }

    /// Sets the redaction threshold.
    pub fn with_redaction_min_length(mut self, len: usize) -> Self {
        self.redaction_min_length = len;
        self
    }

    /// Sets `k` for pass@k and pass^k.
    pub fn with_k(mut self, k: usize) -> Self {
        self.k = Some(k);
        self
    }

    /// Disables report persistence.
    pub fn without_persistence(mut self) -> Self {
        self.persist = false;
        self
    }

    /// Resolves the secret environment passed to every sandboxed command.
    ///
    /// Named variables missing from the process environment are skipped.
    pub fn resolve_secret_env(&self) -> EnvVars {
        let mut env = EnvVars::new();
        for name in &self.secret_env_names {
            match std::env::var(name) {
                Ok(value) => {
                    env.insert(name.clone(), value);
                }
                Err(_) => warn!(name = %name, "Secret environment variable is not set, skipping"),
            }
        }
        for (name, value) in &self.secret_env {
            env.insert(name.clone(), value.clone());
        }
        env
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self::new()
    }
}
