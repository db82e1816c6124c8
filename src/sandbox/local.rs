//! Filesystem-based environment provider.
//!
//! Each workspace is an independent directory holding a copy of the task and
//! the injected skills. Commands run as `sh -c` subprocesses in that directory,
//! inheriting the current environment merged with the supplied secrets.
//!
//! Every command is spawned as the leader of its own process group. Groups that
//! are still alive when the workspace is cleaned up (for example because the
//! agent timed out mid-command) are killed with SIGKILL before the directory
//! is removed.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::SandboxError;
use crate::task::Task;

use super::skills::{copy_dir_recursive, install_skills, Skill};
use super::{CommandOutput, EnvVars, EnvironmentProvider, ProviderKind, Workspace};

#[derive(Debug)]
struct LocalWorkspace {
    dir: PathBuf,
    process_groups: HashSet<u32>,
}

/// Provider that materializes workspaces as host directories.
#[derive(Debug)]
pub struct LocalProvider {
    base_dir: PathBuf,
    workspaces: Mutex<HashMap<String, LocalWorkspace>>,
}

impl LocalProvider {
    /// Creates a provider that places workspaces under the system temp directory.
    pub fn new() -> Self {
        Self::with_base_dir(std::env::temp_dir().join("skill-forge"))
    }

    /// Creates a provider that places workspaces under `base_dir`.
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            workspaces: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the directory under which workspaces are created.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Number of workspaces not yet cleaned up.
    pub fn active_workspaces(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, LocalWorkspace>> {
        // A poisoned registry is still structurally valid.
        self.workspaces.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn workspace_dir(&self, workspace_id: &str) -> Result<PathBuf, SandboxError> {
        self.lock()
            .get(workspace_id)
            .map(|ws| ws.dir.clone())
            .ok_or_else(|| SandboxError::UnknownWorkspace(workspace_id.to_string()))
    }

    fn track_group(&self, workspace_id: &str, pgid: u32) {
        if let Some(ws) = self.lock().get_mut(workspace_id) {
            ws.process_groups.insert(pgid);
        }
    }

    fn untrack_group(&self, workspace_id: &str, pgid: u32) {
        if let Some(ws) = self.lock().get_mut(workspace_id) {
            ws.process_groups.remove(&pgid);
        }
    }
}

impl Default for LocalProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EnvironmentProvider for LocalProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Local
    }

    async fn setup(
        &self,
        workspace_id: &str,
        task: &Task,
        skills: &[PathBuf],
        _secret_env: &EnvVars,
    ) -> Result<Workspace, SandboxError> {
        let dir = self
            .base_dir
            .join(format!("{}-{}", slug(&task.name), workspace_id));

        // Registered before any copying so cleanup can remove a partial copy.
        self.lock().insert(
            workspace_id.to_string(),
            LocalWorkspace {
                dir: dir.clone(),
                process_groups: HashSet::new(),
            },
        );

        let skills = Skill::resolve_all(skills)?;
        let task_root = task.root.clone();
        let target = dir.clone();
        tokio::task::spawn_blocking(move || -> Result<(), SandboxError> {
            copy_dir_recursive(&task_root, &target).map_err(|e| {
                SandboxError::Setup(format!(
                    "Failed to copy task files from {}: {}",
                    task_root.display(),
                    e
                ))
            })?;
            install_skills(&target, &skills)
        })
        .await
        .map_err(|e| SandboxError::Setup(format!("Workspace copy task failed: {}", e)))??;

        info!(workspace = %workspace_id, dir = %dir.display(), "Local workspace ready");
        Ok(Workspace::directory(workspace_id, dir))
    }

    async fn run_command(
        &self,
        workspace: &Workspace,
        command: &str,
        env: &EnvVars,
    ) -> Result<CommandOutput, SandboxError> {
        let dir = self.workspace_dir(&workspace.id)?;

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .current_dir(&dir)
            .envs(env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let child = cmd
            .spawn()
            .map_err(|e| SandboxError::Execution(format!("Failed to spawn sh: {}", e)))?;
        let pgid = child.id();
        if let Some(pgid) = pgid {
            self.track_group(&workspace.id, pgid);
        }

        let output = child.wait_with_output().await;

        if let Some(pgid) = pgid {
            self.untrack_group(&workspace.id, pgid);
        }

        let output = output
            .map_err(|e| SandboxError::Execution(format!("Failed to wait for command: {}", e)))?;

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code().map(i64::from).unwrap_or(-1),
        })
    }

    async fn cleanup(&self, workspace_id: &str) {
        let Some(entry) = self.lock().remove(workspace_id) else {
            debug!(workspace = %workspace_id, "Workspace already cleaned up");
            return;
        };

        for pgid in &entry.process_groups {
            kill_process_group(*pgid);
        }

        match tokio::fs::remove_dir_all(&entry.dir).await {
            Ok(()) => debug!(workspace = %workspace_id, "Removed workspace directory"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                workspace = %workspace_id,
                dir = %entry.dir.display(),
                error = %e,
                "Failed to remove workspace directory"
            ),
        }
    }
}

/// Sends SIGKILL to a whole process group.
///
/// Returns true if the group was signalled, false if it was already gone or
/// could not be signalled.
#[cfg(unix)]
fn kill_process_group(pgid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pgid) else {
        warn!(pgid, "Process group id out of range");
        return false;
    };
    match killpg(Pid::from_raw(raw), Signal::SIGKILL) {
        Ok(()) => {
            debug!(pgid, "Killed leftover process group");
            true
        }
        Err(Errno::ESRCH) => {
            debug!(pgid, "Process group already gone");
            false
        }
        Err(e) => {
            warn!(pgid, error = %e, "Failed to signal process group");
            false
        }
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pgid: u32) -> bool {
    false
}

/// Lowercases and replaces anything outside `[a-z0-9-_.]` with `-`.
pub(crate) fn slug(name: &str) -> String {
    let slug: String = name
        .to_lowercase()
        .chars()
        .map(|c| match c {
            'a'..='z' | '0'..='9' | '-' | '_' | '.' => c,
            _ => '-',
        })
        .collect();
    if slug.is_empty() {
        "task".to_string()
    } else {
        slug
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskConfig;
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    fn make_task(root: &Path) -> Task {
        fs::create_dir_all(root.join("tests")).unwrap();
        fs::write(root.join("instruction.md"), "write hello").unwrap();
        fs::write(root.join("tests/test.sh"), "test -f hello.txt").unwrap();
        Task::new("Hello Task", root, "write hello", TaskConfig::default())
    }

    #[tokio::test]
    async fn test_setup_copies_task_and_skills() {
        let temp = TempDir::new().unwrap();
        let task = make_task(&temp.path().join("task"));
        let skill_dir = temp.path().join("skills/greeter");
        fs::create_dir_all(&skill_dir).unwrap();
        fs::write(skill_dir.join("SKILL.md"), "greet").unwrap();

        let provider = LocalProvider::with_base_dir(temp.path().join("ws"));
        let ws = provider
            .setup("t1", &task, &[skill_dir], &EnvVars::new())
            .await
            .unwrap();

        let dir = ws.path().unwrap().clone();
        assert!(dir.join("tests/test.sh").is_file());
        assert!(dir.join(".claude/skills/greeter/SKILL.md").is_file());
        assert!(dir.join(".codex/skills/greeter/SKILL.md").is_file());

        provider.cleanup("t1").await;
        assert!(!dir.exists());
        assert_eq!(provider.active_workspaces(), 0);
    }

    #[tokio::test]
    async fn test_run_command_sees_secrets_and_exit_codes() {
        let temp = TempDir::new().unwrap();
        let task = make_task(&temp.path().join("task"));
        let provider = LocalProvider::with_base_dir(temp.path().join("ws"));
        let ws = provider
            .setup("t2", &task, &[], &EnvVars::new())
            .await
            .unwrap();

        let mut env = EnvVars::new();
        env.insert("API_TOKEN".to_string(), "tok-123".to_string());

        let out = provider
            .run_command(&ws, "echo $API_TOKEN; echo err >&2; exit 3", &env)
            .await
            .unwrap();
        assert_eq!(out.stdout.trim(), "tok-123");
        assert_eq!(out.stderr.trim(), "err");
        assert_eq!(out.exit_code, 3);

        let out = provider.run_command(&ws, "pwd", &env).await.unwrap();
        assert!(out.success());
        assert!(out.stdout.trim().ends_with("hello-task-t2"));

        provider.cleanup("t2").await;
    }

    #[tokio::test]
    async fn test_cleanup_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let task = make_task(&temp.path().join("task"));
        let provider = LocalProvider::with_base_dir(temp.path().join("ws"));
        provider
            .setup("t3", &task, &[], &EnvVars::new())
            .await
            .unwrap();

        provider.cleanup("t3").await;
        provider.cleanup("t3").await;
        provider.cleanup("never-existed").await;
    }

    #[tokio::test]
    async fn test_setup_failure_leaves_releasable_entry() {
        let temp = TempDir::new().unwrap();
        let task = Task::new(
            "missing",
            temp.path().join("does-not-exist"),
            "",
            TaskConfig::default(),
        );
        let provider = LocalProvider::with_base_dir(temp.path().join("ws"));

        let result = provider.setup("t4", &task, &[], &EnvVars::new()).await;
        assert!(matches!(result, Err(SandboxError::Setup(_))));
        assert_eq!(provider.active_workspaces(), 1);

        provider.cleanup("t4").await;
        assert_eq!(provider.active_workspaces(), 0);
    }

    #[tokio::test]
    async fn test_unknown_workspace_is_error() {
        let provider = LocalProvider::with_base_dir("/tmp/skill-forge-unused");
        let ws = Workspace::directory("ghost", "/tmp/ghost");
        let result = provider.run_command(&ws, "true", &EnvVars::new()).await;
        assert!(matches!(result, Err(SandboxError::UnknownWorkspace(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cleanup_kills_timed_out_command() {
        let temp = TempDir::new().unwrap();
        let task = make_task(&temp.path().join("task"));
        let provider = LocalProvider::with_base_dir(temp.path().join("ws"));
        let ws = provider
            .setup("t5", &task, &[], &EnvVars::new())
            .await
            .unwrap();
        let marker = temp.path().join("survived");

        let cmd = format!("(sleep 2; touch {}) & sleep 30", marker.display());
        let timed_out = tokio::time::timeout(
            Duration::from_millis(300),
            provider.run_command(&ws, &cmd, &EnvVars::new()),
        )
        .await;
        assert!(timed_out.is_err());

        provider.cleanup("t5").await;
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(!marker.exists(), "background process outlived cleanup");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_kill_process_group_signals_live_group_only() {
        let mut child = Command::new("sleep")
            .arg("30")
            .process_group(0)
            .spawn()
            .unwrap();
        let pgid = child.id().unwrap();

        assert!(kill_process_group(pgid));
        let status = child.wait().await.unwrap();
        assert!(!status.success());

        // Reaped, so the group no longer exists.
        assert!(!kill_process_group(pgid));
    }

    #[test]
    fn test_slug() {
        assert_eq!(slug("Hello Task"), "hello-task");
        assert_eq!(slug("a/b:c"), "a-b-c");
        assert_eq!(slug(""), "task");
    }
}
