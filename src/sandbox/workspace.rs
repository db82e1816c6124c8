//! Workspace handles and command output.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Location of a provisioned workspace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum WorkspaceLocation {
    /// A directory on the host filesystem.
    Directory(PathBuf),
    /// A running container.
    Container(String),
}

/// Handle to one provisioned execution root.
///
/// Exactly one in-flight trial owns a workspace. The handle is not `Clone`,
/// so the executor holds the only copy between `setup` and `cleanup`.
#[derive(Debug, PartialEq, Eq)]
pub struct Workspace {
    /// Unique identifier.
    pub id: String,
    /// Where the workspace lives.
    pub location: WorkspaceLocation,
    /// Image the workspace was created from, when container-based.
    pub image: Option<String>,
}

impl Workspace {
    /// Creates a directory-backed workspace handle.
    pub fn directory(id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            location: WorkspaceLocation::Directory(path.into()),
            image: None,
        }
    }

    /// Creates a container-backed workspace handle.
    pub fn container(
        id: impl Into<String>,
        container_id: impl Into<String>,
        image: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            location: WorkspaceLocation::Container(container_id.into()),
            image: Some(image.into()),
        }
    }

    /// Returns the directory path for directory-backed workspaces.
    pub fn path(&self) -> Option<&PathBuf> {
        match &self.location {
            WorkspaceLocation::Directory(path) => Some(path),
            WorkspaceLocation::Container(_) => None,
        }
    }

    /// Returns the container id for container-backed workspaces.
    pub fn container_id(&self) -> Option<&str> {
        match &self.location {
            WorkspaceLocation::Container(id) => Some(id),
            WorkspaceLocation::Directory(_) => None,
        }
    }
}

impl fmt::Display for Workspace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            WorkspaceLocation::Directory(path) => write!(f, "{} ({})", self.id, path.display()),
            WorkspaceLocation::Container(id) => write!(f, "{} (container {})", self.id, id),
        }
    }
}

/// Output of a command executed inside a workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i64,
}

impl CommandOutput {
    /// Creates a new command output.
    pub fn new(stdout: impl Into<String>, stderr: impl Into<String>, exit_code: i64) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: stderr.into(),
            exit_code,
        }
    }

    /// Output reported when the command could not be started at all.
    pub fn infrastructure_failure(detail: impl fmt::Display) -> Self {
        Self {
            stdout: String::new(),
            stderr: format!("sandbox execution failed: {}", detail),
            exit_code: 1,
        }
    }

    /// Returns true if the command exited with code 0.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workspace_accessors() {
        let dir = Workspace::directory("ws-1", "/tmp/ws-1");
        assert_eq!(dir.path(), Some(&PathBuf::from("/tmp/ws-1")));
        assert!(dir.container_id().is_none());

        let container = Workspace::container("ws-2", "abc123", "skill-forge/task:abc");
        assert_eq!(container.container_id(), Some("abc123"));
        assert_eq!(container.image.as_deref(), Some("skill-forge/task:abc"));
        assert!(container.path().is_none());
    }

    #[test]
    fn test_infrastructure_failure_is_exit_one() {
        let output = CommandOutput::infrastructure_failure("spawn failed");
        assert_eq!(output.exit_code, 1);
        assert!(!output.success());
        assert!(output.stderr.contains("spawn failed"));
    }
}
