//! Skill bundles and their injection into agent discovery locations.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tar::Builder as TarBuilder;
use walkdir::WalkDir;

use crate::error::SandboxError;

/// Directories (relative to the skills root) where supported agents look for skills.
pub const SKILL_DISCOVERY_DIRS: &[&str] = &[".claude/skills", ".codex/skills", ".agents/skills"];

/// A skill bundle on the host filesystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Skill {
    /// Identifier, taken from the directory name.
    pub name: String,
    /// Host path of the bundle directory.
    pub path: PathBuf,
}

impl Skill {
    /// Resolves a skill from its bundle directory.
    pub fn from_path(path: &Path) -> Result<Self, SandboxError> {
        if !path.is_dir() {
            return Err(SandboxError::Setup(format!(
                "Skill bundle '{}' is not a directory",
                path.display()
            )));
        }
        let name = path
            .canonicalize()
            .unwrap_or_else(|_| path.to_path_buf())
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .ok_or_else(|| {
                SandboxError::Setup(format!("Skill path '{}' has no name", path.display()))
            })?;

        Ok(Self {
            name,
            path: path.to_path_buf(),
        })
    }

    /// Resolves every skill path, failing on the first invalid one.
    ///
    /// Two bundles with the same name would land in the same discovery
    /// directory, so duplicates are rejected.
    pub fn resolve_all(paths: &[PathBuf]) -> Result<Vec<Skill>, SandboxError> {
        let skills: Vec<Skill> = paths
            .iter()
            .map(|p| Skill::from_path(p))
            .collect::<Result<_, _>>()?;

        let mut seen: HashMap<&str, &Path> = HashMap::new();
        for skill in &skills {
            if let Some(first) = seen.insert(&skill.name, &skill.path) {
                return Err(SandboxError::Setup(format!(
                    "Duplicate skill name '{}': {} and {}",
                    skill.name,
                    first.display(),
                    skill.path.display()
                )));
            }
        }
        Ok(skills)
    }
}

/// Returns the identifiers of the given skill paths, in order.
pub fn skill_names(paths: &[PathBuf]) -> Vec<String> {
    paths
        .iter()
        .filter_map(|p| {
            p.canonicalize()
                .unwrap_or_else(|_| p.clone())
                .file_name()
                .map(|s| s.to_string_lossy().to_string())
        })
        .collect()
}

/// Recursively copies a directory.
pub fn copy_dir_recursive(src: &Path, dst: &Path) -> io::Result<()> {
    fs::create_dir_all(dst)?;

    for entry in WalkDir::new(src).min_depth(1).follow_links(false) {
        let entry = entry.map_err(io::Error::other)?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(io::Error::other)?;
        let target = dst.join(relative);

        let file_type = entry.file_type();
        if file_type.is_dir() {
            fs::create_dir_all(&target)?;
        } else if file_type.is_symlink() {
            let link = fs::read_link(entry.path())?;
            #[cfg(unix)]
            std::os::unix::fs::symlink(&link, &target)?;
            #[cfg(not(unix))]
            fs::copy(entry.path(), &target).map(|_| ())?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }

    Ok(())
}

/// Copies every skill into every discovery directory under `root`.
pub fn install_skills(root: &Path, skills: &[Skill]) -> Result<(), SandboxError> {
    for dir in SKILL_DISCOVERY_DIRS {
        for skill in skills {
            let target = root.join(dir).join(&skill.name);
            copy_dir_recursive(&skill.path, &target).map_err(|e| {
                SandboxError::Setup(format!(
                    "Failed to install skill '{}' into {}: {}",
                    skill.name,
                    target.display(),
                    e
                ))
            })?;
        }
    }
    tracing::debug!(
        root = %root.display(),
        skills = skills.len(),
        "Installed skills into discovery directories"
    );
    Ok(())
}

/// Builds an uncompressed tar archive placing every skill in every discovery
/// directory, suitable for extraction at the skills root of a container.
pub fn skills_archive(skills: &[Skill]) -> Result<Vec<u8>, SandboxError> {
    let mut tar = TarBuilder::new(Vec::new());
    tar.follow_symlinks(false);

    for dir in SKILL_DISCOVERY_DIRS {
        // Parent directory entries so extraction never depends on pre-existing paths.
        let mut prefix = PathBuf::new();
        for component in Path::new(dir).components() {
            prefix.push(component);
            if let Some(first) = skills.first() {
                tar.append_dir(&prefix, &first.path)?;
            }
        }
        for skill in skills {
            tar.append_dir_all(Path::new(dir).join(&skill.name), &skill.path)?;
        }
    }

    Ok(tar.into_inner()?)
}
