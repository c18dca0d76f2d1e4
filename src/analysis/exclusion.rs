//! Exclusion paths and deletions inside the scratch extraction.
//!
//! Every path that is about to be deleted from an extracted image goes
//! through [`ScratchRoot`], which only hands out locations strictly below the
//! scratch directory.

use std::path::{Component, Path, PathBuf};

use serde::Serialize;

use crate::error::{AuditError, Result};

/// Caller-supplied container paths to leave out of code analysis.
/// Construction validates every entry, so holding one means no entry can
/// climb out of the tree it is applied to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ExclusionSet {
    paths: Vec<String>,
}

impl ExclusionSet {
    pub fn parse<I, S>(paths: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut validated = Vec::new();
        for path in paths {
            let path = path.as_ref().trim();
            if path.is_empty() {
                continue;
            }
            validate(path)?;
            if !validated.iter().any(|p| p == path) {
                validated.push(path.to_string());
            }
        }
        Ok(Self { paths: validated })
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.paths.iter().map(String::as_str)
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.paths.clone()
    }
}

fn validate(path: &str) -> Result<()> {
    if path.contains("..") {
        return Err(AuditError::InvalidExclusion {
            path: path.to_string(),
            reason: "the excluded path cannot contain '..'".into(),
        });
    }
    if !path.starts_with('/') {
        return Err(AuditError::InvalidExclusion {
            path: path.to_string(),
            reason: "excluded paths must be absolute paths inside the container".into(),
        });
    }
    Ok(())
}

/// The scratch directory an image filesystem was extracted into.
#[derive(Debug, Clone)]
pub struct ScratchRoot {
    root: PathBuf,
}

impl ScratchRoot {
    pub fn new(root: &Path) -> Result<Self> {
        Ok(Self {
            root: root.canonicalize()?,
        })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Host location of a container path. Rejects parent-directory
    /// components and the root itself.
    pub fn resolve(&self, container_path: &str) -> Result<PathBuf> {
        let reject = |reason: &str| AuditError::InvalidExclusion {
            path: container_path.to_string(),
            reason: reason.to_string(),
        };

        let mut resolved = self.root.clone();
        for component in Path::new(container_path).components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::RootDir | Component::CurDir => {}
                Component::ParentDir | Component::Prefix(_) => {
                    return Err(reject("path escapes the extracted filesystem"))
                }
            }
        }

        if resolved == self.root || !resolved.starts_with(&self.root) {
            return Err(reject("path resolves to the root of the extracted filesystem"));
        }
        Ok(resolved)
    }

    /// Delete a file or subtree. Returns `Ok(false)` when nothing was there.
    /// A final symlink is removed, never followed; a path whose parent
    /// directory leads outside the root through a symlink is rejected.
    pub fn remove(&self, container_path: &str) -> Result<bool> {
        let target = self.resolve(container_path)?;

        let meta = match std::fs::symlink_metadata(&target) {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };

        if let Some(parent) = target.parent() {
            let real_parent = parent.canonicalize()?;
            if !real_parent.starts_with(&self.root) {
                return Err(AuditError::InvalidExclusion {
                    path: container_path.to_string(),
                    reason: "path leaves the extracted filesystem through a symlink".into(),
                });
            }
        }

        if meta.is_dir() {
            std::fs::remove_dir_all(&target)?;
        } else {
            std::fs::remove_file(&target)?;
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dotdot_rejected_up_front() {
        let err = ExclusionSet::parse(["/app/tests", "/app/../etc"]).unwrap_err();
        assert!(matches!(err, AuditError::InvalidExclusion { ref path, .. } if path == "/app/../etc"));
        assert!(ExclusionSet::parse(["/app/..hidden"]).is_err());
    }

    #[test]
    fn relative_paths_rejected() {
        assert!(ExclusionSet::parse(["app/tests"]).is_err());
    }

    #[test]
    fn parse_trims_and_dedups() {
        let set = ExclusionSet::parse([" /app/tests ", "", "/app/tests", "/app/docs"]).unwrap();
        assert_eq!(set.to_vec(), vec!["/app/tests", "/app/docs"]);
        assert!(!set.is_empty());
    }

    #[test]
    fn resolve_stays_below_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = ScratchRoot::new(dir.path()).unwrap();
        let resolved = root.resolve("/app/tests").unwrap();
        assert_eq!(resolved, root.path().join("app/tests"));
        assert!(root.resolve("/").is_err());
        assert!(root.resolve("/app/../../etc").is_err());
    }

    #[test]
    fn remove_deletes_subtree_and_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("app/tests/unit")).unwrap();
        std::fs::write(dir.path().join("app/tests/unit/t.py"), "x").unwrap();
        std::fs::write(dir.path().join("app/main.py"), "x").unwrap();
        let root = ScratchRoot::new(dir.path()).unwrap();

        assert!(root.remove("/app/tests").unwrap());
        assert!(!dir.path().join("app/tests").exists());
        assert!(dir.path().join("app/main.py").exists());
        assert!(!root.remove("/app/missing").unwrap());
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_parent_escape_rejected() {
        let outside = tempfile::tempdir().unwrap();
        std::fs::write(outside.path().join("precious"), "keep").unwrap();
        let dir = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("link")).unwrap();
        let root = ScratchRoot::new(dir.path()).unwrap();

        let err = root.remove("/link/precious").unwrap_err();
        assert!(matches!(err, AuditError::InvalidExclusion { .. }));
        assert!(outside.path().join("precious").exists());
    }

    #[cfg(unix)]
    #[test]
    fn final_symlink_removed_not_followed() {
        let outside = tempfile::tempdir().unwrap();
        std::fs::create_dir(outside.path().join("data")).unwrap();
        std::fs::write(outside.path().join("data/file"), "keep").unwrap();
        let dir = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(outside.path().join("data"), dir.path().join("data")).unwrap();
        let root = ScratchRoot::new(dir.path()).unwrap();

        assert!(root.remove("/data").unwrap());
        assert!(outside.path().join("data/file").exists());
    }
}
