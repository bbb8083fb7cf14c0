//! Writes to the system filesystem.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Component, Path, PathBuf};

use crate::error::SysOpsError;

/// Privileged writes to sysfs attributes.
pub trait SysOps: Send + Sync {
    /// Write `value` to the attribute at `path`.
    ///
    /// # Errors
    ///
    /// Returns `SysOpsError::InvalidPath` if `path` is outside the sysfs
    /// root, or `SysOpsError::System` if the write fails.
    fn sys_write(&self, path: &Path, value: &str) -> Result<(), SysOpsError>;
}

/// [`SysOps`] writing files directly, confined to one root directory.
#[derive(Debug, Clone)]
pub struct SysfsWriter {
    root: PathBuf,
}

impl SysfsWriter {
    /// Confine writes to `root` (normally `/sys`).
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let root = root.canonicalize().unwrap_or(root);
        Self { root }
    }

    /// The directory writes are confined to.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn is_allowed(&self, path: &Path) -> bool {
        if path.components().any(|c| matches!(c, Component::ParentDir)) {
            return false;
        }
        let resolved = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        resolved.starts_with(&self.root)
    }
}

impl SysOps for SysfsWriter {
    fn sys_write(&self, path: &Path, value: &str) -> Result<(), SysOpsError> {
        if !self.is_allowed(path) {
            return Err(SysOpsError::InvalidPath(path.display().to_string()));
        }
        tracing::debug!(path = %path.display(), value, "Writing sysfs attribute");
        let mut file = OpenOptions::new().write(true).truncate(true).open(path)?;
        file.write_all(value.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn writes_inside_root() {
        let dir = TempDir::new().unwrap();
        let attr = dir.path().join("node");
        std::fs::write(&attr, "old-and-long-value").unwrap();

        let sys = SysfsWriter::new(dir.path());
        sys.sys_write(&attr, "new").unwrap();
        assert_eq!(std::fs::read_to_string(&attr).unwrap(), "new");
    }

    #[test]
    fn rejects_paths_outside_root() {
        let dir = TempDir::new().unwrap();
        let other = TempDir::new().unwrap();
        let outside = other.path().join("attr");
        std::fs::write(&outside, "x").unwrap();

        let sys = SysfsWriter::new(dir.path());
        assert!(matches!(
            sys.sys_write(&outside, "y"),
            Err(SysOpsError::InvalidPath(_))
        ));
        assert!(matches!(
            sys.sys_write(&dir.path().join("..").join("attr"), "y"),
            Err(SysOpsError::InvalidPath(_))
        ));
        assert_eq!(std::fs::read_to_string(&outside).unwrap(), "x");
    }

    #[test]
    fn missing_attribute_is_system_error() {
        let dir = TempDir::new().unwrap();
        let sys = SysfsWriter::new(dir.path());
        assert!(matches!(
            sys.sys_write(&dir.path().join("missing"), "1"),
            Err(SysOpsError::System(_))
        ));
    }
}
