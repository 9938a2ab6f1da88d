//! Required-directory bootstrap (§6): `<root>/content`, `<root>/trace`,
//! `<root>/state` are created at startup; a permissions failure is fatal
//! (exit 40).

use sapmon_core::error::{Result, SapmonError};
use std::path::{Path, PathBuf};

/// The three directories every subcommand needs under `--root`.
pub struct RootDirs {
    /// On-disk provider-type content catalogues (`<providerType>.json`).
    pub content: PathBuf,
    /// Rolling trace file directory.
    pub trace: PathBuf,
    /// Per-instance `.state` files.
    pub state: PathBuf,
}

impl RootDirs {
    /// Derive the three directories from `root` without creating them.
    pub fn under(root: &Path) -> Self {
        RootDirs {
            content: root.join("content"),
            trace: root.join("trace"),
            state: root.join("state"),
        }
    }

    /// Create all three directories if missing. A permission failure on any
    /// one of them is reported as `DirectoryPermissionDenied` (exit 40).
    pub fn ensure_exist(&self) -> Result<()> {
        for dir in [&self.content, &self.trace, &self.state] {
            std::fs::create_dir_all(dir).map_err(|err| SapmonError::DirectoryPermissionDenied(format!("{}: {err}", dir.display())))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_exist_creates_all_three_directories() {
        let root = tempfile::tempdir().unwrap();
        let dirs = RootDirs::under(root.path());
        dirs.ensure_exist().unwrap();
        assert!(dirs.content.is_dir());
        assert!(dirs.trace.is_dir());
        assert!(dirs.state.is_dir());
    }

    #[test]
    fn ensure_exist_is_idempotent() {
        let root = tempfile::tempdir().unwrap();
        let dirs = RootDirs::under(root.path());
        dirs.ensure_exist().unwrap();
        dirs.ensure_exist().unwrap();
    }
}
