//! # Workspace Discovery and Layout
//!
//! A workspace is a directory containing `botpack.toml` plus the generated
//! `.botpack/` state subdirectory. This module resolves which workspace a
//! command operates on and provides accessors for every path botpack owns
//! inside it.
//!
//! ## Root resolution precedence
//!
//! 1. Explicit `--root` flag
//! 2. Named global profile (`--global [--profile <name>]`)
//! 3. `BOTPACK_ROOT` environment variable
//! 4. Upward search for `botpack.toml` from the current directory
//! 5. The current directory itself
//!
//! Environment resolution happens once at command entry; the resulting
//! [`Workspace`] value is passed through operations explicitly.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use fs4::FileExt;
use log::debug;

use crate::error::{Error, Result};

/// Project manifest filename.
pub const MANIFEST_FILENAME: &str = "botpack.toml";

/// Lockfile filename.
pub const LOCKFILE_FILENAME: &str = "botpack.lock";

/// Generated state directory name.
pub const STATE_DIRNAME: &str = ".botpack";

/// Selection options for [`Workspace::discover`], derived from global CLI
/// flags.
#[derive(Debug, Clone, Default)]
pub struct RootSelection {
    /// Explicit `--root` flag.
    pub root: Option<PathBuf>,
    /// `--global` flag: use a named profile instead of the local tree.
    pub global: bool,
    /// `--profile <name>`, only meaningful with `--global`.
    pub profile: Option<String>,
}

/// A resolved workspace root with path accessors for the persisted layout.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    /// Open a workspace at an explicit root without any discovery.
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve the workspace root using the documented precedence.
    pub fn discover(selection: &RootSelection) -> Result<Self> {
        if let Some(root) = &selection.root {
            return Ok(Self::at(root.clone()));
        }

        if selection.global {
            let name = selection.profile.as_deref().unwrap_or("default");
            return Self::from_profile(name);
        }

        if let Some(root) = std::env::var_os("BOTPACK_ROOT") {
            return Ok(Self::at(PathBuf::from(root)));
        }

        let cwd = std::env::current_dir()?;
        if let Some(found) = search_upward(&cwd) {
            debug!("workspace found at {}", found.display());
            return Ok(Self::at(found));
        }

        Ok(Self::at(cwd))
    }

    /// Resolve a named global profile to its workspace root.
    ///
    /// A profile is a one-line pointer file at
    /// `<config-dir>/botpack/profiles/<name>` containing the root path.
    fn from_profile(name: &str) -> Result<Self> {
        let pointer = profiles_dir().join(name);
        let raw = fs::read_to_string(&pointer).map_err(|e| Error::Generic(format!(
            "profile {name:?} not found at {}: {e}",
            pointer.display()
        )))?;
        let root = PathBuf::from(raw.trim());
        Ok(Self::at(root))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(MANIFEST_FILENAME)
    }

    pub fn lockfile_path(&self) -> PathBuf {
        self.root.join(LOCKFILE_FILENAME)
    }

    /// `.botpack/` — all generated state lives under here.
    pub fn state_dir(&self) -> PathBuf {
        self.root.join(STATE_DIRNAME)
    }

    /// `.botpack/pkgs/` — the per-project virtual store.
    pub fn pkgs_dir(&self) -> PathBuf {
        self.state_dir().join("pkgs")
    }

    /// `.botpack/generated/<target>/` — sync staging area for a target.
    pub fn generated_dir(&self, target: &str) -> PathBuf {
        self.state_dir().join("generated").join(target)
    }

    /// `.botpack/state/sync-<target>.json` — sync state for a target.
    pub fn sync_state_path(&self, target: &str) -> PathBuf {
        self.state_dir()
            .join("state")
            .join(format!("sync-{target}.json"))
    }

    pub fn catalog_path(&self) -> PathBuf {
        self.state_dir().join("catalog.json")
    }

    pub fn trust_path(&self) -> PathBuf {
        self.state_dir().join("trust.toml")
    }

    /// Resolve the workspace assets directory (relative paths are taken
    /// from the workspace root).
    pub fn assets_dir(&self, configured: &str) -> PathBuf {
        let p = Path::new(configured);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.root.join(p)
        }
    }

    /// Acquire the exclusive workspace lock (`.botpack/.lock`).
    ///
    /// One mutating operation at a time per workspace; the lock is released
    /// when the returned guard drops.
    pub fn lock(&self) -> Result<WorkspaceLock> {
        let dir = self.state_dir();
        fs::create_dir_all(&dir)?;
        let path = dir.join(".lock");
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&path)?;
        file.lock_exclusive()?;
        debug!("acquired workspace lock at {}", path.display());
        Ok(WorkspaceLock { file })
    }
}

/// Guard for the workspace advisory lock.
pub struct WorkspaceLock {
    file: File,
}

impl Drop for WorkspaceLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

/// Walk upward from `start` looking for a directory containing the manifest.
fn search_upward(start: &Path) -> Option<PathBuf> {
    let mut current = Some(start);
    while let Some(dir) = current {
        if dir.join(MANIFEST_FILENAME).is_file() {
            return Some(dir.to_path_buf());
        }
        current = dir.parent();
    }
    None
}

/// Directory holding named global profile pointer files.
pub fn profiles_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("botpack")
        .join("profiles")
}

/// Resolve the global content-addressed store root.
///
/// `BOTPACK_STORE` overrides; otherwise a user-home data directory is used.
pub fn store_root() -> PathBuf {
    if let Some(dir) = std::env::var_os("BOTPACK_STORE") {
        return PathBuf::from(dir);
    }
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from(".botpack-store"))
        .join("botpack")
        .join("store")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_explicit_root_wins() {
        let temp = TempDir::new().unwrap();
        let selection = RootSelection {
            root: Some(temp.path().to_path_buf()),
            global: false,
            profile: None,
        };
        let ws = Workspace::discover(&selection).unwrap();
        assert_eq!(ws.root(), temp.path());
    }

    #[test]
    fn test_search_upward_finds_manifest() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join(MANIFEST_FILENAME), "version = 1\n").unwrap();
        let nested = temp.path().join("a/b/c");
        std::fs::create_dir_all(&nested).unwrap();

        let found = search_upward(&nested).unwrap();
        assert_eq!(found, temp.path());
    }

    #[test]
    fn test_search_upward_none_without_manifest() {
        let temp = TempDir::new().unwrap();
        assert!(search_upward(temp.path()).is_none());
    }

    #[test]
    fn test_layout_paths() {
        let ws = Workspace::at("/work");
        assert_eq!(ws.manifest_path(), PathBuf::from("/work/botpack.toml"));
        assert_eq!(ws.lockfile_path(), PathBuf::from("/work/botpack.lock"));
        assert_eq!(ws.pkgs_dir(), PathBuf::from("/work/.botpack/pkgs"));
        assert_eq!(
            ws.sync_state_path("claude"),
            PathBuf::from("/work/.botpack/state/sync-claude.json")
        );
        assert_eq!(
            ws.generated_dir("claude"),
            PathBuf::from("/work/.botpack/generated/claude")
        );
    }

    #[test]
    fn test_workspace_lock_is_reentrant_across_guards() {
        let temp = TempDir::new().unwrap();
        let ws = Workspace::at(temp.path());
        let guard = ws.lock().unwrap();
        drop(guard);
        // Lock can be re-acquired after release.
        let _guard = ws.lock().unwrap();
    }

    #[test]
    fn test_missing_profile_is_an_error() {
        let selection = RootSelection {
            root: None,
            global: true,
            profile: Some("no-such-profile-xyz".to_string()),
        };
        assert!(Workspace::discover(&selection).is_err());
    }
}
