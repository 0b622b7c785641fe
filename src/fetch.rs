//! # Source Fetchers
//!
//! Three backends share one contract: `fetch(source) → normalized tree on
//! disk`. Every backend stages into a fresh temporary directory that lives
//! until the tree has been committed to the store.
//!
//! - **Path**: snapshots a local directory, excluding VCS metadata; symlinks
//!   are preserved as symlinks and never followed.
//! - **Git**: clones at a resolved commit through the `git` CLI (behind a
//!   trait so tests can substitute a fake), then strips `.git/`.
//! - **Tarball**: downloads, verifies declared integrity, extracts.

use std::path::{Path, PathBuf};
use std::process::Command;

use log::debug;
use sha2::{Digest, Sha256};
use tempfile::TempDir;

use crate::error::{Error, Result};
use crate::registry::RegistryClient;

/// Directory names excluded from snapshots and digests.
pub const VCS_DIRS: &[&str] = &[".git", ".hg", ".svn"];

/// Identity a fetch resolved to; recorded in the lockfile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedIdentity {
    /// Git commit plus the original ref when one was named.
    Commit {
        commit: String,
        reference: Option<String>,
    },
    /// Path dependencies resolve to a content snapshot; the digest is the
    /// identity.
    Snapshot,
    /// Tarball identified by its integrity digest.
    Tarball,
}

/// A fetched tree staged on disk. Holds its temp dir alive until dropped.
#[derive(Debug)]
pub struct FetchedTree {
    pub root: PathBuf,
    pub identity: ResolvedIdentity,
    _staging: Option<TempDir>,
}

/// Git operations behind a trait so tests can avoid the network.
pub trait GitOps: Send + Sync {
    /// Clone `url` into `dst` and check out `rev` when given. Returns the
    /// resolved commit SHA.
    fn clone_checkout(&self, url: &str, rev: Option<&str>, dst: &Path) -> Result<String>;
}

/// Default implementation shelling out to the `git` CLI.
pub struct SystemGit;

impl GitOps for SystemGit {
    fn clone_checkout(&self, url: &str, rev: Option<&str>, dst: &Path) -> Result<String> {
        run_git(
            url,
            "clone",
            Command::new("git").args(["clone", "--quiet"]).arg(url).arg(dst),
        )?;
        if let Some(rev) = rev {
            run_git(
                url,
                "checkout",
                Command::new("git")
                    .arg("-C")
                    .arg(dst)
                    .args(["checkout", "--quiet", rev]),
            )?;
        }
        let output = run_git(
            url,
            "rev-parse",
            Command::new("git").arg("-C").arg(dst).args(["rev-parse", "HEAD"]),
        )?;
        Ok(String::from_utf8_lossy(&output).trim().to_string())
    }
}

fn run_git(url: &str, name: &str, cmd: &mut Command) -> Result<Vec<u8>> {
    let output = cmd.output().map_err(|e| Error::GitCommand {
        command: name.to_string(),
        url: url.to_string(),
        stderr: e.to_string(),
    })?;
    if !output.status.success() {
        return Err(Error::GitCommand {
            command: name.to_string(),
            url: url.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(output.stdout)
}

/// Fetcher owning the backends.
pub struct Fetcher {
    git: Box<dyn GitOps>,
}

impl Default for Fetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Fetcher {
    pub fn new() -> Self {
        Self {
            git: Box::new(SystemGit),
        }
    }

    /// Substitute git operations (for tests).
    pub fn with_git(git: Box<dyn GitOps>) -> Self {
        Self { git }
    }

    /// Snapshot a local directory dependency.
    ///
    /// Relative paths are resolved against `base_dir`. VCS metadata is
    /// excluded; symlinks are copied as symlinks, never followed, so a link
    /// escaping the tree cannot pull outside content into the snapshot.
    pub fn fetch_path(&self, base_dir: &Path, dep_path: &str) -> Result<FetchedTree> {
        let src = {
            let p = Path::new(dep_path);
            if p.is_absolute() {
                p.to_path_buf()
            } else {
                base_dir.join(p)
            }
        };
        if !src.is_dir() {
            return Err(Error::Fetch {
                src: format!("path:{dep_path}"),
                message: format!("directory not found: {}", src.display()),
            });
        }

        let staging = TempDir::new()?;
        snapshot_dir(&src, staging.path())?;
        debug!("snapshotted {} into {}", src.display(), staging.path().display());
        Ok(FetchedTree {
            root: staging.path().to_path_buf(),
            identity: ResolvedIdentity::Snapshot,
            _staging: Some(staging),
        })
    }

    /// Clone a git dependency at a rev (branch, tag, or commit) and strip
    /// `.git/`.
    pub fn fetch_git(&self, url: &str, rev: Option<&str>, offline: bool) -> Result<FetchedTree> {
        if offline {
            return Err(Error::OfflineMiss {
                src: format!("{url}#{}", rev.unwrap_or("HEAD")),
            });
        }
        let staging = TempDir::new()?;
        let checkout = staging.path().join("checkout");
        let commit = self.git.clone_checkout(url, rev, &checkout)?;
        let git_dir = checkout.join(".git");
        if git_dir.exists() {
            std::fs::remove_dir_all(&git_dir)?;
        }
        debug!("fetched {url} at {commit}");
        Ok(FetchedTree {
            root: checkout,
            identity: ResolvedIdentity::Commit {
                commit,
                reference: rev.map(|r| r.to_string()),
            },
            _staging: Some(staging),
        })
    }

    /// Download and extract a gzipped tarball, verifying declared integrity.
    pub fn fetch_tarball(
        &self,
        client: &RegistryClient,
        url: &str,
        integrity: Option<&str>,
        offline: bool,
    ) -> Result<FetchedTree> {
        if offline {
            return Err(Error::OfflineMiss {
                src: url.to_string(),
            });
        }
        let bytes = client.fetch_bytes(url)?;

        if let Some(expected) = integrity {
            let actual = format!("sha256:{}", hex::encode(Sha256::digest(&bytes)));
            if actual != expected {
                return Err(Error::IntegrityMismatch {
                    key: url.to_string(),
                    expected: expected.to_string(),
                    actual,
                });
            }
        }

        let staging = TempDir::new()?;
        let extracted = staging.path().join("tree");
        std::fs::create_dir_all(&extracted)?;
        let decoder = flate2::read::GzDecoder::new(std::io::Cursor::new(bytes));
        let mut archive = tar::Archive::new(decoder);
        archive.unpack(&extracted).map_err(|e| Error::Fetch {
            src: url.to_string(),
            message: format!("tarball extraction failed: {e}"),
        })?;

        // Tarballs conventionally wrap the package in one top-level dir.
        let root = single_subdir(&extracted)?.unwrap_or(extracted);
        Ok(FetchedTree {
            root,
            identity: ResolvedIdentity::Tarball,
            _staging: Some(staging),
        })
    }
}

/// Copy `src` to `dst` recursively, excluding VCS directories and preserving
/// symlinks, file contents, and the executable bit.
fn snapshot_dir(src: &Path, dst: &Path) -> Result<()> {
    for entry in walkdir::WalkDir::new(src)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|e| Error::Fetch {
            src: src.display().to_string(),
            message: e.to_string(),
        })?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .expect("walkdir yields children of src");
        if rel
            .components()
            .any(|c| VCS_DIRS.contains(&c.as_os_str().to_string_lossy().as_ref()))
        {
            continue;
        }
        let target = dst.join(rel);
        let file_type = entry.file_type();
        if file_type.is_dir() {
            std::fs::create_dir_all(&target)?;
        } else if file_type.is_symlink() {
            let link = std::fs::read_link(entry.path())?;
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            #[cfg(unix)]
            std::os::unix::fs::symlink(&link, &target)?;
            #[cfg(not(unix))]
            {
                // Junction-less platforms degrade to skipping the link.
                let _ = link;
            }
        } else if file_type.is_file() {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// If `dir` contains exactly one entry and it is a directory, return it.
fn single_subdir(dir: &Path) -> Result<Option<PathBuf>> {
    let mut entries = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        entries.push(entry?);
    }
    if entries.len() == 1 && entries[0].file_type()?.is_dir() {
        Ok(Some(entries[0].path()))
    } else {
        Ok(None)
    }
}
