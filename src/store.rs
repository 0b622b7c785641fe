//! # Content-Addressed Store
//!
//! The store is a global, append-only cache of normalized package trees,
//! keyed by content digest and shared across every workspace on the host.
//!
//! Layout: `<store-root>/v1/<digest>/{payload/, meta.json}` plus
//! `<store-root>/locks/<digest>.lock` for advisory coordination.
//!
//! ## Population protocol
//!
//! 1. Compute the digest over the normalized tree in its scratch location.
//! 2. Acquire an exclusive advisory file lock keyed on the digest.
//! 3. If the entry already exists with a well-formed `meta.json`, release and
//!    return (idempotent).
//! 4. Otherwise stage at `<digest>.tmp-<unique>`, fsync files and
//!    directories, and atomically rename into place.
//! 5. Release the lock.
//!
//! A reader therefore never observes a partial entry: the entry directory is
//! either absent or complete. Stale `*.tmp-*` directories left by crashed
//! writers are swept opportunistically.

use std::collections::BTreeSet;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::Duration;

use fs4::FileExt;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::lockfile::Lockfile;

/// Store format version segment.
const FORMAT_DIR: &str = "v1";

/// Attempts for transient filesystem failures during population.
const PUT_ATTEMPTS: u32 = 3;

/// Metadata persisted next to each payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreMeta {
    pub name: String,
    pub version: String,
    /// Source record as it appears in the lockfile.
    pub source: serde_json::Value,
    /// Relative paths of the payload, lexically sorted.
    pub files: Vec<String>,
}

/// A committed store entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEntry {
    pub digest: String,
    pub payload: PathBuf,
}

/// One verification failure.
#[derive(Debug, Clone)]
pub struct VerifyError {
    pub key: String,
    pub expected: String,
    pub actual: Option<String>,
}

/// Outcome of `verify`.
#[derive(Debug, Clone, Default)]
pub struct VerifyReport {
    pub checked: usize,
    pub errors: Vec<VerifyError>,
}

impl VerifyReport {
    pub fn ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Outcome of `prune`.
#[derive(Debug, Clone, Default)]
pub struct PruneReport {
    pub removed: Vec<String>,
    pub reclaimed_bytes: u64,
}

/// Handle on the global store root.
#[derive(Debug, Clone)]
pub struct Store {
    root: PathBuf,
}

impl Store {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn format_dir(&self) -> PathBuf {
        self.root.join(FORMAT_DIR)
    }

    fn entry_dir(&self, digest: &str) -> PathBuf {
        self.format_dir().join(digest_dirname(digest))
    }

    /// Path of a committed payload.
    pub fn payload_path(&self, digest: &str) -> PathBuf {
        self.entry_dir(digest).join("payload")
    }

    fn meta_path(&self, digest: &str) -> PathBuf {
        self.entry_dir(digest).join("meta.json")
    }

    fn lock_path(&self, digest: &str) -> PathBuf {
        self.root.join("locks").join(format!("{}.lock", digest_dirname(digest)))
    }

    /// True when `digest` is committed with well-formed metadata.
    pub fn contains(&self, digest: &str) -> bool {
        self.meta(digest).is_ok()
    }

    /// Read the metadata of a committed entry.
    pub fn meta(&self, digest: &str) -> Result<StoreMeta> {
        let path = self.meta_path(digest);
        let text = fs::read_to_string(&path).map_err(|_| Error::Store {
            digest: digest.to_string(),
            message: "missing store entry".to_string(),
        })?;
        serde_json::from_str(&text).map_err(|e| Error::Store {
            digest: digest.to_string(),
            message: format!("corrupt meta.json: {e}"),
        })
    }

    /// Commit a normalized tree under its content digest.
    ///
    /// Safe to call concurrently from multiple processes for the same
    /// content: one writer wins, the others observe the committed entry.
    pub fn put_tree(&self, src: &Path, name: &str, version: &str, source: serde_json::Value) -> Result<StoredEntry> {
        let digest = digest_tree(src)?;
        let entry_dir = self.entry_dir(&digest);
        fs::create_dir_all(self.format_dir())?;
        fs::create_dir_all(self.root.join("locks"))?;

        let lock_file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(self.lock_path(&digest))?;
        lock_file.lock_exclusive()?;
        let result = self.put_tree_locked(src, &digest, &entry_dir, name, version, source);
        let _ = FileExt::unlock(&lock_file);
        result
    }

    fn put_tree_locked(
        &self,
        src: &Path,
        digest: &str,
        entry_dir: &Path,
        name: &str,
        version: &str,
        source: serde_json::Value,
    ) -> Result<StoredEntry> {
        if self.contains(digest) {
            debug!("store hit for {digest}");
            return Ok(StoredEntry {
                digest: digest.to_string(),
                payload: self.payload_path(digest),
            });
        }
        if entry_dir.exists() {
            // Present but with malformed metadata: safe to rebuild under the
            // digest lock.
            warn!("rebuilding corrupt store entry {digest}");
            fs::remove_dir_all(entry_dir)?;
        }

        let meta = StoreMeta {
            name: name.to_string(),
            version: version.to_string(),
            source,
            files: list_files(src)?,
        };

        let mut last_err = None;
        for attempt in 1..=PUT_ATTEMPTS {
            match self.stage_and_commit(src, digest, entry_dir, &meta) {
                Ok(entry) => return Ok(entry),
                Err(e) => {
                    warn!("store put attempt {attempt} for {digest} failed: {e}");
                    last_err = Some(e);
                    std::thread::sleep(Duration::from_millis(50 * attempt as u64));
                }
            }
        }
        Err(last_err.expect("at least one attempt ran"))
    }

    fn stage_and_commit(
        &self,
        src: &Path,
        digest: &str,
        entry_dir: &Path,
        meta: &StoreMeta,
    ) -> Result<StoredEntry> {
        let staging = self.format_dir().join(format!(
            "{}.tmp-{}",
            digest_dirname(digest),
            std::process::id()
        ));
        if staging.exists() {
            fs::remove_dir_all(&staging)?;
        }
        fs::create_dir_all(&staging)?;

        let payload_staging = staging.join("payload");
        copy_tree(src, &payload_staging)?;
        let meta_text = serde_json::to_string_pretty(meta)? + "\n";
        fs::write(staging.join("meta.json"), meta_text)?;

        fsync_tree(&staging)?;
        fs::rename(&staging, entry_dir)?;
        fsync_dir(&self.format_dir())?;

        debug!("store committed {digest}");
        Ok(StoredEntry {
            digest: digest.to_string(),
            payload: self.payload_path(digest),
        })
    }

    /// Re-hash each payload referenced by the lockfile and compare against
    /// its integrity field.
    pub fn verify(&self, lock: &Lockfile) -> Result<VerifyReport> {
        let mut report = VerifyReport::default();
        for (key, pkg) in &lock.packages {
            report.checked += 1;
            let payload = self.payload_path(&pkg.integrity);
            if !payload.is_dir() {
                report.errors.push(VerifyError {
                    key: key.clone(),
                    expected: pkg.integrity.clone(),
                    actual: None,
                });
                continue;
            }
            let actual = digest_tree(&payload)?;
            if actual != pkg.integrity {
                report.errors.push(VerifyError {
                    key: key.clone(),
                    expected: pkg.integrity.clone(),
                    actual: Some(actual),
                });
            }
        }
        Ok(report)
    }

    /// Remove entries not referenced by any of the given digests, reporting
    /// reclaimed bytes. Never runs automatically.
    pub fn prune(&self, referenced: &BTreeSet<String>, dry_run: bool) -> Result<PruneReport> {
        let mut report = PruneReport::default();
        let dir = self.format_dir();
        if !dir.is_dir() {
            return Ok(report);
        }
        self.sweep_stale_tmp()?;
        let mut names: Vec<(String, PathBuf)> = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            names.push((name, entry.path()));
        }
        names.sort();
        let referenced_dirs: BTreeSet<String> =
            referenced.iter().map(|d| digest_dirname(d)).collect();
        for (name, path) in names {
            if referenced_dirs.contains(&name) {
                continue;
            }
            report.reclaimed_bytes += dir_size(&path)?;
            report.removed.push(dirname_digest(&name));
            if !dry_run {
                fs::remove_dir_all(&path)?;
            }
        }
        Ok(report)
    }

    /// Remove `*.tmp-*` directories left behind by crashed writers.
    pub fn sweep_stale_tmp(&self) -> Result<usize> {
        let dir = self.format_dir();
        if !dir.is_dir() {
            return Ok(0);
        }
        let mut removed = 0;
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if entry.file_type()?.is_dir() && name.contains(".tmp-") {
                fs::remove_dir_all(entry.path())?;
                removed += 1;
            }
        }
        if removed > 0 {
            debug!("swept {removed} stale store staging directories");
        }
        Ok(removed)
    }
}

/// Compute the content digest of a normalized tree.
///
/// The digest covers, in lexical path order: relative path, entry kind,
/// the executable bit for regular files, file bytes, and symlink targets.
/// Line endings are left alone (binary safety), and VCS directories are
/// excluded. Two trees with identical contents hash identically on any
/// platform.
pub fn digest_tree(root: &Path) -> Result<String> {
    let mut hasher = Sha256::new();
    for entry in walkdir::WalkDir::new(root)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|e| Error::Store {
            digest: root.display().to_string(),
            message: e.to_string(),
        })?;
        let rel = entry
            .path()
            .strip_prefix(root)
            .expect("walkdir yields children of root");
        if rel
            .components()
            .any(|c| crate::fetch::VCS_DIRS.contains(&c.as_os_str().to_string_lossy().as_ref()))
        {
            continue;
        }
        let rel_bytes = rel_posix(rel);

        let file_type = entry.file_type();
        if file_type.is_symlink() {
            let target = fs::read_link(entry.path())?;
            hasher.update(b"L");
            hasher.update(&rel_bytes);
            hasher.update([0]);
            hasher.update(target.to_string_lossy().as_bytes());
            hasher.update([0]);
        } else if file_type.is_file() {
            hasher.update(b"F");
            hasher.update(&rel_bytes);
            hasher.update([0]);
            hasher.update(if is_executable(entry.path())? { b"x" } else { b"-" });
            hasher.update([0]);
            hasher.update(fs::read(entry.path())?);
            hasher.update([0]);
        }
        // Directories contribute only through the paths of their contents.
    }
    Ok(format!("sha256:{}", hex::encode(hasher.finalize())))
}

fn rel_posix(rel: &Path) -> Vec<u8> {
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect();
    parts.join("/").into_bytes()
}

#[cfg(unix)]
fn is_executable(path: &Path) -> Result<bool> {
    use std::os::unix::fs::PermissionsExt;
    Ok(fs::symlink_metadata(path)?.permissions().mode() & 0o111 != 0)
}

#[cfg(not(unix))]
fn is_executable(_path: &Path) -> Result<bool> {
    // Mode bits are not meaningful on non-POSIX filesystems; treat
    // everything as a plain regular file so digests stay portable.
    Ok(false)
}

/// Digests contain a `:`; entry directories replace it for portability.
fn digest_dirname(digest: &str) -> String {
    digest.replace(':', "-")
}

fn dirname_digest(dirname: &str) -> String {
    match dirname.split_once('-') {
        Some((algo, hex)) => format!("{algo}:{hex}"),
        None => dirname.to_string(),
    }
}

fn list_files(root: &Path) -> Result<Vec<String>> {
    let mut files = Vec::new();
    for entry in walkdir::WalkDir::new(root)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|e| Error::Store {
            digest: root.display().to_string(),
            message: e.to_string(),
        })?;
        if entry.file_type().is_dir() {
            continue;
        }
        let rel = entry.path().strip_prefix(root).expect("child of root");
        files.push(String::from_utf8_lossy(&rel_posix(rel)).to_string());
    }
    Ok(files)
}

fn copy_tree(src: &Path, dst: &Path) -> Result<()> {
    fs::create_dir_all(dst)?;
    for entry in walkdir::WalkDir::new(src).min_depth(1).follow_links(false) {
        let entry = entry.map_err(|e| Error::Store {
            digest: src.display().to_string(),
            message: e.to_string(),
        })?;
        let rel = entry.path().strip_prefix(src).expect("child of src");
        let target = dst.join(rel);
        let file_type = entry.file_type();
        if file_type.is_dir() {
            fs::create_dir_all(&target)?;
        } else if file_type.is_symlink() {
            let link = fs::read_link(entry.path())?;
            #[cfg(unix)]
            std::os::unix::fs::symlink(&link, &target)?;
            #[cfg(not(unix))]
            let _ = link;
        } else if file_type.is_file() {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// fsync every regular file and directory below (and including) `root`.
fn fsync_tree(root: &Path) -> Result<()> {
    for entry in walkdir::WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(|e| Error::Store {
            digest: root.display().to_string(),
            message: e.to_string(),
        })?;
        let file_type = entry.file_type();
        if file_type.is_symlink() {
            continue;
        }
        if let Ok(f) = File::open(entry.path()) {
            let _ = f.sync_all();
        }
    }
    Ok(())
}

fn fsync_dir(dir: &Path) -> Result<()> {
    if let Ok(f) = File::open(dir) {
        let _ = f.sync_all();
    }
    Ok(())
}

fn dir_size(root: &Path) -> Result<u64> {
    let mut total = 0;
    for entry in walkdir::WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(|e| Error::Store {
            digest: root.display().to_string(),
            message: e.to_string(),
        })?;
        if entry.file_type().is_file() {
            total += entry.metadata().map(|m| m.len()).unwrap_or(0);
        }
    }
    Ok(total)
}
