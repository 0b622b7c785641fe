//! # Virtual Store
//!
//! The virtual store gives every installed package a stable, human-readable
//! path inside the workspace: `.botpack/pkgs/<name>@<version>/` pointing at
//! the global store payload. Scoped names nest
//! (`.botpack/pkgs/@acme/thing@1.2.3/`).
//!
//! Entries are created with the configured link mode. `auto` tries a
//! directory symlink, then per-file hardlinks, then a recursive copy;
//! explicit modes fail loudly instead of falling back. Replacement stages
//! adjacent to the destination and swaps with an atomic rename.

use std::fs;
use std::path::{Path, PathBuf};

use log::debug;

use crate::error::{Error, Result};
use crate::lockfile::{split_key, Lockfile};
use crate::manifest::LinkMode;
use crate::store::Store;

/// Outcome of materializing the virtual store.
#[derive(Debug, Clone, Default)]
pub struct VstoreReport {
    pub created: Vec<String>,
    pub updated: Vec<String>,
    pub removed: Vec<String>,
}

/// Relative directory for a package key, nesting scope segments.
pub fn entry_relpath(key: &str) -> Result<PathBuf> {
    let (name, version) = split_key(key).ok_or_else(|| Error::Generic(format!(
        "invalid package key: {key:?}"
    )))?;
    let mut parts: Vec<&str> = name.split('/').filter(|p| !p.is_empty()).collect();
    let leaf = parts.pop().ok_or_else(|| Error::Generic(format!(
        "invalid package name in key: {key:?}"
    )))?;
    let mut path = PathBuf::new();
    for part in parts {
        path.push(part);
    }
    path.push(format!("{leaf}@{version}"));
    Ok(path)
}

/// Materialize every lockfile package into `pkgs_root`, pointing at the
/// store, and drop entries for packages no longer in the lockfile.
pub fn materialize(
    pkgs_root: &Path,
    store: &Store,
    lock: &Lockfile,
    mode: LinkMode,
) -> Result<VstoreReport> {
    let mut report = VstoreReport::default();
    let mut desired: Vec<(String, PathBuf)> = Vec::new();

    for (key, pkg) in &lock.packages {
        let payload = store.payload_path(&pkg.integrity);
        if !payload.is_dir() {
            return Err(Error::Store {
                digest: pkg.integrity.clone(),
                message: format!("{key}: store entry missing; run `botpack install` first"),
            });
        }
        let dest = pkgs_root.join(entry_relpath(key)?);
        desired.push((key.clone(), dest.clone()));

        if link_is_current(&dest, &payload) {
            continue;
        }
        let existed = dest.symlink_metadata().is_ok();
        link_tree(&payload, &dest, mode)?;
        if existed {
            report.updated.push(key.clone());
        } else {
            report.created.push(key.clone());
        }
    }

    // Drop stale entries so the virtual store mirrors the lockfile exactly.
    let desired_paths: Vec<&PathBuf> = desired.iter().map(|(_, p)| p).collect();
    remove_stale(pkgs_root, &desired_paths, &mut report)?;

    Ok(report)
}

/// A destination is current when it is a symlink already pointing at the
/// payload. Hardlink/copy trees are rebuilt unconditionally; the store entry
/// is immutable, so the rebuild converges.
fn link_is_current(dest: &Path, payload: &Path) -> bool {
    let Ok(meta) = dest.symlink_metadata() else {
        return false;
    };
    if !meta.file_type().is_symlink() {
        return false;
    }
    match fs::read_link(dest) {
        Ok(target) => {
            let resolved = if target.is_absolute() {
                target
            } else {
                dest.parent().map(|p| p.join(&target)).unwrap_or(target)
            };
            resolved
                .canonicalize()
                .ok()
                .zip(payload.canonicalize().ok())
                .map(|(a, b)| a == b)
                .unwrap_or(false)
        }
        Err(_) => false,
    }
}

/// Create `dest` pointing at `payload` with the requested mode, staging
/// adjacent and swapping with a rename.
pub fn link_tree(payload: &Path, dest: &Path, mode: LinkMode) -> Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    let staging = staging_path(dest);
    remove_any(&staging)?;

    match mode {
        LinkMode::Symlink => symlink_dir(payload, &staging)?,
        LinkMode::Hardlink => hardlink_tree(payload, &staging)?,
        LinkMode::Copy => copy_tree(payload, &staging)?,
        LinkMode::Auto => {
            if symlink_dir(payload, &staging).is_err() {
                remove_any(&staging)?;
                if hardlink_tree(payload, &staging).is_err() {
                    remove_any(&staging)?;
                    copy_tree(payload, &staging)?;
                }
            }
        }
    }

    remove_any(dest)?;
    fs::rename(&staging, dest)?;
    debug!("linked {} -> {}", dest.display(), payload.display());
    Ok(())
}

fn staging_path(dest: &Path) -> PathBuf {
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "entry".to_string());
    dest.with_file_name(format!(".{name}.staging"))
}

fn remove_any(path: &Path) -> Result<()> {
    match path.symlink_metadata() {
        Err(_) => Ok(()),
        Ok(meta) => {
            if meta.file_type().is_dir() {
                fs::remove_dir_all(path)?;
            } else {
                fs::remove_file(path)?;
            }
            Ok(())
        }
    }
}

#[cfg(unix)]
fn symlink_dir(payload: &Path, dest: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(payload, dest)
}

#[cfg(not(unix))]
fn symlink_dir(_payload: &Path, _dest: &Path) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "symlinks unavailable",
    ))
}

/// Hardlink regular files one by one; directories are recreated and
/// symlinks re-pointed (hardlinking a directory is not a thing).
fn hardlink_tree(payload: &Path, dest: &Path) -> std::io::Result<()> {
    fs::create_dir_all(dest)?;
    for entry in walkdir::WalkDir::new(payload).min_depth(1).follow_links(false) {
        let entry = entry.map_err(std::io::Error::other)?;
        let rel = entry.path().strip_prefix(payload).expect("child of payload");
        let target = dest.join(rel);
        let file_type = entry.file_type();
        if file_type.is_dir() {
            fs::create_dir_all(&target)?;
        } else if file_type.is_symlink() {
            let link = fs::read_link(entry.path())?;
            #[cfg(unix)]
            std::os::unix::fs::symlink(&link, &target)?;
            #[cfg(not(unix))]
            let _ = link;
        } else {
            fs::hard_link(entry.path(), &target)?;
        }
    }
    Ok(())
}

fn copy_tree(payload: &Path, dest: &Path) -> Result<()> {
    fs::create_dir_all(dest)?;
    for entry in walkdir::WalkDir::new(payload).min_depth(1).follow_links(false) {
        let entry = entry.map_err(|e| Error::Generic(e.to_string()))?;
        let rel = entry.path().strip_prefix(payload).expect("child of payload");
        let target = dest.join(rel);
        let file_type = entry.file_type();
        if file_type.is_dir() {
            fs::create_dir_all(&target)?;
        } else if file_type.is_symlink() {
            let link = fs::read_link(entry.path())?;
            #[cfg(unix)]
            std::os::unix::fs::symlink(&link, &target)?;
            #[cfg(not(unix))]
            let _ = link;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Recursively drop entries under `dir` that are not in `desired`, then
/// prune empty scope directories.
fn remove_stale(dir: &Path, desired: &[&PathBuf], report: &mut VstoreReport) -> Result<()> {
    if !dir.is_dir() {
        return Ok(());
    }
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with('.') {
            continue;
        }
        if name.contains('@') && !name.starts_with('@') {
            // A versioned leaf like `thing@1.2.3`.
            if !desired.iter().any(|d| **d == path) {
                remove_any(&path)?;
                report.removed.push(name);
            }
        } else {
            // A scope directory like `@acme`.
            remove_stale(&path, desired, report)?;
            let _ = fs::remove_dir(&path);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lockfile::LockedPackage;
    use serde_json::json;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn store_with_package(name: &str, version: &str) -> (TempDir, Store, Lockfile) {
        let store_dir = TempDir::new().unwrap();
        let store = Store::new(store_dir.path());
        let tree = TempDir::new().unwrap();
        fs::create_dir_all(tree.path().join("skills/demo")).unwrap();
        fs::write(tree.path().join("skills/demo/SKILL.md"), "# demo").unwrap();
        let entry = store
            .put_tree(tree.path(), name, version, json!({"type": "path"}))
            .unwrap();

        let mut packages = BTreeMap::new();
        packages.insert(
            format!("{name}@{version}"),
            LockedPackage {
                source: json!({"type": "path"}),
                resolved: serde_json::Map::new(),
                integrity: entry.digest,
                dependencies: BTreeMap::new(),
                capabilities: BTreeMap::new(),
            },
        );
        let lock = Lockfile::new(BTreeMap::new(), packages);
        (store_dir, store, lock)
    }

    #[test]
    fn test_entry_relpath_nests_scopes() {
        assert_eq!(
            entry_relpath("@acme/thing@1.2.3").unwrap(),
            PathBuf::from("@acme/thing@1.2.3")
        );
        assert_eq!(
            entry_relpath("plain@1.0.0").unwrap(),
            PathBuf::from("plain@1.0.0")
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_materialize_symlink_mode() {
        let (_store_dir, store, lock) = store_with_package("@acme/thing", "1.2.3");
        let ws = TempDir::new().unwrap();
        let pkgs = ws.path().join("pkgs");

        let report = materialize(&pkgs, &store, &lock, LinkMode::Symlink).unwrap();
        assert_eq!(report.created, vec!["@acme/thing@1.2.3"]);

        let dest = pkgs.join("@acme/thing@1.2.3");
        assert!(dest.symlink_metadata().unwrap().file_type().is_symlink());
        assert!(dest.join("skills/demo/SKILL.md").exists());

        // Second run is a no-op.
        let again = materialize(&pkgs, &store, &lock, LinkMode::Symlink).unwrap();
        assert!(again.created.is_empty());
        assert!(again.updated.is_empty());
    }

    #[test]
    fn test_materialize_copy_mode() {
        let (_store_dir, store, lock) = store_with_package("plain", "1.0.0");
        let ws = TempDir::new().unwrap();
        let pkgs = ws.path().join("pkgs");

        materialize(&pkgs, &store, &lock, LinkMode::Copy).unwrap();
        let dest = pkgs.join("plain@1.0.0");
        assert!(dest.is_dir());
        assert!(!dest.symlink_metadata().unwrap().file_type().is_symlink());
        assert!(dest.join("skills/demo/SKILL.md").is_file());
    }

    #[test]
    fn test_materialize_removes_stale_entries() {
        let (_store_dir, store, lock) = store_with_package("@acme/thing", "1.2.3");
        let ws = TempDir::new().unwrap();
        let pkgs = ws.path().join("pkgs");
        materialize(&pkgs, &store, &lock, LinkMode::Copy).unwrap();

        // A second lockfile without the package drops the entry.
        let empty = Lockfile::new(BTreeMap::new(), BTreeMap::new());
        let report = materialize(&pkgs, &store, &empty, LinkMode::Copy).unwrap();
        assert_eq!(report.removed, vec!["thing@1.2.3"]);
        assert!(!pkgs.join("@acme/thing@1.2.3").exists());
        assert!(!pkgs.join("@acme").exists());
    }

    #[test]
    fn test_missing_store_entry_is_store_error() {
        let (_store_dir, store, mut lock) = store_with_package("plain", "1.0.0");
        let key = "plain@1.0.0".to_string();
        let mut pkg = lock.packages[&key].clone();
        pkg.integrity = "sha256:0000".to_string();
        lock.packages.insert(key, pkg);

        let ws = TempDir::new().unwrap();
        let err = materialize(&ws.path().join("pkgs"), &store, &lock, LinkMode::Copy)
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Store);
    }

    #[cfg(unix)]
    #[test]
    fn test_hardlink_mode_links_files() {
        let (_store_dir, store, lock) = store_with_package("plain", "1.0.0");
        let ws = TempDir::new().unwrap();
        let pkgs = ws.path().join("pkgs");
        materialize(&pkgs, &store, &lock, LinkMode::Hardlink).unwrap();

        use std::os::unix::fs::MetadataExt;
        let linked = pkgs.join("plain@1.0.0/skills/demo/SKILL.md");
        assert!(linked.metadata().unwrap().nlink() >= 2);
    }
}
