//! Sync application: stage, fsync, swap.
//!
//! Applying a plan never mutates the live target root in place. The new
//! materialization is staged under `.botpack/generated/<target>.new/`
//! (seeded with a copy of the current root so unmanaged files survive),
//! fsync'd, and swapped in with two renames:
//!
//! 1. `<root>` → `<root>.old`
//! 2. staging → `<root>`
//! 3. delete `<root>.old`
//!
//! If anything fails between the renames, `<root>.old` is moved back. A
//! crash leaves either `<root>.old` or the staging directory behind; both
//! are cleaned up at the start of the next run, so the target root is only
//! ever the previous state or the new state, never a mix.

use std::collections::BTreeSet;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use crate::error::{Error, Result};
use crate::manifest::LinkMode;
use crate::sync::plan::{SyncOp, SyncPlan};
use crate::sync::state::{checksum_path, SyncState};
use crate::vstore;
use crate::workspace::Workspace;

/// Flags for one apply run.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApplyOptions {
    pub dry_run: bool,
    pub clean: bool,
    pub force: bool,
    pub link_mode: LinkMode,
}

/// What an apply did (or would do, under `--dry-run`).
#[derive(Debug, Clone, Default)]
pub struct SyncOutcome {
    pub target: String,
    pub created: Vec<String>,
    pub updated: Vec<String>,
    pub removed: Vec<String>,
    /// Trust-denied servers that were omitted from generated output.
    pub blocked: Vec<String>,
    /// True when nothing needed to change and no file was written.
    pub up_to_date: bool,
    pub dry_run: bool,
}

/// Apply a plan to the workspace.
pub fn apply_plan(
    ws: &Workspace,
    plan: &SyncPlan,
    prev: &SyncState,
    opts: ApplyOptions,
) -> Result<SyncOutcome> {
    let target_root = ws.root().join(&plan.target.root);
    cleanup_residue(ws, &plan.target.name, &target_root)?;

    // Drift detection runs before anything is written. A recorded path was
    // modified outside botpack when it is neither the link we created nor
    // content matching what we wrote; refuse to touch it without --force.
    // A link still pointing at its recorded target is tool-managed even if
    // the linked content changed (the change came through the source).
    let mut drifted = Vec::new();
    for (rel, entry) in &prev.paths {
        let abs = ws.root().join(rel);
        let Ok(meta) = abs.symlink_metadata() else {
            continue;
        };
        if meta.file_type().is_symlink() {
            let managed = match (&entry.link, fs::read_link(&abs)) {
                (Some(expected), Ok(target)) => target.to_string_lossy() == expected.as_str(),
                _ => false,
            };
            if !managed {
                drifted.push(rel.clone());
            }
            continue;
        }
        if let Some(actual) = checksum_path(&abs) {
            if actual != entry.checksum {
                drifted.push(rel.clone());
            }
        }
    }
    if !drifted.is_empty() && !opts.force {
        return Err(Error::SyncDrift { paths: drifted });
    }

    // Change set: which destinations differ from what the plan wants.
    let mut created = Vec::new();
    let mut updated = Vec::new();
    for (rel, desired) in &plan.next_paths {
        let abs = ws.root().join(rel);
        match abs.symlink_metadata() {
            Err(_) => created.push(rel.clone()),
            Ok(meta) => {
                let current_ok = if meta.file_type().is_symlink() {
                    let target = fs::read_link(&abs)
                        .ok()
                        .map(|t| t.to_string_lossy().to_string());
                    (desired.link.is_some() && target.as_deref() == desired.link.as_deref())
                        || checksum_path(&abs).as_deref() == Some(desired.checksum.as_str())
                } else {
                    checksum_path(&abs).as_deref() == Some(desired.checksum.as_str())
                };
                if !current_ok {
                    updated.push(rel.clone());
                }
            }
        }
    }

    // `--clean` removes paths recorded previously but absent from the plan.
    let mut removed = Vec::new();
    if opts.clean {
        for rel in prev.paths.keys() {
            if !plan.next_paths.contains_key(rel) && ws.root().join(rel).exists() {
                removed.push(rel.clone());
            }
        }
    }

    let state_path = ws.sync_state_path(&plan.target.name);
    let mut next_state = build_state(plan);
    // Paths from earlier syncs that are still on disk stay recorded until
    // a `--clean` actually removes them; otherwise a later clean would not
    // know they are ours.
    for (rel, entry) in &prev.paths {
        if next_state.paths.contains_key(rel) || removed.contains(rel) {
            continue;
        }
        if ws.root().join(rel).symlink_metadata().is_ok() {
            next_state.paths.insert(rel.clone(), entry.clone());
        }
    }

    if created.is_empty() && updated.is_empty() && removed.is_empty() {
        // Nothing to write; keep state current only if it drifted from the
        // plan (e.g. a config-hash change without output changes).
        if !opts.dry_run && SyncState::load(&state_path) != next_state {
            next_state.save(&state_path)?;
        }
        debug!("target {} already up to date", plan.target.name);
        return Ok(SyncOutcome {
            target: plan.target.name.clone(),
            blocked: plan.blocked.clone(),
            up_to_date: true,
            dry_run: opts.dry_run,
            ..SyncOutcome::default()
        });
    }

    if opts.dry_run {
        return Ok(SyncOutcome {
            target: plan.target.name.clone(),
            created,
            updated,
            removed,
            blocked: plan.blocked.clone(),
            up_to_date: false,
            dry_run: true,
        });
    }

    let staging = staging_dir(ws, &plan.target.name);
    if staging.exists() {
        fs::remove_dir_all(&staging)?;
    }
    fs::create_dir_all(staging.parent().expect("generated dir has a parent"))?;

    // Seed staging with the current root so unmanaged files survive the
    // swap untouched.
    if target_root.exists() {
        copy_dir(&target_root, &staging)?;
    } else {
        fs::create_dir_all(&staging)?;
    }

    let removal_set: BTreeSet<&String> = removed.iter().collect();
    run_ops(ws, plan, &staging, &target_root, &removal_set, opts.link_mode).map_err(|e| {
        let _ = fs::remove_dir_all(&staging);
        e
    })?;

    fsync_tree(&staging);
    swap(&target_root, &staging).map_err(|e| Error::SyncApply {
        target: plan.target.name.clone(),
        message: e.to_string(),
    })?;

    // State is written only after the swap has fully landed.
    next_state.save(&state_path)?;

    info!(
        "synced {}: {} created, {} updated, {} removed",
        plan.target.name,
        created.len(),
        updated.len(),
        removed.len()
    );
    Ok(SyncOutcome {
        target: plan.target.name.clone(),
        created,
        updated,
        removed,
        blocked: plan.blocked.clone(),
        up_to_date: false,
        dry_run: false,
    })
}

fn build_state(plan: &SyncPlan) -> SyncState {
    let mut state = SyncState::new(&plan.target.name, &plan.config_hash());
    state.paths = plan.next_paths.clone();
    state
}

fn staging_dir(ws: &Workspace, target: &str) -> PathBuf {
    let base = ws.generated_dir(target);
    base.with_file_name(format!("{target}.new"))
}

fn old_root(target_root: &Path) -> PathBuf {
    let name = target_root
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "root".to_string());
    target_root.with_file_name(format!("{name}.old"))
}

/// Put the world back together after a crash: a leftover `<root>.old`
/// without a live root is the previous materialization, so restore it;
/// with a live root it is residue from after a completed swap.
fn cleanup_residue(ws: &Workspace, target: &str, target_root: &Path) -> Result<()> {
    let old = old_root(target_root);
    if old.exists() {
        if target_root.exists() {
            warn!("removing stale {}", old.display());
            fs::remove_dir_all(&old)?;
        } else {
            warn!("restoring {} from {}", target_root.display(), old.display());
            fs::rename(&old, target_root)?;
        }
    }
    let staging = staging_dir(ws, target);
    if staging.exists() {
        fs::remove_dir_all(&staging)?;
    }
    Ok(())
}

fn run_ops(
    ws: &Workspace,
    plan: &SyncPlan,
    staging: &Path,
    target_root: &Path,
    removals: &BTreeSet<&String>,
    link_mode: LinkMode,
) -> Result<()> {
    let rebase = |dst: &Path| -> Result<PathBuf> {
        let abs = ws.root().join(dst);
        let rel = abs.strip_prefix(target_root).map_err(|_| Error::SyncApply {
            target: plan.target.name.clone(),
            message: format!("planned path {} escapes target root", dst.display()),
        })?;
        Ok(staging.join(rel))
    };

    for op in &plan.ops {
        match op {
            SyncOp::CreateDir { dst } => {
                fs::create_dir_all(rebase(dst)?)?;
            }
            SyncOp::Link { src, dst } => {
                let staged = rebase(dst)?;
                remove_any(&staged)?;
                link_entry(src, &staged, link_mode)?;
            }
            SyncOp::WriteFile { dst, bytes } => {
                let staged = rebase(dst)?;
                if let Some(parent) = staged.parent() {
                    fs::create_dir_all(parent)?;
                }
                remove_any(&staged)?;
                fs::write(&staged, bytes)?;
            }
            SyncOp::Remove { dst } => {
                remove_any(&rebase(dst)?)?;
            }
        }
    }

    // Explicit `--clean` removals recorded in earlier syncs.
    for rel in removals {
        let abs = ws.root().join(rel.as_str());
        if let Ok(inner) = abs.strip_prefix(target_root) {
            remove_any(&staging.join(inner))?;
        }
    }
    Ok(())
}

/// Materialize one planned link with the configured mode. Directories (a
/// whole skill) symlink or copy; plain files may also hardlink.
fn link_entry(src: &Path, dst: &Path, mode: LinkMode) -> Result<()> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)?;
    }
    let src_is_dir = src.is_dir();
    match mode {
        LinkMode::Symlink => symlink_any(src, dst),
        LinkMode::Hardlink => {
            if src_is_dir {
                vstore::link_tree(src, dst, LinkMode::Hardlink)
            } else {
                fs::hard_link(src, dst).map_err(Into::into)
            }
        }
        LinkMode::Copy => copy_any(src, dst),
        LinkMode::Auto => {
            if symlink_any(src, dst).is_ok() {
                return Ok(());
            }
            remove_any(dst)?;
            if !src_is_dir && fs::hard_link(src, dst).is_ok() {
                return Ok(());
            }
            remove_any(dst)?;
            copy_any(src, dst)
        }
    }
}

fn symlink_any(src: &Path, dst: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        std::os::unix::fs::symlink(src, dst)?;
        Ok(())
    }
    #[cfg(not(unix))]
    {
        let _ = (src, dst);
        Err(Error::Generic("symlinks unavailable".to_string()))
    }
}

fn copy_any(src: &Path, dst: &Path) -> Result<()> {
    if src.is_dir() {
        copy_dir(src, dst)
    } else {
        fs::copy(src, dst)?;
        Ok(())
    }
}

fn copy_dir(src: &Path, dst: &Path) -> Result<()> {
    fs::create_dir_all(dst)?;
    for entry in walkdir::WalkDir::new(src).min_depth(1).follow_links(false) {
        let entry = entry.map_err(|e| Error::Generic(e.to_string()))?;
        let rel = entry.path().strip_prefix(src).expect("child of src");
        let to = dst.join(rel);
        let file_type = entry.file_type();
        if file_type.is_dir() {
            fs::create_dir_all(&to)?;
        } else if file_type.is_symlink() {
            let link = fs::read_link(entry.path())?;
            #[cfg(unix)]
            std::os::unix::fs::symlink(&link, &to)?;
            #[cfg(not(unix))]
            let _ = link;
        } else if file_type.is_file() {
            if let Some(parent) = to.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &to)?;
        }
    }
    Ok(())
}

fn remove_any(path: &Path) -> Result<()> {
    match path.symlink_metadata() {
        Err(_) => Ok(()),
        Ok(meta) => {
            if meta.is_dir() {
                fs::remove_dir_all(path)?;
            } else {
                fs::remove_file(path)?;
            }
            Ok(())
        }
    }
}

/// Best-effort fsync of every file and directory under `root`. The swap
/// only happens after this pass.
fn fsync_tree(root: &Path) {
    for entry in walkdir::WalkDir::new(root).follow_links(false).into_iter().flatten() {
        if entry.file_type().is_symlink() {
            continue;
        }
        if let Ok(f) = File::open(entry.path()) {
            let _ = f.sync_all();
        }
    }
}

/// The two-rename swap with rollback.
fn swap(target_root: &Path, staging: &Path) -> std::io::Result<()> {
    let old = old_root(target_root);
    if target_root.exists() {
        fs::rename(target_root, &old)?;
        if let Err(e) = fs::rename(staging, target_root) {
            // Roll back: the previous materialization must stay intact.
            let _ = fs::rename(&old, target_root);
            return Err(e);
        }
        fs::remove_dir_all(&old)?;
    } else {
        if let Some(parent) = target_root.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(staging, target_root)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets;
    use crate::manifest::Manifest;
    use crate::sync::plan::{build_plan, builtin, PlanInput};
    use crate::trust::TrustConfig;
    use std::fs;
    use tempfile::TempDir;

    struct Fixture {
        _tmp: TempDir,
        ws: Workspace,
        manifest: Manifest,
        trust: TrustConfig,
    }

    impl Fixture {
        fn new() -> Self {
            let tmp = TempDir::new().unwrap();
            let ws = Workspace::at(tmp.path());
            fs::create_dir_all(tmp.path().join("assets/skills/fetch_web")).unwrap();
            fs::write(
                tmp.path().join("assets/skills/fetch_web/SKILL.md"),
                "---\nname: fetch_web\n---\nbody\n",
            )
            .unwrap();
            Self {
                _tmp: tmp,
                ws,
                manifest: Manifest::default(),
                trust: TrustConfig::default(),
            }
        }

        fn plan(&self) -> crate::sync::plan::SyncPlan {
            let index = assets::scan(&self.ws.root().join("assets")).unwrap();
            build_plan(&PlanInput {
                target: builtin("claude").unwrap(),
                workspace_prefix: "workspace".to_string(),
                workspace_index: &index,
                packages: &[],
                manifest: &self.manifest,
                trust: &self.trust,
            })
            .unwrap()
        }

        fn apply(&self, opts: ApplyOptions) -> Result<SyncOutcome> {
            let plan = self.plan();
            let prev = SyncState::load(&self.ws.sync_state_path("claude"));
            apply_plan(&self.ws, &plan, &prev, opts)
        }
    }

    #[test]
    fn test_apply_creates_materialization_and_state() {
        let fx = Fixture::new();
        let outcome = fx.apply(ApplyOptions::default()).unwrap();
        assert!(!outcome.up_to_date);
        assert_eq!(outcome.created.len(), 1);

        let skill_md = fx
            .ws
            .root()
            .join(".claude/skills/workspace.fetch_web/SKILL.md");
        assert!(skill_md.exists());

        let state = SyncState::load(&fx.ws.sync_state_path("claude"));
        assert!(state
            .paths
            .contains_key(".claude/skills/workspace.fetch_web"));
        // No staging or .old residue.
        assert!(!fx.ws.root().join(".claude.old").exists());
        assert!(!fx.ws.root().join(".botpack/generated/claude.new").exists());
    }

    #[test]
    fn test_second_apply_is_noop() {
        let fx = Fixture::new();
        fx.apply(ApplyOptions::default()).unwrap();
        let second = fx.apply(ApplyOptions::default()).unwrap();
        assert!(second.up_to_date);
        assert!(second.created.is_empty() && second.updated.is_empty());
    }

    #[test]
    fn test_dry_run_writes_nothing() {
        let fx = Fixture::new();
        let outcome = fx
            .apply(ApplyOptions {
                dry_run: true,
                ..ApplyOptions::default()
            })
            .unwrap();
        assert!(outcome.dry_run);
        assert_eq!(outcome.created.len(), 1);
        assert!(!fx.ws.root().join(".claude").exists());
        assert!(!fx.ws.sync_state_path("claude").exists());
    }

    #[test]
    fn test_drift_detected_and_force_overrides() {
        let fx = Fixture::new();
        fx.apply(ApplyOptions::default()).unwrap();

        // Modify the materialized file behind botpack's back. With the
        // default symlink mode the link target must change, so replace the
        // link with a divergent copy.
        let out_dir = fx.ws.root().join(".claude/skills/workspace.fetch_web");
        remove_any(&out_dir).unwrap();
        fs::create_dir_all(&out_dir).unwrap();
        fs::write(out_dir.join("SKILL.md"), "locally edited").unwrap();

        let err = fx.apply(ApplyOptions::default()).unwrap_err();
        assert!(matches!(err, Error::SyncDrift { .. }));
        // The local edit is preserved.
        assert_eq!(
            fs::read_to_string(out_dir.join("SKILL.md")).unwrap(),
            "locally edited"
        );

        let outcome = fx
            .apply(ApplyOptions {
                force: true,
                ..ApplyOptions::default()
            })
            .unwrap();
        assert!(!outcome.up_to_date);
        let restored = fs::read_to_string(
            fx.ws
                .root()
                .join(".claude/skills/workspace.fetch_web/SKILL.md"),
        )
        .unwrap();
        assert!(restored.contains("body"));
    }

    #[test]
    fn test_unmanaged_files_survive_swap() {
        let fx = Fixture::new();
        let settings = fx.ws.root().join(".claude/settings.json");
        fs::create_dir_all(settings.parent().unwrap()).unwrap();
        fs::write(&settings, "{\"user\": true}").unwrap();

        fx.apply(ApplyOptions::default()).unwrap();
        assert_eq!(fs::read_to_string(&settings).unwrap(), "{\"user\": true}");
    }

    #[test]
    fn test_clean_removes_only_recorded_paths() {
        let fx = Fixture::new();
        fx.apply(ApplyOptions::default()).unwrap();

        // Drop the skill from the workspace; without --clean the old output
        // stays, with --clean it goes.
        fs::remove_dir_all(fx.ws.root().join("assets/skills/fetch_web")).unwrap();

        let unmanaged = fx.ws.root().join(".claude/skills/keep.txt");
        fs::write(&unmanaged, "user file").unwrap();

        fx.apply(ApplyOptions {
            clean: true,
            ..ApplyOptions::default()
        })
        .unwrap();
        assert!(!fx
            .ws
            .root()
            .join(".claude/skills/workspace.fetch_web")
            .exists());
        assert!(unmanaged.exists());
    }

    #[test]
    fn test_crash_residue_old_root_restored() {
        let fx = Fixture::new();
        fx.apply(ApplyOptions::default()).unwrap();

        // Simulate a crash between the two renames: root moved aside, new
        // root never arrived.
        let root = fx.ws.root().join(".claude");
        let old = fx.ws.root().join(".claude.old");
        fs::rename(&root, &old).unwrap();
        assert!(!root.exists());

        let outcome = fx.apply(ApplyOptions::default()).unwrap();
        assert!(root.join("skills/workspace.fetch_web/SKILL.md").exists());
        assert!(!old.exists());
        assert!(outcome.up_to_date);
    }
}
