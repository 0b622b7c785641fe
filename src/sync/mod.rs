//! # Sync Engine
//!
//! Materializes the installed graph into runtime-specific directory layouts
//! deterministically, in three stages:
//!
//! 1. **Plan** ([`plan`]): compute the operations and resulting state for
//!    one target, including trust gating of MCP servers.
//! 2. **Apply** ([`apply`]): stage, fsync, and atomically swap the target
//!    root; write sync state afterwards.
//! 3. **Watch** ([`watch`]): re-plan on filesystem events.
//!
//! [`sync_target`] glues the stages together for one target; callers that
//! need to intercept undecided trust (the interactive prompt) plan and
//! apply separately.

pub mod apply;
pub mod plan;
pub mod state;
pub mod watch;

pub use apply::{apply_plan, ApplyOptions, SyncOutcome};
pub use plan::{build_plan, resolve_target, PackageAssets, PlanInput, SyncPlan, TargetSpec};
pub use state::SyncState;

use crate::assets;
use crate::error::{Error, Result};
use crate::lockfile::{split_key, Lockfile};
use crate::manifest::Manifest;
use crate::store::Store;
use crate::trust::TrustConfig;
use crate::vstore;
use crate::workspace::Workspace;

/// Read every lockfile package's assets out of the virtual store.
///
/// The scan sees the virtual store as of the lockfile: packages whose
/// entries are missing are an error (install must run first).
pub fn package_assets(ws: &Workspace, store: &Store, lock: &Lockfile) -> Result<Vec<PackageAssets>> {
    let mut out = Vec::new();
    for (key, pkg) in &lock.packages {
        let (name, _version) = split_key(key).ok_or_else(|| Error::Generic(format!(
            "invalid package key in lockfile: {key:?}"
        )))?;
        let entry = ws.pkgs_dir().join(vstore::entry_relpath(key)?);
        let root = if entry.exists() {
            entry
        } else {
            // Fall back to the store payload; the virtual store may be
            // trimmed while the store survives.
            store.payload_path(&pkg.integrity)
        };
        if !root.exists() {
            return Err(Error::Store {
                digest: pkg.integrity.clone(),
                message: format!("{key}: not installed; run `botpack install` first"),
            });
        }
        let index = assets::scan(&root)?;
        out.push(PackageAssets {
            key: key.clone(),
            name: name.to_string(),
            prefix: plan::sanitize_prefix(name),
            integrity: pkg.integrity.clone(),
            index,
        });
    }
    Ok(out)
}

/// Workspace output prefix: the configured asset-package name, sanitized,
/// or `workspace`.
pub fn workspace_prefix(manifest: &Manifest) -> String {
    match &manifest.workspace.name {
        Some(name) if !name.is_empty() => plan::sanitize_prefix(name),
        _ => "workspace".to_string(),
    }
}

/// Plan one target from the current workspace, lockfile, and trust state.
pub fn plan_target(
    ws: &Workspace,
    manifest: &Manifest,
    store: &Store,
    lock: Option<&Lockfile>,
    trust: &TrustConfig,
    target_name: &str,
) -> Result<SyncPlan> {
    let target = resolve_target(target_name, manifest)?;
    let ws_index = assets::scan(&ws.assets_dir(&manifest.workspace.dir))?;
    let packages = match lock {
        Some(lock) => package_assets(ws, store, lock)?,
        None => Vec::new(),
    };
    build_plan(&PlanInput {
        target,
        workspace_prefix: workspace_prefix(manifest),
        workspace_index: &ws_index,
        packages: &packages,
        manifest,
        trust,
    })
}

/// Plan and apply one target, refusing to materialize past undecided trust.
pub fn sync_target(
    ws: &Workspace,
    manifest: &Manifest,
    store: &Store,
    lock: Option<&Lockfile>,
    trust: &TrustConfig,
    target_name: &str,
    opts: ApplyOptions,
) -> Result<SyncOutcome> {
    let plan = plan_target(ws, manifest, store, lock, trust, target_name)?;
    if let Some((key, reason)) = plan.undecided.first() {
        return Err(Error::TrustBlocked {
            key: key.clone(),
            reason: reason.clone(),
        });
    }
    let prev = SyncState::load(&ws.sync_state_path(target_name));
    apply_plan(ws, &plan, &prev, opts)
}

/// The targets `sync` operates on when none is named: every target
/// configured in the manifest, or `claude` when none are.
pub fn default_targets(manifest: &Manifest) -> Vec<String> {
    if manifest.targets.is_empty() {
        vec!["claude".to_string()]
    } else {
        manifest.targets.keys().cloned().collect()
    }
}
