//! Install command: the full pipeline.
//!
//! `manifest → resolve → fetch+store → lock → virtual store → sync →
//! catalog`, with orderings the rest of the tool relies on: the lockfile is
//! written only after every store entry it references is committed, the
//! virtual store only after the lockfile, sync state only after the swap,
//! and the catalog only after the scan.

use anyhow::Result;
use clap::Args;

use botpack::catalog;
use botpack::error::Error;
use botpack::fetch::Fetcher;
use botpack::lockfile::Lockfile;
use botpack::manifest::Manifest;
use botpack::resolver::{ResolveOptions, Resolver};
use botpack::sync::{self, ApplyOptions};
use botpack::trust::TrustConfig;
use botpack::vstore;
use botpack::workspace::Workspace;

use crate::commands::Ctx;

/// Arguments for the install command
#[derive(Args, Debug)]
pub struct InstallArgs {
    /// Fail instead of writing when resolution would change the lockfile
    #[arg(long)]
    pub frozen_lockfile: bool,

    /// Never touch the network; error on anything not already in the store
    #[arg(long)]
    pub offline: bool,

    /// Skip the automatic sync step regardless of manifest policy
    #[arg(long)]
    pub no_sync: bool,
}

/// Which manifest sync policy gates the automatic sync step.
#[derive(Debug, Clone, Copy)]
pub enum SyncPolicy {
    OnAdd,
    OnInstall,
    Never,
}

/// Parameters for the shared pipeline, used by `add`, `remove`, `update`,
/// and `install` itself.
pub struct PipelineParams {
    pub offline: bool,
    pub frozen: bool,
    pub no_sync: bool,
    /// Names whose lockfile pins are ignored (`update`).
    pub refresh: Vec<String>,
    pub sync_policy: SyncPolicy,
    /// Extra sync flags (remove passes clean).
    pub sync_clean: bool,
}

impl Default for PipelineParams {
    fn default() -> Self {
        Self {
            offline: false,
            frozen: false,
            no_sync: false,
            refresh: Vec::new(),
            sync_policy: SyncPolicy::OnInstall,
            sync_clean: false,
        }
    }
}

pub fn execute(args: InstallArgs, ctx: &Ctx) -> Result<()> {
    let ws = ctx.workspace()?;
    let outcome = run_pipeline(
        ctx,
        &ws,
        PipelineParams {
            offline: args.offline,
            frozen: args.frozen_lockfile,
            no_sync: args.no_sync,
            ..PipelineParams::default()
        },
    )?;
    ctx.say(format!(
        "installed {} package(s){}",
        outcome.package_count,
        if outcome.lock_written { "" } else { " (lockfile unchanged)" }
    ));
    botpack::output::report_json_ok(
        &ctx.output,
        serde_json::json!({
            "packages": outcome.package_count,
            "lockWritten": outcome.lock_written,
            "synced": outcome.synced_targets,
        }),
    );
    Ok(())
}

/// What a pipeline run did.
pub struct PipelineOutcome {
    pub package_count: usize,
    pub lock_written: bool,
    pub synced_targets: Vec<String>,
}

/// Run resolve → store → lock → vstore → sync → catalog under the
/// workspace lock.
pub fn run_pipeline(ctx: &Ctx, ws: &Workspace, params: PipelineParams) -> Result<PipelineOutcome> {
    let manifest = Manifest::load(&ws.manifest_path())?;
    let _guard = ws.lock()?;

    let store = ctx.store();
    store.sweep_stale_tmp()?;
    let registry = ctx.registry()?;
    let fetcher = Fetcher::new();

    let lock_path = ws.lockfile_path();
    let previous = if lock_path.exists() {
        Some(Lockfile::load(&lock_path)?)
    } else {
        None
    };

    let resolver = Resolver {
        workspace_root: ws.root(),
        fetcher: &fetcher,
        store: &store,
        registry: &registry,
        previous: previous.as_ref(),
        options: ResolveOptions {
            offline: params.offline,
            refresh: params.refresh.clone(),
        },
    };
    let resolution = resolver.resolve(&manifest.dependencies)?;
    let lock = resolution.to_lockfile();
    let lock_bytes = lock.to_canonical_json()?;

    let on_disk = std::fs::read_to_string(&lock_path).ok();
    let changed = on_disk.as_deref() != Some(lock_bytes.as_str());

    if params.frozen {
        if changed {
            return Err(Error::FrozenLockfile {
                message: match on_disk {
                    None => "no lockfile on disk".to_string(),
                    Some(_) => "resolution no longer matches botpack.lock".to_string(),
                },
            }
            .into());
        }
    } else if changed {
        lock.save(&lock_path)?;
    }

    vstore::materialize(&ws.pkgs_dir(), &store, &lock, manifest.sync.link_mode)?;

    let auto_sync = match params.sync_policy {
        SyncPolicy::OnAdd => manifest.sync.on_add,
        SyncPolicy::OnInstall => manifest.sync.on_install,
        SyncPolicy::Never => false,
    };
    let mut synced = Vec::new();
    if auto_sync && !params.no_sync {
        let trust = TrustConfig::load(&ws.trust_path())?;
        for target in sync::default_targets(&manifest) {
            let outcome = sync::sync_target(
                ws,
                &manifest,
                &store,
                Some(&lock),
                &trust,
                &target,
                ApplyOptions {
                    clean: params.sync_clean,
                    link_mode: manifest.sync.link_mode,
                    ..ApplyOptions::default()
                },
            )?;
            if !outcome.up_to_date {
                synced.push(target.clone());
            }
        }

        if manifest.sync.catalog {
            write_catalog(ws, &manifest, &store, &lock)?;
        }
    }

    Ok(PipelineOutcome {
        package_count: lock.packages.len(),
        lock_written: changed && !params.frozen,
        synced_targets: synced,
    })
}

/// Emit `.botpack/catalog.json` from a fresh scan.
pub fn write_catalog(
    ws: &Workspace,
    manifest: &Manifest,
    store: &botpack::store::Store,
    lock: &Lockfile,
) -> Result<()> {
    let ws_index = botpack::assets::scan(&ws.assets_dir(&manifest.workspace.dir))?;
    let packages = sync::package_assets(ws, store, lock)?;
    let generated_at = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
    let doc = catalog::build(
        &manifest.workspace.dir,
        &ws_index,
        &packages,
        Some(&generated_at),
    )?;
    catalog::write(&ws.catalog_path(), &doc)?;
    Ok(())
}
