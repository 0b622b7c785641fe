//! Sync command: materialize assets into target runtime layouts.

use anyhow::Result;
use clap::Args;
use dialoguer::theme::ColorfulTheme;
use dialoguer::Confirm;

use botpack::error::Error;
use botpack::lockfile::Lockfile;
use botpack::manifest::Manifest;
use botpack::sync::{self, watch::watch_and_sync, ApplyOptions, SyncState};
use botpack::trust::TrustConfig;
use botpack::workspace::Workspace;

use crate::commands::{install, Ctx};

/// Arguments for the sync command
#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Target to materialize (defaults to every configured target)
    pub target: Option<String>,

    /// Print the plan without writing anything
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Also remove paths from previous syncs absent from the new plan
    #[arg(long)]
    pub clean: bool,

    /// Overwrite paths modified outside botpack
    #[arg(long)]
    pub force: bool,

    /// Keep running and re-sync on filesystem changes
    #[arg(long, conflicts_with = "dry_run")]
    pub watch: bool,
}

pub fn execute(args: SyncArgs, ctx: &Ctx) -> Result<()> {
    let ws = ctx.workspace()?;
    let manifest = Manifest::load(&ws.manifest_path())?;
    let targets = match &args.target {
        Some(name) => vec![name.clone()],
        None => sync::default_targets(&manifest),
    };

    if args.watch {
        let watch_paths = vec![ws.assets_dir(&manifest.workspace.dir), ws.pkgs_dir()];
        ctx.say("watching for changes (ctrl-c to stop)");
        return Ok(watch_and_sync(&watch_paths, || {
            sync_all(ctx, &ws, &targets, &args)
                .map(|_| ())
                .map_err(|e| Error::Generic(e.to_string()))
        })?);
    }

    let outcomes = sync_all(ctx, &ws, &targets, &args)?;
    for outcome in &outcomes {
        if outcome.up_to_date {
            ctx.say(format!("{}: up to date", outcome.target));
        } else {
            ctx.say(format!(
                "{}{}: {} created, {} updated, {} removed",
                outcome.target,
                if outcome.dry_run { " (dry run)" } else { "" },
                outcome.created.len(),
                outcome.updated.len(),
                outcome.removed.len()
            ));
        }
        for blocked in &outcome.blocked {
            ctx.say(format!("  gated: {blocked}"));
        }
    }
    botpack::output::report_json_ok(
        &ctx.output,
        serde_json::json!({
            "targets": outcomes
                .iter()
                .map(|o| {
                    serde_json::json!({
                        "target": o.target,
                        "upToDate": o.up_to_date,
                        "created": o.created,
                        "updated": o.updated,
                        "removed": o.removed,
                        "blocked": o.blocked,
                    })
                })
                .collect::<Vec<_>>(),
        }),
    );
    Ok(())
}

fn sync_all(
    ctx: &Ctx,
    ws: &Workspace,
    targets: &[String],
    args: &SyncArgs,
) -> Result<Vec<sync::SyncOutcome>> {
    let _guard = ws.lock()?;
    let manifest = Manifest::load(&ws.manifest_path())?;
    let store = ctx.store();
    let lock_path = ws.lockfile_path();
    let lock = if lock_path.exists() {
        Some(Lockfile::load(&lock_path)?)
    } else {
        None
    };
    let mut trust = TrustConfig::load(&ws.trust_path())?;

    let opts = ApplyOptions {
        dry_run: args.dry_run,
        clean: args.clean,
        force: args.force,
        link_mode: manifest.sync.link_mode,
    };

    let mut outcomes = Vec::new();
    for target in targets {
        let mut plan = sync::plan_target(ws, &manifest, &store, lock.as_ref(), &trust, target)?;

        if !plan.undecided.is_empty() {
            if ctx.output.interactive() {
                prompt_for_trust(ws, &mut trust, &plan.undecided)?;
                plan = sync::plan_target(ws, &manifest, &store, lock.as_ref(), &trust, target)?;
            }
            if let Some((key, reason)) = plan.undecided.first() {
                return Err(Error::TrustBlocked {
                    key: key.clone(),
                    reason: reason.clone(),
                }
                .into());
            }
        }

        let prev = SyncState::load(&ws.sync_state_path(target));
        outcomes.push(sync::apply_plan(ws, &plan, &prev, opts)?);
    }

    if !args.dry_run && manifest.sync.catalog {
        if let Some(lock) = &lock {
            install::write_catalog(ws, &manifest, &store, lock)?;
        }
    }
    Ok(outcomes)
}

/// Ask the user about each undecided package and record the answers.
fn prompt_for_trust(
    ws: &Workspace,
    trust: &mut TrustConfig,
    undecided: &[(String, String)],
) -> Result<()> {
    let mut seen = std::collections::BTreeSet::new();
    let mut changed = false;
    for (key, reason) in undecided {
        if !seen.insert(key.clone()) {
            continue;
        }
        let allow = Confirm::with_theme(&ColorfulTheme::default())
            .with_prompt(format!("{reason}. Allow exec/mcp for {key}?"))
            .default(false)
            .interact()?;
        trust.record(key, Some(allow), Some(allow), None);
        changed = true;
    }
    if changed {
        trust.save(&ws.trust_path())?;
    }
    Ok(())
}
