//! Update command: re-resolve dependencies and rewrite the lockfile.

use anyhow::Result;
use clap::Args;

use botpack::manifest::Manifest;

use crate::commands::install::{run_pipeline, PipelineParams, SyncPolicy};
use crate::commands::Ctx;

/// Arguments for the update command
#[derive(Args, Debug)]
pub struct UpdateArgs {
    /// Packages to update (all direct dependencies when omitted)
    #[arg(value_name = "PKG")]
    pub names: Vec<String>,

    /// Never touch the network
    #[arg(long)]
    pub offline: bool,

    /// Skip the automatic sync step
    #[arg(long)]
    pub no_sync: bool,
}

pub fn execute(args: UpdateArgs, ctx: &Ctx) -> Result<()> {
    let ws = ctx.workspace()?;
    let manifest = Manifest::load(&ws.manifest_path())?;

    let refresh = if args.names.is_empty() {
        manifest.dependencies.keys().cloned().collect()
    } else {
        for name in &args.names {
            if !manifest.dependencies.contains_key(name) {
                anyhow::bail!("{name} is not a dependency");
            }
        }
        args.names.clone()
    };

    let outcome = run_pipeline(
        ctx,
        &ws,
        PipelineParams {
            offline: args.offline,
            no_sync: args.no_sync,
            refresh,
            sync_policy: SyncPolicy::OnInstall,
            ..PipelineParams::default()
        },
    )?;
    ctx.say(format!(
        "updated; {} package(s) installed{}",
        outcome.package_count,
        if outcome.lock_written { "" } else { " (no changes)" }
    ));
    botpack::output::report_json_ok(
        &ctx.output,
        serde_json::json!({
            "packages": outcome.package_count,
            "lockWritten": outcome.lock_written,
        }),
    );
    Ok(())
}
