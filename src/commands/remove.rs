//! Remove command: drop dependencies from the manifest and re-resolve.

use anyhow::Result;
use clap::Args;

use botpack::manifest::Manifest;

use crate::commands::install::{run_pipeline, PipelineParams, SyncPolicy};
use crate::commands::Ctx;

/// Arguments for the remove command
#[derive(Args, Debug)]
pub struct RemoveArgs {
    /// Dependency names to remove
    #[arg(required = true, value_name = "PKG")]
    pub names: Vec<String>,

    /// Skip the automatic sync step
    #[arg(long)]
    pub no_sync: bool,
}

pub fn execute(args: RemoveArgs, ctx: &Ctx) -> Result<()> {
    let ws = ctx.workspace()?;
    let mut manifest = Manifest::load(&ws.manifest_path())?;

    for name in &args.names {
        if manifest.dependencies.remove(name).is_none() {
            anyhow::bail!("{name} is not a dependency");
        }
    }
    manifest.save(&ws.manifest_path())?;

    // Clean sync so the removed package's outputs disappear with it.
    let outcome = run_pipeline(
        ctx,
        &ws,
        PipelineParams {
            no_sync: args.no_sync,
            sync_policy: SyncPolicy::OnAdd,
            sync_clean: true,
            ..PipelineParams::default()
        },
    )?;
    ctx.say(format!(
        "removed {}; {} package(s) remain",
        args.names.join(", "),
        outcome.package_count
    ));
    botpack::output::report_json_ok(
        &ctx.output,
        serde_json::json!({"packages": outcome.package_count}),
    );
    Ok(())
}
