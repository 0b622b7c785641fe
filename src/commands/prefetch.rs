//! Prefetch command: populate the store for every lockfile reference
//! without materializing anything.
//!
//! After a prefetch, `install --offline` succeeds on a disconnected
//! machine.

use anyhow::Result;
use clap::Args;

use crate::commands::install::{run_pipeline, PipelineParams, SyncPolicy};
use crate::commands::Ctx;

/// Arguments for the prefetch command
#[derive(Args, Debug)]
pub struct PrefetchArgs {
    /// Never touch the network (verify the store is already complete)
    #[arg(long)]
    pub offline: bool,
}

pub fn execute(args: PrefetchArgs, ctx: &Ctx) -> Result<()> {
    let ws = ctx.workspace()?;
    let outcome = run_pipeline(
        ctx,
        &ws,
        PipelineParams {
            offline: args.offline,
            no_sync: true,
            sync_policy: SyncPolicy::Never,
            ..PipelineParams::default()
        },
    )?;
    ctx.say(format!("prefetched {} package(s)", outcome.package_count));
    botpack::output::report_json_ok(
        &ctx.output,
        serde_json::json!({"packages": outcome.package_count}),
    );
    Ok(())
}
