//! Prune command: delete store entries not referenced by the lockfile.

use anyhow::Result;
use clap::Args;

use botpack::lockfile::Lockfile;

use crate::commands::Ctx;

/// Arguments for the prune command
#[derive(Args, Debug)]
pub struct PruneArgs {
    /// Report what would be removed without deleting anything
    #[arg(short = 'n', long)]
    pub dry_run: bool,
}

pub fn execute(args: PruneArgs, ctx: &Ctx) -> Result<()> {
    let ws = ctx.workspace()?;
    let lock = Lockfile::load(&ws.lockfile_path())?;
    let store = ctx.store();

    let report = store.prune(&lock.referenced_digests(), args.dry_run)?;
    for digest in &report.removed {
        ctx.say(digest);
    }
    ctx.say(format!(
        "{} {} entr{}, {} bytes",
        if args.dry_run { "would remove" } else { "removed" },
        report.removed.len(),
        if report.removed.len() == 1 { "y" } else { "ies" },
        report.reclaimed_bytes
    ));
    botpack::output::report_json_ok(
        &ctx.output,
        serde_json::json!({
            "removed": report.removed,
            "reclaimedBytes": report.reclaimed_bytes,
            "dryRun": args.dry_run,
        }),
    );
    Ok(())
}
