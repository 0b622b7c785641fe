//! Audit command: list capability-bearing lockfile packages whose trust is
//! not recorded (or recorded as deny).

use anyhow::Result;
use clap::Args;

use botpack::error::Error;
use botpack::lockfile::Lockfile;
use botpack::trust::{TrustConfig, TrustDecision};

use crate::commands::Ctx;

/// Arguments for the audit command
#[derive(Args, Debug)]
pub struct AuditArgs {}

pub fn execute(_args: AuditArgs, ctx: &Ctx) -> Result<()> {
    let ws = ctx.workspace()?;
    let lock = Lockfile::load(&ws.lockfile_path())?;
    let trust = TrustConfig::load(&ws.trust_path())?;

    let mut problems = Vec::new();
    for (key, pkg) in &lock.packages {
        let needs_exec = pkg.capabilities.get("exec").copied().unwrap_or(false);
        let needs_mcp = pkg.capabilities.get("mcp").copied().unwrap_or(false);
        if !needs_exec && !needs_mcp {
            continue;
        }
        match trust.check_package(key, Some(&pkg.integrity), needs_exec, needs_mcp) {
            TrustDecision::Allow => {}
            TrustDecision::Deny(reason) | TrustDecision::Undecided(reason) => {
                problems.push((key.clone(), reason));
            }
        }
    }

    for (_, reason) in &problems {
        ctx.say(reason);
    }
    if let Some((key, reason)) = problems.first() {
        return Err(Error::TrustBlocked {
            key: key.clone(),
            reason: reason.clone(),
        }
        .into());
    }

    ctx.say("all capability-bearing packages are trusted");
    botpack::output::report_json_ok(&ctx.output, serde_json::json!({"problems": []}));
    Ok(())
}
