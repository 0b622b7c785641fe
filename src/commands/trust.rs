//! Trust command: record allow/deny decisions for capability-bearing
//! packages.

use anyhow::Result;
use clap::{Args, ValueEnum};

use botpack::trust::TrustConfig;

use crate::commands::Ctx;

/// Gateable capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Capability {
    Exec,
    Mcp,
}

/// Arguments for the trust command
#[derive(Args, Debug)]
pub struct TrustArgs {
    /// Package key (`name@version`) or the reserved `__workspace__` key
    #[arg(value_name = "PKG")]
    pub package: String,

    /// Capabilities to allow
    #[arg(long, value_enum, value_name = "CAP")]
    pub allow: Vec<Capability>,

    /// Capabilities to deny
    #[arg(long, value_enum, value_name = "CAP")]
    pub deny: Vec<Capability>,

    /// Pin trust to a content digest (sha256:<hex>)
    #[arg(long, value_name = "DIGEST")]
    pub digest: Option<String>,

    /// Drop the package's trust entry entirely
    #[arg(long, conflicts_with_all = ["allow", "deny", "digest"])]
    pub revoke: bool,
}

pub fn execute(args: TrustArgs, ctx: &Ctx) -> Result<()> {
    let ws = ctx.workspace()?;
    let mut trust = TrustConfig::load(&ws.trust_path())?;

    if args.revoke {
        if !trust.revoke(&args.package) {
            anyhow::bail!("{}: no trust entry recorded", args.package);
        }
        trust.save(&ws.trust_path())?;
        ctx.say(format!("revoked trust for {}", args.package));
        botpack::output::report_json_ok(
            &ctx.output,
            serde_json::json!({"package": args.package, "revoked": true}),
        );
        return Ok(());
    }

    if args.allow.is_empty() && args.deny.is_empty() && args.digest.is_none() {
        anyhow::bail!("specify at least one of --allow, --deny, or --digest");
    }
    for cap in &args.allow {
        if args.deny.contains(cap) {
            anyhow::bail!("cannot both allow and deny {cap:?}");
        }
    }

    let decide = |cap: Capability| -> Option<bool> {
        if args.allow.contains(&cap) {
            Some(true)
        } else if args.deny.contains(&cap) {
            Some(false)
        } else {
            None
        }
    };
    trust.record(
        &args.package,
        decide(Capability::Exec),
        decide(Capability::Mcp),
        args.digest.clone(),
    );
    trust.save(&ws.trust_path())?;

    ctx.say(format!("recorded trust decision for {}", args.package));
    botpack::output::report_json_ok(
        &ctx.output,
        serde_json::json!({"package": args.package}),
    );
    Ok(())
}
