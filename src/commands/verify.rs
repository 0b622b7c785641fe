//! Verify command: re-hash store payloads against the lockfile, and
//! optionally smoke-test installed MCP servers.
//!
//! The default pass proves the bytes in the store still match the
//! lockfile's integrity digests. `--smoke` goes one step further for
//! capability-bearing packages: every trust-allowed stdio MCP server is
//! launched and driven through the framed JSON-RPC handshake to confirm it
//! starts and lists at least one tool. Servers without a recorded allow
//! are skipped, never launched.

use anyhow::Result;
use clap::Args;

use botpack::error::Error;
use botpack::lockfile::{split_key, Lockfile};
use botpack::manifest::Manifest;
use botpack::mcp;
use botpack::mcp_smoke::{run_server_smoke, SmokeResult};
use botpack::sync;
use botpack::trust::{TrustConfig, WORKSPACE_TRUST_KEY};
use botpack::workspace::Workspace;

use crate::commands::Ctx;

/// Arguments for the verify command
#[derive(Args, Debug)]
pub struct VerifyArgs {
    /// Also launch trust-allowed stdio MCP servers and round-trip a
    /// JSON-RPC handshake
    #[arg(long)]
    pub smoke: bool,
}

pub fn execute(args: VerifyArgs, ctx: &Ctx) -> Result<()> {
    let ws = ctx.workspace()?;
    let lock = Lockfile::load(&ws.lockfile_path())?;
    let store = ctx.store();

    let report = store.verify(&lock)?;
    for err in &report.errors {
        match &err.actual {
            Some(actual) => ctx.say(format!(
                "{}: integrity mismatch (expected {}, actual {})",
                err.key, err.expected, actual
            )),
            None => ctx.say(format!(
                "{}: missing store entry {}",
                err.key, err.expected
            )),
        }
    }

    if let Some(first) = report.errors.first() {
        return Err(Error::IntegrityMismatch {
            key: first.key.clone(),
            expected: first.expected.clone(),
            actual: first
                .actual
                .clone()
                .unwrap_or_else(|| "missing".to_string()),
        }
        .into());
    }

    let mut smoke_results: Vec<SmokeResult> = Vec::new();
    let mut smoke_skipped: Vec<String> = Vec::new();
    let mut smoke_failures: Vec<String> = Vec::new();
    if args.smoke {
        run_smoke(
            ctx,
            &ws,
            &lock,
            &mut smoke_results,
            &mut smoke_skipped,
            &mut smoke_failures,
        )?;
        for result in &smoke_results {
            if result.ok {
                ctx.say(format!(
                    "smoke {}: ok ({} tool(s), {} resource(s))",
                    result.server, result.tools, result.resources
                ));
            } else {
                ctx.say(format!(
                    "smoke {}: responded but lists no tools",
                    result.server
                ));
            }
        }
        for reason in &smoke_skipped {
            ctx.say(format!("smoke skipped: {reason}"));
        }
        for failure in &smoke_failures {
            ctx.say(format!("smoke failed: {failure}"));
        }
    }

    ctx.say(format!("verified {} package(s)", report.checked));
    botpack::output::report_json_ok(
        &ctx.output,
        serde_json::json!({
            "checked": report.checked,
            "smoke": smoke_results,
            "smokeSkipped": smoke_skipped,
            "smokeFailed": smoke_failures,
        }),
    );

    let first_bad = smoke_failures
        .first()
        .cloned()
        .or_else(|| smoke_results.iter().find(|r| !r.ok).map(|r| r.server.clone()));
    if let Some(bad) = first_bad {
        anyhow::bail!("mcp smoke check failed: {bad}");
    }
    Ok(())
}

/// Smoke every trust-allowed stdio server declared by the workspace or an
/// installed package. The store payload is the working directory so
/// relative server commands resolve against the package tree.
fn run_smoke(
    ctx: &Ctx,
    ws: &Workspace,
    lock: &Lockfile,
    results: &mut Vec<SmokeResult>,
    skipped: &mut Vec<String>,
    failures: &mut Vec<String>,
) -> Result<()> {
    let manifest = Manifest::load(&ws.manifest_path())?;
    let trust = TrustConfig::load(&ws.trust_path())?;
    let store = ctx.store();

    let ws_dir = ws.assets_dir(&manifest.workspace.dir);
    let ws_servers = ws_dir.join("mcp").join("servers.toml");
    if ws_servers.is_file() {
        let prefix = sync::workspace_prefix(&manifest);
        for server in mcp::parse_servers(&prefix, &ws_servers)? {
            smoke_one(
                WORKSPACE_TRUST_KEY,
                None,
                &server,
                &ws_dir,
                &trust,
                results,
                skipped,
                failures,
            );
        }
    }

    for (key, pkg) in &lock.packages {
        let payload = store.payload_path(&pkg.integrity);
        let servers_path = payload.join("mcp").join("servers.toml");
        if !servers_path.is_file() {
            continue;
        }
        let (name, _version) = split_key(key).ok_or_else(|| Error::Generic(format!(
            "invalid package key in lockfile: {key:?}"
        )))?;
        for server in mcp::parse_servers(name, &servers_path)? {
            smoke_one(
                key,
                Some(&pkg.integrity),
                &server,
                &payload,
                &trust,
                results,
                skipped,
                failures,
            );
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn smoke_one(
    trust_key: &str,
    integrity: Option<&str>,
    server: &mcp::McpServer,
    cwd: &std::path::Path,
    trust: &TrustConfig,
    results: &mut Vec<SmokeResult>,
    skipped: &mut Vec<String>,
    failures: &mut Vec<String>,
) {
    if !server.needs_exec() {
        skipped.push(format!("{}: not a stdio server", server.fqid));
        return;
    }
    let decision = trust.check_server(trust_key, integrity, &server.fqid, true, server.needs_mcp());
    if !decision.allowed() {
        // An unallowed server is never launched, whatever the reason.
        skipped.push(format!("{}: not trusted for exec", server.fqid));
        return;
    }
    match run_server_smoke(server, cwd) {
        Ok(result) => results.push(result),
        Err(e) => failures.push(e.to_string()),
    }
}
