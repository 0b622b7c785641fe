//! List command: workspace assets and installed packages.

use anyhow::Result;
use clap::Args;

use botpack::assets;
use botpack::lockfile::Lockfile;
use botpack::manifest::Manifest;

use crate::commands::Ctx;

/// Arguments for the list command
#[derive(Args, Debug)]
pub struct ListArgs {}

pub fn execute(_args: ListArgs, ctx: &Ctx) -> Result<()> {
    let ws = ctx.workspace()?;
    let manifest = Manifest::load(&ws.manifest_path())?;
    let index = assets::scan(&ws.assets_dir(&manifest.workspace.dir))?;

    ctx.say("workspace assets:");
    for asset in index.all() {
        ctx.say(format!("  {:?} {}", asset.kind, asset.id));
    }
    if index.mcp_servers.is_some() {
        ctx.say("  McpServer mcp/servers.toml");
    }

    let lock_path = ws.lockfile_path();
    let mut packages = Vec::new();
    if lock_path.exists() {
        let lock = Lockfile::load(&lock_path)?;
        ctx.say("installed packages:");
        for (key, pkg) in &lock.packages {
            ctx.say(format!("  {key} ({})", pkg.integrity));
            packages.push(key.clone());
        }
    }

    botpack::output::report_json_ok(
        &ctx.output,
        serde_json::json!({
            "workspaceAssets": index
                .all()
                .iter()
                .map(|a| serde_json::json!({"kind": format!("{:?}", a.kind), "id": a.id}))
                .collect::<Vec<_>>(),
            "packages": packages,
        }),
    );
    Ok(())
}
