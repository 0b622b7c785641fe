//! Info command: workspace and lockfile summary.

use anyhow::Result;
use clap::Args;

use botpack::assets;
use botpack::lockfile::Lockfile;
use botpack::manifest::Manifest;

use crate::commands::Ctx;

/// Arguments for the info command
#[derive(Args, Debug)]
pub struct InfoArgs {}

pub fn execute(_args: InfoArgs, ctx: &Ctx) -> Result<()> {
    let ws = ctx.workspace()?;
    let manifest = Manifest::load(&ws.manifest_path())?;
    let index = assets::scan(&ws.assets_dir(&manifest.workspace.dir))?;

    ctx.say(format!("workspace: {}", ws.root().display()));
    ctx.say(format!("assets dir: {}", manifest.workspace.dir));
    if let Some(name) = &manifest.workspace.name {
        ctx.say(format!("name: {name}"));
    }
    ctx.say(format!(
        "assets: {} skill(s), {} command(s), {} agent(s)",
        index.skills.len(),
        index.commands.len(),
        index.agents.len()
    ));
    ctx.say(format!("direct dependencies: {}", manifest.dependencies.len()));

    let lock_path = ws.lockfile_path();
    let mut locked = 0;
    if lock_path.exists() {
        let lock = Lockfile::load(&lock_path)?;
        locked = lock.packages.len();
        ctx.say(format!(
            "lockfile: {} package(s), spec {}",
            locked, lock.spec_version
        ));
    } else {
        ctx.say("lockfile: none (run `botpack install`)");
    }

    botpack::output::report_json_ok(
        &ctx.output,
        serde_json::json!({
            "root": ws.root().display().to_string(),
            "skills": index.skills.len(),
            "commands": index.commands.len(),
            "agents": index.agents.len(),
            "directDependencies": manifest.dependencies.len(),
            "lockedPackages": locked,
        }),
    );
    Ok(())
}
