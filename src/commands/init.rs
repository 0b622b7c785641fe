//! Init command: create a starter manifest and the state directories.

use anyhow::Result;
use clap::Args;

use botpack::manifest::Manifest;

use crate::commands::Ctx;

/// Arguments for the init command
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Asset-package name for the workspace (e.g. "@me/workspace")
    #[arg(long, value_name = "NAME")]
    pub name: Option<String>,

    /// Overwrite an existing manifest
    #[arg(long)]
    pub force: bool,
}

pub fn execute(args: InitArgs, ctx: &Ctx) -> Result<()> {
    let ws = ctx.workspace()?;
    let manifest_path = ws.manifest_path();
    if manifest_path.exists() && !args.force {
        anyhow::bail!(
            "manifest already exists at {} (use --force to overwrite)",
            manifest_path.display()
        );
    }

    let manifest = Manifest::starter(args.name.as_deref());
    std::fs::create_dir_all(ws.root())?;
    manifest.save(&manifest_path)?;

    let assets_dir = ws.assets_dir(&manifest.workspace.dir);
    for sub in ["skills", "commands", "agents"] {
        std::fs::create_dir_all(assets_dir.join(sub))?;
    }
    std::fs::create_dir_all(ws.state_dir().join("state"))?;
    std::fs::create_dir_all(ws.pkgs_dir())?;

    ctx.say(format!("initialized workspace at {}", ws.root().display()));
    botpack::output::report_json_ok(
        &ctx.output,
        serde_json::json!({"root": ws.root().display().to_string()}),
    );
    Ok(())
}
