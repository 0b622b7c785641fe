//! Catalog command: emit `.botpack/catalog.json` explicitly.

use anyhow::Result;
use clap::Args;

use botpack::lockfile::Lockfile;
use botpack::manifest::Manifest;

use crate::commands::{install, Ctx};

/// Arguments for the catalog command
#[derive(Args, Debug)]
pub struct CatalogArgs {}

pub fn execute(_args: CatalogArgs, ctx: &Ctx) -> Result<()> {
    let ws = ctx.workspace()?;
    let manifest = Manifest::load(&ws.manifest_path())?;
    let store = ctx.store();

    let lock_path = ws.lockfile_path();
    let lock = if lock_path.exists() {
        Lockfile::load(&lock_path)?
    } else {
        Lockfile::new(Default::default(), Default::default())
    };

    install::write_catalog(&ws, &manifest, &store, &lock)?;
    ctx.say(format!("wrote {}", ws.catalog_path().display()));
    botpack::output::report_json_ok(
        &ctx.output,
        serde_json::json!({"path": ws.catalog_path().display().to_string()}),
    );
    Ok(())
}
