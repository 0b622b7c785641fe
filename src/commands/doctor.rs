//! Doctor command: basic environment checks.

use anyhow::Result;
use clap::Args;

use botpack::lockfile::Lockfile;
use botpack::manifest::Manifest;
use botpack::sync;

use crate::commands::Ctx;

/// Arguments for the doctor command
#[derive(Args, Debug)]
pub struct DoctorArgs {}

pub fn execute(_args: DoctorArgs, ctx: &Ctx) -> Result<()> {
    let ws = ctx.workspace()?;
    let mut warnings: Vec<String> = Vec::new();

    // git must be callable for git and registry dependencies.
    let git_ok = std::process::Command::new("git")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false);
    if !git_ok {
        warnings.push("git is not available on PATH".to_string());
    }

    // The store root must be creatable/writable.
    let store = ctx.store();
    if let Err(e) = std::fs::create_dir_all(store.root()) {
        warnings.push(format!(
            "store root {} is not writable: {e}",
            store.root().display()
        ));
    }

    let manifest_path = ws.manifest_path();
    let manifest = if manifest_path.exists() {
        match Manifest::load(&manifest_path) {
            Ok(m) => Some(m),
            Err(e) => {
                warnings.push(format!("manifest does not parse: {e}"));
                None
            }
        }
    } else {
        warnings.push(format!(
            "no manifest at {} (run `botpack init`)",
            manifest_path.display()
        ));
        None
    };

    if let Some(manifest) = &manifest {
        let assets_dir = ws.assets_dir(&manifest.workspace.dir);
        if !assets_dir.is_dir() {
            warnings.push(format!("assets dir {} is missing", assets_dir.display()));
        }

        let lock_path = ws.lockfile_path();
        if lock_path.exists() {
            match Lockfile::load(&lock_path) {
                Ok(lock) => {
                    for key in lock.packages.keys() {
                        let entry = ws
                            .pkgs_dir()
                            .join(botpack::vstore::entry_relpath(key)?);
                        if !entry.exists() {
                            warnings.push(format!(
                                "{key}: virtual store entry missing (run `botpack install`)"
                            ));
                        }
                    }
                }
                Err(e) => warnings.push(format!("lockfile does not parse: {e}")),
            }
        }

        // Fallback targets point at another target's output; warn when the
        // fallback root does not exist yet.
        for name in manifest.targets.keys() {
            if let Ok(spec) = sync::resolve_target(name, manifest) {
                if let Some(fallback) = &spec.skills_fallback {
                    if !ws.root().join(fallback).exists() {
                        warnings.push(format!(
                            "target {name}: skills fall back to {fallback}, which does not exist"
                        ));
                    }
                }
            }
        }
    }

    for warning in &warnings {
        ctx.say(format!("warning: {warning}"));
    }
    botpack::output::report_json_ok(
        &ctx.output,
        serde_json::json!({"warnings": warnings}),
    );
    if warnings.is_empty() {
        ctx.say("all checks passed");
        Ok(())
    } else {
        anyhow::bail!("{} check(s) failed", warnings.len())
    }
}
