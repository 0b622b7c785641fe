//! Why command: explain why a package is installed by walking the reverse
//! dependency edges up to the manifest.

use anyhow::Result;
use clap::Args;

use botpack::lockfile::{package_key, split_key, Lockfile};
use botpack::manifest::Manifest;

use crate::commands::Ctx;

/// Arguments for the why command
#[derive(Args, Debug)]
pub struct WhyArgs {
    /// Package name or `name@version` key
    #[arg(value_name = "PKG")]
    pub package: String,
}

pub fn execute(args: WhyArgs, ctx: &Ctx) -> Result<()> {
    let ws = ctx.workspace()?;
    let manifest = Manifest::load(&ws.manifest_path())?;
    let lock = Lockfile::load(&ws.lockfile_path())?;

    // Accept both bare names and full keys.
    let matches: Vec<String> = lock
        .packages
        .keys()
        .filter(|key| {
            key.as_str() == args.package
                || split_key(key).map(|(n, _)| n) == Some(args.package.as_str())
        })
        .cloned()
        .collect();
    if matches.is_empty() {
        anyhow::bail!("{} is not installed", args.package);
    }

    let mut explanations = Vec::new();
    for key in &matches {
        let (name, _) = split_key(key).expect("validated at load");

        if manifest.dependencies.contains_key(name) {
            explanations.push(format!("{key}: direct dependency in botpack.toml"));
        }
        for (parent_key, parent) in &lock.packages {
            for (dep_name, dep_version) in &parent.dependencies {
                if package_key(dep_name, dep_version) == *key {
                    explanations.push(format!("{key}: required by {parent_key}"));
                }
            }
        }
    }
    if explanations.is_empty() {
        explanations.push(format!(
            "{}: present in the lockfile but nothing depends on it",
            args.package
        ));
    }

    for line in &explanations {
        ctx.say(line);
    }
    botpack::output::report_json_ok(
        &ctx.output,
        serde_json::json!({"package": args.package, "reasons": explanations}),
    );
    Ok(())
}
