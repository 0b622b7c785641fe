//! Add command: record dependencies in the manifest, then resolve, fetch,
//! and lock (and sync, per the manifest's `onAdd` policy).

use anyhow::Result;
use clap::Args;

use botpack::manifest::{DependencySpec, Manifest};

use crate::commands::install::{run_pipeline, PipelineParams, SyncPolicy};
use crate::commands::Ctx;

/// Arguments for the add command
#[derive(Args, Debug)]
pub struct AddArgs {
    /// Dependency specs: `name@range` or bare `name` (any version)
    #[arg(required = true, value_name = "SPEC")]
    pub specs: Vec<String>,

    /// Use a local directory instead of the registry (single spec only)
    #[arg(long, value_name = "DIR", conflicts_with_all = ["git", "url"])]
    pub path: Option<String>,

    /// Use a git repository instead of the registry (single spec only)
    #[arg(long, value_name = "URL")]
    pub git: Option<String>,

    /// Git rev (branch, tag, or commit) for --git
    #[arg(long, value_name = "REV", requires = "git")]
    pub rev: Option<String>,

    /// Use a tarball URL instead of the registry (single spec only)
    #[arg(long, value_name = "URL", conflicts_with = "git")]
    pub url: Option<String>,

    /// Integrity digest for --url (sha256:<hex>)
    #[arg(long, value_name = "DIGEST", requires = "url")]
    pub integrity: Option<String>,

    /// Skip the automatic sync step
    #[arg(long)]
    pub no_sync: bool,
}

pub fn execute(args: AddArgs, ctx: &Ctx) -> Result<()> {
    let ws = ctx.workspace()?;
    let mut manifest = Manifest::load(&ws.manifest_path())?;

    let source_flags = args.path.is_some() || args.git.is_some() || args.url.is_some();
    if source_flags && args.specs.len() != 1 {
        anyhow::bail!("--path/--git/--url take exactly one package name");
    }

    for spec in &args.specs {
        let (name, dep) = if let Some(path) = &args.path {
            (spec.clone(), DependencySpec::Path { path: path.clone() })
        } else if let Some(git) = &args.git {
            (
                spec.clone(),
                DependencySpec::Git {
                    git: git.clone(),
                    rev: args.rev.clone(),
                },
            )
        } else if let Some(url) = &args.url {
            (
                spec.clone(),
                DependencySpec::Url {
                    url: url.clone(),
                    integrity: args.integrity.clone(),
                },
            )
        } else {
            parse_spec(spec)
        };
        manifest.dependencies.insert(name, dep);
    }
    manifest.save(&ws.manifest_path())?;

    let outcome = run_pipeline(
        ctx,
        &ws,
        PipelineParams {
            no_sync: args.no_sync,
            sync_policy: SyncPolicy::OnAdd,
            ..PipelineParams::default()
        },
    )?;
    ctx.say(format!(
        "added {} dependenc{}; {} package(s) installed",
        args.specs.len(),
        if args.specs.len() == 1 { "y" } else { "ies" },
        outcome.package_count
    ));
    botpack::output::report_json_ok(
        &ctx.output,
        serde_json::json!({"packages": outcome.package_count}),
    );
    Ok(())
}

/// Split `name@range` into its parts. Scoped names keep their leading `@`:
/// `@acme/pack@^2` → (`@acme/pack`, `^2`); a bare name means any version.
fn parse_spec(spec: &str) -> (String, DependencySpec) {
    if spec.len() < 2 {
        return (spec.to_string(), DependencySpec::Registry("*".to_string()));
    }
    match spec[1..].rfind('@') {
        Some(idx) => {
            let (name, range) = spec.split_at(idx + 1);
            (
                name.to_string(),
                DependencySpec::Registry(range[1..].to_string()),
            )
        }
        None => (spec.to_string(), DependencySpec::Registry("*".to_string())),
    }
}
