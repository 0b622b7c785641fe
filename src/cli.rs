//! # CLI Argument Parsing and Command Dispatch
//!
//! Defines the command-line interface for `botpack` using `clap`:
//!
//! - The top-level structure with global arguments (`--root`, `--global`,
//!   `--profile`, `--json`, `--color`, `--log-level`, `--verbose`,
//!   `--quiet`).
//! - The available subcommands, each implemented in its own module under
//!   `src/commands/`.
//! - Error-to-exit-code translation at the boundary: typed library errors
//!   map to the documented exit codes, everything else exits 1.

use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};
use log::LevelFilter;

use botpack::error::{exit_codes, Error};
use botpack::output::{self, OutputConfig};
use botpack::workspace::RootSelection;

use crate::commands::{self, Ctx};

/// Botpack - reproducible, shareable libraries of agent assets
#[derive(Parser, Debug)]
#[command(name = "botpack")]
#[command(
    version,
    about,
    long_about = "Botpack - a package manager for agent assets (skills, commands, agents, MCP servers)"
)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,

    /// Workspace root (overrides discovery)
    #[arg(long, global = true, value_name = "DIR")]
    root: Option<PathBuf>,

    /// Operate on a named global profile instead of the local tree
    #[arg(long, global = true)]
    global: bool,

    /// Profile name (with --global)
    #[arg(long, global = true, value_name = "NAME", requires = "global")]
    profile: Option<String>,

    /// Emit machine-readable JSON
    #[arg(long, global = true)]
    json: bool,

    /// Colorize output (always, never, auto)
    #[arg(long, global = true, value_name = "WHEN", default_value = "auto")]
    color: String,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL", default_value = "warn")]
    log_level: String,

    /// Increase output verbosity (can be repeated)
    #[arg(short, long, global = true, action = ArgAction::Count, conflicts_with = "quiet")]
    verbose: u8,

    /// Suppress output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a manifest and state directories in the current directory
    Init(commands::init::InitArgs),

    /// Add dependencies to the manifest, then resolve, fetch, and lock
    Add(commands::add::AddArgs),

    /// Remove dependencies from the manifest and re-resolve
    Remove(commands::remove::RemoveArgs),

    /// Resolve, fetch, and lock; reuse lockfile pins when valid
    Install(commands::install::InstallArgs),

    /// Re-resolve dependencies and rewrite the lockfile
    Update(commands::update::UpdateArgs),

    /// Materialize assets into a target runtime layout
    Sync(commands::sync::SyncArgs),

    /// Fetch all lockfile references into the store without syncing
    Prefetch(commands::prefetch::PrefetchArgs),

    /// Re-hash store payloads against the lockfile
    Verify(commands::verify::VerifyArgs),

    /// Remove store entries not referenced by the lockfile
    Prune(commands::prune::PruneArgs),

    /// Record a trust decision for a package
    Trust(commands::trust::TrustArgs),

    /// List workspace assets and installed packages
    List(commands::list::ListArgs),

    /// Show the dependency tree
    Tree(commands::tree::TreeArgs),

    /// Show a workspace and lockfile summary
    Info(commands::info::InfoArgs),

    /// Explain why a package is installed
    Why(commands::why::WhyArgs),

    /// List capability-bearing packages without recorded trust
    Audit(commands::audit::AuditArgs),

    /// Generate .botpack/catalog.json
    Catalog(commands::catalog::CatalogArgs),

    /// Run basic environment checks
    Doctor(commands::doctor::DoctorArgs),
}

impl Cli {
    /// Execute the parsed command, returning the process exit code.
    pub fn execute(self) -> i32 {
        if let Err(e) = self.init_logger() {
            eprintln!("error: {e}");
            return exit_codes::GENERIC;
        }

        let output = OutputConfig::from_env_and_flags(&self.color, self.json);
        let ctx = Ctx {
            selection: RootSelection {
                root: self.root.clone(),
                global: self.global,
                profile: self.profile.clone(),
            },
            output,
            quiet: self.quiet,
        };

        let result = match self.command {
            Commands::Init(args) => commands::init::execute(args, &ctx),
            Commands::Add(args) => commands::add::execute(args, &ctx),
            Commands::Remove(args) => commands::remove::execute(args, &ctx),
            Commands::Install(args) => commands::install::execute(args, &ctx),
            Commands::Update(args) => commands::update::execute(args, &ctx),
            Commands::Sync(args) => commands::sync::execute(args, &ctx),
            Commands::Prefetch(args) => commands::prefetch::execute(args, &ctx),
            Commands::Verify(args) => commands::verify::execute(args, &ctx),
            Commands::Prune(args) => commands::prune::execute(args, &ctx),
            Commands::Trust(args) => commands::trust::execute(args, &ctx),
            Commands::List(args) => commands::list::execute(args, &ctx),
            Commands::Tree(args) => commands::tree::execute(args, &ctx),
            Commands::Info(args) => commands::info::execute(args, &ctx),
            Commands::Why(args) => commands::why::execute(args, &ctx),
            Commands::Audit(args) => commands::audit::execute(args, &ctx),
            Commands::Catalog(args) => commands::catalog::execute(args, &ctx),
            Commands::Doctor(args) => commands::doctor::execute(args, &ctx),
        };

        match result {
            Ok(()) => exit_codes::SUCCESS,
            Err(e) => match e.downcast_ref::<Error>() {
                Some(err) => output::report_error(&ctx.output, err),
                None => {
                    if ctx.output.json {
                        eprintln!(
                            "{}",
                            serde_json::json!({"ok": false, "kind": "generic", "reason": e.to_string()})
                        );
                    } else {
                        eprintln!("error: {e:#}");
                    }
                    exit_codes::GENERIC
                }
            },
        }
    }

    /// Initialize the logger with the configured level.
    ///
    /// Priority: `--quiet` (errors only), then `--verbose` (debug/trace),
    /// then `--log-level`.
    fn init_logger(&self) -> anyhow::Result<()> {
        let level = if self.quiet {
            LevelFilter::Error
        } else if self.verbose > 0 {
            match self.verbose {
                1 => LevelFilter::Debug,
                _ => LevelFilter::Trace,
            }
        } else {
            match self.log_level.to_lowercase().as_str() {
                "error" => LevelFilter::Error,
                "warn" => LevelFilter::Warn,
                "info" => LevelFilter::Info,
                "debug" => LevelFilter::Debug,
                "trace" => LevelFilter::Trace,
                "off" => LevelFilter::Off,
                other => anyhow::bail!(
                    "invalid log level {other:?}; valid options are error, warn, info, debug, trace, off"
                ),
            }
        };

        env_logger::Builder::from_default_env()
            .filter_level(level)
            .format_timestamp(None)
            .format_module_path(false)
            .format_target(false)
            .try_init()
            .ok();
        Ok(())
    }
}
