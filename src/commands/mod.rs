//! Command implementations.
//!
//! Each subcommand lives in its own module with a clap `Args` struct and an
//! `execute(args, ctx)` function. The shared [`Ctx`] carries the workspace
//! selection and output configuration resolved once at entry; commands
//! build their own `Workspace`, `Store`, and `RegistryClient` from it and
//! pass those by value into library operations.

pub mod add;
pub mod audit;
pub mod catalog;
pub mod doctor;
pub mod info;
pub mod init;
pub mod install;
pub mod list;
pub mod prefetch;
pub mod prune;
pub mod remove;
pub mod sync;
pub mod tree;
pub mod trust;
pub mod update;
pub mod verify;
pub mod why;

use botpack::error::Result;
use botpack::output::OutputConfig;
use botpack::registry::{self, RegistryClient};
use botpack::store::Store;
use botpack::workspace::{self, RootSelection, Workspace};

/// Per-invocation context shared by every command.
pub struct Ctx {
    pub selection: RootSelection,
    pub output: OutputConfig,
    pub quiet: bool,
}

impl Ctx {
    /// Resolve the workspace per the documented precedence.
    pub fn workspace(&self) -> Result<Workspace> {
        Workspace::discover(&self.selection)
    }

    /// The global content-addressed store.
    pub fn store(&self) -> Store {
        Store::new(workspace::store_root())
    }

    /// Registry client with the environment-resolved base URL.
    pub fn registry(&self) -> Result<RegistryClient> {
        RegistryClient::new(registry::base_url_from_env(), registry::DEFAULT_TIMEOUT)
    }

    /// Print a line unless `--quiet` or `--json` is active.
    pub fn say(&self, message: impl AsRef<str>) {
        if !self.quiet && !self.output.json {
            println!("{}", message.as_ref());
        }
    }
}
