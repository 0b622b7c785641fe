//! # Botpack Library
//!
//! This library provides the core functionality of botpack, a package
//! manager for agent assets: small bundles of Markdown + config files
//! (skills, slash-commands, agent definitions, MCP server declarations)
//! shared across AI coding runtimes. It is designed to be used by the
//! `botpack` command-line tool but can also be embedded by other tools that
//! need reproducible asset libraries.
//!
//! ## Core Concepts
//!
//! - **Manifest (`manifest`)**: the typed model of `botpack.toml` — the
//!   dependency table, sync policy, targets, and aliases.
//! - **Resolver (`resolver`)**: turns the dependency table plus registry
//!   metadata into a fully-pinned graph.
//! - **Store (`store`)**: a global content-addressed cache with atomic,
//!   crash-safe population shared across workspaces.
//! - **Virtual store (`vstore`)**: per-workspace `name@version` pointers
//!   into the store.
//! - **Lockfile (`lockfile`)**: the canonical serialization of the resolved
//!   graph plus integrity digests.
//! - **Asset scanner (`assets`)**: discovers skills, commands, agents, MCP
//!   declarations, and policy fragments by conventional paths.
//! - **Sync engine (`sync`)**: projects the installed graph into runtime
//!   layouts with staging, atomic swap, and drift detection.
//! - **Trust (`trust`)**: recorded allow/deny decisions gating
//!   capability-bearing assets.
//!
//! ## Execution Flow
//!
//! `install` runs the whole pipeline:
//!
//! 1. Parse the manifest.
//! 2. Resolve the dependency graph (reusing lockfile pins where valid).
//! 3. Fetch sources and populate the content-addressed store.
//! 4. Write the lockfile (only after every referenced entry is committed).
//! 5. Materialize the virtual store.
//! 6. Sync targets and emit the catalog, per the sync policy.
//!
//! The two hard guarantees are determinism (same inputs, byte-identical
//! lockfile and materialization) and crash safety (a reader never observes
//! a partial store entry or a half-swapped target root).

pub mod assets;
pub mod catalog;
pub mod error;
pub mod fetch;
pub mod lockfile;
pub mod manifest;
pub mod mcp;
pub mod mcp_smoke;
pub mod output;
pub mod package;
pub mod pep723;
pub mod registry;
pub mod resolver;
pub mod store;
pub mod sync;
pub mod trust;
pub mod vstore;
pub mod workspace;

pub use error::{exit_codes, Error, ErrorKind, Result};
