//! # Botpack CLI
//!
//! This is the binary entry point for the `botpack` command-line tool.
//!
//! Its primary responsibilities are:
//! - Parsing command-line arguments using `clap`.
//! - Executing the appropriate command based on the parsed arguments.
//! - Translating typed errors into exit codes and user-facing output
//!   (plain text or `--json`).
//!
//! The core application logic lives in the `botpack` library crate; the
//! binary is a thin wrapper around it.

mod cli;
mod commands;

use clap::Parser;

fn main() {
    let cli = cli::Cli::parse();
    std::process::exit(cli.execute());
}
