//! Binary crate for the `weather` command-line tool.
//!
//! This crate focuses on:
//! - Parsing CLI arguments and resolving configuration
//! - Interactive credential setup
//! - Human-friendly output formatting

use clap::Parser;

mod bootstrap;
mod cli;
mod commands;
mod logging;
mod render;

/// Synchronous on purpose: the blocking HTTP client cannot run inside a
/// tokio runtime, so the async path builds its own runtime per fetch.
fn main() -> anyhow::Result<()> {
    let cmd = cli::Cli::parse();
    cmd.run()
}
