//! Bitrise build cache CLI.

pub mod parse;
pub mod format;
pub mod output;
pub mod cmd;

use std::process::ExitCode;

use clap::Parser;

use parse::Cli;

/// Entry point.
fn main() -> ExitCode {
    cmd::main(Cli::parse())
}
