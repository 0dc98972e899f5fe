//! CLI parsing tests.

mod jobs;

use clap::Parser;

use super::{Cli, CliCommand};

/// Parse argv into the command enum, panicking on clap errors.
pub(crate) fn parse(args: &[&str]) -> CliCommand {
    Cli::parse_from(args).command
}
