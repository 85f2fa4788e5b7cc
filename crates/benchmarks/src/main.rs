//! Command-line entry point for llmbench.

use anyhow::Result;
use clap::Parser;
use llmbench_runner::cli::{run_cli, Cli};

fn main() -> Result<()> {
    let cli = Cli::parse();
    run_cli(cli)
}
