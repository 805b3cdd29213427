use anyhow::Result;
use clap::Parser;

use stitches::cli::{Cli, Commands};
use stitches::{commands, logging};

fn main() -> Result<()> {
    // Initialize structured logging
    logging::init();

    // Parse CLI arguments
    let cli = Cli::parse();

    // Dispatch to appropriate command handler
    match cli.command {
        Commands::Run(args) => commands::run::run(&args),
        Commands::State(args) => commands::state::run(&args),
    }
}
