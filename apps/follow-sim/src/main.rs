mod cli;
mod logging;
mod sim;

use clap::Parser;
use tracing::error;

use crate::cli::{Cli, Commands};
use crate::logging::LogConfig;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(err) = logging::init(&LogConfig {
        level: cli.log_level,
        file: cli.log_file.clone(),
    }) {
        eprintln!("follow-sim: {err}");
        std::process::exit(2);
    }

    let result = match cli.command {
        Commands::Race(args) => sim::run_race(args).await,
    };
    if let Err(err) = result {
        error!(target = "follow_sim", error = %err, "simulation failed");
        eprintln!("follow-sim: {err:#}");
        std::process::exit(1);
    }
}
