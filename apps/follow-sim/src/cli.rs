use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use url::Url;

use crate::logging::LogLevel;

#[derive(Parser, Debug)]
#[command(
    name = "follow-sim",
    about = "Simulate participants keeping one room on the same page"
)]
pub struct Cli {
    #[arg(long, value_enum, default_value_t = LogLevel::Warn, global = true)]
    pub log_level: LogLevel,

    #[arg(long, env = "FOLLOW_SIM_LOG_FILE", global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Join every participant to one fresh room at once and report the outcome.
    Race(RaceArgs),
}

#[derive(Args, Debug, Clone)]
pub struct RaceArgs {
    /// Number of participants joining the room.
    #[arg(long, short = 'n', env = "FOLLOW_SIM_PARTICIPANTS", default_value_t = 3)]
    pub participants: usize,

    /// Origin all participant pages live under.
    #[arg(long, env = "FOLLOW_SIM_ORIGIN", default_value = "https://app.example.com")]
    pub origin: Url,

    /// After the room settles, participant 0 browses to this path.
    #[arg(long)]
    pub navigate: Option<String>,

    /// Upper bound of the random delay added to every store call.
    #[arg(long, default_value_t = 25)]
    pub latency_ms: u64,

    /// Quiet period after which the room counts as settled.
    #[arg(long, default_value_t = 500)]
    pub settle_ms: u64,

    /// Abort if participants load more pages than this in total.
    #[arg(long, default_value_t = 100)]
    pub max_loads: usize,
}
