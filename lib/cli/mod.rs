use crate::build_info;
use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    about = "Polls an activity feed and prints each record as it is delivered",
    version = build_info::VERSION_WITH_COMMIT,
    long_version = build_info::VERSION_WITH_COMMIT,
    args_conflicts_with_subcommands = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    #[command(flatten)]
    pub poll: PollArgs,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Poll a stream and print every known record (default)
    Poll(PollArgs),
    /// Print a stream's meta document once
    Meta(MetaArgs),
    /// Print an account's meta document once
    Account(AccountArgs),
}

/// Flags shared by every subcommand.
#[derive(Args, Debug, Clone)]
pub struct CommonArgs {
    #[arg(long = "api-url")]
    /// Feed host; overrides RIVER_API_URL
    pub api_url: Option<String>,

    #[arg(long = "timeout-ms")]
    /// Per-request window; overrides RIVER_TIMEOUT_MS
    pub timeout_ms: Option<u64>,

    #[arg(long = "log-level", default_value = "info")]
    pub log_level: String,
}

#[derive(Args, Debug, Clone)]
pub struct PollArgs {
    /// Stream as `account/stream`; falls back to RIVER_STREAM
    pub stream: Option<String>,

    #[arg(long)]
    pub limit: Option<u32>,
    #[arg(long = "since-id")]
    /// Only request records newer than this cursor
    pub since_id: Option<String>,
    #[arg(long, default_value_t = false)]
    pub replies: bool,
    #[arg(long = "geo-hint", default_value_t = false)]
    pub geo_hint: bool,

    #[arg(long)]
    /// Seconds between polls; overrides RIVER_FREQUENCY_SECS
    pub frequency: Option<u64>,
    #[arg(long = "catch-up", default_value_t = false)]
    /// Re-poll immediately whenever a page comes back full
    pub catch_up: bool,

    #[arg(long = "history-size", default_value_t = 0)]
    /// Delivered records kept for idle replay; 0 disables replay
    pub history_size: usize,
    #[arg(long = "history-timeout")]
    /// Seconds of silence before a record is replayed; defaults to the poll frequency
    pub history_timeout: Option<u64>,
    #[arg(long = "pace-ms", default_value_t = 0)]
    /// Delay after printing each record before taking the next one
    pub pace_ms: u64,

    #[arg(long = "no-retweet-resolution", default_value_t = false)]
    /// Print retweets as-is instead of the retweeted original
    pub no_retweet_resolution: bool,

    #[arg(long = "metrics-bind")]
    /// Serve /health and /metrics on this address
    pub metrics_bind: Option<String>,

    #[command(flatten)]
    pub common: CommonArgs,
}

#[derive(Args, Debug, Clone)]
pub struct MetaArgs {
    /// Stream as `account/stream`; falls back to RIVER_STREAM
    pub stream: Option<String>,

    #[arg(long)]
    pub disregard: Option<String>,

    #[command(flatten)]
    pub common: CommonArgs,
}

#[derive(Args, Debug, Clone)]
pub struct AccountArgs {
    pub account: String,

    #[arg(long = "quick-stats", default_value_t = false)]
    pub quick_stats: bool,

    #[arg(long, value_delimiter = ',')]
    /// Streams to include, comma separated
    pub streams: Vec<String>,

    #[command(flatten)]
    pub common: CommonArgs,
}

impl Cli {
    /// The selected subcommand; bare arguments mean `poll`.
    pub fn into_command(self) -> Command {
        self.command.unwrap_or(Command::Poll(self.poll))
    }
}

pub fn parse_args() -> Cli {
    Cli::parse()
}
