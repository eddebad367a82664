use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// CLI configuration parsed from command line arguments and environment variables
#[derive(Parser, Debug)]
#[command(name = "feedsync")]
#[command(
    author,
    version,
    about = "Generates catalog data feeds, ships them to a remote index service and tracks the index swap"
)]
#[command(after_help = "Examples:
  feedsync import                       # Load feed definitions from ~/.config/feedsync/feeds.toml
  feedsync run products                 # Export and upload the 'products' feed
  feedsync run products --transport local --local-root /mnt/inbox
  feedsync poll                         # Fire due sync-status pollers until Ctrl-C
  feedsync status")]
pub struct Config {
    /// PostgreSQL database connection URL
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: String,

    /// Maximum number of database connections
    #[arg(long, env = "FEEDSYNC_DB_MAX_CONNECTIONS", default_value = "5")]
    pub db_max_connections: u32,

    #[command(subcommand)]
    pub command: Command,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the data feed pipeline for one feed configuration
    Run {
        /// Name of the feed configuration
        name: String,

        /// How feed files reach the remote agent
        #[arg(long, value_enum, env = "FEEDSYNC_TRANSPORT", default_value = "sftp")]
        transport: Transport,

        /// Root directory of the local transport (the remote "home")
        #[arg(long, env = "FEEDSYNC_LOCAL_ROOT", value_name = "DIR")]
        local_root: Option<PathBuf>,

        /// Custom path to feeds.toml (media URLs for the imageUrl resolver)
        #[arg(short, long, value_name = "PATH")]
        config: Option<PathBuf>,
    },
    /// Fire due sync-status poller jobs
    Poll {
        /// Process due jobs once and exit
        #[arg(long)]
        once: bool,

        /// Seconds between scheduler ticks
        #[arg(long, default_value = "30")]
        tick_secs: u64,
    },
    /// Import feed definitions from feeds.toml into the database
    Import {
        /// Custom path to feeds.toml configuration file
        #[arg(short, long, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Import only the named feed
        #[arg(short, long, value_name = "NAME")]
        feed: Option<String>,
    },
    /// Show feed configurations and their run status
    Status {
        /// Reset a configuration stuck in RUNNING back to NONE
        #[arg(long, value_name = "NAME")]
        reset: Option<String>,
    },
}

/// Supported file transports
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Transport {
    /// SFTP to the endpoint host (requires the `sftp` feature)
    Sftp,
    /// Copy into a local or mounted directory
    Local,
}
