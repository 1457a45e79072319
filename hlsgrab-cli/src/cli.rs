use std::path::PathBuf;

use clap::{Parser, Subcommand};
use segfetch_engine::DownloadMode;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file (defaults to <config dir>/hlsgrab/config.toml)
    #[arg(short, long, global = true, env = "HLSGRAB_CONFIG")]
    pub config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Errors only, no progress bars
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Also write logs to this file
    #[arg(long, global = true, env = "HLSGRAB_LOG_FILE")]
    pub log_file: Option<PathBuf>,

    /// HTTP proxy as host:port
    #[arg(long, global = true, env = "HLSGRAB_PROXY")]
    pub proxy: Option<String>,

    /// Proxy username
    #[arg(long, global = true, requires = "proxy")]
    pub proxy_username: Option<String>,

    /// Proxy password
    #[arg(long, global = true, requires = "proxy")]
    pub proxy_password: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Discover, download and mux one or more targets
    Run(RunArgs),

    /// Only discover manifest candidates for a page and print them
    Discover(DiscoverArgs),

    /// Show or reset the configuration file
    Config {
        /// Print the effective configuration
        #[arg(long)]
        show: bool,

        /// Rewrite the configuration file with defaults
        #[arg(long, conflicts_with = "show")]
        reset: bool,
    },
}

/// Discovery options shared by `run` and `discover`.
#[derive(clap::Args, Debug, Clone, Default)]
pub struct MonitorArgs {
    /// Browser attempts per target (1-5)
    #[arg(long)]
    pub tries: Option<u32>,

    /// Show the browser window
    #[arg(long)]
    pub headed: bool,

    /// Do not play interaction rules
    #[arg(long)]
    pub no_interaction: bool,

    /// Interaction rule document
    #[arg(long)]
    pub rules: Option<PathBuf>,

    /// Recursive exploration depth; 1 disables it
    #[arg(long)]
    pub depth: Option<u32>,

    /// Chrome/Chromium executable
    #[arg(long, env = "HLSGRAB_BROWSER")]
    pub browser: Option<PathBuf>,
}

#[derive(clap::Args, Debug, Clone)]
pub struct RunArgs {
    /// Targets as `URL` or `URL name`
    pub targets: Vec<String>,

    /// File with one target per line (`URL [name]`, `#` starts a comment)
    #[arg(short, long)]
    pub input: Option<PathBuf>,

    /// Output directory; each target gets a subfolder
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Output name for a single target given without one
    #[arg(short, long)]
    pub name: Option<String>,

    /// How many candidates to download
    #[arg(short, long, value_parser = parse_mode)]
    pub mode: Option<DownloadMode>,

    /// Concurrent segment downloads (max 256)
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Output container extension
    #[arg(long)]
    pub extension: Option<String>,

    /// ffmpeg executable
    #[arg(long, env = "HLSGRAB_FFMPEG")]
    pub ffmpeg: Option<PathBuf>,

    /// Missing files tolerated regardless of ratio
    #[arg(long)]
    pub max_missing: Option<usize>,

    /// Success ratio at or above which gaps are tolerated
    #[arg(long)]
    pub min_success_ratio: Option<f64>,

    #[command(flatten)]
    pub monitor: MonitorArgs,
}

#[derive(clap::Args, Debug, Clone)]
pub struct DiscoverArgs {
    /// Page to inspect
    pub url: String,

    /// Print the full outcome as JSON
    #[arg(long)]
    pub json: bool,

    #[command(flatten)]
    pub monitor: MonitorArgs,
}

fn parse_mode(value: &str) -> Result<DownloadMode, String> {
    value
        .trim()
        .to_ascii_lowercase()
        .parse()
        .map_err(|_| format!("unknown mode `{value}` (none, first, first5, all)"))
}
