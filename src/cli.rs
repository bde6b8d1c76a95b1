use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(
    name = "hostdeck",
    version,
    about = "Terminal console for your hosted applications."
)]
pub struct CliArgs {
    /// Base URL of the hosting API
    #[arg(long)]
    pub api_url: Option<String>,

    /// Plan status poll interval in milliseconds
    #[arg(long)]
    pub poll_ms: Option<u64>,

    /// Application list refresh interval in milliseconds
    #[arg(long)]
    pub refresh_ms: Option<u64>,

    /// Minimum time an action spinner stays visible, in milliseconds
    #[arg(long)]
    pub feedback_ms: Option<u64>,

    /// Client state file (cookies and local keys)
    #[arg(long)]
    pub state_file: Option<PathBuf>,

    /// tracing filter (for example: info,debug,trace)
    #[arg(long, default_value = "info")]
    pub log_filter: String,

    /// Write logs to this file instead of discarding them
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}
