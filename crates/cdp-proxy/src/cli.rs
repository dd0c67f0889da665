use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "cdp-proxy",
    version,
    about = "Recording proxy for Chrome DevTools Protocol WebSocket sessions"
)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "cdp-proxy.yaml")]
    pub config: PathBuf,

    /// Listen address (overrides config file setting)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Remote DevTools address (overrides config file setting)
    #[arg(short = 'r', long)]
    pub remote: Option<String>,

    /// Disable logging to file
    #[arg(short = 'n', long = "no-log")]
    pub no_log: bool,

    /// Log file mask; `%s` is replaced by the session id
    #[arg(long = "log", value_name = "MASK")]
    pub log_mask: Option<String>,
}
