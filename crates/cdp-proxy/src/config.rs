use serde::Deserialize;
use std::path::Path;
use tracing::warn;

use session_log::TranscriptConfig;
use ws_relay::{OriginPolicy, ProxyConfig, WsSettings};

use crate::cli::Cli;

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub transcript: TranscriptConfig,
    #[serde(default)]
    pub websocket: WsSettings,
    #[serde(default)]
    pub origin: OriginPolicy,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_listen")]
    pub listen_addr: String,
    #[serde(default = "default_remote")]
    pub remote_addr: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen(),
            remote_addr: default_remote(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Apply command-line overrides on top of the file settings.
    pub fn merge_cli(&mut self, cli: &Cli) {
        if let Some(ref listen) = cli.listen {
            self.network.listen_addr = listen.clone();
        }
        if let Some(ref remote) = cli.remote {
            self.network.remote_addr = remote.clone();
        }
        if cli.no_log {
            self.transcript.file_logging = false;
        }
        if let Some(ref mask) = cli.log_mask {
            self.transcript.file_template = mask.clone();
        }
    }

    pub fn proxy_config(&self) -> ProxyConfig {
        ProxyConfig {
            listen_addr: self.network.listen_addr.clone(),
            remote_addr: self.network.remote_addr.clone(),
            websocket: self.websocket.clone(),
            origin: self.origin.clone(),
            transcript: self.transcript.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Default-value functions used by serde
// ---------------------------------------------------------------------------

fn default_listen() -> String {
    "localhost:9223".to_string()
}

fn default_remote() -> String {
    "localhost:9222".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

/// Load configuration from a YAML file.
///
/// A missing file is not an error: defaults are returned with a warning so
/// the proxy can run from command-line flags alone.
pub fn load(path: &Path) -> anyhow::Result<Config> {
    if !path.exists() {
        warn!(
            path = %path.display(),
            "configuration file not found; using defaults"
        );
        return Ok(Config::default());
    }

    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read config file {}: {e}", path.display()))?;

    load_from_str(&contents)
        .map_err(|e| anyhow::anyhow!("failed to parse config file {}: {e}", path.display()))
}

pub fn load_from_str(yaml: &str) -> Result<Config, serde_yml::Error> {
    serde_yml::from_str(yaml)
}
