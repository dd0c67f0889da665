mod cli;
mod config;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use session_log::{TranscriptConfig, TranscriptWriter};
use ws_relay::Proxy;

use crate::cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Parse CLI args.
    let cli = Cli::parse();

    // 2. Load config, then merge CLI overrides.
    let mut cfg = config::load(&cli.config)?;
    cfg.merge_cli(&cli);

    // 3. Init tracing on stderr; stdout carries the session transcripts.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cfg.logging.level));

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    info!(
        config_file = %cli.config.display(),
        listen = %cfg.network.listen_addr,
        remote = %cfg.network.remote_addr,
        file_logging = cfg.transcript.file_logging,
        log_mask = %cfg.transcript.file_template,
        "cdp-proxy starting"
    );

    // 4. Fail fast if transcripts cannot be written where configured.
    check_transcript_target(&cfg.transcript)
        .await
        .context("invalid log file configuration")?;

    // 5. Build the proxy from the immutable, merged configuration.
    let proxy = Proxy::new(cfg.proxy_config()).context("failed to create proxy")?;

    // 6. Serve until the listener fails or a shutdown signal arrives.
    tokio::select! {
        result = proxy.run() => {
            result.context("proxy exited")?;
        }
        signal = shutdown_signal() => {
            signal?;
        }
    }

    info!("cdp-proxy shutting down");
    Ok(())
}

/// Open the shared log file, or create the per-session log directory, so a
/// bad mask is reported at startup instead of on the first session.
async fn check_transcript_target(config: &TranscriptConfig) -> Result<()> {
    let Some(path) = config.file_path("") else {
        return Ok(());
    };

    if config.is_shared_file() {
        TranscriptWriter::new().with_file(&path).await?;
    } else if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("failed to create log directory {}", dir.display()))?;
    }
    Ok(())
}

/// Resolve on ctrl-c, or SIGTERM on unix.
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .context("failed to register SIGTERM handler")?;

        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("failed to listen for ctrl-c")?;
                info!("received SIGINT (ctrl-c)");
            }
            _ = sigterm.recv() => {
                info!("received SIGTERM");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .context("failed to listen for ctrl-c")?;
        info!("received SIGINT (ctrl-c)");
    }

    Ok(())
}
