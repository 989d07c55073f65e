//! Headless host bridge: JSON commands on stdin, responses and events on stdout.
//!
//! All tracing output goes to stderr so stdout stays a clean protocol channel.

use aide::host::run_stdio_bridge;
use aide::{Shell, ShellConfig};
use anyhow::Context;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config_path = match std::env::var_os("AIDE_CONFIG") {
        Some(path) => std::path::PathBuf::from(path),
        None => ShellConfig::default_config_path().context("locating config file")?,
    };
    let config = ShellConfig::load_or_default(&config_path)
        .with_context(|| format!("loading config from {}", config_path.display()))?;

    tracing::info!(
        config = %config_path.display(),
        gateway = %config.gateway.base_url,
        "aide-host starting"
    );

    let shell = Shell::from_config(&config).context("building shell")?;
    let events = shell.events().clone();
    let cancel = shell.cancellation();
    let poller = shell.start();

    let result = run_stdio_bridge(shell, &events).await;

    cancel.cancel();
    let _ = poller.await;

    result.map_err(|e| {
        tracing::error!(error = %e, "aide-host exited with error");
        anyhow::anyhow!("aide-host failed: {e}")
    })?;

    tracing::info!("aide-host shut down cleanly");
    Ok(())
}
