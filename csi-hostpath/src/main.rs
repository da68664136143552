use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use libcsi::HostPathBackend;
use libcsi::transport::server::CsiServer;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod config;

use config::{Cli, LogFormat};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let driver_config = cli.driver_config(config::hostname);
    info!(
        endpoint = %cli.endpoint.display(),
        root = %driver_config.root.display(),
        node_id = %driver_config.node_id,
        "starting CSI host-path plugin",
    );

    let backend = Arc::new(HostPathBackend::new(driver_config));
    backend
        .init()
        .await
        .context("failed to initialize volume registry")?;

    let server = CsiServer::bind(&cli.endpoint, backend)
        .await
        .with_context(|| format!("failed to listen on {}", cli.endpoint.display()))?;
    server.serve_until(shutdown_signal()).await?;
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
