//! slircd-link - Straylight IRC Daemon link core.

use anyhow::Context;
use slircd_link::config::{Config, validation};
use slircd_link::state::{Matrix, NullObserver, ServerIdentity};
use slircd_link::sync::{SyncManager, network};
use slircd_link::{http, metrics, telemetry};
use slirc_link_proto::ServerId;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_string());

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {config_path}"))?;

    telemetry::init(&config.log);

    if let Err(errors) = validation::validate(&config) {
        for e in &errors {
            error!(error = %e, "Invalid configuration");
        }
        anyhow::bail!("{} configuration error(s) in {config_path}", errors.len());
    }

    info!(
        server = %config.server.name,
        sid = %config.server.sid,
        links = config.links.len(),
        "Starting slircd-link"
    );

    metrics::init();
    if let Some(port) = config.server.metrics_port {
        tokio::spawn(http::run_http_server(port));
    }

    let me = ServerIdentity {
        sid: ServerId::parse(&config.server.sid)?,
        name: config.server.name.clone(),
        description: config.server.description.clone(),
    };
    let matrix = Arc::new(Matrix::new(me));
    let manager = SyncManager::new(matrix, config.s2s.clone(), config.links.clone(), Arc::new(NullObserver));

    let shutdown = CancellationToken::new();
    network::spawn_links(&manager, &shutdown);

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");
    shutdown.cancel();
    // Give link tasks a moment to send their closing lines.
    tokio::time::sleep(std::time::Duration::from_millis(500)).await;
    Ok(())
}
