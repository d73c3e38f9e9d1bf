// SPDX-License-Identifier: GPL-3.0-only
mod api;
mod config;
mod context;
mod ini;
mod installer;
mod launcher;
mod layout;
mod logging;
mod provisioning;
mod registry;
mod specs;
mod utils;
mod version;

#[cfg(test)]
mod test_helpers;

use tokio::signal;
use tracing::{error, info};

use api::HttpServer;
use config::Config;
use context::AppContext;
use logging::setup_logging;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    setup_logging(&config.log_level, config.log_json)?;

    info!("Starting BoxKeeperDaemon v{}", env!("CARGO_PKG_VERSION"));

    let http_addr = config.local_api_bind;
    let ctx = AppContext::new(config).await?;
    info!(
        home = %ctx.config.effective_home(ctx.settings.get().vm_home.as_deref()).display(),
        settings = %ctx.settings.path().display(),
        "Context initialized"
    );

    // Startup reconciliation
    let reconcile_task = ctx.spawn_reconcile();

    // Start HTTP server
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let http_server = HttpServer::new(ctx.clone(), http_addr);
    let http_task = tokio::spawn(async move {
        let shutdown = async {
            let _ = stop_rx.await;
        };
        if let Err(e) = http_server.serve(shutdown).await {
            error!(error = %e, "HTTP server error");
        }
    });

    info!("All services started. Waiting for shutdown signal...");

    tokio::select! {
        result = signal::ctrl_c() => match result {
            Ok(()) => info!("Received shutdown signal (Ctrl+C)"),
            Err(err) => error!(error = %err, "Unable to listen for shutdown signal"),
        },
        _ = ctx.shutdown_requested() => info!("Shutdown requested for relaunch"),
    }

    // Graceful shutdown
    info!("Initiating graceful shutdown...");

    ctx.teardown();
    reconcile_task.abort();
    let _ = stop_tx.send(());

    if tokio::time::timeout(std::time::Duration::from_secs(2), http_task).await.is_err() {
        error!("HTTP server did not stop in time");
    }

    match ctx.finish_relaunch() {
        Ok(true) => info!("Updated manager started"),
        Ok(false) => {}
        Err(e) => error!(error = %e, "Failed to start updated manager"),
    }

    info!("Shutdown complete");
    Ok(())
}
