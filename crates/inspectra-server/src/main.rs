// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Inspectra server binary.

use anyhow::Result;
use tokio::net::TcpListener;
use tracing::{error, info};

use inspectra_core::config::Config;
use inspectra_server::bootstrap;
use inspectra_server::build_router;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (from crate directory or parent directories)
    dotenvy::dotenv().ok();

    bootstrap::init_tracing();

    info!("Starting Inspectra server");

    let config = Config::from_env().map_err(|e| {
        error!("Configuration error: {}", e);
        e
    })?;

    info!(
        http_addr = %config.http_addr,
        webhook_targets = config.webhook_urls.len(),
        vapid = config.vapid.is_some(),
        reminder_window_hours = config.reminder_window.num_hours(),
        "Configuration loaded"
    );

    let state = bootstrap::build_state(&config).await?;
    let notifier = state.engine.notifier.clone();

    let listener = TcpListener::bind(config.http_addr).await?;
    info!(addr = %config.http_addr, "HTTP server listening");

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutting down...");
        })
        .await?;

    notifier.shutdown().await;
    info!("Shutdown complete");

    Ok(())
}
