// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Startup wiring: configuration in, [`AppState`] out.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use inspectra_core::EngineState;
use inspectra_core::config::Config;
use inspectra_core::notifier::Notifier;
use inspectra_core::persistence::{Persistence, PostgresPersistence, SqlitePersistence};
use inspectra_core::push::{HttpPushSender, PushFanout, VapidSigner};
use inspectra_core::storage::{FsObjectStore, UrlSigner};
use inspectra_core::webhook::WebhookDispatcher;

use crate::auth::JwtActorResolver;
use crate::state::AppState;

/// Pool size for either backend.
const MAX_DB_CONNECTIONS: u32 = 10;

/// Install the global tracing subscriber.
///
/// `RUST_LOG` overrides the default filter; `INSPECTRA_LOG_FORMAT=json`
/// switches to JSON lines.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("inspectra_server=info,inspectra_core=info,tower_http=info"));

    let json = std::env::var("INSPECTRA_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .with_current_span(true)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// Open the database named by `database_url`, running migrations.
pub async fn connect_persistence(database_url: &str) -> Result<Arc<dyn Persistence>> {
    if database_url.starts_with("postgres://") || database_url.starts_with("postgresql://") {
        let persistence = PostgresPersistence::connect(database_url, MAX_DB_CONNECTIONS)
            .await
            .context("connecting to PostgreSQL")?;
        info!("Using PostgreSQL persistence");
        let persistence: Arc<dyn Persistence> = Arc::new(persistence);
        Ok(persistence)
    } else {
        let url = sqlite_create_if_missing(database_url);
        // every in-memory connection is its own database
        let max = if url.contains(":memory:") { 1 } else { MAX_DB_CONNECTIONS };
        let persistence = SqlitePersistence::connect(&url, max)
            .await
            .context("connecting to SQLite")?;
        info!("Using SQLite persistence");
        let persistence: Arc<dyn Persistence> = Arc::new(persistence);
        Ok(persistence)
    }
}

/// Add `mode=rwc` to file-backed SQLite URLs so a fresh deployment starts
/// with an empty database.
fn sqlite_create_if_missing(url: &str) -> String {
    if url.contains(":memory:") || url.contains("mode=") {
        url.to_string()
    } else if url.contains('?') {
        format!("{}&mode=rwc", url)
    } else {
        format!("{}?mode=rwc", url)
    }
}

/// Build the notifier from the delivery settings in `config`.
pub fn build_notifier(config: &Config, persistence: Arc<dyn Persistence>) -> Result<Notifier> {
    let webhooks = match (&config.webhook_secret, config.webhook_urls.is_empty()) {
        (Some(secret), false) => Some(
            WebhookDispatcher::new(secret, config.webhook_urls.clone())
                .context("building webhook dispatcher")?,
        ),
        (None, false) => {
            warn!("INSPECTRA_WEBHOOK_URLS set without INSPECTRA_WEBHOOK_SECRET; outbound webhooks disabled");
            None
        }
        _ => None,
    };

    let vapid = config
        .vapid
        .as_ref()
        .map(VapidSigner::from_config)
        .transpose()
        .context("loading VAPID key")?;
    if vapid.is_none() {
        warn!("VAPID not configured; push services requiring it will reject deliveries");
    }
    let sender = HttpPushSender::new(config.push_timeout, vapid).context("building push sender")?;
    let push = PushFanout::new(persistence, Arc::new(sender), config.push_timeout);

    Ok(Notifier::new(webhooks, Some(push)))
}

/// Wire every dependency the handlers need.
pub async fn build_state(config: &Config) -> Result<AppState> {
    let persistence = connect_persistence(&config.database_url).await?;

    let signer = UrlSigner::new(&config.public_base_url, &config.url_signing_secret);
    let objects = Arc::new(FsObjectStore::new(&config.storage_dir, signer));
    info!(root = %config.storage_dir.display(), "Object store ready");

    let notifier = build_notifier(config, persistence.clone())?;
    let engine = EngineState::new(persistence.clone(), objects, notifier)
        .with_reminder_window(config.reminder_window);
    let resolver = Arc::new(JwtActorResolver::new(&config.jwt_secret, persistence));

    Ok(AppState::new(
        engine,
        resolver,
        config.cron_secret.as_str(),
        config.webhook_secret.clone(),
    ))
}
