// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared handler state.

use std::sync::Arc;

use inspectra_core::EngineState;

use crate::auth::ActorResolver;

/// State handed to every handler.
#[derive(Clone)]
pub struct AppState {
    /// Engine dependencies.
    pub engine: EngineState,
    /// Caller authentication.
    pub resolver: Arc<dyn ActorResolver>,
    /// Bearer secret for the cron endpoints.
    pub cron_secret: Arc<str>,
    /// HMAC secret for inbound webhooks; inbound calls are refused when unset.
    pub webhook_secret: Option<Arc<str>>,
}

impl AppState {
    pub fn new(
        engine: EngineState,
        resolver: Arc<dyn ActorResolver>,
        cron_secret: impl Into<Arc<str>>,
        webhook_secret: Option<String>,
    ) -> Self {
        Self {
            engine,
            resolver,
            cron_secret: cron_secret.into(),
            webhook_secret: webhook_secret.map(Arc::from),
        }
    }
}
