// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Router construction.

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;

/// Request body cap; covers a maximum-size signature image plus form fields.
pub const MAX_BODY_BYTES: usize = 4 * 1024 * 1024;

/// Build the full router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    // auth is enforced per handler by extractors
    let instances = Router::new()
        .route("/instances", post(handlers::instances::create_instance))
        .route("/instances/{id}", get(handlers::instances::get_instance))
        .route(
            "/instances/{id}/transition",
            post(handlers::instances::transition),
        )
        .route("/instances/{id}/assign", post(handlers::instances::assign))
        .route(
            "/instances/{id}/comments",
            post(handlers::instances::add_comment),
        )
        .route("/instances/{id}/events", get(handlers::instances::list_events))
        .route(
            "/instances/{id}/signatures",
            post(handlers::signatures::sign).get(handlers::signatures::list),
        );

    let integrations = Router::new()
        .route("/cron/generate", post(handlers::cron::generate))
        .route("/cron/escalations", post(handlers::cron::escalations))
        .route("/push/subscribe", post(handlers::push::subscribe))
        .route("/push/unsubscribe", post(handlers::push::unsubscribe))
        .route("/webhooks/inbound", post(handlers::webhooks::inbound))
        .route("/objects/{*key}", get(handlers::objects::fetch));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handlers::health::health))
        .merge(instances)
        .merge(integrations)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
