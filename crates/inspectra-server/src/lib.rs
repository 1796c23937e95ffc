// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Inspectra HTTP server.
//!
//! Exposes the engine in `inspectra-core` over HTTP:
//!
//! ```text
//! scheduler ──► /cron/*            (bearer shared secret)
//! clients   ──► /instances/*       (bearer JWT, actor = profile)
//!           ──► /push/*
//! partners  ──► /webhooks/inbound  (X-Webhook-Signature)
//! browsers  ──► /objects/*         (signed URL)
//! ```
//!
//! Errors leave as `{ "error", "code" }` with the status from
//! [`error::ApiError`].

pub mod auth;
pub mod bootstrap;
pub mod error;
pub mod handlers;
pub mod router;
pub mod state;

pub use router::build_router;
pub use state::AppState;
