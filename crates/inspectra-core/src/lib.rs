// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Inspectra Core - Inspection Lifecycle & Notification Engine
//!
//! This crate turns recurring inspection templates into concrete, auditable
//! work items and keeps everyone who cares about them informed.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐       ┌────────────────────────────────────────┐
//! │ cron / orchestrator  │──────▶│ generator        escalation            │
//! └──────────────────────┘       │   │                  │                 │
//! ┌──────────────────────┐       │   ▼                  ▼                 │
//! │ authenticated actors │──────▶│ lifecycle ──▶ events (append-only)     │
//! │  (inspectra-server)  │       │ signatures ─▶ storage (signed URLs)    │
//! └──────────────────────┘       │   │                                    │
//!                                │   ▼                                    │
//!                                │ notifier ──▶ webhook (HMAC-SHA256)     │
//!                                │          └─▶ push (Web Push, VAPID)    │
//!                                └───────────────────┬────────────────────┘
//!                                                    ▼
//!                                     ┌─────────────────────────────┐
//!                                     │ Persistence (SQLite / PG)   │
//!                                     └─────────────────────────────┘
//! ```
//!
//! # Instance Status State Machine
//!
//! ```text
//!                ┌─────────┐
//!         ┌─────▶│ PENDING │──────────────┐
//!         │      └────┬────┘              │
//!  revert │           │ start             │ void
//!  (owner,│           ▼                   ▼
//!   admin)│     ┌─────────────┐       ┌──────┐
//!         │     │ IN_PROGRESS │──────▶│ VOID │
//!         │     └──────┬──────┘ void  └──────┘
//!         │       pass │ fail
//!         │       ┌────┴────┐
//!         │       ▼         ▼
//!         │  ┌────────┐ ┌────────┐
//!         └──│ PASSED │ │ FAILED │──┐
//!         │  └────────┘ └────────┘  │
//!         └─────────────────────────┘
//! ```
//!
//! At most one instance per template is `pending` or `in_progress` at a time.
//!
//! # Guarantees
//!
//! | Operation | Guarantee |
//! |-----------|-----------|
//! | [`generator::generate_due_instances`] | Idempotent; one template's failure never aborts the run |
//! | [`lifecycle::transition`] | Whitelisted, capability-checked, compare-and-set on status |
//! | [`signatures::sign`] | At most one signature per (instance, signer) |
//! | [`escalation::run_escalations`] | Each escalation/reminder sent at most once |
//! | Webhooks and push | Best effort, bounded by timeouts, never block the caller |
//!
//! # Configuration
//!
//! See [`config::Config::from_env`] for the `INSPECTRA_*` environment variables.

#![warn(missing_docs)]

/// Environment-based configuration.
pub mod config;

/// Due-date arithmetic per template frequency.
pub mod due_date;

/// Error taxonomy with stable error codes.
pub mod error;

/// Overdue escalations and due-date reminders.
pub mod escalation;

/// Append-only instance audit trail.
pub mod events;

/// Scheduled materialization of due instances.
pub mod generator;

/// Instance state machine and manual instance actions.
pub mod lifecycle;

/// Embedded database migrations.
pub mod migrations;

/// Background delivery of notifications and audit events.
pub mod notifier;

/// Persistence trait, records and SQLite/PostgreSQL backends.
pub mod persistence;

/// Browser push: fan-out, RFC 8291 encryption, VAPID.
pub mod push;

/// Signature capture guarded by per-signer uniqueness.
pub mod signatures;

/// Engine state shared by every operation.
pub mod state;

/// Object storage for signature images with signed retrieval URLs.
pub mod storage;

/// Domain enums, roles and actors.
pub mod types;

/// Signed outbound webhooks and inbound verification.
pub mod webhook;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{CoreError, Result};
pub use state::EngineState;
pub use types::{Actor, Capability, EventType, Frequency, InstanceStatus, Role};
