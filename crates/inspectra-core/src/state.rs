// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Explicitly constructed engine dependencies.

use std::sync::Arc;

use crate::notifier::Notifier;
use crate::persistence::Persistence;
use crate::storage::ObjectStore;

/// Default lead time for due-date reminders.
pub const DEFAULT_REMINDER_WINDOW_HOURS: i64 = 24;

/// Shared state for engine operations.
///
/// Built once at startup and passed to every operation; there are no global
/// clients.
#[derive(Clone)]
pub struct EngineState {
    /// Persistence implementation.
    pub persistence: Arc<dyn Persistence>,
    /// Object storage for signature images.
    pub objects: Arc<dyn ObjectStore>,
    /// Background side-effect launcher.
    pub notifier: Notifier,
    /// How far ahead of `due_at` an assignee is reminded.
    pub reminder_window: chrono::Duration,
}

impl EngineState {
    /// Create engine state with the default reminder window.
    pub fn new(
        persistence: Arc<dyn Persistence>,
        objects: Arc<dyn ObjectStore>,
        notifier: Notifier,
    ) -> Self {
        Self {
            persistence,
            objects,
            notifier,
            reminder_window: chrono::Duration::hours(DEFAULT_REMINDER_WINDOW_HOURS),
        }
    }

    /// Override the reminder window.
    pub fn with_reminder_window(mut self, window: chrono::Duration) -> Self {
        self.reminder_window = window;
        self
    }
}
