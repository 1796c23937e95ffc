// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Detached, best-effort side effects.
//!
//! Everything a primary operation triggers after its durable write (event
//! appends, webhooks, push fan-out) runs on a task tracked here. Callers never
//! await these tasks; [`Notifier::flush`] and [`Notifier::shutdown`] exist so
//! tests and graceful shutdown can wait for them.

use std::future::Future;

use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use crate::push::{PushFanout, PushNotification};
use crate::types::Role;
use crate::webhook::WebhookDispatcher;

/// Launches and tracks fire-and-forget work.
#[derive(Clone)]
pub struct Notifier {
    webhooks: Option<WebhookDispatcher>,
    push: Option<PushFanout>,
    tracker: TaskTracker,
}

impl Notifier {
    /// Notifier with the given delivery channels; `None` disables a channel.
    pub fn new(webhooks: Option<WebhookDispatcher>, push: Option<PushFanout>) -> Self {
        Self {
            webhooks,
            push,
            tracker: TaskTracker::new(),
        }
    }

    /// Notifier with no delivery channels. Spawned tasks still run.
    pub fn disabled() -> Self {
        Self::new(None, None)
    }

    /// The push fan-out, when configured.
    pub fn push(&self) -> Option<&PushFanout> {
        self.push.as_ref()
    }

    /// Run `task` in the background without awaiting it.
    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tracker.spawn(task);
    }

    /// Deliver a webhook in the background.
    pub fn webhook(&self, event: impl Into<String>, data: serde_json::Value) {
        let Some(dispatcher) = self.webhooks.clone() else {
            return;
        };
        let event = event.into();
        self.spawn(async move {
            dispatcher.dispatch(&event, data).await;
        });
    }

    /// Push to one profile in the background.
    pub fn push_to_profile(&self, profile_id: impl Into<String>, notification: PushNotification) {
        let Some(push) = self.push.clone() else {
            return;
        };
        let profile_id = profile_id.into();
        self.spawn(async move {
            if let Err(e) = push.send_to_profile(&profile_id, &notification).await {
                warn!(profile_id = %profile_id, error = %e, "Push fan-out failed");
            }
        });
    }

    /// Push to supervisors (owner/admin/manager) of a location in the background.
    pub fn push_to_supervisors(&self, location_id: impl Into<String>, notification: PushNotification) {
        let Some(push) = self.push.clone() else {
            return;
        };
        let location_id = location_id.into();
        self.spawn(async move {
            if let Err(e) = push
                .send_to_roles_at_location(&location_id, &Role::SUPERVISORS, &notification)
                .await
            {
                warn!(location_id = %location_id, error = %e, "Push fan-out failed");
            }
        });
    }

    /// Wait for every task spawned so far; the notifier stays usable.
    pub async fn flush(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    /// Wait for in-flight tasks before the process exits.
    pub async fn shutdown(&self) {
        self.tracker.close();
        debug!(pending = self.tracker.len(), "Draining notification tasks");
        self.tracker.wait().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_flush_waits_for_spawned_tasks() {
        let notifier = Notifier::disabled();
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let counter = counter.clone();
            notifier.spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }

        notifier.flush().await;
        assert_eq!(counter.load(Ordering::SeqCst), 3);

        // still usable after a flush
        let c = counter.clone();
        notifier.spawn(async move {
            c.fetch_add(1, Ordering::SeqCst);
        });
        notifier.flush().await;
        assert_eq!(counter.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_disabled_channels_are_noops() {
        let notifier = Notifier::disabled();
        notifier.webhook("instance.passed", serde_json::json!({}));
        notifier.push_to_profile("p-1", PushNotification::new("t", "b"));
        notifier.push_to_supervisors("loc-1", PushNotification::new("t", "b"));
        notifier.shutdown().await;
    }
}
