// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Browser push fan-out.
//!
//! A fan-out resolves a set of profiles, loads every subscription they own and
//! delivers to all of them concurrently. Each delivery is bounded by a timeout
//! and reported independently; one failure never aborts the batch.
//! Subscriptions whose endpoint reports 404/410 are deleted on the spot.

pub mod crypto;
pub mod http;

pub use self::http::{HttpPushSender, VapidSigner};

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::error::CoreError;
use crate::persistence::{Persistence, PushSubscriptionRecord};
use crate::types::{self, Role};

/// Push delivery errors.
#[derive(Debug, thiserror::Error)]
pub enum PushError {
    /// Endpoint no longer exists (HTTP 404/410); the subscription is dead.
    #[error("push endpoint gone (HTTP {0})")]
    Gone(u16),

    /// Push service refused the message.
    #[error("push service rejected message (HTTP {status}): {body}")]
    Rejected {
        /// HTTP status.
        status: u16,
        /// Response body, for diagnostics.
        body: String,
    },

    /// Delivery did not complete in time.
    #[error("push delivery timed out")]
    Timeout,

    /// Connection or protocol failure.
    #[error("push transport error: {0}")]
    Transport(String),

    /// Subscription keys are unusable.
    #[error("invalid subscription key: {0}")]
    InvalidKey(String),

    /// Payload exceeds a single record.
    #[error("push payload of {0} bytes is too large")]
    PayloadTooLarge(usize),

    /// Content encryption failed.
    #[error("push encryption failed: {0}")]
    Encryption(String),

    /// VAPID token could not be produced.
    #[error("vapid signing failed: {0}")]
    Vapid(String),
}

impl PushError {
    /// Whether the subscription should be pruned.
    pub fn is_gone(&self) -> bool {
        matches!(self, Self::Gone(_))
    }
}

/// Delivers one encrypted message to one subscription.
#[async_trait]
pub trait PushSender: Send + Sync {
    /// Send `payload` to `subscription`.
    async fn send(
        &self,
        subscription: &PushSubscriptionRecord,
        payload: &[u8],
    ) -> Result<(), PushError>;
}

/// Message shown by the service worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushNotification {
    /// Title line.
    pub title: String,
    /// Body text.
    pub body: String,
    /// Link opened on click.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Collapse key; newer notifications with the same tag replace older ones.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

impl PushNotification {
    /// Notification with just a title and body.
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            url: None,
            tag: None,
        }
    }

    /// Attach a click-through URL.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Attach a collapse tag.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }
}

/// Aggregate outcome of a fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PushReport {
    /// Deliveries accepted by the push service.
    pub sent: usize,
    /// Deliveries that failed (gone endpoints included).
    pub failed: usize,
}

/// Subscription descriptor as produced by `PushManager.subscribe()` in the browser.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SubscriptionRequest {
    /// Push service endpoint.
    pub endpoint: String,
    /// Client keys.
    pub keys: SubscriptionKeys,
}

/// Client encryption keys, base64url.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SubscriptionKeys {
    /// Client ECDH public key.
    pub p256dh: String,
    /// Client auth secret.
    pub auth: String,
}

enum Outcome {
    Sent,
    Failed,
    Gone,
}

/// Push fan-out over stored subscriptions.
#[derive(Clone)]
pub struct PushFanout {
    persistence: Arc<dyn Persistence>,
    sender: Arc<dyn PushSender>,
    timeout: Duration,
}

impl PushFanout {
    /// Fan-out bounding every delivery by `timeout`.
    pub fn new(
        persistence: Arc<dyn Persistence>,
        sender: Arc<dyn PushSender>,
        timeout: Duration,
    ) -> Self {
        Self {
            persistence,
            sender,
            timeout,
        }
    }

    /// Store (or refresh) a subscription for `profile_id`.
    #[instrument(skip(self, request), fields(endpoint = %request.endpoint))]
    pub async fn subscribe(
        &self,
        profile_id: &str,
        request: SubscriptionRequest,
    ) -> Result<PushSubscriptionRecord, CoreError> {
        let endpoint = url::Url::parse(&request.endpoint)
            .map_err(|e| CoreError::validation("endpoint", e.to_string()))?;
        if !matches!(endpoint.scheme(), "https" | "http") {
            return Err(CoreError::validation("endpoint", "must be an http(s) URL"));
        }

        let p256dh = http::decode_key(&request.keys.p256dh)
            .map_err(|e| CoreError::validation("keys.p256dh", e.to_string()))?;
        crypto::parse_public_key(&p256dh)
            .map_err(|e| CoreError::validation("keys.p256dh", e.to_string()))?;
        let auth = http::decode_key(&request.keys.auth)
            .map_err(|e| CoreError::validation("keys.auth", e.to_string()))?;
        if auth.len() != crypto::AUTH_SECRET_LEN {
            return Err(CoreError::validation("keys.auth", "must decode to 16 bytes"));
        }

        let now = types::now();
        let stored = self
            .persistence
            .upsert_push_subscription(&PushSubscriptionRecord {
                id: Uuid::new_v4().to_string(),
                profile_id: profile_id.to_string(),
                endpoint: request.endpoint,
                p256dh: request.keys.p256dh,
                auth: request.keys.auth,
                last_seen_at: now,
                created_at: now,
            })
            .await?;

        info!(profile_id = %profile_id, subscription_id = %stored.id, "Push subscription stored");
        Ok(stored)
    }

    /// Remove `profile_id`'s subscription for `endpoint`. Returns whether one existed.
    pub async fn unsubscribe(&self, profile_id: &str, endpoint: &str) -> Result<bool, CoreError> {
        let removed = self
            .persistence
            .delete_push_subscription(endpoint, Some(profile_id))
            .await?;
        debug!(profile_id = %profile_id, removed, "Push unsubscribe");
        Ok(removed)
    }

    /// Deliver to every subscription of one profile.
    pub async fn send_to_profile(
        &self,
        profile_id: &str,
        notification: &PushNotification,
    ) -> Result<PushReport, CoreError> {
        self.send_to_profiles(&[profile_id.to_string()], notification)
            .await
    }

    /// Deliver to every profile whose home location is `location_id`.
    pub async fn send_to_location(
        &self,
        location_id: &str,
        notification: &PushNotification,
    ) -> Result<PushReport, CoreError> {
        let profiles = self
            .persistence
            .list_profiles_at_location(location_id, None)
            .await?;
        let ids: Vec<String> = profiles.into_iter().map(|p| p.id).collect();
        self.send_to_profiles(&ids, notification).await
    }

    /// Deliver to profiles at `location_id` holding one of `roles`.
    pub async fn send_to_roles_at_location(
        &self,
        location_id: &str,
        roles: &[Role],
        notification: &PushNotification,
    ) -> Result<PushReport, CoreError> {
        let profiles = self
            .persistence
            .list_profiles_at_location(location_id, Some(roles))
            .await?;
        let ids: Vec<String> = profiles.into_iter().map(|p| p.id).collect();
        self.send_to_profiles(&ids, notification).await
    }

    /// Deliver to every subscription owned by any of `profile_ids`.
    #[instrument(skip(self, profile_ids, notification), fields(profiles = profile_ids.len()))]
    pub async fn send_to_profiles(
        &self,
        profile_ids: &[String],
        notification: &PushNotification,
    ) -> Result<PushReport, CoreError> {
        let unique: Vec<String> = profile_ids
            .iter()
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if unique.is_empty() {
            return Ok(PushReport::default());
        }

        let subscriptions = self.persistence.list_push_subscriptions(&unique).await?;
        if subscriptions.is_empty() {
            debug!("No push subscriptions for target profiles");
            return Ok(PushReport::default());
        }

        let payload = serde_json::to_vec(notification)?;
        let payload = payload.as_slice();

        let outcomes = futures::future::join_all(
            subscriptions
                .iter()
                .map(|subscription| self.deliver_one(subscription, payload)),
        )
        .await;

        let mut report = PushReport::default();
        for outcome in outcomes {
            match outcome {
                Outcome::Sent => report.sent += 1,
                Outcome::Failed | Outcome::Gone => report.failed += 1,
            }
        }

        info!(sent = report.sent, failed = report.failed, "Push fan-out complete");
        Ok(report)
    }

    async fn deliver_one(&self, subscription: &PushSubscriptionRecord, payload: &[u8]) -> Outcome {
        let result = match tokio::time::timeout(self.timeout, self.sender.send(subscription, payload))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(PushError::Timeout),
        };

        match result {
            Ok(()) => Outcome::Sent,
            Err(e) if e.is_gone() => {
                info!(
                    subscription_id = %subscription.id,
                    profile_id = %subscription.profile_id,
                    error = %e,
                    "Pruning dead push subscription"
                );
                if let Err(delete_err) = self
                    .persistence
                    .delete_push_subscription(&subscription.endpoint, Some(&subscription.profile_id))
                    .await
                {
                    warn!(
                        subscription_id = %subscription.id,
                        error = %delete_err,
                        "Failed to delete dead push subscription"
                    );
                }
                Outcome::Gone
            }
            Err(e) => {
                warn!(subscription_id = %subscription.id, error = %e, "Push delivery failed");
                Outcome::Failed
            }
        }
    }
}
