// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HMAC-signed webhooks.
//!
//! Outbound: the envelope is serialized once, the signature is computed over
//! exactly those bytes, and the same bytes are sent as the body with the hex
//! signature in [`SIGNATURE_HEADER`]. Delivery is fire-and-forget: a bounded
//! timeout, a log line on failure, no retry.
//!
//! Inbound: [`parse_verified`] checks the signature against the raw body in
//! constant time before the body is parsed at all.

use std::time::Duration;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying `hex(HMAC-SHA256(secret, body))`.
pub const SIGNATURE_HEADER: &str = "X-Webhook-Signature";

/// Outbound delivery timeout.
pub const DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Webhook errors.
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    /// No signature header on an inbound request.
    #[error("missing webhook signature")]
    MissingSignature,

    /// Signature did not match the body.
    #[error("invalid webhook signature")]
    InvalidSignature,

    /// Body was authentic but not a valid envelope.
    #[error("malformed webhook payload: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Transport failure (connect, timeout, TLS).
    #[error("webhook delivery failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// Receiver answered with a non-2xx status.
    #[error("webhook receiver returned HTTP {0}")]
    Status(u16),
}

fn mac(secret: &[u8]) -> HmacSha256 {
    match HmacSha256::new_from_slice(secret) {
        Ok(mac) => mac,
        Err(_) => unreachable!("HMAC accepts keys of any length"),
    }
}

/// Lowercase hex HMAC-SHA256 of `payload` under `secret`.
pub fn sign(payload: &[u8], secret: &[u8]) -> String {
    let mut mac = mac(secret);
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time verification of a hex signature (optionally `sha256=`-prefixed).
///
/// Returns false for malformed hex as well as for mismatches.
pub fn verify(payload: &[u8], signature: &str, secret: &[u8]) -> bool {
    let signature = signature.trim();
    let signature = signature.strip_prefix("sha256=").unwrap_or(signature);
    let Ok(provided) = hex::decode(signature) else {
        return false;
    };
    let mut mac = mac(secret);
    mac.update(payload);
    mac.verify_slice(&provided).is_ok()
}

/// Webhook body, outbound and inbound.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookEnvelope {
    /// Unique delivery id.
    pub id: String,
    /// Event name, e.g. `instance.passed`.
    pub event: String,
    /// When the underlying change happened.
    pub occurred_at: DateTime<Utc>,
    /// Event-specific data.
    #[serde(default)]
    pub data: serde_json::Value,
}

impl WebhookEnvelope {
    /// New envelope with a fresh id, stamped now.
    pub fn new(event: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            event: event.into(),
            occurred_at: Utc::now(),
            data,
        }
    }
}

/// Verify `signature` against the raw `body`, then parse the envelope.
pub fn parse_verified(
    body: &[u8],
    signature: Option<&str>,
    secret: &[u8],
) -> Result<WebhookEnvelope, WebhookError> {
    let signature = signature
        .filter(|s| !s.trim().is_empty())
        .ok_or(WebhookError::MissingSignature)?;
    if !verify(body, signature, secret) {
        return Err(WebhookError::InvalidSignature);
    }
    Ok(serde_json::from_slice(body)?)
}

/// Outcome of a fan-out to all configured receivers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WebhookReport {
    /// Receivers that answered 2xx.
    pub delivered: usize,
    /// Receivers that failed.
    pub failed: usize,
}

/// Signs and posts envelopes to a fixed set of receivers.
#[derive(Clone)]
pub struct WebhookDispatcher {
    client: reqwest::Client,
    secret: Vec<u8>,
    targets: Vec<String>,
}

impl WebhookDispatcher {
    /// Dispatcher with the default 10 second timeout.
    pub fn new(secret: impl AsRef<[u8]>, targets: Vec<String>) -> Result<Self, WebhookError> {
        Self::with_timeout(secret, targets, DELIVERY_TIMEOUT)
    }

    /// Dispatcher with an explicit per-request timeout.
    pub fn with_timeout(
        secret: impl AsRef<[u8]>,
        targets: Vec<String>,
        timeout: Duration,
    ) -> Result<Self, WebhookError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            secret: secret.as_ref().to_vec(),
            targets,
        })
    }

    /// Configured receivers.
    pub fn targets(&self) -> &[String] {
        &self.targets
    }

    /// POST one envelope to one receiver.
    pub async fn deliver(&self, target: &str, envelope: &WebhookEnvelope) -> Result<(), WebhookError> {
        let body = serde_json::to_vec(envelope)?;
        let signature = sign(&body, &self.secret);

        let response = self
            .client
            .post(target)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(SIGNATURE_HEADER, signature)
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(WebhookError::Status(status.as_u16()));
        }
        Ok(())
    }

    /// Send `event` to every receiver concurrently. Failures are logged and dropped.
    #[instrument(skip(self, data), fields(targets = self.targets.len()))]
    pub async fn dispatch(&self, event: &str, data: serde_json::Value) -> WebhookReport {
        let envelope = WebhookEnvelope::new(event, data);
        let envelope = &envelope;

        let results = futures::future::join_all(
            self.targets
                .iter()
                .map(|target| async move { (target, self.deliver(target, envelope).await) }),
        )
        .await;

        let mut report = WebhookReport::default();
        for (target, result) in results {
            match result {
                Ok(()) => {
                    debug!(url = %target, event_id = %envelope.id, "Webhook delivered");
                    report.delivered += 1;
                }
                Err(e) => {
                    warn!(url = %target, event_id = %envelope.id, error = %e, "Webhook delivery failed");
                    report.failed += 1;
                }
            }
        }
        report
    }
}
