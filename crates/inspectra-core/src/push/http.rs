// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Web Push delivery over HTTP with optional VAPID authentication (RFC 8292).

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::Serialize;
use tracing::debug;

use super::{PushError, PushSender, crypto};
use crate::config::VapidConfig;
use crate::persistence::PushSubscriptionRecord;

/// How long the push service should hold an undelivered message.
pub const DEFAULT_MESSAGE_TTL_SECS: u32 = 24 * 60 * 60;

/// Lifetime of a VAPID token (the RFC caps it at 24 hours).
const VAPID_TOKEN_TTL_SECS: i64 = 12 * 60 * 60;

/// Decode base64url with or without padding.
pub fn decode_key(value: &str) -> Result<Vec<u8>, PushError> {
    URL_SAFE_NO_PAD
        .decode(value.trim().trim_end_matches('='))
        .map_err(|e| PushError::InvalidKey(format!("not base64url: {}", e)))
}

#[derive(Serialize)]
struct VapidClaims<'a> {
    aud: &'a str,
    exp: i64,
    sub: &'a str,
}

/// Signs VAPID tokens for push service origins.
#[derive(Clone)]
pub struct VapidSigner {
    key: EncodingKey,
    public_key: String,
    subject: String,
}

impl VapidSigner {
    /// Build from configuration; the PEM must be a PKCS#8 P-256 key.
    pub fn from_config(config: &VapidConfig) -> Result<Self, PushError> {
        let key = EncodingKey::from_ec_pem(config.private_key_pem.as_bytes())
            .map_err(|e| PushError::Vapid(e.to_string()))?;
        Ok(Self {
            key,
            public_key: config.public_key.trim().trim_end_matches('=').to_string(),
            subject: config.subject.clone(),
        })
    }

    /// `Authorization` header value for a request to `endpoint`.
    pub fn authorization(&self, endpoint: &str) -> Result<String, PushError> {
        let url = url::Url::parse(endpoint).map_err(|e| PushError::Vapid(e.to_string()))?;
        let audience = url.origin().ascii_serialization();
        let claims = VapidClaims {
            aud: &audience,
            exp: Utc::now().timestamp() + VAPID_TOKEN_TTL_SECS,
            sub: &self.subject,
        };
        let token = jsonwebtoken::encode(&Header::new(Algorithm::ES256), &claims, &self.key)
            .map_err(|e| PushError::Vapid(e.to_string()))?;
        Ok(format!("vapid t={}, k={}", token, self.public_key))
    }
}

/// [`PushSender`] speaking the Web Push protocol.
#[derive(Clone)]
pub struct HttpPushSender {
    client: reqwest::Client,
    vapid: Option<VapidSigner>,
    message_ttl: u32,
}

impl HttpPushSender {
    /// Sender whose HTTP client gives up after `timeout`.
    pub fn new(timeout: Duration, vapid: Option<VapidSigner>) -> Result<Self, PushError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PushError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            vapid,
            message_ttl: DEFAULT_MESSAGE_TTL_SECS,
        })
    }

    /// Override the `TTL` header.
    pub fn with_message_ttl(mut self, seconds: u32) -> Self {
        self.message_ttl = seconds;
        self
    }
}

#[async_trait]
impl PushSender for HttpPushSender {
    async fn send(
        &self,
        subscription: &PushSubscriptionRecord,
        payload: &[u8],
    ) -> Result<(), PushError> {
        let ua_public = decode_key(&subscription.p256dh)?;
        let auth = decode_key(&subscription.auth)?;
        let body = crypto::encrypt(payload, &ua_public, &auth)?;

        let mut request = self
            .client
            .post(&subscription.endpoint)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .header(reqwest::header::CONTENT_ENCODING, "aes128gcm")
            .header("TTL", self.message_ttl.to_string())
            .body(body);
        if let Some(vapid) = &self.vapid {
            request = request.header(
                reqwest::header::AUTHORIZATION,
                vapid.authorization(&subscription.endpoint)?,
            );
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                PushError::Timeout
            } else {
                PushError::Transport(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        match status {
            200..=299 => {
                debug!(subscription_id = %subscription.id, status, "Push accepted");
                Ok(())
            }
            404 | 410 => Err(PushError::Gone(status)),
            _ => Err(PushError::Rejected {
                status,
                body: response.text().await.unwrap_or_default(),
            }),
        }
    }
}
