// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Inbound webhooks.
//!
//! The signature is checked against the raw body before anything is parsed.
//! `instance.comment` envelopes append a comment event; other events are
//! acknowledged and ignored.

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use inspectra_core::lifecycle::{self, MAX_COMMENT_LEN};
use inspectra_core::types::EventType;
use inspectra_core::webhook::{self, SIGNATURE_HEADER, WebhookError};
use inspectra_core::{CoreError, events};

use crate::error::ApiResult;
use crate::state::AppState;

/// Event name that carries a comment.
pub const COMMENT_EVENT: &str = "instance.comment";

#[derive(Debug, Deserialize)]
struct InboundComment {
    instance_id: String,
    text: String,
    #[serde(default)]
    author: Option<String>,
}

/// POST /webhooks/inbound
pub async fn inbound(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let Some(secret) = state.webhook_secret.as_deref() else {
        warn!("Inbound webhook refused: no secret configured");
        return Err(WebhookError::InvalidSignature.into());
    };

    let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());
    let envelope = webhook::parse_verified(&body, signature, secret.as_bytes())?;
    info!(webhook_id = %envelope.id, event = %envelope.event, "Inbound webhook accepted");

    if envelope.event == COMMENT_EVENT {
        let comment: InboundComment = serde_json::from_value(envelope.data)
            .map_err(|e| CoreError::validation("data", e.to_string()))?;
        let text = comment.text.trim();
        if text.is_empty() || text.chars().count() > MAX_COMMENT_LEN {
            return Err(CoreError::validation(
                "data.text",
                format!("must be 1 to {} characters", MAX_COMMENT_LEN),
            )
            .into());
        }

        lifecycle::get_instance(&state.engine, &comment.instance_id).await?;
        events::append(
            &state.engine,
            &comment.instance_id,
            EventType::Comment,
            comment.author.as_deref(),
            Some(json!({ "text": text, "source": "webhook", "webhook_id": envelope.id })),
        )
        .await?;
    } else {
        debug!(event = %envelope.event, "Ignoring inbound webhook event");
    }

    Ok((StatusCode::ACCEPTED, Json(json!({ "accepted": true }))))
}
