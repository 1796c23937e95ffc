// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use serde::Deserialize;
use serde_json::{Value, json};

use inspectra_core::CoreError;
use inspectra_core::push::{PushFanout, SubscriptionRequest};

use crate::auth::AuthenticatedActor;
use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct UnsubscribeRequest {
    pub endpoint: String,
}

fn fanout(state: &AppState) -> Result<&PushFanout, CoreError> {
    state.engine.notifier.push().ok_or_else(|| CoreError::InternalError {
        details: "push delivery is not configured".to_string(),
    })
}

/// POST /push/subscribe
pub async fn subscribe(
    AuthenticatedActor(actor): AuthenticatedActor,
    State(state): State<AppState>,
    payload: Result<Json<SubscriptionRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let Json(request) = payload?;
    let stored = fanout(&state)?.subscribe(&actor.id, request).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "id": stored.id, "endpoint": stored.endpoint })),
    ))
}

/// POST /push/unsubscribe
pub async fn unsubscribe(
    AuthenticatedActor(actor): AuthenticatedActor,
    State(state): State<AppState>,
    payload: Result<Json<UnsubscribeRequest>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let Json(request) = payload?;
    let removed = fanout(&state)?.unsubscribe(&actor.id, &request.endpoint).await?;
    Ok(Json(json!({ "removed": removed })))
}
