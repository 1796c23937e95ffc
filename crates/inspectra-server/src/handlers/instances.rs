// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Instance lifecycle endpoints.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use inspectra_core::events;
use inspectra_core::lifecycle::{self, Assignee};
use inspectra_core::persistence::{EventRecord, InstanceRecord};
use inspectra_core::types::InstanceStatus;

use crate::auth::AuthenticatedActor;
use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateInstanceRequest {
    pub template_id: String,
    #[serde(default)]
    pub due_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub assignee: Assignee,
}

#[derive(Debug, Deserialize)]
pub struct TransitionRequest {
    /// Target status, e.g. `in_progress`.
    pub status: String,
    #[serde(default)]
    pub remarks: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CommentRequest {
    pub text: String,
}

/// POST /instances
pub async fn create_instance(
    AuthenticatedActor(actor): AuthenticatedActor,
    State(state): State<AppState>,
    payload: Result<Json<CreateInstanceRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<InstanceRecord>)> {
    let Json(request) = payload?;
    let assignee = (request.assignee != Assignee::default()).then_some(request.assignee);
    let instance = lifecycle::create_instance(
        &state.engine,
        &request.template_id,
        request.due_at,
        assignee,
        &actor,
    )
    .await?;
    Ok((StatusCode::CREATED, Json(instance)))
}

/// GET /instances/{id}
pub async fn get_instance(
    AuthenticatedActor(_actor): AuthenticatedActor,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<InstanceRecord>> {
    Ok(Json(lifecycle::get_instance(&state.engine, &id).await?))
}

/// POST /instances/{id}/transition
pub async fn transition(
    AuthenticatedActor(actor): AuthenticatedActor,
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<TransitionRequest>, JsonRejection>,
) -> ApiResult<Json<InstanceRecord>> {
    let Json(request) = payload?;
    let status: InstanceStatus = request.status.parse()?;
    let instance = lifecycle::transition(&state.engine, &id, status, &actor, request.remarks).await?;
    Ok(Json(instance))
}

/// POST /instances/{id}/assign
pub async fn assign(
    AuthenticatedActor(actor): AuthenticatedActor,
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<Assignee>, JsonRejection>,
) -> ApiResult<Json<InstanceRecord>> {
    let Json(assignee) = payload?;
    let instance = lifecycle::assign(&state.engine, &id, assignee, &actor).await?;
    Ok(Json(instance))
}

/// POST /instances/{id}/comments
pub async fn add_comment(
    AuthenticatedActor(actor): AuthenticatedActor,
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<CommentRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<EventRecord>)> {
    let Json(request) = payload?;
    let event = lifecycle::comment(&state.engine, &id, &request.text, &actor).await?;
    Ok((StatusCode::CREATED, Json(event)))
}

/// GET /instances/{id}/events
pub async fn list_events(
    AuthenticatedActor(_actor): AuthenticatedActor,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<EventRecord>>> {
    lifecycle::get_instance(&state.engine, &id).await?;
    Ok(Json(events::list(&state.engine, &id).await?))
}
