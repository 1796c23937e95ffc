// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Signed-URL object retrieval.

use axum::extract::rejection::QueryRejection;
use axum::extract::{Path, Query, State};
use axum::http::header::{
    CACHE_CONTROL, CONTENT_DISPOSITION, CONTENT_SECURITY_POLICY, CONTENT_TYPE,
    X_CONTENT_TYPE_OPTIONS,
};
use axum::response::IntoResponse;
use serde::Deserialize;

use inspectra_core::CoreError;

use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SignedQuery {
    pub expires: i64,
    pub signature: String,
}

fn content_type_for(key: &str) -> &'static str {
    match key.rsplit_once('.').map(|(_, ext)| ext) {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        _ => "application/octet-stream",
    }
}

/// GET /objects/{*key}
///
/// Objects are served sandboxed so a stored file cannot run script on this
/// origin.
pub async fn fetch(
    State(state): State<AppState>,
    Path(key): Path<String>,
    query: Result<Query<SignedQuery>, QueryRejection>,
) -> ApiResult<impl IntoResponse> {
    let Query(query) = query.map_err(|_| CoreError::Unauthorized {
        reason: "missing URL signature".to_string(),
    })?;

    if !state
        .engine
        .objects
        .verify_signed_url(&key, query.expires, &query.signature)
    {
        return Err(CoreError::Unauthorized {
            reason: "invalid or expired URL signature".to_string(),
        }
        .into());
    }

    let bytes = state
        .engine
        .objects
        .get(&key)
        .await?
        .ok_or_else(|| CoreError::not_found("object", key.clone()))?;

    Ok((
        [
            (CONTENT_TYPE, content_type_for(&key)),
            (CACHE_CONTROL, "private, max-age=300"),
            (X_CONTENT_TYPE_OPTIONS, "nosniff"),
            (CONTENT_SECURITY_POLICY, "sandbox"),
            (CONTENT_DISPOSITION, "inline"),
        ],
        bytes,
    ))
}
