// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Signature capture and retrieval.
//!
//! Signing is a multipart upload with these parts:
//!
//! | part        | required | content                            |
//! |-------------|----------|------------------------------------|
//! | `signature` | yes      | image bytes (png, jpeg, webp)      |
//! | `points`    | no       | JSON stroke data                   |
//! | `device`    | no       | JSON device description            |

use std::time::Duration;

use axum::Json;
use axum::extract::multipart::MultipartRejection;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use serde::Deserialize;
use serde_json::Value;

use inspectra_core::CoreError;
use inspectra_core::signatures::{self, DEFAULT_URL_TTL, SignatureImage, SignatureView};

use crate::auth::AuthenticatedActor;
use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    /// Requested URL lifetime; clamped by the object store.
    #[serde(default)]
    pub ttl_secs: Option<u64>,
}

fn json_part(field: &str, text: &str) -> Result<Option<Value>, CoreError> {
    if text.trim().is_empty() {
        return Ok(None);
    }
    serde_json::from_str(text)
        .map(Some)
        .map_err(|e| CoreError::validation(field, format!("invalid JSON: {}", e)))
}

/// POST /instances/{id}/signatures
pub async fn sign(
    AuthenticatedActor(actor): AuthenticatedActor,
    State(state): State<AppState>,
    Path(id): Path<String>,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult<(StatusCode, Json<SignatureView>)> {
    let mut multipart = multipart?;
    let mut image = None;
    let mut points = None;
    let mut device = None;

    while let Some(field) = multipart.next_field().await? {
        match field.name() {
            Some("signature") => {
                let content_type = field.content_type().map(str::to_string);
                let bytes = field.bytes().await?;
                let mut upload = SignatureImage::new(bytes.to_vec());
                if let Some(content_type) = content_type {
                    upload = upload.with_content_type(content_type);
                }
                image = Some(upload);
            }
            Some("points") => points = json_part("points", &field.text().await?)?,
            Some("device") => device = json_part("device", &field.text().await?)?,
            _ => {}
        }
    }

    let image = image.ok_or_else(|| CoreError::validation("signature", "missing image part"))?;
    let record = signatures::sign(&state.engine, &id, &actor, image, points, device).await?;
    signatures::record_signed(&state.engine, &record);

    let url = state.engine.objects.signed_url(&record.storage_key, DEFAULT_URL_TTL)?;
    Ok((
        StatusCode::CREATED,
        Json(SignatureView {
            signature: record,
            image: url,
        }),
    ))
}

/// GET /instances/{id}/signatures
pub async fn list(
    AuthenticatedActor(_actor): AuthenticatedActor,
    State(state): State<AppState>,
    Path(id): Path<String>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> ApiResult<Json<Vec<SignatureView>>> {
    let Query(query) = query?;
    let ttl = query.ttl_secs.map(Duration::from_secs).unwrap_or(DEFAULT_URL_TTL);
    Ok(Json(signatures::list_signatures(&state.engine, &id, ttl).await?))
}
