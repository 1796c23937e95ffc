// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP error mapping.
//!
//! Every failure leaves the server as `{ "error": <message>, "code": <CODE> }`
//! with a status derived from the core error taxonomy. Internal failures are
//! logged in full and reported to the client without details.

use axum::Json;
use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tracing::error;

use inspectra_core::CoreError;
use inspectra_core::webhook::WebhookError;

/// Error body returned by every endpoint.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Human-readable message.
    pub error: String,
    /// Stable machine-readable code.
    pub code: String,
}

/// API errors.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Any engine error.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Request body or query could not be decoded.
    #[error("{0}")]
    BadRequest(String),

    /// Inbound webhook authentication or decoding failed.
    #[error(transparent)]
    Webhook(#[from] WebhookError),
}

/// API result type
pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Core(err) => {
                let status = match err {
                    CoreError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
                    CoreError::Forbidden { .. } => StatusCode::FORBIDDEN,
                    CoreError::NotFound { .. } => StatusCode::NOT_FOUND,
                    CoreError::ValidationError { .. } => StatusCode::BAD_REQUEST,
                    CoreError::InvalidTransition { .. } | CoreError::AlreadySigned { .. } => {
                        StatusCode::CONFLICT
                    }
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, err.error_code())
            }
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            ApiError::Webhook(WebhookError::Malformed(_)) => {
                (StatusCode::BAD_REQUEST, "VALIDATION_ERROR")
            }
            ApiError::Webhook(_) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        let message = if status.is_server_error() {
            error!(code, error = %self, "Request failed");
            "Internal server error".to_string()
        } else {
            self.to_string()
        };

        let body = ErrorResponse {
            error: message,
            code: code.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<MultipartRejection> for ApiError {
    fn from(rejection: MultipartRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        ApiError::BadRequest(err.body_text())
    }
}
