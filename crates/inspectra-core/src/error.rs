// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for inspectra-core.
//!
//! Every primary operation either succeeds or returns exactly one of these
//! variants. Best-effort side effects (event append, webhook and push
//! delivery) never surface through this type; they log and move on.

use std::fmt;

/// Result type using CoreError
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core errors that can occur during request processing.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum CoreError {
    /// Caller credential is missing or invalid.
    Unauthorized {
        /// Why the credential was rejected.
        reason: String,
    },

    /// Caller is authenticated but lacks the required capability.
    Forbidden {
        /// Acting profile id.
        actor_id: String,
        /// The action that was refused.
        action: String,
    },

    /// Referenced entity does not exist.
    NotFound {
        /// Entity kind (instance, template, signature, ...).
        entity: &'static str,
        /// The id that was looked up.
        id: String,
    },

    /// Input validation failed.
    ValidationError {
        /// The field that failed validation.
        field: String,
        /// The validation error message.
        message: String,
    },

    /// The requested status change is not permitted from the current status.
    InvalidTransition {
        /// The instance ID.
        instance_id: String,
        /// Status the instance is in.
        from: String,
        /// Status that was requested.
        to: String,
        /// Additional detail when the pair itself is legal but blocked.
        reason: Option<String>,
    },

    /// The actor already signed this instance.
    AlreadySigned {
        /// The instance ID.
        instance_id: String,
        /// The signing profile id.
        actor_id: String,
    },

    /// Database operation failed.
    DatabaseError {
        /// The operation that failed.
        operation: String,
        /// Error details.
        details: String,
    },

    /// Object storage operation failed.
    StorageError {
        /// Object key involved.
        key: String,
        /// Error details.
        details: String,
    },

    /// Anything else that is not the caller's fault.
    InternalError {
        /// Error details.
        details: String,
    },
}

impl CoreError {
    /// Get the error code string for this error type.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Unauthorized { .. } => "UNAUTHORIZED",
            Self::Forbidden { .. } => "FORBIDDEN",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::ValidationError { .. } => "VALIDATION_ERROR",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::AlreadySigned { .. } => "ALREADY_SIGNED",
            Self::DatabaseError { .. } | Self::StorageError { .. } | Self::InternalError { .. } => {
                "INTERNAL_ERROR"
            }
        }
    }

    /// Shorthand for a validation failure on `field`.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ValidationError {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Shorthand for a missing entity.
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unauthorized { reason } => write!(f, "Unauthorized: {}", reason),
            Self::Forbidden { actor_id, action } => {
                write!(f, "Actor '{}' is not allowed to {}", actor_id, action)
            }
            Self::NotFound { entity, id } => write!(f, "{} '{}' not found", entity, id),
            Self::ValidationError { field, message } => {
                write!(f, "Validation error for '{}': {}", field, message)
            }
            Self::InvalidTransition {
                instance_id,
                from,
                to,
                reason,
            } => {
                write!(
                    f,
                    "Instance '{}' cannot move from '{}' to '{}'",
                    instance_id, from, to
                )?;
                if let Some(reason) = reason {
                    write!(f, ": {}", reason)?;
                }
                Ok(())
            }
            Self::AlreadySigned {
                instance_id,
                actor_id,
            } => {
                write!(
                    f,
                    "Actor '{}' has already signed instance '{}'",
                    actor_id, instance_id
                )
            }
            Self::DatabaseError { operation, details } => {
                write!(f, "Database error during '{}': {}", operation, details)
            }
            Self::StorageError { key, details } => {
                write!(f, "Storage error for '{}': {}", key, details)
            }
            Self::InternalError { details } => write!(f, "Internal error: {}", details),
        }
    }
}

impl std::error::Error for CoreError {}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        CoreError::DatabaseError {
            operation: "query".to_string(),
            details: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::DatabaseError {
            operation: "json".to_string(),
            details: err.to_string(),
        }
    }
}

/// Returns true when a sqlx error is a unique-constraint violation.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.is_unique_violation())
}
