// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Request authentication.
//!
//! Actors present `Authorization: Bearer <jwt>`. The token's `sub` names a
//! profile, and the profile decides the actor's role and location. The cron
//! endpoints use a shared bearer secret instead.

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use tracing::debug;

use inspectra_core::CoreError;
use inspectra_core::persistence::Persistence;
use inspectra_core::types::Actor;

use crate::error::ApiError;
use crate::state::AppState;

/// Claims read from actor tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Profile id.
    pub sub: String,
    /// Login email.
    #[serde(default)]
    pub email: Option<String>,
    /// Expiry (unix seconds).
    pub exp: i64,
}

/// Turns request headers into an authenticated [`Actor`].
#[async_trait]
pub trait ActorResolver: Send + Sync {
    /// Resolve the caller, failing with `Unauthorized`.
    async fn resolve(&self, headers: &HeaderMap) -> Result<Actor, CoreError>;
}

/// The token after `Bearer `, if present.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

fn unauthorized(reason: impl Into<String>) -> CoreError {
    CoreError::Unauthorized {
        reason: reason.into(),
    }
}

/// HS256 JWT resolver backed by the profiles table.
pub struct JwtActorResolver {
    key: DecodingKey,
    validation: Validation,
    persistence: Arc<dyn Persistence>,
}

impl JwtActorResolver {
    /// Resolver verifying tokens with `secret`.
    pub fn new(secret: impl AsRef<[u8]>, persistence: Arc<dyn Persistence>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = 30;
        Self {
            key: DecodingKey::from_secret(secret.as_ref()),
            validation,
            persistence,
        }
    }
}

#[async_trait]
impl ActorResolver for JwtActorResolver {
    async fn resolve(&self, headers: &HeaderMap) -> Result<Actor, CoreError> {
        let token = bearer_token(headers).ok_or_else(|| unauthorized("missing bearer token"))?;

        let claims = decode::<Claims>(token, &self.key, &self.validation)
            .map_err(|e| {
                debug!(error = %e, "Rejected actor token");
                unauthorized("invalid token")
            })?
            .claims;

        let profile = self
            .persistence
            .get_profile(&claims.sub)
            .await?
            .ok_or_else(|| unauthorized("no profile for token subject"))?;

        Ok(Actor {
            id: profile.id,
            email: claims.email.or(profile.email),
            role: profile.role,
            location_id: profile.location_id,
        })
    }
}

/// Extractor yielding the authenticated caller.
#[derive(Debug, Clone)]
pub struct AuthenticatedActor(pub Actor);

impl FromRequestParts<AppState> for AuthenticatedActor {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let actor = state.resolver.resolve(&parts.headers).await?;
        Ok(AuthenticatedActor(actor))
    }
}

/// Extractor that only succeeds for the scheduler's shared secret.
#[derive(Debug, Clone, Copy)]
pub struct CronCaller;

impl FromRequestParts<AppState> for CronCaller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let presented = bearer_token(&parts.headers).ok_or_else(|| unauthorized("missing bearer token"))?;
        if bool::from(presented.as_bytes().ct_eq(state.cron_secret.as_bytes())) {
            Ok(CronCaller)
        } else {
            Err(unauthorized("invalid cron secret").into())
        }
    }
}
