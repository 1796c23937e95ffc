// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Scheduler-triggered sweeps.

use axum::Json;
use axum::extract::State;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use inspectra_core::escalation::{self, EscalationReport};
use inspectra_core::generator::{self, GenerationReport};
use inspectra_core::types;

use crate::auth::CronCaller;
use crate::error::ApiResult;
use crate::state::AppState;

/// A sweep report stamped with the time it ran for.
#[derive(Debug, Serialize)]
pub struct SweepResponse<R> {
    #[serde(flatten)]
    pub report: R,
    pub timestamp: DateTime<Utc>,
}

/// POST /cron/generate
pub async fn generate(
    _caller: CronCaller,
    State(state): State<AppState>,
) -> ApiResult<Json<SweepResponse<GenerationReport>>> {
    let now = types::now();
    let report = generator::generate_due_instances(&state.engine, now).await?;
    info!(
        generated = report.generated,
        skipped = report.skipped,
        errors = report.errors,
        "Generation sweep finished"
    );
    Ok(Json(SweepResponse {
        report,
        timestamp: now,
    }))
}

/// POST /cron/escalations
pub async fn escalations(
    _caller: CronCaller,
    State(state): State<AppState>,
) -> ApiResult<Json<SweepResponse<EscalationReport>>> {
    let now = types::now();
    let report = escalation::run_escalations(&state.engine, now).await?;
    info!(
        escalated = report.escalated,
        reminded = report.reminded,
        errors = report.errors,
        "Escalation sweep finished"
    );
    Ok(Json(SweepResponse {
        report,
        timestamp: now,
    }))
}
