// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Overdue escalations and due-date reminders.
//!
//! Each notice is sent at most once per instance and review cycle. The marker
//! event (`escalated` or `reminder_sent`) is appended before anything is
//! delivered, under a dedupe key the store keeps unique per instance:
//!
//! | notice     | key                                   |
//! |------------|---------------------------------------|
//! | escalation | `escalated:<cycle>`                   |
//! | reminder   | `reminder_sent:<profile_id>:<cycle>`  |
//!
//! `cycle` counts the instance's `reverted` events, so a reverted instance is
//! notified again, and a reassigned one reminds its new assignee. If the
//! append fails nothing is sent and the next sweep retries; if another sweep
//! stored the key first this one skips.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use crate::error::CoreError;
use crate::events;
use crate::persistence::InstanceRecord;
use crate::push::PushNotification;
use crate::state::EngineState;
use crate::types::EventType;

/// Counts from one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EscalationReport {
    /// Overdue unassigned instances escalated to supervisors.
    pub escalated: usize,
    /// Assignees reminded of an upcoming due date.
    pub reminded: usize,
    /// Eligible instances that were already notified.
    pub skipped: usize,
    /// Instances whose check or marker append failed.
    pub errors: usize,
}

enum Notice {
    Escalation,
    Reminder { profile_id: String },
}

impl Notice {
    fn marker(&self) -> EventType {
        match self {
            Notice::Escalation => EventType::Escalated,
            Notice::Reminder { .. } => EventType::ReminderSent,
        }
    }

    fn dedupe_key(&self, cycle: usize) -> String {
        match self {
            Notice::Escalation => format!("{}:{}", EventType::Escalated, cycle),
            Notice::Reminder { profile_id } => {
                format!("{}:{}:{}", EventType::ReminderSent, profile_id, cycle)
            }
        }
    }
}

enum Outcome {
    Escalated,
    Reminded,
    Skipped,
    Failed,
    Ineligible,
}

/// Escalate overdue unassigned instances and remind assignees of upcoming ones.
#[instrument(skip(state))]
pub async fn run_escalations(
    state: &EngineState,
    now: DateTime<Utc>,
) -> Result<EscalationReport, CoreError> {
    let open = state.persistence.list_open_instances().await?;

    let outcomes = futures::future::join_all(
        open.iter()
            .map(|instance| process(state, instance, now)),
    )
    .await;

    let mut report = EscalationReport::default();
    for outcome in outcomes {
        match outcome {
            Outcome::Escalated => report.escalated += 1,
            Outcome::Reminded => report.reminded += 1,
            Outcome::Skipped => report.skipped += 1,
            Outcome::Failed => report.errors += 1,
            Outcome::Ineligible => {}
        }
    }

    info!(
        open = open.len(),
        escalated = report.escalated,
        reminded = report.reminded,
        skipped = report.skipped,
        errors = report.errors,
        "Escalation sweep complete"
    );
    Ok(report)
}

fn notice_for(state: &EngineState, instance: &InstanceRecord, now: DateTime<Utc>) -> Option<Notice> {
    if !instance.has_assignee() {
        return (instance.due_at < now).then_some(Notice::Escalation);
    }
    let profile_id = instance.assigned_to.clone()?;
    (instance.due_at <= now + state.reminder_window).then_some(Notice::Reminder { profile_id })
}

async fn process(state: &EngineState, instance: &InstanceRecord, now: DateTime<Utc>) -> Outcome {
    let Some(notice) = notice_for(state, instance, now) else {
        return Outcome::Ineligible;
    };
    let marker = notice.marker();

    let cycle = match state.persistence.list_events(&instance.id).await {
        Ok(events) => events
            .iter()
            .filter(|e| e.event_type == EventType::Reverted)
            .count(),
        Err(e) => {
            warn!(instance_id = %instance.id, error = %e, "Failed to load events for notification check");
            return Outcome::Failed;
        }
    };
    let dedupe_key = notice.dedupe_key(cycle);

    let overdue_by = (now - instance.due_at).num_seconds();
    let payload = match &notice {
        Notice::Escalation => json!({ "due_at": instance.due_at, "overdue_seconds": overdue_by }),
        Notice::Reminder { profile_id } => json!({ "due_at": instance.due_at, "profile_id": profile_id }),
    };
    match events::append_marker(state.persistence.as_ref(), &instance.id, marker, &dedupe_key, Some(payload)).await {
        Ok(true) => {}
        Ok(false) => {
            debug!(instance_id = %instance.id, dedupe_key = %dedupe_key, "Already notified");
            return Outcome::Skipped;
        }
        Err(e) => {
            warn!(instance_id = %instance.id, error = %e, "Failed to record notification marker; not sending");
            return Outcome::Failed;
        }
    }

    let link = format!("/instances/{}", instance.id);
    match notice {
        Notice::Escalation => {
            info!(instance_id = %instance.id, overdue_seconds = overdue_by, "Escalating unassigned overdue instance");
            state.notifier.push_to_supervisors(
                instance.location_id.clone(),
                PushNotification::new(
                    "Overdue inspection",
                    format!(
                        "An unassigned inspection was due {}",
                        instance.due_at.format("%Y-%m-%d")
                    ),
                )
                .with_url(link)
                .with_tag(format!("escalation-{}", instance.id)),
            );
            state.notifier.webhook(
                "instance.escalated",
                json!({ "instance": instance, "overdue_seconds": overdue_by }),
            );
            Outcome::Escalated
        }
        Notice::Reminder { profile_id } => {
            debug!(instance_id = %instance.id, profile_id = %profile_id, "Sending due-date reminder");
            state.notifier.push_to_profile(
                profile_id,
                PushNotification::new(
                    "Inspection due soon",
                    format!("Due {}", instance.due_at.format("%Y-%m-%d %H:%M UTC")),
                )
                .with_url(link)
                .with_tag(format!("reminder-{}", instance.id)),
            );
            Outcome::Reminded
        }
    }
}
