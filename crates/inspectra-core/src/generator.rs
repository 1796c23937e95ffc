// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Materializes due instances from active templates.
//!
//! A run is idempotent: a template that already has an open (pending or
//! in_progress) instance is skipped, so re-invoking the generator never
//! duplicates work. Templates are processed concurrently and independently;
//! one template's failure is counted and the rest continue.
//!
//! Two overlapping runs may both observe "no open instance" for the same
//! template and both insert. Callers trigger the generator from a single
//! scheduler.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::due_date::next_due_date;
use crate::error::CoreError;
use crate::events;
use crate::persistence::{InstanceRecord, TemplateRecord};
use crate::state::EngineState;
use crate::types::{self, EventType, InstanceStatus, SYSTEM_ACTOR};

/// Counts from one generator run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GenerationReport {
    /// Instances inserted.
    pub generated: usize,
    /// Templates with an open instance or no due date.
    pub skipped: usize,
    /// Templates whose lookup or insert failed.
    pub errors: usize,
}

enum Outcome {
    Generated,
    Skipped,
    Failed,
}

/// Generate one pending instance for every active template that needs one.
///
/// Only loading the template list can fail the whole run; per-template
/// failures are reported in [`GenerationReport::errors`].
#[instrument(skip(state))]
pub async fn generate_due_instances(
    state: &EngineState,
    now: DateTime<Utc>,
) -> Result<GenerationReport, CoreError> {
    let templates = state.persistence.list_active_templates().await?;
    if templates.is_empty() {
        debug!("No active templates");
        return Ok(GenerationReport::default());
    }

    let binder_defaults = load_binder_defaults(state, &templates).await;

    let outcomes = futures::future::join_all(
        templates
            .iter()
            .map(|template| generate_for_template(state, template, &binder_defaults, now)),
    )
    .await;

    let mut report = GenerationReport::default();
    for outcome in outcomes {
        match outcome {
            Outcome::Generated => report.generated += 1,
            Outcome::Skipped => report.skipped += 1,
            Outcome::Failed => report.errors += 1,
        }
    }

    info!(
        templates = templates.len(),
        generated = report.generated,
        skipped = report.skipped,
        errors = report.errors,
        "Instance generation complete"
    );
    Ok(report)
}

/// Map of binder id to its earliest-assigned profile.
///
/// A failed lookup yields an empty map; affected templates are generated
/// unassigned rather than not at all.
async fn load_binder_defaults(
    state: &EngineState,
    templates: &[TemplateRecord],
) -> HashMap<String, String> {
    let binder_ids: Vec<String> = templates
        .iter()
        .filter_map(|t| t.binder_id.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    if binder_ids.is_empty() {
        return HashMap::new();
    }

    let assignments = match state.persistence.list_binder_assignments(&binder_ids).await {
        Ok(assignments) => assignments,
        Err(e) => {
            warn!(error = %e, "Failed to load binder assignments; generating without binder defaults");
            return HashMap::new();
        }
    };

    let mut defaults = HashMap::new();
    for assignment in assignments {
        // oldest first, so the first seen per binder wins
        defaults
            .entry(assignment.binder_id)
            .or_insert(assignment.profile_id);
    }
    defaults
}

async fn generate_for_template(
    state: &EngineState,
    template: &TemplateRecord,
    binder_defaults: &HashMap<String, String>,
    now: DateTime<Utc>,
) -> Outcome {
    match state.persistence.find_open_instance(&template.id).await {
        Ok(Some(open)) => {
            debug!(template_id = %template.id, instance_id = %open.id, "Open instance exists; skipping");
            return Outcome::Skipped;
        }
        Ok(None) => {}
        Err(e) => {
            warn!(template_id = %template.id, error = %e, "Failed to check for open instance");
            return Outcome::Failed;
        }
    }

    let Some(due_at) = next_due_date(template.frequency, Some(now)) else {
        debug!(template_id = %template.id, frequency = %template.frequency, "No due date; skipping");
        return Outcome::Skipped;
    };

    let assigned_to = template.default_assignee.clone().or_else(|| {
        template
            .binder_id
            .as_ref()
            .and_then(|binder| binder_defaults.get(binder).cloned())
    });

    let created_at = types::now();
    let instance = InstanceRecord {
        id: Uuid::new_v4().to_string(),
        template_id: template.id.clone(),
        location_id: template.location_id.clone(),
        due_at,
        assigned_to,
        assigned_email: None,
        status: InstanceStatus::Pending,
        created_by: SYSTEM_ACTOR.to_string(),
        inspected_at: None,
        remarks: None,
        created_at,
        updated_at: created_at,
    };

    if let Err(e) = state.persistence.insert_instance(&instance).await {
        warn!(template_id = %template.id, error = %e, "Failed to insert instance");
        return Outcome::Failed;
    }

    debug!(
        template_id = %template.id,
        instance_id = %instance.id,
        due_at = %instance.due_at,
        assigned_to = ?instance.assigned_to,
        "Instance generated"
    );
    record_generated(state, &instance);
    Outcome::Generated
}

fn record_generated(state: &EngineState, instance: &InstanceRecord) {
    let persistence = state.persistence.clone();
    let instance_id = instance.id.clone();
    let template_id = instance.template_id.clone();
    let due_at = instance.due_at;
    let assigned_to = instance.assigned_to.clone();
    let created_at = instance.created_at;

    state.notifier.spawn(async move {
        events::append_logged(
            persistence.clone(),
            instance_id.clone(),
            EventType::Created,
            None,
            Some(json!({ "template_id": template_id, "due_at": due_at, "source": "generator" })),
            created_at,
        )
        .await;
        if let Some(profile_id) = assigned_to {
            events::append_logged(
                persistence,
                instance_id,
                EventType::Assigned,
                None,
                Some(json!({ "assigned_to": profile_id })),
                created_at,
            )
            .await;
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{BinderAssignmentRecord, Persistence};
    use crate::testing::Fixture;
    use crate::types::Frequency;
    use chrono::{Duration, TimeZone};

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 9, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_one_instance_per_template_and_rerun_is_noop() {
        let fx = Fixture::new().await;
        fx.template("t-weekly", Frequency::Weekly).await;
        fx.template("t-monthly", Frequency::Monthly).await;
        let now = at(2025, 1, 31);

        let first = generate_due_instances(&fx.state, now).await.unwrap();
        assert_eq!(
            first,
            GenerationReport {
                generated: 2,
                skipped: 0,
                errors: 0
            }
        );

        let weekly = fx.persistence.find_open_instance("t-weekly").await.unwrap().unwrap();
        assert_eq!(weekly.status, InstanceStatus::Pending);
        assert_eq!(weekly.created_by, "system");
        assert_eq!(weekly.due_at, now + Duration::days(7));

        let monthly = fx.persistence.find_open_instance("t-monthly").await.unwrap().unwrap();
        assert_eq!(monthly.due_at, at(2025, 2, 28));

        let second = generate_due_instances(&fx.state, now).await.unwrap();
        assert_eq!(second.generated, 0);
        assert_eq!(second.skipped, 2);
        assert_eq!(fx.persistence.list_open_instances().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_as_needed_and_inactive_templates_are_not_generated() {
        let fx = Fixture::new().await;
        fx.template("t-adhoc", Frequency::AsNeeded).await;
        let mut inactive = crate::testing::template("t-old", Frequency::Daily);
        inactive.active = false;
        fx.persistence.insert_template(&inactive).await.unwrap();

        let report = generate_due_instances(&fx.state, at(2025, 3, 1)).await.unwrap();
        assert_eq!(report.generated, 0);
        assert_eq!(report.skipped, 1);
        assert!(fx.persistence.list_open_instances().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_assignee_precedence() {
        let fx = Fixture::new().await;

        let mut with_default = crate::testing::template("t-default", Frequency::Daily);
        with_default.default_assignee = Some("p-default".to_string());
        with_default.binder_id = Some("b-1".to_string());
        fx.persistence.insert_template(&with_default).await.unwrap();

        let mut from_binder = crate::testing::template("t-binder", Frequency::Daily);
        from_binder.binder_id = Some("b-1".to_string());
        fx.persistence.insert_template(&from_binder).await.unwrap();

        let mut empty_binder = crate::testing::template("t-empty", Frequency::Daily);
        empty_binder.binder_id = Some("b-none".to_string());
        fx.persistence.insert_template(&empty_binder).await.unwrap();

        let base = at(2025, 1, 1);
        for (profile, offset) in [("p-late", 5), ("p-early", 1), ("p-mid", 3)] {
            fx.persistence
                .insert_binder_assignment(&BinderAssignmentRecord {
                    binder_id: "b-1".to_string(),
                    profile_id: profile.to_string(),
                    can_edit: true,
                    assigned_at: base + Duration::days(offset),
                })
                .await
                .unwrap();
        }

        let report = generate_due_instances(&fx.state, at(2025, 3, 1)).await.unwrap();
        assert_eq!(report.generated, 3);

        let assignee = |template: &'static str| {
            let persistence = fx.persistence.clone();
            async move {
                persistence
                    .find_open_instance(template)
                    .await
                    .unwrap()
                    .unwrap()
                    .assigned_to
            }
        };
        assert_eq!(assignee("t-default").await.as_deref(), Some("p-default"));
        assert_eq!(assignee("t-binder").await.as_deref(), Some("p-early"));
        assert_eq!(assignee("t-empty").await, None);
    }

    #[tokio::test]
    async fn test_generated_instances_get_created_event() {
        let fx = Fixture::new().await;
        let mut template = crate::testing::template("t-1", Frequency::Weekly);
        template.default_assignee = Some("p-1".to_string());
        fx.persistence.insert_template(&template).await.unwrap();

        generate_due_instances(&fx.state, at(2025, 3, 1)).await.unwrap();
        fx.state.notifier.flush().await;

        let instance = fx.persistence.find_open_instance("t-1").await.unwrap().unwrap();
        let events = events::list(&fx.state, &instance.id).await.unwrap();
        let kinds: Vec<_> = events.iter().map(|e| e.event_type).collect();
        assert_eq!(kinds, vec![EventType::Created, EventType::Assigned]);
        assert!(events.iter().all(|e| e.actor_id.is_none()));
    }

    #[tokio::test]
    async fn test_closed_instances_do_not_block_generation() {
        let fx = Fixture::new().await;
        fx.template("t-1", Frequency::Daily).await;
        fx.instance("i-done", "t-1", InstanceStatus::Passed).await;
        fx.instance("i-void", "t-1", InstanceStatus::Void).await;

        let report = generate_due_instances(&fx.state, at(2025, 3, 1)).await.unwrap();
        assert_eq!(report.generated, 1);
    }
}
