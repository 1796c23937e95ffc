// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Instance state machine.
//!
//! ```text
//!   pending ──▶ in_progress ──▶ passed ─┐
//!     │  ▲           │    └───▶ failed ─┤
//!     │  └───────────┼───── revert ◀────┘
//!     ▼              ▼
//!    void ◀──────────┘
//! ```
//!
//! Every status change is a compare-and-set on the status the caller saw, so
//! a concurrent change surfaces as `InvalidTransition` instead of silently
//! overwriting. Side effects (event, webhook, push) are spawned after the
//! write commits and never affect the result.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::due_date::next_due_date;
use crate::error::CoreError;
use crate::events;
use crate::persistence::{EventRecord, InstanceRecord};
use crate::push::PushNotification;
use crate::state::EngineState;
use crate::types::{self, Actor, Capability, EventType, InstanceStatus};

/// Longest comment accepted, in characters.
pub const MAX_COMMENT_LEN: usize = 4000;

/// Capability needed to move from `from` to `to`, or `None` when the pair is
/// not a permitted transition.
pub fn required_capability(from: InstanceStatus, to: InstanceStatus) -> Option<Capability> {
    use InstanceStatus::*;
    match (from, to) {
        (Pending, InProgress) => Some(Capability::Perform),
        (Pending, Void) => Some(Capability::Manage),
        (InProgress, Passed) | (InProgress, Failed) => Some(Capability::Perform),
        (InProgress, Void) => Some(Capability::Manage),
        (Passed, Pending) | (Failed, Pending) => Some(Capability::RevertToDraft),
        _ => None,
    }
}

/// Who an instance is assigned to. Both fields empty means unassigned.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignee {
    /// Profile id.
    #[serde(default)]
    pub profile_id: Option<String>,
    /// Bare email for people without a profile.
    #[serde(default)]
    pub email: Option<String>,
}

impl Assignee {
    /// Assign to a profile.
    pub fn profile(profile_id: impl Into<String>) -> Self {
        Self {
            profile_id: Some(profile_id.into()),
            email: None,
        }
    }

    /// Assign to a bare email address.
    pub fn email(email: impl Into<String>) -> Self {
        Self {
            profile_id: None,
            email: Some(email.into()),
        }
    }

    async fn validate(&self, state: &EngineState) -> Result<(), CoreError> {
        if let Some(email) = &self.email {
            let email = email.trim();
            if email.is_empty() || !email.contains('@') {
                return Err(CoreError::validation("email", "not an email address"));
            }
        }
        if let Some(profile_id) = &self.profile_id
            && state.persistence.get_profile(profile_id).await?.is_none()
        {
            return Err(CoreError::not_found("profile", profile_id.clone()));
        }
        Ok(())
    }
}

/// Load an instance or fail with `NotFound`.
pub async fn get_instance(state: &EngineState, instance_id: &str) -> Result<InstanceRecord, CoreError> {
    state
        .persistence
        .get_instance(instance_id)
        .await?
        .ok_or_else(|| CoreError::not_found("instance", instance_id))
}

/// Move an instance to `new_status` on behalf of `actor`.
///
/// Fails with `InvalidTransition` for pairs outside the whitelist, for a
/// revert while the template has another open instance, and when the status
/// changed underneath the caller. Fails with `Forbidden` when the actor lacks
/// the capability the pair requires. The instance is unchanged on failure.
#[instrument(skip(state, actor, remarks), fields(actor_id = %actor.id))]
pub async fn transition(
    state: &EngineState,
    instance_id: &str,
    new_status: InstanceStatus,
    actor: &Actor,
    remarks: Option<String>,
) -> Result<InstanceRecord, CoreError> {
    let current = get_instance(state, instance_id).await?;
    let from = current.status;

    let Some(capability) = required_capability(from, new_status) else {
        return Err(invalid(instance_id, from, new_status, None));
    };
    actor.require(capability)?;
    actor.require_location(&current.location_id)?;

    if new_status == InstanceStatus::Pending
        && let Some(open) = state
            .persistence
            .find_open_instance(&current.template_id)
            .await?
        && open.id != current.id
    {
        return Err(invalid(
            instance_id,
            from,
            new_status,
            Some(format!(
                "template already has open instance '{}'",
                open.id
            )),
        ));
    }

    let now = types::now();
    let inspected_at = match new_status {
        InstanceStatus::Passed | InstanceStatus::Failed => Some(now),
        InstanceStatus::Pending => None,
        InstanceStatus::InProgress | InstanceStatus::Void => current.inspected_at,
    };
    let remarks = remarks
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty())
        .or(current.remarks.clone());

    let updated = state
        .persistence
        .update_instance_status(
            instance_id,
            from,
            new_status,
            inspected_at,
            remarks.as_deref(),
            now,
        )
        .await?;
    if !updated {
        let latest = get_instance(state, instance_id).await?;
        return Err(invalid(
            instance_id,
            latest.status,
            new_status,
            Some(format!("status changed concurrently from '{}'", from)),
        ));
    }

    let instance = InstanceRecord {
        status: new_status,
        inspected_at,
        remarks,
        updated_at: now,
        ..current
    };

    info!(
        instance_id = %instance_id,
        from = %from,
        to = %new_status,
        "Instance transitioned"
    );
    notify_transition(state, &instance, from, actor);
    Ok(instance)
}

fn invalid(
    instance_id: &str,
    from: InstanceStatus,
    to: InstanceStatus,
    reason: Option<String>,
) -> CoreError {
    CoreError::InvalidTransition {
        instance_id: instance_id.to_string(),
        from: from.to_string(),
        to: to.to_string(),
        reason,
    }
}

fn notify_transition(state: &EngineState, instance: &InstanceRecord, from: InstanceStatus, actor: &Actor) {
    let status = instance.status;

    state.notifier.spawn(events::append_logged(
        state.persistence.clone(),
        instance.id.clone(),
        EventType::for_status(status),
        Some(actor.id.clone()),
        Some(json!({ "from": from, "to": status, "remarks": instance.remarks })),
        instance.updated_at,
    ));

    state.notifier.webhook(
        format!("instance.{}", status),
        json!({ "instance": instance, "previous_status": from, "actor_id": actor.id }),
    );

    if status == InstanceStatus::Failed {
        let body = match &instance.remarks {
            Some(remarks) => format!("An inspection failed: {}", remarks),
            None => "An inspection failed.".to_string(),
        };
        state.notifier.push_to_supervisors(
            instance.location_id.clone(),
            PushNotification::new("Inspection failed", body)
                .with_url(format!("/instances/{}", instance.id))
                .with_tag(format!("instance-{}", instance.id)),
        );
    }
}

/// Manually create a pending instance of `template_id`.
///
/// `due_at` defaults to the template's next due date; it is required for
/// `as_needed` templates. Fails with `InvalidTransition` when the template
/// already has an open instance.
#[instrument(skip(state, assignee, actor), fields(actor_id = %actor.id))]
pub async fn create_instance(
    state: &EngineState,
    template_id: &str,
    due_at: Option<DateTime<Utc>>,
    assignee: Option<Assignee>,
    actor: &Actor,
) -> Result<InstanceRecord, CoreError> {
    actor.require(Capability::Manage)?;

    let template = state
        .persistence
        .get_template(template_id)
        .await?
        .ok_or_else(|| CoreError::not_found("template", template_id))?;
    actor.require_location(&template.location_id)?;
    if !template.active {
        return Err(CoreError::validation("template_id", "template is inactive"));
    }

    if let Some(open) = state.persistence.find_open_instance(template_id).await? {
        return Err(invalid(
            &open.id,
            open.status,
            InstanceStatus::Pending,
            Some(format!("template '{}' already has an open instance", template_id)),
        ));
    }

    let now = types::now();
    let due_at = due_at
        .or_else(|| next_due_date(template.frequency, Some(now)))
        .ok_or_else(|| CoreError::validation("due_at", "required for as_needed templates"))?;

    let assignee = assignee.unwrap_or_default();
    assignee.validate(state).await?;

    let instance = InstanceRecord {
        id: Uuid::new_v4().to_string(),
        template_id: template.id.clone(),
        location_id: template.location_id.clone(),
        due_at,
        assigned_to: assignee.profile_id.clone(),
        assigned_email: assignee.email.clone(),
        status: InstanceStatus::Pending,
        created_by: actor.id.clone(),
        inspected_at: None,
        remarks: None,
        created_at: now,
        updated_at: now,
    };
    state.persistence.insert_instance(&instance).await?;

    info!(instance_id = %instance.id, template_id = %template_id, "Instance created");

    let created = events::append_logged(
        state.persistence.clone(),
        instance.id.clone(),
        EventType::Created,
        Some(actor.id.clone()),
        Some(json!({ "template_id": template_id, "due_at": due_at, "source": "manual" })),
        now,
    );
    if instance.has_assignee() {
        // one task so `assigned` is stored after `created`
        let assigned = assigned_event(state, &instance, actor);
        state.notifier.spawn(async move {
            created.await;
            assigned.await;
        });
        push_assigned(state, &instance, actor);
    } else {
        state.notifier.spawn(created);
    }
    state
        .notifier
        .webhook("instance.created", json!({ "instance": instance, "actor_id": actor.id }));

    Ok(instance)
}

/// Change who an open instance is assigned to.
#[instrument(skip(state, assignee, actor), fields(actor_id = %actor.id))]
pub async fn assign(
    state: &EngineState,
    instance_id: &str,
    assignee: Assignee,
    actor: &Actor,
) -> Result<InstanceRecord, CoreError> {
    actor.require(Capability::Manage)?;

    let current = get_instance(state, instance_id).await?;
    actor.require_location(&current.location_id)?;
    if !current.status.is_open() {
        return Err(invalid(
            instance_id,
            current.status,
            current.status,
            Some("only open instances can be reassigned".to_string()),
        ));
    }
    assignee.validate(state).await?;

    let now = types::now();
    state
        .persistence
        .update_instance_assignee(
            instance_id,
            assignee.profile_id.as_deref(),
            assignee.email.as_deref(),
            now,
        )
        .await?;

    let instance = InstanceRecord {
        assigned_to: assignee.profile_id,
        assigned_email: assignee.email,
        updated_at: now,
        ..current
    };
    info!(
        instance_id = %instance_id,
        assigned_to = ?instance.assigned_to,
        assigned_email = ?instance.assigned_email,
        "Instance assigned"
    );
    state.notifier.spawn(assigned_event(state, &instance, actor));
    push_assigned(state, &instance, actor);
    Ok(instance)
}

fn assigned_event(
    state: &EngineState,
    instance: &InstanceRecord,
    actor: &Actor,
) -> impl Future<Output = ()> + Send + 'static {
    events::append_logged(
        state.persistence.clone(),
        instance.id.clone(),
        EventType::Assigned,
        Some(actor.id.clone()),
        Some(json!({
            "assigned_to": instance.assigned_to,
            "assigned_email": instance.assigned_email,
        })),
        instance.updated_at,
    )
}

fn push_assigned(state: &EngineState, instance: &InstanceRecord, actor: &Actor) {
    if let Some(profile_id) = &instance.assigned_to
        && profile_id != &actor.id
    {
        state.notifier.push_to_profile(
            profile_id.clone(),
            PushNotification::new(
                "Inspection assigned",
                format!("You have an inspection due {}", instance.due_at.format("%Y-%m-%d")),
            )
            .with_url(format!("/instances/{}", instance.id))
            .with_tag(format!("instance-{}", instance.id)),
        );
    }
}

/// Attach a free-form comment to an instance's audit trail.
#[instrument(skip(state, text, actor), fields(actor_id = %actor.id))]
pub async fn comment(
    state: &EngineState,
    instance_id: &str,
    text: &str,
    actor: &Actor,
) -> Result<EventRecord, CoreError> {
    actor.require(Capability::Perform)?;

    let text = text.trim();
    if text.is_empty() {
        return Err(CoreError::validation("text", "must not be empty"));
    }
    if text.chars().count() > MAX_COMMENT_LEN {
        return Err(CoreError::validation(
            "text",
            format!("must be at most {} characters", MAX_COMMENT_LEN),
        ));
    }

    let instance = get_instance(state, instance_id).await?;
    actor.require_location(&instance.location_id)?;
    events::append(
        state,
        instance_id,
        EventType::Comment,
        Some(&actor.id),
        Some(json!({ "text": text })),
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifier::Notifier;
    use crate::persistence::Persistence;
    use crate::testing::{Fixture, actor};
    use crate::types::{Frequency, Role};
    use crate::webhook::WebhookDispatcher;
    use wiremock::matchers::{body_partial_json, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use InstanceStatus::*;

    async fn with_instance(status: InstanceStatus) -> Fixture {
        let fx = Fixture::new().await;
        fx.template("t-1", Frequency::Weekly).await;
        fx.instance("i-1", "t-1", status).await;
        fx
    }

    #[test]
    fn test_whitelist_is_exact() {
        let all = [Pending, InProgress, Failed, Passed, Void];
        let allowed: Vec<_> = all
            .iter()
            .flat_map(|from| all.iter().map(move |to| (*from, *to)))
            .filter(|(from, to)| required_capability(*from, *to).is_some())
            .collect();
        assert_eq!(
            allowed,
            vec![
                (Pending, InProgress),
                (Pending, Void),
                (InProgress, Failed),
                (InProgress, Passed),
                (InProgress, Void),
                (Failed, Pending),
                (Passed, Pending),
            ]
        );
        assert!(required_capability(Void, Pending).is_none());
    }

    #[tokio::test]
    async fn test_inspection_happy_path() {
        let fx = with_instance(Pending).await;
        let inspector = actor("p-insp", Role::Inspector);

        let started = transition(&fx.state, "i-1", InProgress, &inspector, None)
            .await
            .unwrap();
        assert_eq!(started.status, InProgress);
        assert!(started.inspected_at.is_none());
        fx.state.notifier.flush().await;

        let passed = transition(&fx.state, "i-1", Passed, &inspector, Some("all good".into()))
            .await
            .unwrap();
        assert_eq!(passed.status, Passed);
        assert!(passed.inspected_at.is_some());
        assert_eq!(passed.remarks.as_deref(), Some("all good"));

        let stored = fx.persistence.get_instance("i-1").await.unwrap().unwrap();
        assert_eq!(stored, passed);

        fx.state.notifier.flush().await;
        let kinds: Vec<_> = events::list(&fx.state, "i-1")
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.event_type)
            .collect();
        assert_eq!(kinds, vec![EventType::Started, EventType::Passed]);
    }

    #[tokio::test]
    async fn test_failed_to_in_progress_is_rejected() {
        let fx = with_instance(Failed).await;
        let admin = actor("p-admin", Role::Admin);

        let err = transition(&fx.state, "i-1", InProgress, &admin, None)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "INVALID_TRANSITION");
        assert_eq!(fx.status_of("i-1").await, Failed);
    }

    #[tokio::test]
    async fn test_revert_requires_privilege() {
        let fx = with_instance(Pending).await;
        let inspector = actor("p-insp", Role::Inspector);
        transition(&fx.state, "i-1", InProgress, &inspector, None).await.unwrap();
        transition(&fx.state, "i-1", Passed, &inspector, None).await.unwrap();
        fx.state.notifier.flush().await;

        for role in [Role::Inspector, Role::Manager] {
            let err = transition(&fx.state, "i-1", Pending, &actor("p-x", role), None)
                .await
                .unwrap_err();
            assert_eq!(err.error_code(), "FORBIDDEN");
            assert_eq!(fx.status_of("i-1").await, Passed);
        }

        let reverted = transition(&fx.state, "i-1", Pending, &actor("p-owner", Role::Owner), None)
            .await
            .unwrap();
        assert_eq!(reverted.status, Pending);
        assert!(reverted.inspected_at.is_none());

        fx.state.notifier.flush().await;
        let events = events::list(&fx.state, "i-1").await.unwrap();
        assert_eq!(events.last().unwrap().event_type, EventType::Reverted);
        assert_eq!(events.last().unwrap().actor_id.as_deref(), Some("p-owner"));
    }

    #[tokio::test]
    async fn test_revert_blocked_by_other_open_instance() {
        let fx = with_instance(Passed).await;
        fx.instance("i-2", "t-1", Pending).await;

        let err = transition(&fx.state, "i-1", Pending, &actor("p-admin", Role::Admin), None)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "INVALID_TRANSITION");
        assert!(err.to_string().contains("i-2"));
        assert_eq!(fx.status_of("i-1").await, Passed);
    }

    #[tokio::test]
    async fn test_capability_checks() {
        let fx = with_instance(Pending).await;

        let err = transition(&fx.state, "i-1", InProgress, &actor("p-v", Role::Viewer), None)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "FORBIDDEN");

        let err = transition(&fx.state, "i-1", Void, &actor("p-i", Role::Inspector), None)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "FORBIDDEN");
        assert_eq!(fx.status_of("i-1").await, Pending);

        transition(&fx.state, "i-1", Void, &actor("p-m", Role::Manager), None)
            .await
            .unwrap();
        assert_eq!(fx.status_of("i-1").await, Void);
    }

    #[tokio::test]
    async fn test_other_location_is_forbidden() {
        let fx = with_instance(Pending).await;
        let away = |id: &str, role| {
            let mut actor = actor(id, role);
            actor.location_id = Some("loc-2".to_string());
            actor
        };

        let err = transition(&fx.state, "i-1", InProgress, &away("p-i", Role::Inspector), None)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "FORBIDDEN");
        let err = assign(&fx.state, "i-1", Assignee::default(), &away("p-m", Role::Manager))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "FORBIDDEN");
        let err = comment(&fx.state, "i-1", "hi", &away("p-i", Role::Inspector))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "FORBIDDEN");
        assert_eq!(fx.status_of("i-1").await, Pending);

        fx.template("t-2", Frequency::Monthly).await;
        let err = create_instance(&fx.state, "t-2", None, None, &away("p-m", Role::Manager))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "FORBIDDEN");

        transition(&fx.state, "i-1", InProgress, &away("p-o", Role::Owner), None)
            .await
            .unwrap();
        assert_eq!(fx.status_of("i-1").await, InProgress);
    }

    #[tokio::test]
    async fn test_unknown_instance() {
        let fx = Fixture::new().await;
        let err = transition(&fx.state, "nope", InProgress, &actor("p", Role::Owner), None)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_concurrent_transitions_only_one_wins() {
        let fx = with_instance(Pending).await;
        let a = actor("p-a", Role::Inspector);
        let b = actor("p-b", Role::Inspector);

        let (first, second) = tokio::join!(
            transition(&fx.state, "i-1", InProgress, &a, None),
            transition(&fx.state, "i-1", InProgress, &b, None),
        );
        let results = [first, second];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        let err = results.into_iter().find_map(Result::err).unwrap();
        assert_eq!(err.error_code(), "INVALID_TRANSITION");
    }

    #[tokio::test]
    async fn test_failure_pushes_supervisors_only() {
        let fx = with_instance(InProgress).await;
        fx.profile("p-owner", Role::Owner).await;
        fx.profile("p-manager", Role::Manager).await;
        let inspector = fx.profile("p-insp", Role::Inspector).await;

        transition(&fx.state, "i-1", Failed, &inspector, Some("leaking".into()))
            .await
            .unwrap();
        fx.state.notifier.flush().await;

        assert_eq!(fx.pushes.recipients(), vec!["p-manager", "p-owner"]);
        let sent = fx.pushes.sent.lock().unwrap();
        assert!(sent[0].1.body.contains("leaking"));
    }

    #[tokio::test]
    async fn test_transition_dispatches_signed_webhook() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hooks"))
            .and(header_exists("X-Webhook-Signature"))
            .and(body_partial_json(json!({
                "event": "instance.in_progress",
                "data": { "previous_status": "pending" }
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let fx = with_instance(Pending).await;
        let dispatcher =
            WebhookDispatcher::new("hook-secret", vec![format!("{}/hooks", server.uri())]).unwrap();
        let state = EngineState::new(
            fx.persistence.clone(),
            fx.objects.clone(),
            Notifier::new(Some(dispatcher), None),
        );

        transition(&state, "i-1", InProgress, &actor("p-i", Role::Inspector), None)
            .await
            .unwrap();
        state.notifier.flush().await;
    }

    #[tokio::test]
    async fn test_create_instance_respects_open_instance_guard() {
        let fx = Fixture::new().await;
        fx.template("t-1", Frequency::Monthly).await;
        let manager = actor("p-m", Role::Manager);

        let err = create_instance(&fx.state, "t-1", None, None, &actor("p-i", Role::Inspector))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "FORBIDDEN");

        let created = create_instance(
            &fx.state,
            "t-1",
            None,
            Some(Assignee::email("contractor@example.com")),
            &manager,
        )
        .await
        .unwrap();
        assert_eq!(created.status, Pending);
        assert_eq!(created.created_by, "p-m");
        assert_eq!(created.assigned_email.as_deref(), Some("contractor@example.com"));

        let err = create_instance(&fx.state, "t-1", None, None, &manager)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "INVALID_TRANSITION");

        let err = create_instance(&fx.state, "t-missing", None, None, &manager)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_create_with_assignee_logs_created_then_assigned() {
        let fx = Fixture::new().await;
        fx.template("t-1", Frequency::Monthly).await;
        fx.profile("p-insp", Role::Inspector).await;

        let created = create_instance(
            &fx.state,
            "t-1",
            None,
            Some(Assignee::profile("p-insp")),
            &actor("p-m", Role::Manager),
        )
        .await
        .unwrap();
        fx.state.notifier.flush().await;

        let events = fx.persistence.list_events(&created.id).await.unwrap();
        let types: Vec<_> = events.iter().map(|e| e.event_type).collect();
        assert_eq!(types, vec![EventType::Created, EventType::Assigned]);
        assert!(events.iter().all(|e| e.created_at == created.created_at));
        assert_eq!(fx.pushes.recipients(), vec!["p-insp"]);
    }

    #[tokio::test]
    async fn test_create_as_needed_requires_due_date() {
        let fx = Fixture::new().await;
        fx.template("t-adhoc", Frequency::AsNeeded).await;
        let owner = actor("p-o", Role::Owner);

        let err = create_instance(&fx.state, "t-adhoc", None, None, &owner)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");

        let due = types::now() + chrono::Duration::days(3);
        let created = create_instance(&fx.state, "t-adhoc", Some(due), None, &owner)
            .await
            .unwrap();
        assert_eq!(created.due_at, due);
    }

    #[tokio::test]
    async fn test_assign_notifies_new_assignee() {
        let fx = with_instance(Pending).await;
        fx.profile("p-insp", Role::Inspector).await;
        let manager = actor("p-m", Role::Manager);

        let assigned = assign(&fx.state, "i-1", Assignee::profile("p-insp"), &manager)
            .await
            .unwrap();
        assert_eq!(assigned.assigned_to.as_deref(), Some("p-insp"));
        fx.state.notifier.flush().await;
        assert_eq!(fx.pushes.recipients(), vec!["p-insp"]);

        let err = assign(&fx.state, "i-1", Assignee::profile("p-ghost"), &manager)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "NOT_FOUND");

        let err = assign(&fx.state, "i-1", Assignee::email("not-an-email"), &manager)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");

        let stored = fx.persistence.get_instance("i-1").await.unwrap().unwrap();
        assert_eq!(stored.assigned_to.as_deref(), Some("p-insp"));
    }

    #[tokio::test]
    async fn test_assign_closed_instance_is_rejected() {
        let fx = with_instance(Passed).await;
        let err = assign(&fx.state, "i-1", Assignee::default(), &actor("p-o", Role::Owner))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "INVALID_TRANSITION");
    }

    #[tokio::test]
    async fn test_comment() {
        let fx = with_instance(Passed).await;

        let err = comment(&fx.state, "i-1", "   ", &actor("p-i", Role::Inspector))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");

        let err = comment(&fx.state, "i-1", "hi", &actor("p-v", Role::Viewer))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "FORBIDDEN");

        let event = comment(&fx.state, "i-1", " looks fine ", &actor("p-i", Role::Inspector))
            .await
            .unwrap();
        assert_eq!(event.event_type, EventType::Comment);
        assert_eq!(event.payload.0["text"], "looks fine");
    }
}
