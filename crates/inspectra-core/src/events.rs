// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Append-only audit trail per instance.
//!
//! Events are never updated or deleted.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::types::Json;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::error::CoreError;
use crate::persistence::{EventRecord, Persistence};
use crate::state::EngineState;
use crate::types::{self, EventType};

/// Append an event and return it.
#[instrument(skip(state, payload))]
pub async fn append(
    state: &EngineState,
    instance_id: &str,
    event_type: EventType,
    actor_id: Option<&str>,
    payload: Option<Value>,
) -> Result<EventRecord, CoreError> {
    append_to(state.persistence.as_ref(), instance_id, event_type, actor_id, payload).await
}

pub(crate) async fn append_to(
    persistence: &dyn Persistence,
    instance_id: &str,
    event_type: EventType,
    actor_id: Option<&str>,
    payload: Option<Value>,
) -> Result<EventRecord, CoreError> {
    let event = record(instance_id, event_type, actor_id, payload, types::now());
    persistence.insert_event(&event).await?;
    debug!(instance_id = %instance_id, event_id = %event.id, "Event appended");
    Ok(event)
}

fn record(
    instance_id: &str,
    event_type: EventType,
    actor_id: Option<&str>,
    payload: Option<Value>,
    created_at: DateTime<Utc>,
) -> EventRecord {
    EventRecord {
        id: Uuid::new_v4().to_string(),
        instance_id: instance_id.to_string(),
        event_type,
        actor_id: actor_id.map(String::from),
        payload: Json(payload.unwrap_or(Value::Null)),
        created_at,
    }
}

/// Append a marker event unless one with the same `dedupe_key` exists for
/// the instance. Returns whether this call stored it.
///
/// Uniqueness is enforced by the store, so concurrent callers cannot both
/// succeed.
pub(crate) async fn append_marker(
    persistence: &dyn Persistence,
    instance_id: &str,
    event_type: EventType,
    dedupe_key: &str,
    payload: Option<Value>,
) -> Result<bool, CoreError> {
    let event = record(instance_id, event_type, None, payload, types::now());
    let stored = persistence.insert_event_once(&event, dedupe_key).await?;
    debug!(instance_id = %instance_id, dedupe_key = %dedupe_key, stored, "Marker append");
    Ok(stored)
}

/// Append from a detached task; failures are logged, never returned.
///
/// `occurred_at` is taken by the caller when the change happened, not when
/// the task runs.
pub(crate) async fn append_logged(
    persistence: Arc<dyn Persistence>,
    instance_id: String,
    event_type: EventType,
    actor_id: Option<String>,
    payload: Option<Value>,
    occurred_at: DateTime<Utc>,
) {
    let event = record(&instance_id, event_type, actor_id.as_deref(), payload, occurred_at);
    match persistence.insert_event(&event).await {
        Ok(()) => debug!(instance_id = %instance_id, event_id = %event.id, "Event appended"),
        Err(e) => warn!(
            instance_id = %instance_id,
            event_type = %event_type,
            error = %e,
            "Failed to append event"
        ),
    }
}

/// Events of an instance, oldest first.
///
/// Ties keep storage order, so the result is non-decreasing by timestamp
/// whatever order the backend returned rows in.
pub async fn list(state: &EngineState, instance_id: &str) -> Result<Vec<EventRecord>, CoreError> {
    if state.persistence.get_instance(instance_id).await?.is_none() {
        return Err(CoreError::not_found("instance", instance_id));
    }
    let mut events = state.persistence.list_events(instance_id).await?;
    events.sort_by_key(|e| e.created_at);
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifier::Notifier;
    use crate::persistence::{InstanceRecord, SqlitePersistence, TemplateRecord};
    use crate::storage::{MemoryObjectStore, UrlSigner};
    use crate::types::{Frequency, InstanceStatus};
    use chrono::{Duration, TimeZone, Utc};
    use serde_json::json;

    async fn state_with_instance() -> EngineState {
        let persistence = Arc::new(SqlitePersistence::in_memory().await.unwrap());
        let now = types::now();
        persistence
            .insert_template(&TemplateRecord {
                id: "t-1".to_string(),
                location_id: "loc-1".to_string(),
                name: "Eyewash".to_string(),
                frequency: Frequency::Weekly,
                default_assignee: None,
                binder_id: None,
                active: true,
                created_at: now,
            })
            .await
            .unwrap();
        persistence
            .insert_instance(&InstanceRecord {
                id: "i-1".to_string(),
                template_id: "t-1".to_string(),
                location_id: "loc-1".to_string(),
                due_at: now,
                assigned_to: None,
                assigned_email: None,
                status: InstanceStatus::Pending,
                created_by: "system".to_string(),
                inspected_at: None,
                remarks: None,
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();

        EngineState::new(
            persistence,
            Arc::new(MemoryObjectStore::new(UrlSigner::new("http://localhost", "s"))),
            Notifier::disabled(),
        )
    }

    #[tokio::test]
    async fn test_append_then_list() {
        let state = state_with_instance().await;

        let event = append(
            &state,
            "i-1",
            EventType::Comment,
            Some("p-1"),
            Some(json!({"text": "ok"})),
        )
        .await
        .unwrap();
        assert_eq!(event.payload.0["text"], "ok");

        let system = append(&state, "i-1", EventType::Escalated, None, None)
            .await
            .unwrap();
        assert_eq!(system.actor_id, None);
        assert_eq!(system.payload.0, Value::Null);

        let events = list(&state, "i-1").await.unwrap();
        assert_eq!(events.len(), 2);
    }

    #[tokio::test]
    async fn test_list_is_ordered_regardless_of_insertion_order() {
        let state = state_with_instance().await;
        let base = Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap();

        // stored newest first
        for (i, offset) in [30, 10, 20, 10].into_iter().enumerate() {
            state
                .persistence
                .insert_event(&EventRecord {
                    id: format!("e-{}", i),
                    instance_id: "i-1".to_string(),
                    event_type: EventType::Comment,
                    actor_id: None,
                    payload: Json(Value::Null),
                    created_at: base + Duration::seconds(offset),
                })
                .await
                .unwrap();
        }

        let events = list(&state, "i-1").await.unwrap();
        let stamps: Vec<_> = events.iter().map(|e| e.created_at).collect();
        assert!(stamps.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(events[0].id, "e-1");
        assert_eq!(events[1].id, "e-3");
        assert_eq!(events[3].id, "e-0");
    }

    #[tokio::test]
    async fn test_detached_append_keeps_caller_timestamp() {
        let state = state_with_instance().await;
        let occurred = Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap();

        append_logged(
            state.persistence.clone(),
            "i-1".to_string(),
            EventType::Started,
            Some("p-1".to_string()),
            None,
            occurred,
        )
        .await;

        let events = list(&state, "i-1").await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].created_at, occurred);
    }

    #[tokio::test]
    async fn test_marker_is_stored_once_per_key() {
        let state = state_with_instance().await;
        let persistence = state.persistence.as_ref();

        assert!(append_marker(persistence, "i-1", EventType::ReminderSent, "reminder_sent:p-1:0", None).await.unwrap());
        assert!(!append_marker(persistence, "i-1", EventType::ReminderSent, "reminder_sent:p-1:0", None).await.unwrap());
        assert!(append_marker(persistence, "i-1", EventType::ReminderSent, "reminder_sent:p-2:0", None).await.unwrap());

        // ordinary events carry no key and never collide
        append(&state, "i-1", EventType::ReminderSent, None, None).await.unwrap();
        append(&state, "i-1", EventType::ReminderSent, None, None).await.unwrap();

        assert_eq!(list(&state, "i-1").await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_list_unknown_instance() {
        let state = state_with_instance().await;
        let err = list(&state, "missing").await.unwrap_err();
        assert_eq!(err.error_code(), "NOT_FOUND");
    }
}
