// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared fixtures for unit tests.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::notifier::Notifier;
use crate::persistence::{
    InstanceRecord, Persistence, ProfileRecord, PushSubscriptionRecord, SqlitePersistence,
    TemplateRecord,
};
use crate::push::{PushError, PushFanout, PushNotification, PushSender};
use crate::state::EngineState;
use crate::storage::{MemoryObjectStore, UrlSigner};
use crate::types::{self, Actor, Frequency, InstanceStatus, Role};

/// Records every push instead of sending it.
#[derive(Default)]
pub(crate) struct RecordingSender {
    pub sent: Mutex<Vec<(String, PushNotification)>>,
}

impl RecordingSender {
    /// Profile ids that received a push, in send order.
    pub fn recipients(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sent.lock().unwrap().iter().map(|(p, _)| p.clone()).collect();
        ids.sort();
        ids
    }
}

#[async_trait]
impl PushSender for RecordingSender {
    async fn send(
        &self,
        subscription: &PushSubscriptionRecord,
        payload: &[u8],
    ) -> Result<(), PushError> {
        let notification: PushNotification = serde_json::from_slice(payload).unwrap();
        self.sent
            .lock()
            .unwrap()
            .push((subscription.profile_id.clone(), notification));
        Ok(())
    }
}

pub(crate) struct Fixture {
    pub state: EngineState,
    pub persistence: Arc<SqlitePersistence>,
    pub objects: Arc<MemoryObjectStore>,
    pub pushes: Arc<RecordingSender>,
}

impl Fixture {
    pub async fn new() -> Self {
        let persistence = Arc::new(SqlitePersistence::in_memory().await.unwrap());
        let objects = Arc::new(MemoryObjectStore::new(UrlSigner::new(
            "http://localhost:8080",
            "test-url-secret",
        )));
        let pushes = Arc::new(RecordingSender::default());
        let fanout = PushFanout::new(persistence.clone(), pushes.clone(), Duration::from_secs(5));
        let state = EngineState::new(
            persistence.clone(),
            objects.clone(),
            Notifier::new(None, Some(fanout)),
        );
        Self {
            state,
            persistence,
            objects,
            pushes,
        }
    }

    /// Profile at `loc-1` with one push subscription.
    pub async fn profile(&self, id: &str, role: Role) -> Actor {
        self.persistence
            .insert_profile(&ProfileRecord {
                id: id.to_string(),
                email: Some(format!("{}@example.com", id)),
                full_name: None,
                role,
                location_id: Some("loc-1".to_string()),
            })
            .await
            .unwrap();
        let now = types::now();
        self.persistence
            .upsert_push_subscription(&PushSubscriptionRecord {
                id: format!("sub-{}", id),
                profile_id: id.to_string(),
                endpoint: format!("https://push.example/{}", id),
                p256dh: "k".to_string(),
                auth: "a".to_string(),
                last_seen_at: now,
                created_at: now,
            })
            .await
            .unwrap();
        actor(id, role)
    }

    pub async fn template(&self, id: &str, frequency: Frequency) -> TemplateRecord {
        let template = template(id, frequency);
        self.persistence.insert_template(&template).await.unwrap();
        template
    }

    pub async fn instance(&self, id: &str, template_id: &str, status: InstanceStatus) -> InstanceRecord {
        let instance = instance(id, template_id, status, types::now());
        self.persistence.insert_instance(&instance).await.unwrap();
        instance
    }

    pub async fn status_of(&self, id: &str) -> InstanceStatus {
        self.persistence.get_instance(id).await.unwrap().unwrap().status
    }
}

pub(crate) fn actor(id: &str, role: Role) -> Actor {
    Actor {
        id: id.to_string(),
        email: None,
        role,
        location_id: Some("loc-1".to_string()),
    }
}

pub(crate) fn template(id: &str, frequency: Frequency) -> TemplateRecord {
    TemplateRecord {
        id: id.to_string(),
        location_id: "loc-1".to_string(),
        name: format!("Template {}", id),
        frequency,
        default_assignee: None,
        binder_id: None,
        active: true,
        created_at: types::now(),
    }
}

pub(crate) fn instance(
    id: &str,
    template_id: &str,
    status: InstanceStatus,
    due_at: DateTime<Utc>,
) -> InstanceRecord {
    let now = types::now();
    InstanceRecord {
        id: id.to_string(),
        template_id: template_id.to_string(),
        location_id: "loc-1".to_string(),
        due_at,
        assigned_to: None,
        assigned_email: None,
        status,
        created_by: types::SYSTEM_ACTOR.to_string(),
        inspected_at: None,
        remarks: None,
        created_at: now,
        updated_at: now,
    }
}
