// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for inspectra-core integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use inspectra_core::notifier::Notifier;
use inspectra_core::persistence::{
    InstanceRecord, Persistence, ProfileRecord, SqlitePersistence, TemplateRecord,
};
use inspectra_core::push::{HttpPushSender, PushFanout};
use inspectra_core::storage::{MemoryObjectStore, UrlSigner};
use inspectra_core::types::{self, Actor, Frequency, InstanceStatus, Role};
use inspectra_core::webhook::WebhookDispatcher;
use inspectra_core::EngineState;

pub const LOCATION: &str = "loc-main";

/// Engine wired to in-memory SQLite and memory object storage.
pub struct TestContext {
    pub persistence: Arc<dyn Persistence>,
    pub objects: Arc<MemoryObjectStore>,
    pub state: EngineState,
}

impl TestContext {
    pub async fn new() -> Self {
        Self::with_notifier(Notifier::disabled()).await
    }

    /// Context whose webhooks go to `targets` and pushes go over real HTTP.
    pub async fn with_delivery(webhook_secret: &str, targets: Vec<String>) -> Self {
        let persistence: Arc<dyn Persistence> = Arc::new(
            SqlitePersistence::in_memory()
                .await
                .expect("in-memory sqlite"),
        );
        let dispatcher = WebhookDispatcher::new(webhook_secret, targets).expect("dispatcher");
        let sender = HttpPushSender::new(Duration::from_secs(5), None).expect("push sender");
        let fanout = PushFanout::new(persistence.clone(), Arc::new(sender), Duration::from_secs(5));
        Self::build(persistence, Notifier::new(Some(dispatcher), Some(fanout)))
    }

    pub async fn with_notifier(notifier: Notifier) -> Self {
        let persistence: Arc<dyn Persistence> = Arc::new(
            SqlitePersistence::in_memory()
                .await
                .expect("in-memory sqlite"),
        );
        Self::build(persistence, notifier)
    }

    fn build(persistence: Arc<dyn Persistence>, notifier: Notifier) -> Self {
        let objects = Arc::new(MemoryObjectStore::new(UrlSigner::new(
            "http://objects.test",
            "integration-secret",
        )));
        let state = EngineState::new(persistence.clone(), objects.clone(), notifier);
        Self {
            persistence,
            objects,
            state,
        }
    }

    pub async fn template(&self, id: &str, frequency: Frequency) -> TemplateRecord {
        let template = TemplateRecord {
            id: id.to_string(),
            location_id: LOCATION.to_string(),
            name: format!("Template {}", id),
            frequency,
            default_assignee: None,
            binder_id: None,
            active: true,
            created_at: types::now(),
        };
        self.persistence.insert_template(&template).await.unwrap();
        template
    }

    pub async fn instance(
        &self,
        id: &str,
        template_id: &str,
        status: InstanceStatus,
        due_at: DateTime<Utc>,
    ) -> InstanceRecord {
        let now = types::now();
        let instance = InstanceRecord {
            id: id.to_string(),
            template_id: template_id.to_string(),
            location_id: LOCATION.to_string(),
            due_at,
            assigned_to: None,
            assigned_email: None,
            status,
            created_by: "system".to_string(),
            inspected_at: None,
            remarks: None,
            created_at: now,
            updated_at: now,
        };
        self.persistence.insert_instance(&instance).await.unwrap();
        instance
    }

    pub async fn profile(&self, id: &str, role: Role) -> Actor {
        self.persistence
            .insert_profile(&ProfileRecord {
                id: id.to_string(),
                email: Some(format!("{}@example.com", id)),
                full_name: None,
                role,
                location_id: Some(LOCATION.to_string()),
            })
            .await
            .unwrap();
        actor(id, role)
    }

    pub async fn status_of(&self, id: &str) -> InstanceStatus {
        self.persistence.get_instance(id).await.unwrap().unwrap().status
    }
}

pub fn actor(id: &str, role: Role) -> Actor {
    Actor {
        id: id.to_string(),
        email: Some(format!("{}@example.com", id)),
        role,
        location_id: Some(LOCATION.to_string()),
    }
}

#[macro_export]
macro_rules! skip_if_no_db {
    () => {
        if std::env::var("TEST_DATABASE_URL").is_err() {
            eprintln!("Skipping test: TEST_DATABASE_URL not set");
            return;
        }
    };
}
