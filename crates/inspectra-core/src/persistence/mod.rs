// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Persistence interfaces and backends for inspectra-core.
//!
//! This module defines the persistence abstraction and backend implementations.
//! Records double as the domain types handed back to callers; enum columns are
//! stored as text and parsed on read.

pub mod postgres;
pub mod sqlite;

pub use self::postgres::PostgresPersistence;
pub use self::sqlite::SqlitePersistence;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::types::Json;

use crate::error::CoreError;
use crate::types::{EventType, Frequency, InstanceStatus, Role};

/// Profile record (people who can be assigned, notified or act).
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct ProfileRecord {
    /// Profile id (matches the authentication subject).
    pub id: String,
    /// Contact email.
    pub email: Option<String>,
    /// Display name.
    pub full_name: Option<String>,
    /// Role within the organization.
    #[sqlx(try_from = "String")]
    pub role: Role,
    /// Home location.
    pub location_id: Option<String>,
}

/// Recurring inspection definition.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct TemplateRecord {
    /// Template id.
    pub id: String,
    /// Location the inspection happens at.
    pub location_id: String,
    /// Display name.
    pub name: String,
    /// Recurrence.
    #[sqlx(try_from = "String")]
    pub frequency: Frequency,
    /// Profile assigned to generated instances, if set.
    pub default_assignee: Option<String>,
    /// Binder whose earliest-assigned profile is the fallback assignee.
    pub binder_id: Option<String>,
    /// Inactive templates are never generated from.
    pub active: bool,
    /// When the template was created.
    pub created_at: DateTime<Utc>,
}

/// One occurrence of a template's inspection obligation.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct InstanceRecord {
    /// Instance id.
    pub id: String,
    /// Template this instance was generated from.
    pub template_id: String,
    /// Location copied from the template.
    pub location_id: String,
    /// When the inspection is due.
    pub due_at: DateTime<Utc>,
    /// Assigned profile.
    pub assigned_to: Option<String>,
    /// Assigned bare email (no profile).
    pub assigned_email: Option<String>,
    /// Current status.
    #[sqlx(try_from = "String")]
    pub status: InstanceStatus,
    /// Creating user id, or "system".
    pub created_by: String,
    /// When the inspection was completed (passed or failed).
    pub inspected_at: Option<DateTime<Utc>>,
    /// Free-form remarks from the last transition that supplied any.
    pub remarks: Option<String>,
    /// When the instance was created.
    pub created_at: DateTime<Utc>,
    /// When the instance was last changed.
    pub updated_at: DateTime<Utc>,
}

impl InstanceRecord {
    /// Whether anyone (profile or email) is assigned.
    pub fn has_assignee(&self) -> bool {
        self.assigned_to.is_some() || self.assigned_email.is_some()
    }
}

/// Immutable audit-trail entry.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct EventRecord {
    /// Event id.
    pub id: String,
    /// Instance this event belongs to.
    pub instance_id: String,
    /// Type of event.
    #[sqlx(try_from = "String")]
    pub event_type: EventType,
    /// Acting profile; None for system events.
    pub actor_id: Option<String>,
    /// Free-form payload (JSON null when absent).
    pub payload: Json<serde_json::Value>,
    /// When the event occurred.
    pub created_at: DateTime<Utc>,
}

/// Signature attached to an instance.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct SignatureRecord {
    /// Signature id.
    pub id: String,
    /// Signed instance.
    pub instance_id: String,
    /// Signing profile.
    pub signed_by: String,
    /// When the signature was captured.
    pub signed_at: DateTime<Utc>,
    /// Object storage key of the image. Never exposed directly.
    #[serde(skip_serializing)]
    pub storage_key: String,
    /// Stroke/point metadata (JSON null when absent).
    pub points: Json<serde_json::Value>,
    /// Capturing device metadata (JSON null when absent).
    pub device: Json<serde_json::Value>,
}

/// Binder membership used as the fallback assignee source.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct BinderAssignmentRecord {
    /// Binder id.
    pub binder_id: String,
    /// Assigned profile.
    pub profile_id: String,
    /// Whether the profile may edit the binder.
    pub can_edit: bool,
    /// When the profile was assigned.
    pub assigned_at: DateTime<Utc>,
}

/// Browser push subscription.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct PushSubscriptionRecord {
    /// Subscription id.
    pub id: String,
    /// Owning profile.
    pub profile_id: String,
    /// Push service endpoint URL (unique).
    pub endpoint: String,
    /// Client P-256 public key, base64url.
    pub p256dh: String,
    /// Client auth secret, base64url.
    pub auth: String,
    /// Last time the client (re)subscribed.
    pub last_seen_at: DateTime<Utc>,
    /// When the subscription was first stored.
    pub created_at: DateTime<Utc>,
}

/// Error for an upsert whose endpoint belongs to a different profile.
pub(crate) fn endpoint_taken(subscription: &PushSubscriptionRecord) -> CoreError {
    CoreError::Forbidden {
        actor_id: subscription.profile_id.clone(),
        action: "claim a push endpoint registered to another profile".to_string(),
    }
}

/// Persistence interface used by the lifecycle engine.
#[allow(missing_docs)]
#[async_trait]
pub trait Persistence: Send + Sync {
    async fn health_check_db(&self) -> Result<bool, CoreError>;

    // ========================================================================
    // Profiles
    // ========================================================================

    async fn insert_profile(&self, profile: &ProfileRecord) -> Result<(), CoreError>;

    async fn get_profile(&self, profile_id: &str) -> Result<Option<ProfileRecord>, CoreError>;

    /// Profiles whose home location is `location_id`, optionally restricted to `roles`.
    async fn list_profiles_at_location(
        &self,
        location_id: &str,
        roles: Option<&[Role]>,
    ) -> Result<Vec<ProfileRecord>, CoreError>;

    // ========================================================================
    // Templates and binders
    // ========================================================================

    async fn insert_template(&self, template: &TemplateRecord) -> Result<(), CoreError>;

    async fn get_template(&self, template_id: &str) -> Result<Option<TemplateRecord>, CoreError>;

    async fn list_active_templates(&self) -> Result<Vec<TemplateRecord>, CoreError>;

    async fn insert_binder_assignment(
        &self,
        assignment: &BinderAssignmentRecord,
    ) -> Result<(), CoreError>;

    /// Assignments for any of `binder_ids`, oldest assignment first.
    async fn list_binder_assignments(
        &self,
        binder_ids: &[String],
    ) -> Result<Vec<BinderAssignmentRecord>, CoreError>;

    // ========================================================================
    // Instances
    // ========================================================================

    async fn insert_instance(&self, instance: &InstanceRecord) -> Result<(), CoreError>;

    async fn get_instance(&self, instance_id: &str) -> Result<Option<InstanceRecord>, CoreError>;

    /// The pending or in_progress instance of a template, if any.
    async fn find_open_instance(
        &self,
        template_id: &str,
    ) -> Result<Option<InstanceRecord>, CoreError>;

    /// All pending or in_progress instances.
    async fn list_open_instances(&self) -> Result<Vec<InstanceRecord>, CoreError>;

    /// Change status only if the instance is still in `expected`.
    ///
    /// Returns false when the row was not updated (missing or concurrently changed).
    #[allow(clippy::too_many_arguments)]
    async fn update_instance_status(
        &self,
        instance_id: &str,
        expected: InstanceStatus,
        status: InstanceStatus,
        inspected_at: Option<DateTime<Utc>>,
        remarks: Option<&str>,
        updated_at: DateTime<Utc>,
    ) -> Result<bool, CoreError>;

    async fn update_instance_assignee(
        &self,
        instance_id: &str,
        assigned_to: Option<&str>,
        assigned_email: Option<&str>,
        updated_at: DateTime<Utc>,
    ) -> Result<(), CoreError>;

    // ========================================================================
    // Events (append-only)
    // ========================================================================

    async fn insert_event(&self, event: &EventRecord) -> Result<(), CoreError>;

    /// Insert an event tagged with `dedupe_key`. Returns false, storing
    /// nothing, when the instance already has an event with that key.
    async fn insert_event_once(&self, event: &EventRecord, dedupe_key: &str)
    -> Result<bool, CoreError>;

    /// Events for an instance, oldest first.
    async fn list_events(&self, instance_id: &str) -> Result<Vec<EventRecord>, CoreError>;

    async fn has_event(&self, instance_id: &str, event_type: EventType)
    -> Result<bool, CoreError>;

    // ========================================================================
    // Signatures
    // ========================================================================

    /// Insert a signature. A duplicate (instance, signer) yields `AlreadySigned`.
    async fn insert_signature(&self, signature: &SignatureRecord) -> Result<(), CoreError>;

    async fn find_signature(
        &self,
        instance_id: &str,
        signed_by: &str,
    ) -> Result<Option<SignatureRecord>, CoreError>;

    async fn get_signature(
        &self,
        signature_id: &str,
    ) -> Result<Option<SignatureRecord>, CoreError>;

    async fn list_signatures(&self, instance_id: &str)
    -> Result<Vec<SignatureRecord>, CoreError>;

    // ========================================================================
    // Push subscriptions
    // ========================================================================

    /// Insert or refresh (by endpoint) a subscription; returns the stored row.
    ///
    /// An endpoint already owned by another profile is left untouched and
    /// the call fails with `Forbidden`.
    async fn upsert_push_subscription(
        &self,
        subscription: &PushSubscriptionRecord,
    ) -> Result<PushSubscriptionRecord, CoreError>;

    /// Delete by endpoint, optionally scoped to an owning profile.
    async fn delete_push_subscription(
        &self,
        endpoint: &str,
        profile_id: Option<&str>,
    ) -> Result<bool, CoreError>;

    async fn list_push_subscriptions(
        &self,
        profile_ids: &[String],
    ) -> Result<Vec<PushSubscriptionRecord>, CoreError>;
}
