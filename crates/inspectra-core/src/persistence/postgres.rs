// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! PostgreSQL persistence for inspectra-core.
//!
//! Each operation is a free function over a `PgPool`; `PostgresPersistence`
//! wires them into the [`Persistence`] trait.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use crate::error::{CoreError, is_unique_violation};
use crate::migrations;
use crate::types::{EventType, InstanceStatus, Role};

use super::{
    BinderAssignmentRecord, EventRecord, InstanceRecord, Persistence, ProfileRecord,
    PushSubscriptionRecord, SignatureRecord, TemplateRecord, endpoint_taken,
};

/// PostgreSQL-backed persistence implementation.
#[derive(Clone)]
pub struct PostgresPersistence {
    pool: PgPool,
}

impl PostgresPersistence {
    /// Create a new Postgres-backed persistence implementation.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect, run migrations and return the persistence.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, CoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(|e| CoreError::DatabaseError {
                operation: "connect".to_string(),
                details: e.to_string(),
            })?;

        migrations::run_postgres(&pool)
            .await
            .map_err(|e| CoreError::DatabaseError {
                operation: "migrate".to_string(),
                details: format!("Failed to run migrations: {}", e),
            })?;

        Ok(Self { pool })
    }

    /// Underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

const INSTANCE_COLUMNS: &str = "id, template_id, location_id, due_at, assigned_to, assigned_email, \
     status, created_by, inspected_at, remarks, created_at, updated_at";

const TEMPLATE_COLUMNS: &str =
    "id, location_id, name, frequency, default_assignee, binder_id, active, created_at";

const SIGNATURE_COLUMNS: &str =
    "id, instance_id, signed_by, signed_at, storage_key, points, device";

// ============================================================================
// Profiles
// ============================================================================

/// Insert a profile.
pub async fn insert_profile(pool: &PgPool, profile: &ProfileRecord) -> Result<(), CoreError> {
    sqlx::query(
        r#"
        INSERT INTO profiles (id, email, full_name, role, location_id)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(&profile.id)
    .bind(&profile.email)
    .bind(&profile.full_name)
    .bind(profile.role.as_str())
    .bind(&profile.location_id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Get a profile by id.
pub async fn get_profile(
    pool: &PgPool,
    profile_id: &str,
) -> Result<Option<ProfileRecord>, CoreError> {
    let record = sqlx::query_as::<_, ProfileRecord>(
        "SELECT id, email, full_name, role, location_id FROM profiles WHERE id = $1",
    )
    .bind(profile_id)
    .fetch_optional(pool)
    .await?;

    Ok(record)
}

/// Profiles at a location, optionally filtered by role.
pub async fn list_profiles_at_location(
    pool: &PgPool,
    location_id: &str,
    roles: Option<&[Role]>,
) -> Result<Vec<ProfileRecord>, CoreError> {
    let roles: Option<Vec<String>> =
        roles.map(|r| r.iter().map(|role| role.as_str().to_string()).collect());

    let records = sqlx::query_as::<_, ProfileRecord>(
        r#"
        SELECT id, email, full_name, role, location_id
        FROM profiles
        WHERE location_id = $1
          AND ($2::text[] IS NULL OR role = ANY($2))
        ORDER BY id
        "#,
    )
    .bind(location_id)
    .bind(roles)
    .fetch_all(pool)
    .await?;

    Ok(records)
}

// ============================================================================
// Templates and binders
// ============================================================================

/// Insert a template.
pub async fn insert_template(pool: &PgPool, template: &TemplateRecord) -> Result<(), CoreError> {
    sqlx::query(
        r#"
        INSERT INTO inspection_templates
            (id, location_id, name, frequency, default_assignee, binder_id, active, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(&template.id)
    .bind(&template.location_id)
    .bind(&template.name)
    .bind(template.frequency.as_str())
    .bind(&template.default_assignee)
    .bind(&template.binder_id)
    .bind(template.active)
    .bind(template.created_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Get a template by id.
pub async fn get_template(
    pool: &PgPool,
    template_id: &str,
) -> Result<Option<TemplateRecord>, CoreError> {
    let sql = format!("SELECT {TEMPLATE_COLUMNS} FROM inspection_templates WHERE id = $1");
    let record = sqlx::query_as::<_, TemplateRecord>(&sql)
        .bind(template_id)
        .fetch_optional(pool)
        .await?;

    Ok(record)
}

/// All active templates.
pub async fn list_active_templates(pool: &PgPool) -> Result<Vec<TemplateRecord>, CoreError> {
    let sql = format!(
        "SELECT {TEMPLATE_COLUMNS} FROM inspection_templates WHERE active ORDER BY created_at, id"
    );
    let records = sqlx::query_as::<_, TemplateRecord>(&sql)
        .fetch_all(pool)
        .await?;

    Ok(records)
}

/// Insert a binder assignment.
pub async fn insert_binder_assignment(
    pool: &PgPool,
    assignment: &BinderAssignmentRecord,
) -> Result<(), CoreError> {
    sqlx::query(
        r#"
        INSERT INTO binder_assignments (binder_id, profile_id, can_edit, assigned_at)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(&assignment.binder_id)
    .bind(&assignment.profile_id)
    .bind(assignment.can_edit)
    .bind(assignment.assigned_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Assignments for the given binders, oldest first.
pub async fn list_binder_assignments(
    pool: &PgPool,
    binder_ids: &[String],
) -> Result<Vec<BinderAssignmentRecord>, CoreError> {
    if binder_ids.is_empty() {
        return Ok(vec![]);
    }

    let records = sqlx::query_as::<_, BinderAssignmentRecord>(
        r#"
        SELECT binder_id, profile_id, can_edit, assigned_at
        FROM binder_assignments
        WHERE binder_id = ANY($1)
        ORDER BY assigned_at ASC
        "#,
    )
    .bind(binder_ids)
    .fetch_all(pool)
    .await?;

    Ok(records)
}

// ============================================================================
// Instances
// ============================================================================

/// Insert an instance.
pub async fn insert_instance(pool: &PgPool, instance: &InstanceRecord) -> Result<(), CoreError> {
    sqlx::query(
        r#"
        INSERT INTO inspection_instances
            (id, template_id, location_id, due_at, assigned_to, assigned_email, status,
             created_by, inspected_at, remarks, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        "#,
    )
    .bind(&instance.id)
    .bind(&instance.template_id)
    .bind(&instance.location_id)
    .bind(instance.due_at)
    .bind(&instance.assigned_to)
    .bind(&instance.assigned_email)
    .bind(instance.status.as_str())
    .bind(&instance.created_by)
    .bind(instance.inspected_at)
    .bind(&instance.remarks)
    .bind(instance.created_at)
    .bind(instance.updated_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Get an instance by id.
pub async fn get_instance(
    pool: &PgPool,
    instance_id: &str,
) -> Result<Option<InstanceRecord>, CoreError> {
    let sql = format!("SELECT {INSTANCE_COLUMNS} FROM inspection_instances WHERE id = $1");
    let record = sqlx::query_as::<_, InstanceRecord>(&sql)
        .bind(instance_id)
        .fetch_optional(pool)
        .await?;

    Ok(record)
}

/// The open instance of a template, if any.
pub async fn find_open_instance(
    pool: &PgPool,
    template_id: &str,
) -> Result<Option<InstanceRecord>, CoreError> {
    let sql = format!(
        "SELECT {INSTANCE_COLUMNS} FROM inspection_instances \
         WHERE template_id = $1 AND status IN ('pending', 'in_progress') LIMIT 1"
    );
    let record = sqlx::query_as::<_, InstanceRecord>(&sql)
        .bind(template_id)
        .fetch_optional(pool)
        .await?;

    Ok(record)
}

/// All open instances, earliest due first.
pub async fn list_open_instances(pool: &PgPool) -> Result<Vec<InstanceRecord>, CoreError> {
    let sql = format!(
        "SELECT {INSTANCE_COLUMNS} FROM inspection_instances \
         WHERE status IN ('pending', 'in_progress') ORDER BY due_at, id"
    );
    let records = sqlx::query_as::<_, InstanceRecord>(&sql)
        .fetch_all(pool)
        .await?;

    Ok(records)
}

/// Compare-and-set status update.
#[allow(clippy::too_many_arguments)]
pub async fn update_instance_status(
    pool: &PgPool,
    instance_id: &str,
    expected: InstanceStatus,
    status: InstanceStatus,
    inspected_at: Option<DateTime<Utc>>,
    remarks: Option<&str>,
    updated_at: DateTime<Utc>,
) -> Result<bool, CoreError> {
    let result = sqlx::query(
        r#"
        UPDATE inspection_instances
        SET status = $1, inspected_at = $2, remarks = $3, updated_at = $4
        WHERE id = $5 AND status = $6
        "#,
    )
    .bind(status.as_str())
    .bind(inspected_at)
    .bind(remarks)
    .bind(updated_at)
    .bind(instance_id)
    .bind(expected.as_str())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Replace the assignee of an instance.
pub async fn update_instance_assignee(
    pool: &PgPool,
    instance_id: &str,
    assigned_to: Option<&str>,
    assigned_email: Option<&str>,
    updated_at: DateTime<Utc>,
) -> Result<(), CoreError> {
    let result = sqlx::query(
        r#"
        UPDATE inspection_instances
        SET assigned_to = $1, assigned_email = $2, updated_at = $3
        WHERE id = $4
        "#,
    )
    .bind(assigned_to)
    .bind(assigned_email)
    .bind(updated_at)
    .bind(instance_id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(CoreError::not_found("instance", instance_id));
    }

    Ok(())
}

// ============================================================================
// Events
// ============================================================================

/// Append an event.
pub async fn insert_event(pool: &PgPool, event: &EventRecord) -> Result<(), CoreError> {
    sqlx::query(
        r#"
        INSERT INTO inspection_events (id, instance_id, event_type, actor_id, payload, created_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(&event.id)
    .bind(&event.instance_id)
    .bind(event.event_type.as_str())
    .bind(&event.actor_id)
    .bind(&event.payload)
    .bind(event.created_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Append an event unless one with `dedupe_key` exists for the instance.
pub async fn insert_event_once(
    pool: &PgPool,
    event: &EventRecord,
    dedupe_key: &str,
) -> Result<bool, CoreError> {
    let result = sqlx::query(
        r#"
        INSERT INTO inspection_events
            (id, instance_id, event_type, actor_id, payload, created_at, dedupe_key)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(&event.id)
    .bind(&event.instance_id)
    .bind(event.event_type.as_str())
    .bind(&event.actor_id)
    .bind(&event.payload)
    .bind(event.created_at)
    .bind(dedupe_key)
    .execute(pool)
    .await;

    match result {
        Ok(_) => Ok(true),
        Err(e) if is_unique_violation(&e) => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Events for an instance in timestamp order.
pub async fn list_events(pool: &PgPool, instance_id: &str) -> Result<Vec<EventRecord>, CoreError> {
    let records = sqlx::query_as::<_, EventRecord>(
        r#"
        SELECT id, instance_id, event_type, actor_id, payload, created_at
        FROM inspection_events
        WHERE instance_id = $1
        ORDER BY created_at ASC, seq ASC
        "#,
    )
    .bind(instance_id)
    .fetch_all(pool)
    .await?;

    Ok(records)
}

/// Whether an event of the given type exists for the instance.
pub async fn has_event(
    pool: &PgPool,
    instance_id: &str,
    event_type: EventType,
) -> Result<bool, CoreError> {
    let exists: (bool,) = sqlx::query_as(
        r#"
        SELECT EXISTS(
            SELECT 1 FROM inspection_events WHERE instance_id = $1 AND event_type = $2
        )
        "#,
    )
    .bind(instance_id)
    .bind(event_type.as_str())
    .fetch_one(pool)
    .await?;

    Ok(exists.0)
}

// ============================================================================
// Signatures
// ============================================================================

/// Insert a signature; duplicates become `AlreadySigned`.
pub async fn insert_signature(pool: &PgPool, signature: &SignatureRecord) -> Result<(), CoreError> {
    sqlx::query(
        r#"
        INSERT INTO inspection_signatures
            (id, instance_id, signed_by, signed_at, storage_key, points, device)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(&signature.id)
    .bind(&signature.instance_id)
    .bind(&signature.signed_by)
    .bind(signature.signed_at)
    .bind(&signature.storage_key)
    .bind(&signature.points)
    .bind(&signature.device)
    .execute(pool)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            CoreError::AlreadySigned {
                instance_id: signature.instance_id.clone(),
                actor_id: signature.signed_by.clone(),
            }
        } else {
            e.into()
        }
    })?;

    Ok(())
}

/// Signature of one signer on one instance.
pub async fn find_signature(
    pool: &PgPool,
    instance_id: &str,
    signed_by: &str,
) -> Result<Option<SignatureRecord>, CoreError> {
    let sql = format!(
        "SELECT {SIGNATURE_COLUMNS} FROM inspection_signatures \
         WHERE instance_id = $1 AND signed_by = $2"
    );
    let record = sqlx::query_as::<_, SignatureRecord>(&sql)
        .bind(instance_id)
        .bind(signed_by)
        .fetch_optional(pool)
        .await?;

    Ok(record)
}

/// Signature by id.
pub async fn get_signature(
    pool: &PgPool,
    signature_id: &str,
) -> Result<Option<SignatureRecord>, CoreError> {
    let sql = format!("SELECT {SIGNATURE_COLUMNS} FROM inspection_signatures WHERE id = $1");
    let record = sqlx::query_as::<_, SignatureRecord>(&sql)
        .bind(signature_id)
        .fetch_optional(pool)
        .await?;

    Ok(record)
}

/// Signatures on an instance, oldest first.
pub async fn list_signatures(
    pool: &PgPool,
    instance_id: &str,
) -> Result<Vec<SignatureRecord>, CoreError> {
    let sql = format!(
        "SELECT {SIGNATURE_COLUMNS} FROM inspection_signatures \
         WHERE instance_id = $1 ORDER BY signed_at ASC"
    );
    let records = sqlx::query_as::<_, SignatureRecord>(&sql)
        .bind(instance_id)
        .fetch_all(pool)
        .await?;

    Ok(records)
}

// ============================================================================
// Push subscriptions
// ============================================================================

/// Insert or refresh a subscription keyed by endpoint.
pub async fn upsert_push_subscription(
    pool: &PgPool,
    subscription: &PushSubscriptionRecord,
) -> Result<PushSubscriptionRecord, CoreError> {
    let record = sqlx::query_as::<_, PushSubscriptionRecord>(
        r#"
        INSERT INTO push_subscriptions
            (id, profile_id, endpoint, p256dh, auth, last_seen_at, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (endpoint) DO UPDATE SET
            p256dh = EXCLUDED.p256dh,
            auth = EXCLUDED.auth,
            last_seen_at = EXCLUDED.last_seen_at
        WHERE push_subscriptions.profile_id = EXCLUDED.profile_id
        RETURNING id, profile_id, endpoint, p256dh, auth, last_seen_at, created_at
        "#,
    )
    .bind(&subscription.id)
    .bind(&subscription.profile_id)
    .bind(&subscription.endpoint)
    .bind(&subscription.p256dh)
    .bind(&subscription.auth)
    .bind(subscription.last_seen_at)
    .bind(subscription.created_at)
    .fetch_optional(pool)
    .await?;

    record.ok_or_else(|| endpoint_taken(subscription))
}

/// Delete a subscription by endpoint, optionally only for its owner.
pub async fn delete_push_subscription(
    pool: &PgPool,
    endpoint: &str,
    profile_id: Option<&str>,
) -> Result<bool, CoreError> {
    let result = sqlx::query(
        r#"
        DELETE FROM push_subscriptions
        WHERE endpoint = $1 AND ($2::text IS NULL OR profile_id = $2)
        "#,
    )
    .bind(endpoint)
    .bind(profile_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Subscriptions owned by any of the profiles.
pub async fn list_push_subscriptions(
    pool: &PgPool,
    profile_ids: &[String],
) -> Result<Vec<PushSubscriptionRecord>, CoreError> {
    if profile_ids.is_empty() {
        return Ok(vec![]);
    }

    let records = sqlx::query_as::<_, PushSubscriptionRecord>(
        r#"
        SELECT id, profile_id, endpoint, p256dh, auth, last_seen_at, created_at
        FROM push_subscriptions
        WHERE profile_id = ANY($1)
        ORDER BY created_at
        "#,
    )
    .bind(profile_ids)
    .fetch_all(pool)
    .await?;

    Ok(records)
}

#[async_trait::async_trait]
impl Persistence for PostgresPersistence {
    async fn health_check_db(&self) -> Result<bool, CoreError> {
        let row: (i32,) = sqlx::query_as("SELECT 1").fetch_one(&self.pool).await?;
        Ok(row.0 == 1)
    }

    async fn insert_profile(&self, profile: &ProfileRecord) -> Result<(), CoreError> {
        insert_profile(&self.pool, profile).await
    }

    async fn get_profile(&self, profile_id: &str) -> Result<Option<ProfileRecord>, CoreError> {
        get_profile(&self.pool, profile_id).await
    }

    async fn list_profiles_at_location(
        &self,
        location_id: &str,
        roles: Option<&[Role]>,
    ) -> Result<Vec<ProfileRecord>, CoreError> {
        list_profiles_at_location(&self.pool, location_id, roles).await
    }

    async fn insert_template(&self, template: &TemplateRecord) -> Result<(), CoreError> {
        insert_template(&self.pool, template).await
    }

    async fn get_template(&self, template_id: &str) -> Result<Option<TemplateRecord>, CoreError> {
        get_template(&self.pool, template_id).await
    }

    async fn list_active_templates(&self) -> Result<Vec<TemplateRecord>, CoreError> {
        list_active_templates(&self.pool).await
    }

    async fn insert_binder_assignment(
        &self,
        assignment: &BinderAssignmentRecord,
    ) -> Result<(), CoreError> {
        insert_binder_assignment(&self.pool, assignment).await
    }

    async fn list_binder_assignments(
        &self,
        binder_ids: &[String],
    ) -> Result<Vec<BinderAssignmentRecord>, CoreError> {
        list_binder_assignments(&self.pool, binder_ids).await
    }

    async fn insert_instance(&self, instance: &InstanceRecord) -> Result<(), CoreError> {
        insert_instance(&self.pool, instance).await
    }

    async fn get_instance(&self, instance_id: &str) -> Result<Option<InstanceRecord>, CoreError> {
        get_instance(&self.pool, instance_id).await
    }

    async fn find_open_instance(
        &self,
        template_id: &str,
    ) -> Result<Option<InstanceRecord>, CoreError> {
        find_open_instance(&self.pool, template_id).await
    }

    async fn list_open_instances(&self) -> Result<Vec<InstanceRecord>, CoreError> {
        list_open_instances(&self.pool).await
    }

    async fn update_instance_status(
        &self,
        instance_id: &str,
        expected: InstanceStatus,
        status: InstanceStatus,
        inspected_at: Option<DateTime<Utc>>,
        remarks: Option<&str>,
        updated_at: DateTime<Utc>,
    ) -> Result<bool, CoreError> {
        update_instance_status(
            &self.pool,
            instance_id,
            expected,
            status,
            inspected_at,
            remarks,
            updated_at,
        )
        .await
    }

    async fn update_instance_assignee(
        &self,
        instance_id: &str,
        assigned_to: Option<&str>,
        assigned_email: Option<&str>,
        updated_at: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        update_instance_assignee(&self.pool, instance_id, assigned_to, assigned_email, updated_at)
            .await
    }

    async fn insert_event(&self, event: &EventRecord) -> Result<(), CoreError> {
        insert_event(&self.pool, event).await
    }

    async fn insert_event_once(
        &self,
        event: &EventRecord,
        dedupe_key: &str,
    ) -> Result<bool, CoreError> {
        insert_event_once(&self.pool, event, dedupe_key).await
    }

    async fn list_events(&self, instance_id: &str) -> Result<Vec<EventRecord>, CoreError> {
        list_events(&self.pool, instance_id).await
    }

    async fn has_event(
        &self,
        instance_id: &str,
        event_type: EventType,
    ) -> Result<bool, CoreError> {
        has_event(&self.pool, instance_id, event_type).await
    }

    async fn insert_signature(&self, signature: &SignatureRecord) -> Result<(), CoreError> {
        insert_signature(&self.pool, signature).await
    }

    async fn find_signature(
        &self,
        instance_id: &str,
        signed_by: &str,
    ) -> Result<Option<SignatureRecord>, CoreError> {
        find_signature(&self.pool, instance_id, signed_by).await
    }

    async fn get_signature(
        &self,
        signature_id: &str,
    ) -> Result<Option<SignatureRecord>, CoreError> {
        get_signature(&self.pool, signature_id).await
    }

    async fn list_signatures(
        &self,
        instance_id: &str,
    ) -> Result<Vec<SignatureRecord>, CoreError> {
        list_signatures(&self.pool, instance_id).await
    }

    async fn upsert_push_subscription(
        &self,
        subscription: &PushSubscriptionRecord,
    ) -> Result<PushSubscriptionRecord, CoreError> {
        upsert_push_subscription(&self.pool, subscription).await
    }

    async fn delete_push_subscription(
        &self,
        endpoint: &str,
        profile_id: Option<&str>,
    ) -> Result<bool, CoreError> {
        delete_push_subscription(&self.pool, endpoint, profile_id).await
    }

    async fn list_push_subscriptions(
        &self,
        profile_ids: &[String],
    ) -> Result<Vec<PushSubscriptionRecord>, CoreError> {
        list_push_subscriptions(&self.pool, profile_ids).await
    }
}
