// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SQLite-backed persistence implementation.

use std::path::Path;

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use crate::error::{CoreError, is_unique_violation};
use crate::migrations;
use crate::types::{EventType, InstanceStatus, Role};

use super::{
    BinderAssignmentRecord, EventRecord, InstanceRecord, Persistence, ProfileRecord,
    PushSubscriptionRecord, SignatureRecord, TemplateRecord, endpoint_taken,
};

/// SQLite-backed persistence provider.
#[derive(Clone)]
pub struct SqlitePersistence {
    pool: SqlitePool,
}

impl SqlitePersistence {
    /// Create a new SQLite persistence provider from an existing pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create and initialize a new SQLite persistence from a file path.
    ///
    /// Creates parent directories and the database file if needed, then runs
    /// all migrations.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| CoreError::DatabaseError {
                operation: "create_dir".to_string(),
                details: format!("Failed to create directory {:?}: {}", parent, e),
            })?;
        }

        let url = format!("sqlite:{}?mode=rwc", path.to_string_lossy());
        Self::connect(&url, 5).await
    }

    /// Fresh, migrated in-memory database (single connection so every query
    /// sees the same database).
    pub async fn in_memory() -> Result<Self, CoreError> {
        Self::connect("sqlite::memory:", 1).await
    }

    /// Connect to `url` and run migrations.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, CoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect(url)
            .await
            .map_err(|e| CoreError::DatabaseError {
                operation: "connect".to_string(),
                details: format!("Failed to connect to SQLite at {}: {}", url, e),
            })?;

        migrations::run_sqlite(&pool)
            .await
            .map_err(|e| CoreError::DatabaseError {
                operation: "migrate".to_string(),
                details: format!("Failed to run migrations: {}", e),
            })?;

        Ok(Self { pool })
    }

    /// Underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait::async_trait]
impl Persistence for SqlitePersistence {
    async fn health_check_db(&self) -> Result<bool, CoreError> {
        let row: (i64,) = sqlx::query_as("SELECT 1").fetch_one(&self.pool).await?;
        Ok(row.0 == 1)
    }

    async fn insert_profile(&self, profile: &ProfileRecord) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            INSERT INTO profiles (id, email, full_name, role, location_id)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&profile.id)
        .bind(&profile.email)
        .bind(&profile.full_name)
        .bind(profile.role.as_str())
        .bind(&profile.location_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_profile(&self, profile_id: &str) -> Result<Option<ProfileRecord>, CoreError> {
        let record = sqlx::query_as::<_, ProfileRecord>(
            "SELECT id, email, full_name, role, location_id FROM profiles WHERE id = ?",
        )
        .bind(profile_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn list_profiles_at_location(
        &self,
        location_id: &str,
        roles: Option<&[Role]>,
    ) -> Result<Vec<ProfileRecord>, CoreError> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT id, email, full_name, role, location_id FROM profiles WHERE location_id = ",
        );
        qb.push_bind(location_id);

        if let Some(roles) = roles {
            if roles.is_empty() {
                return Ok(vec![]);
            }
            qb.push(" AND role IN (");
            let mut separated = qb.separated(", ");
            for role in roles {
                separated.push_bind(role.as_str());
            }
            separated.push_unseparated(")");
        }
        qb.push(" ORDER BY id");

        let records = qb
            .build_query_as::<ProfileRecord>()
            .fetch_all(&self.pool)
            .await?;
        Ok(records)
    }

    async fn insert_template(&self, template: &TemplateRecord) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            INSERT INTO inspection_templates
                (id, location_id, name, frequency, default_assignee, binder_id, active, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
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
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_template(&self, template_id: &str) -> Result<Option<TemplateRecord>, CoreError> {
        let record = sqlx::query_as::<_, TemplateRecord>(
            r#"
            SELECT id, location_id, name, frequency, default_assignee, binder_id, active, created_at
            FROM inspection_templates
            WHERE id = ?
            "#,
        )
        .bind(template_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn list_active_templates(&self) -> Result<Vec<TemplateRecord>, CoreError> {
        let records = sqlx::query_as::<_, TemplateRecord>(
            r#"
            SELECT id, location_id, name, frequency, default_assignee, binder_id, active, created_at
            FROM inspection_templates
            WHERE active = 1
            ORDER BY created_at, id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn insert_binder_assignment(
        &self,
        assignment: &BinderAssignmentRecord,
    ) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            INSERT INTO binder_assignments (binder_id, profile_id, can_edit, assigned_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&assignment.binder_id)
        .bind(&assignment.profile_id)
        .bind(assignment.can_edit)
        .bind(assignment.assigned_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_binder_assignments(
        &self,
        binder_ids: &[String],
    ) -> Result<Vec<BinderAssignmentRecord>, CoreError> {
        if binder_ids.is_empty() {
            return Ok(vec![]);
        }

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT binder_id, profile_id, can_edit, assigned_at FROM binder_assignments WHERE binder_id IN (",
        );
        let mut separated = qb.separated(", ");
        for id in binder_ids {
            separated.push_bind(id);
        }
        separated.push_unseparated(") ORDER BY assigned_at ASC");

        let mut records = qb
            .build_query_as::<BinderAssignmentRecord>()
            .fetch_all(&self.pool)
            .await?;
        // Text timestamps; re-sort on the parsed values.
        records.sort_by_key(|r| r.assigned_at);
        Ok(records)
    }

    async fn insert_instance(&self, instance: &InstanceRecord) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            INSERT INTO inspection_instances
                (id, template_id, location_id, due_at, assigned_to, assigned_email, status,
                 created_by, inspected_at, remarks, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
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
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_instance(&self, instance_id: &str) -> Result<Option<InstanceRecord>, CoreError> {
        let record = sqlx::query_as::<_, InstanceRecord>(
            r#"
            SELECT id, template_id, location_id, due_at, assigned_to, assigned_email, status,
                   created_by, inspected_at, remarks, created_at, updated_at
            FROM inspection_instances
            WHERE id = ?
            "#,
        )
        .bind(instance_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn find_open_instance(
        &self,
        template_id: &str,
    ) -> Result<Option<InstanceRecord>, CoreError> {
        let record = sqlx::query_as::<_, InstanceRecord>(
            r#"
            SELECT id, template_id, location_id, due_at, assigned_to, assigned_email, status,
                   created_by, inspected_at, remarks, created_at, updated_at
            FROM inspection_instances
            WHERE template_id = ? AND status IN ('pending', 'in_progress')
            LIMIT 1
            "#,
        )
        .bind(template_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn list_open_instances(&self) -> Result<Vec<InstanceRecord>, CoreError> {
        let records = sqlx::query_as::<_, InstanceRecord>(
            r#"
            SELECT id, template_id, location_id, due_at, assigned_to, assigned_email, status,
                   created_by, inspected_at, remarks, created_at, updated_at
            FROM inspection_instances
            WHERE status IN ('pending', 'in_progress')
            ORDER BY due_at, id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
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
        let result = sqlx::query(
            r#"
            UPDATE inspection_instances
            SET status = ?, inspected_at = ?, remarks = ?, updated_at = ?
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(status.as_str())
        .bind(inspected_at)
        .bind(remarks)
        .bind(updated_at)
        .bind(instance_id)
        .bind(expected.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn update_instance_assignee(
        &self,
        instance_id: &str,
        assigned_to: Option<&str>,
        assigned_email: Option<&str>,
        updated_at: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        let result = sqlx::query(
            r#"
            UPDATE inspection_instances
            SET assigned_to = ?, assigned_email = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(assigned_to)
        .bind(assigned_email)
        .bind(updated_at)
        .bind(instance_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::not_found("instance", instance_id));
        }

        Ok(())
    }

    async fn insert_event(&self, event: &EventRecord) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            INSERT INTO inspection_events (id, instance_id, event_type, actor_id, payload, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&event.id)
        .bind(&event.instance_id)
        .bind(event.event_type.as_str())
        .bind(&event.actor_id)
        .bind(&event.payload)
        .bind(event.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn insert_event_once(
        &self,
        event: &EventRecord,
        dedupe_key: &str,
    ) -> Result<bool, CoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO inspection_events
                (id, instance_id, event_type, actor_id, payload, created_at, dedupe_key)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&event.id)
        .bind(&event.instance_id)
        .bind(event.event_type.as_str())
        .bind(&event.actor_id)
        .bind(&event.payload)
        .bind(event.created_at)
        .bind(dedupe_key)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(true),
            Err(e) if is_unique_violation(&e) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_events(&self, instance_id: &str) -> Result<Vec<EventRecord>, CoreError> {
        let records = sqlx::query_as::<_, EventRecord>(
            r#"
            SELECT id, instance_id, event_type, actor_id, payload, created_at
            FROM inspection_events
            WHERE instance_id = ?
            ORDER BY created_at ASC, seq ASC
            "#,
        )
        .bind(instance_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn has_event(
        &self,
        instance_id: &str,
        event_type: EventType,
    ) -> Result<bool, CoreError> {
        let count: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM inspection_events WHERE instance_id = ? AND event_type = ?",
        )
        .bind(instance_id)
        .bind(event_type.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(count.0 > 0)
    }

    async fn insert_signature(&self, signature: &SignatureRecord) -> Result<(), CoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO inspection_signatures
                (id, instance_id, signed_by, signed_at, storage_key, points, device)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&signature.id)
        .bind(&signature.instance_id)
        .bind(&signature.signed_by)
        .bind(signature.signed_at)
        .bind(&signature.storage_key)
        .bind(&signature.points)
        .bind(&signature.device)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(CoreError::AlreadySigned {
                instance_id: signature.instance_id.clone(),
                actor_id: signature.signed_by.clone(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn find_signature(
        &self,
        instance_id: &str,
        signed_by: &str,
    ) -> Result<Option<SignatureRecord>, CoreError> {
        let record = sqlx::query_as::<_, SignatureRecord>(
            r#"
            SELECT id, instance_id, signed_by, signed_at, storage_key, points, device
            FROM inspection_signatures
            WHERE instance_id = ? AND signed_by = ?
            "#,
        )
        .bind(instance_id)
        .bind(signed_by)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn get_signature(
        &self,
        signature_id: &str,
    ) -> Result<Option<SignatureRecord>, CoreError> {
        let record = sqlx::query_as::<_, SignatureRecord>(
            r#"
            SELECT id, instance_id, signed_by, signed_at, storage_key, points, device
            FROM inspection_signatures
            WHERE id = ?
            "#,
        )
        .bind(signature_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn list_signatures(
        &self,
        instance_id: &str,
    ) -> Result<Vec<SignatureRecord>, CoreError> {
        let records = sqlx::query_as::<_, SignatureRecord>(
            r#"
            SELECT id, instance_id, signed_by, signed_at, storage_key, points, device
            FROM inspection_signatures
            WHERE instance_id = ?
            ORDER BY signed_at ASC
            "#,
        )
        .bind(instance_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn upsert_push_subscription(
        &self,
        subscription: &PushSubscriptionRecord,
    ) -> Result<PushSubscriptionRecord, CoreError> {
        let record = sqlx::query_as::<_, PushSubscriptionRecord>(
            r#"
            INSERT INTO push_subscriptions
                (id, profile_id, endpoint, p256dh, auth, last_seen_at, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (endpoint) DO UPDATE SET
                p256dh = excluded.p256dh,
                auth = excluded.auth,
                last_seen_at = excluded.last_seen_at
            WHERE push_subscriptions.profile_id = excluded.profile_id
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
        .fetch_optional(&self.pool)
        .await?;

        record.ok_or_else(|| endpoint_taken(subscription))
    }

    async fn delete_push_subscription(
        &self,
        endpoint: &str,
        profile_id: Option<&str>,
    ) -> Result<bool, CoreError> {
        let result = match profile_id {
            Some(profile_id) => {
                sqlx::query("DELETE FROM push_subscriptions WHERE endpoint = ? AND profile_id = ?")
                    .bind(endpoint)
                    .bind(profile_id)
                    .execute(&self.pool)
                    .await?
            }
            None => {
                sqlx::query("DELETE FROM push_subscriptions WHERE endpoint = ?")
                    .bind(endpoint)
                    .execute(&self.pool)
                    .await?
            }
        };

        Ok(result.rows_affected() > 0)
    }

    async fn list_push_subscriptions(
        &self,
        profile_ids: &[String],
    ) -> Result<Vec<PushSubscriptionRecord>, CoreError> {
        if profile_ids.is_empty() {
            return Ok(vec![]);
        }

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT id, profile_id, endpoint, p256dh, auth, last_seen_at, created_at \
             FROM push_subscriptions WHERE profile_id IN (",
        );
        let mut separated = qb.separated(", ");
        for id in profile_ids {
            separated.push_bind(id);
        }
        separated.push_unseparated(") ORDER BY created_at");

        let records = qb
            .build_query_as::<PushSubscriptionRecord>()
            .fetch_all(&self.pool)
            .await?;
        Ok(records)
    }
}
