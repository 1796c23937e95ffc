// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared domain vocabulary: frequencies, statuses, event types, roles and actors.
//!
//! All enums round-trip through their snake_case string form, which is also
//! how they are stored in the database and rendered in JSON.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Value of `created_by` for instances materialized by the generator.
pub const SYSTEM_ACTOR: &str = "system";

/// Current time at the precision both backends store (microseconds).
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

macro_rules! string_enum {
    ($name:ident, $field:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            /// Database/JSON representation.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = CoreError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(CoreError::validation(
                        $field,
                        format!("unknown value '{}'", other),
                    )),
                }
            }
        }

        impl TryFrom<String> for $name {
            type Error = CoreError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                value.parse()
            }
        }
    };
}

/// How often a template's inspection recurs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    /// Every day.
    Daily,
    /// Every seven days.
    Weekly,
    /// Same day next month, clamped to month length.
    Monthly,
    /// Three calendar months.
    Quarterly,
    /// One calendar year.
    Yearly,
    /// Synonym for `Yearly`.
    Annual,
    /// Three calendar years.
    #[serde(rename = "every_3_years")]
    EveryThreeYears,
    /// Never scheduled automatically.
    AsNeeded,
}

string_enum!(Frequency, "frequency", {
    Daily => "daily",
    Weekly => "weekly",
    Monthly => "monthly",
    Quarterly => "quarterly",
    Yearly => "yearly",
    Annual => "annual",
    EveryThreeYears => "every_3_years",
    AsNeeded => "as_needed",
});

/// Lifecycle status of an inspection instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    /// Created, not yet started.
    Pending,
    /// Inspection underway.
    InProgress,
    /// Inspection completed with findings.
    Failed,
    /// Inspection completed cleanly.
    Passed,
    /// Cancelled. Soft-terminal.
    Void,
}

string_enum!(InstanceStatus, "status", {
    Pending => "pending",
    InProgress => "in_progress",
    Failed => "failed",
    Passed => "passed",
    Void => "void",
});

impl InstanceStatus {
    /// Open statuses count towards the one-open-instance-per-template rule.
    pub fn is_open(self) -> bool {
        matches!(self, Self::Pending | Self::InProgress)
    }
}

/// Kind of audit-trail entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// Instance created.
    Created,
    /// Assignee changed.
    Assigned,
    /// Moved to in_progress.
    Started,
    /// Moved to failed.
    Failed,
    /// Moved to passed.
    Passed,
    /// Signature attached.
    Signed,
    /// Free-form note.
    Comment,
    /// Assignee reminded about an upcoming due date.
    ReminderSent,
    /// Overdue and unassigned; managers notified.
    Escalated,
    /// Cancelled.
    Void,
    /// Passed/failed instance returned to pending.
    Reverted,
}

string_enum!(EventType, "event_type", {
    Created => "created",
    Assigned => "assigned",
    Started => "started",
    Failed => "failed",
    Passed => "passed",
    Signed => "signed",
    Comment => "comment",
    ReminderSent => "reminder_sent",
    Escalated => "escalated",
    Void => "void",
    Reverted => "reverted",
});

impl EventType {
    /// Event recorded when an instance enters `status`.
    pub fn for_status(status: InstanceStatus) -> Self {
        match status {
            InstanceStatus::Pending => Self::Reverted,
            InstanceStatus::InProgress => Self::Started,
            InstanceStatus::Failed => Self::Failed,
            InstanceStatus::Passed => Self::Passed,
            InstanceStatus::Void => Self::Void,
        }
    }
}

/// Role a profile holds within its organization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Organization owner.
    Owner,
    /// Administrator.
    Admin,
    /// Location manager.
    Manager,
    /// Performs inspections.
    Inspector,
    /// Read-only.
    Viewer,
}

string_enum!(Role, "role", {
    Owner => "owner",
    Admin => "admin",
    Manager => "manager",
    Inspector => "inspector",
    Viewer => "viewer",
});

/// What an actor is allowed to do to an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Start, pass, fail, comment, sign.
    Perform,
    /// Create, assign and void instances.
    Manage,
    /// Return a passed/failed instance to pending.
    RevertToDraft,
}

impl Capability {
    /// Human-readable verb used in `Forbidden` errors.
    pub fn describe(self) -> &'static str {
        match self {
            Self::Perform => "perform inspections",
            Self::Manage => "manage instances",
            Self::RevertToDraft => "revert instances to draft",
        }
    }
}

impl Role {
    /// Whether holders of this role have `capability`.
    pub fn grants(self, capability: Capability) -> bool {
        match capability {
            Capability::Perform => !matches!(self, Role::Viewer),
            Capability::Manage => matches!(self, Role::Owner | Role::Admin | Role::Manager),
            Capability::RevertToDraft => matches!(self, Role::Owner | Role::Admin),
        }
    }

    /// Roles that receive escalations and failure alerts for a location.
    pub const SUPERVISORS: [Role; 3] = [Role::Owner, Role::Admin, Role::Manager];
}

/// Authenticated identity performing an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    /// Profile id.
    pub id: String,
    /// Login email, if known.
    pub email: Option<String>,
    /// Role resolved from the profile.
    pub role: Role,
    /// Home location of the profile.
    pub location_id: Option<String>,
}

impl Actor {
    /// Whether this actor holds `capability`.
    pub fn can(&self, capability: Capability) -> bool {
        self.role.grants(capability)
    }

    /// Fails with `Forbidden` unless the actor holds `capability`.
    pub fn require(&self, capability: Capability) -> Result<(), CoreError> {
        if self.can(capability) {
            Ok(())
        } else {
            Err(CoreError::Forbidden {
                actor_id: self.id.clone(),
                action: capability.describe().to_string(),
            })
        }
    }

    /// Fails with `Forbidden` unless the actor works at `location_id`.
    /// Owners span every location of the organization.
    pub fn require_location(&self, location_id: &str) -> Result<(), CoreError> {
        if self.role == Role::Owner || self.location_id.as_deref() == Some(location_id) {
            Ok(())
        } else {
            Err(CoreError::Forbidden {
                actor_id: self.id.clone(),
                action: format!("act on location '{}'", location_id),
            })
        }
    }
}
