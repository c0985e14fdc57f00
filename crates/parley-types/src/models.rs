use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// -- Roles --

/// Closed set of organisational roles a user can hold within a tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Employee,
    TeamLead,
    Manager,
    Admin,
    Root,
}

impl Role {
    pub const ALL: [Role; 5] = [
        Role::Employee,
        Role::TeamLead,
        Role::Manager,
        Role::Admin,
        Role::Root,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Employee => "employee",
            Self::TeamLead => "team_lead",
            Self::Manager => "manager",
            Self::Admin => "admin",
            Self::Root => "root",
        }
    }

    /// Roles allowed to edit the tenant's chat permission matrix.
    pub const fn administers_chat(self) -> bool {
        matches!(self, Self::Admin | Self::Root)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant(pub String);

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown variant '{}'", self.0)
    }
}

impl std::error::Error for UnknownVariant {}

impl FromStr for Role {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|role| role.as_str() == s)
            .ok_or_else(|| UnknownVariant(s.to_string()))
    }
}

// -- Identity --

/// A verified identity handed to the chat core by the authentication layer.
/// Immutable for the lifetime of a connection or request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub role: Role,
    pub username: String,
}

// -- Messages --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Scheduled,
    Delivered,
    Failed,
}

impl DeliveryStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Scheduled => "scheduled",
            Self::Delivered => "delivered",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for DeliveryStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "scheduled" => Ok(Self::Scheduled),
            "delivered" => Ok(Self::Delivered),
            "failed" => Ok(Self::Failed),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

/// When a message should reach its recipients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum DeliveryMode {
    #[default]
    Immediate,
    /// Next occurrence of the configured midday break.
    BreakTime,
    /// Next occurrence of the configured end of the working day.
    AfterWork,
    /// Explicit timestamp, used verbatim.
    At { at: DateTime<Utc> },
}

/// Opaque reference to an already-stored file. The bytes never pass through
/// the chat core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentRef {
    pub file_ref: String,
    pub original_filename: String,
    pub size: u64,
    pub mime_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: Uuid,
    pub message_id: Uuid,
    pub file_ref: String,
    pub original_filename: String,
    pub size: u64,
    pub mime_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub tenant_id: Uuid,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub is_read: bool,
    pub scheduled_delivery: Option<DateTime<Utc>>,
    pub delivery_status: DeliveryStatus,
    pub attachments: Vec<Attachment>,
}

// -- Conversations --

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub is_group: bool,
    pub name: Option<String>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub participant_ids: Vec<Uuid>,
}

// -- Permissions --

/// Result of a permission matrix lookup. The default is fail-closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Grant {
    pub can_send: bool,
    pub can_receive: bool,
}

/// One row of the chat permission matrix. `tenant_id = None` is a global row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatPermission {
    pub tenant_id: Option<Uuid>,
    pub from_role: Role,
    pub to_role: Role,
    pub can_send: bool,
    pub can_receive: bool,
}

impl ChatPermission {
    pub fn grant(&self) -> Grant {
        Grant {
            can_send: self.can_send,
            can_receive: self.can_receive,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceStatus {
    Online,
    Offline,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_parses_its_own_name() {
        for role in Role::ALL {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
        assert!("intern".parse::<Role>().is_err());
    }

    #[test]
    fn delivery_mode_wire_shape() {
        let mode: DeliveryMode = serde_json::from_str(r#"{"mode":"break_time"}"#).unwrap();
        assert_eq!(mode, DeliveryMode::BreakTime);

        let mode: DeliveryMode =
            serde_json::from_str(r#"{"mode":"at","at":"2026-01-05T08:30:00Z"}"#).unwrap();
        match mode {
            DeliveryMode::At { at } => assert_eq!(at.to_rfc3339(), "2026-01-05T08:30:00+00:00"),
            other => panic!("unexpected mode {:?}", other),
        }
    }
}
