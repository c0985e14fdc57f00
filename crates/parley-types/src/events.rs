use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{AttachmentRef, DeliveryMode, Message, PresenceStatus};

/// Events sent over the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum GatewayEvent {
    /// Server confirms successful authentication
    ConnectionEstablished {
        user_id: Uuid,
        tenant_id: Uuid,
        /// Co-participants that were already online when this connection registered
        online_user_ids: Vec<Uuid>,
    },

    /// A message reached this recipient
    NewMessage { message: Message },

    /// Ack to the sender once the message is persisted
    MessageSent {
        message: Message,
        scheduled_delivery: Option<DateTime<Utc>>,
    },

    /// A recipient read one of this user's messages
    MessageRead {
        message_id: Uuid,
        conversation_id: Uuid,
        reader_id: Uuid,
        read_at: DateTime<Utc>,
    },

    UserTyping {
        conversation_id: Uuid,
        user_id: Uuid,
        username: String,
    },

    UserStoppedTyping {
        conversation_id: Uuid,
        user_id: Uuid,
    },

    /// A user sharing a conversation came online or went offline
    UserStatusChanged {
        user_id: Uuid,
        status: PresenceStatus,
    },

    /// One of this user's scheduled messages was released to its recipients
    ScheduledMessageDelivered {
        message_id: Uuid,
        conversation_id: Uuid,
        delivered_at: DateTime<Utc>,
    },

    Error { code: String, message: String },
}

impl GatewayEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ConnectionEstablished { .. } => "connection_established",
            Self::NewMessage { .. } => "new_message",
            Self::MessageSent { .. } => "message_sent",
            Self::MessageRead { .. } => "message_read",
            Self::UserTyping { .. } => "user_typing",
            Self::UserStoppedTyping { .. } => "user_stopped_typing",
            Self::UserStatusChanged { .. } => "user_status_changed",
            Self::ScheduledMessageDelivered { .. } => "scheduled_message_delivered",
            Self::Error { .. } => "error",
        }
    }
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum GatewayCommand {
    /// Authenticate a connection that did not present a token at upgrade
    Identify { token: String },

    SendMessage {
        conversation_id: Uuid,
        content: String,
        #[serde(default)]
        attachments: Vec<AttachmentRef>,
        #[serde(default)]
        delivery: DeliveryMode,
    },

    MarkRead { message_id: Uuid },

    TypingStart { conversation_id: Uuid },

    TypingStop { conversation_id: Uuid },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_are_tagged_in_snake_case() {
        let event = GatewayEvent::UserStatusChanged {
            user_id: Uuid::nil(),
            status: PresenceStatus::Offline,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "user_status_changed");
        assert_eq!(json["data"]["status"], "offline");
        assert_eq!(event.kind(), "user_status_changed");
    }

    #[test]
    fn send_command_defaults_to_immediate_delivery() {
        let raw = r#"{"type":"send_message","data":{"conversation_id":"00000000-0000-0000-0000-000000000001","content":"hi"}}"#;
        match serde_json::from_str::<GatewayCommand>(raw).unwrap() {
            GatewayCommand::SendMessage {
                delivery,
                attachments,
                ..
            } => {
                assert_eq!(delivery, DeliveryMode::Immediate);
                assert!(attachments.is_empty());
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
