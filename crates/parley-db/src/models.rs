//! Database row types. These map directly to SQLite rows and are converted to
//! `parley_types` models at the edge so the schema can evolve independently.

use anyhow::{Result, anyhow};
use parley_types::models::{
    Attachment, ChatPermission, Conversation, DeliveryStatus, Message, Role,
};
use uuid::Uuid;

use crate::parse_ts;

fn parse_id(raw: &str, what: &str) -> Result<Uuid> {
    raw.parse()
        .map_err(|e| anyhow!("Corrupt {} '{}': {}", what, raw, e))
}

pub struct UserRow {
    pub id: String,
    pub tenant_id: String,
    pub role: String,
    pub username: String,
}

impl UserRow {
    pub fn user_id(&self) -> Result<Uuid> {
        parse_id(&self.id, "user id")
    }

    pub fn role(&self) -> Result<Role> {
        self.role
            .parse()
            .map_err(|e| anyhow!("Corrupt role on user '{}': {}", self.id, e))
    }
}

pub struct ConversationRow {
    pub id: String,
    pub tenant_id: String,
    pub is_group: bool,
    pub name: Option<String>,
    pub created_by: String,
    pub created_at: String,
}

impl ConversationRow {
    pub fn into_model(self, participant_ids: Vec<Uuid>) -> Result<Conversation> {
        Ok(Conversation {
            id: parse_id(&self.id, "conversation id")?,
            tenant_id: parse_id(&self.tenant_id, "tenant id")?,
            is_group: self.is_group,
            name: self.name,
            created_by: parse_id(&self.created_by, "creator id")?,
            created_at: parse_ts(&self.created_at)?,
            participant_ids,
        })
    }
}

pub struct MessageRow {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub tenant_id: String,
    pub content: String,
    pub created_at: String,
    pub is_read: bool,
    pub scheduled_delivery: Option<String>,
    pub delivery_status: String,
}

impl MessageRow {
    pub fn into_model(self, attachments: Vec<Attachment>) -> Result<Message> {
        let delivery_status: DeliveryStatus = self
            .delivery_status
            .parse()
            .map_err(|e| anyhow!("Corrupt delivery status on message '{}': {}", self.id, e))?;

        Ok(Message {
            id: parse_id(&self.id, "message id")?,
            conversation_id: parse_id(&self.conversation_id, "conversation id")?,
            sender_id: parse_id(&self.sender_id, "sender id")?,
            tenant_id: parse_id(&self.tenant_id, "tenant id")?,
            content: self.content,
            created_at: parse_ts(&self.created_at)?,
            is_read: self.is_read,
            scheduled_delivery: self
                .scheduled_delivery
                .as_deref()
                .map(parse_ts)
                .transpose()?,
            delivery_status,
            attachments,
        })
    }
}

pub struct AttachmentRow {
    pub id: String,
    pub message_id: String,
    pub file_ref: String,
    pub original_filename: String,
    pub size: i64,
    pub mime_type: String,
}

impl AttachmentRow {
    pub fn into_model(self) -> Result<Attachment> {
        Ok(Attachment {
            id: parse_id(&self.id, "attachment id")?,
            message_id: parse_id(&self.message_id, "message id")?,
            file_ref: self.file_ref,
            original_filename: self.original_filename,
            size: u64::try_from(self.size)
                .map_err(|_| anyhow!("Negative size on attachment '{}'", self.id))?,
            mime_type: self.mime_type,
        })
    }
}

pub struct PermissionRow {
    /// Empty for global rows
    pub tenant_id: String,
    pub from_role: String,
    pub to_role: String,
    pub can_send: bool,
    pub can_receive: bool,
}

impl PermissionRow {
    pub fn into_model(self) -> Result<ChatPermission> {
        let tenant_id = if self.tenant_id.is_empty() {
            None
        } else {
            Some(parse_id(&self.tenant_id, "tenant id")?)
        };

        Ok(ChatPermission {
            tenant_id,
            from_role: self
                .from_role
                .parse()
                .map_err(|e| anyhow!("Corrupt permission row: {}", e))?,
            to_role: self
                .to_role
                .parse()
                .map_err(|e| anyhow!("Corrupt permission row: {}", e))?,
            can_send: self.can_send,
            can_receive: self.can_receive,
        })
    }
}

pub struct DeliveryQueueRow {
    pub message_id: String,
    pub recipient_id: String,
    pub status: String,
}
