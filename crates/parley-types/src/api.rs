use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{AttachmentRef, Conversation, DeliveryMode, Identity, Role};

// -- JWT Claims --

/// JWT claims shared by the REST middleware and the WebSocket gateway.
/// Tokens are minted by the platform's auth service; this crate only reads them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub tenant_id: Uuid,
    pub role: Role,
    pub username: String,
    pub exp: usize,
}

impl From<Claims> for Identity {
    fn from(claims: Claims) -> Self {
        Identity {
            user_id: claims.sub,
            tenant_id: claims.tenant_id,
            role: claims.role,
            username: claims.username,
        }
    }
}

// -- Conversations --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateConversationRequest {
    pub participant_ids: Vec<Uuid>,
    pub name: Option<String>,
    #[serde(default)]
    pub is_group: bool,
}

#[derive(Debug, Serialize)]
pub struct ConversationSummary {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub unread_count: u64,
}

// -- Messages --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    pub content: String,
    #[serde(default)]
    pub attachments: Vec<AttachmentRef>,
    #[serde(default)]
    pub delivery: DeliveryMode,
}

#[derive(Debug, Serialize)]
pub struct MarkReadResponse {
    pub message_id: Uuid,
    /// false when the message had already been read
    pub updated: bool,
}

// -- Permissions --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SetPermissionRequest {
    pub from_role: Role,
    pub to_role: Role,
    pub can_send: bool,
    pub can_receive: bool,
}

// -- Errors --

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}
