use thiserror::Error;

use parley_types::events::GatewayEvent;

/// Failures of a chat operation. Every variant rejects only the operation at
/// hand; the connection that issued it stays open (except `AuthFailure`,
/// which is only produced at connect time).
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("authentication failed")]
    AuthFailure,

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("not a participant of this conversation")]
    NotAParticipant,

    #[error("conversation or message not found")]
    NotFound,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The store was unavailable. Nothing was sent; the client may retry.
    #[error("storage error: {0}")]
    Persistence(#[from] anyhow::Error),
}

impl ChatError {
    pub const fn code(&self) -> &'static str {
        match self {
            Self::AuthFailure => "AUTH_FAILED",
            Self::PermissionDenied(_) => "PERMISSION_DENIED",
            // Existence must not leak across tenants.
            Self::NotAParticipant | Self::NotFound => "NOT_FOUND",
            Self::InvalidRequest(_) => "INVALID_REQUEST",
            Self::Persistence(_) => "STORAGE_UNAVAILABLE",
        }
    }

    /// Message safe to show to the client.
    pub fn client_message(&self) -> String {
        match self {
            Self::NotAParticipant | Self::NotFound => Self::NotFound.to_string(),
            Self::Persistence(_) => "message store unavailable, please retry".to_string(),
            other => other.to_string(),
        }
    }

    pub const fn retryable(&self) -> bool {
        matches!(self, Self::Persistence(_))
    }

    /// The `error` event sent back to the connection that issued the command.
    pub fn to_event(&self) -> GatewayEvent {
        GatewayEvent::Error {
            code: self.code().to_string(),
            message: self.client_message(),
        }
    }
}
