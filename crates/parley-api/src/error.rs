use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use parley_gateway::ChatError;
use parley_types::api::ErrorBody;

/// A `ChatError` on its way out of a REST handler.
#[derive(Debug)]
pub struct ApiError(pub ChatError);

impl From<ChatError> for ApiError {
    fn from(err: ChatError) -> Self {
        Self(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self.0 {
            ChatError::AuthFailure => StatusCode::UNAUTHORIZED,
            ChatError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            ChatError::NotAParticipant | ChatError::NotFound => StatusCode::NOT_FOUND,
            ChatError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ChatError::Persistence(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            code: self.0.code().to_string(),
            message: self.0.client_message(),
        };
        (self.status(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn foreign_and_missing_map_to_the_same_status() {
        assert_eq!(ApiError(ChatError::NotFound).status(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError(ChatError::NotAParticipant).status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn storage_outage_is_reported_as_unavailable() {
        let err = ApiError(ChatError::Persistence(anyhow::anyhow!("database is locked")));
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
