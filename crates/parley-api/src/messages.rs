use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use parley_types::api::{MarkReadResponse, SendMessageRequest};
use parley_types::models::Identity;

use crate::error::ApiError;
use crate::state::AppState;

/// Same pipeline as the gateway's `send_message` command. The response is
/// the persisted message; live recipients get `new_message` as usual.
pub async fn send_message(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let message = state
        .service
        .send_message(&identity, conversation_id, req.content, req.attachments, req.delivery)
        .await?;

    Ok((StatusCode::CREATED, Json(message)))
}

pub async fn mark_read(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Extension(identity): Extension<Identity>,
) -> Result<impl IntoResponse, ApiError> {
    let updated = state.service.mark_read(&identity, message_id).await?;
    Ok(Json(MarkReadResponse { message_id, updated }))
}
