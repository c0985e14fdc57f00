use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use parley_types::api::CreateConversationRequest;
use parley_types::models::Identity;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<u32>,
    /// Cursor: `created_at` of the oldest message of the previous page.
    pub before: Option<DateTime<Utc>>,
}

pub async fn create_conversation(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<CreateConversationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let conversation = state
        .service
        .create_conversation(&identity, req.participant_ids, req.name, req.is_group)
        .await?;

    Ok((StatusCode::CREATED, Json(conversation)))
}

pub async fn list_conversations(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> Result<impl IntoResponse, ApiError> {
    let summaries = state.service.list_conversations(&identity).await?;
    Ok(Json(summaries))
}

pub async fn get_messages(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Query(query): Query<HistoryQuery>,
    Extension(identity): Extension<Identity>,
) -> Result<impl IntoResponse, ApiError> {
    let messages = state
        .service
        .conversation_history(&identity, conversation_id, query.limit, query.before)
        .await?;

    Ok(Json(messages))
}
