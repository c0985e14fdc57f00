use axum::{Extension, Json, extract::State, response::IntoResponse};

use parley_types::api::SetPermissionRequest;
use parley_types::models::{Grant, Identity};

use crate::error::ApiError;
use crate::state::AppState;

/// Tenant administrators override one cell of their tenant's matrix.
pub async fn set_permission(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<SetPermissionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let grant = Grant {
        can_send: req.can_send,
        can_receive: req.can_receive,
    };
    let rule = state
        .service
        .set_permission(&identity, req.from_role, req.to_role, grant)
        .await?;

    Ok(Json(rule))
}
