use axum::{
    extract::{Request, State},
    http::{HeaderMap, header},
    middleware::Next,
    response::Response,
};

use parley_gateway::ChatError;
use parley_gateway::auth::decode_identity;

use crate::error::ApiError;
use crate::state::AppState;

/// Bearer token from the Authorization header, if any.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

/// Verify the JWT, refresh the caller's directory entry and hand the
/// resulting `Identity` to the handler as an extension.
pub async fn require_auth(State(state): State<AppState>, mut req: Request, next: Next) -> Result<Response, ApiError> {
    let token = bearer_token(req.headers()).ok_or(ChatError::AuthFailure)?;
    let identity = decode_identity(token, &state.jwt_secret)?;

    state.service.touch_identity(&identity).await?;

    req.extensions_mut().insert(identity);
    Ok(next.run(req).await)
}
