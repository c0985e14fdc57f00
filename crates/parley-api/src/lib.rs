use axum::{
    Router,
    middleware::from_fn_with_state,
    routing::{get, post, put},
};

use crate::middleware::require_auth;
use crate::state::AppState;

pub mod conversations;
pub mod error;
pub mod messages;
pub mod middleware;
pub mod permissions;
pub mod state;

#[cfg(test)]
mod testing;

/// The authenticated REST surface of the chat core.
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route(
            "/conversations",
            post(conversations::create_conversation).get(conversations::list_conversations),
        )
        .route(
            "/conversations/{conversation_id}/messages",
            get(conversations::get_messages).post(messages::send_message),
        )
        .route("/messages/{message_id}/read", post(messages::mark_read))
        .route("/permissions", put(permissions::set_permission))
        .layer(from_fn_with_state(state.clone(), require_auth))
        .with_state(state)
}
