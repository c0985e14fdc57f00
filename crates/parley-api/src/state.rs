use std::sync::Arc;

use parley_gateway::ChatService;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub service: ChatService,
    pub jwt_secret: String,
}
