//! Router-level fixtures: an in-memory service behind the real routes and
//! middleware, plus token minting.

use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode, header},
};
use http_body_util::BodyExt;
use jsonwebtoken::{EncodingKey, Header, encode};
use serde_json::Value;
use tower::ServiceExt;
use uuid::Uuid;

use parley_db::Database;
use parley_gateway::{ChatConfig, ChatService};
use parley_types::api::Claims;
use parley_types::models::{Identity, Role};

use crate::routes;
use crate::state::{AppState, AppStateInner};

const SECRET: &str = "router-test-secret";

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub tenant_id: Uuid,
}

pub struct TestUser {
    pub identity: Identity,
    pub token: String,
}

impl TestApp {
    pub fn new() -> Self {
        let db = Database::open_in_memory().expect("in-memory database");
        let service = ChatService::new(Arc::new(db), ChatConfig::default()).expect("service");
        let state = Arc::new(AppStateInner {
            service,
            jwt_secret: SECRET.to_string(),
        });
        Self {
            router: routes(state.clone()),
            state,
            tenant_id: Uuid::new_v4(),
        }
    }

    /// A user known to the directory, with a valid token.
    pub async fn user(&self, role: Role, username: &str) -> TestUser {
        let identity = Identity {
            user_id: Uuid::new_v4(),
            tenant_id: self.tenant_id,
            role,
            username: username.to_string(),
        };
        self.state
            .service
            .touch_identity(&identity)
            .await
            .expect("touch identity");

        let claims = Claims {
            sub: identity.user_id,
            tenant_id: identity.tenant_id,
            role,
            username: identity.username.clone(),
            exp: (chrono::Utc::now().timestamp() + 3600) as usize,
        };
        let token = encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET.as_bytes()))
            .expect("encode token");
        TestUser { identity, token }
    }

    pub async fn call(&self, method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("request");

        let response = self.router.clone().oneshot(request).await.expect("response");
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("body")
            .to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }
}
