mod config;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Query, State, WebSocketUpgrade},
    http::HeaderMap,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use parley_api::error::ApiError;
use parley_api::middleware::bearer_token;
use parley_api::state::{AppState, AppStateInner};
use parley_db::Database;
use parley_gateway::auth::decode_identity;
use parley_gateway::{ChatService, connection, heartbeat, sweeper};

use crate::config::ServerConfig;

#[derive(Debug, Deserialize)]
struct GatewayQuery {
    token: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parley=debug,parley_gateway=debug,tower_http=debug".into()),
        )
        .init();

    let config = ServerConfig::from_env()?;

    let db = Arc::new(Database::open(&config.db_path)?);
    let service = ChatService::new(db, config.chat.clone())?;

    let shutdown = CancellationToken::new();
    tokio::spawn(sweeper::run_sweeper_loop(
        service.clone(),
        config.chat.sweep_interval,
        shutdown.clone(),
    ));
    tokio::spawn(heartbeat::run_heartbeat_loop(
        service.clone(),
        config.chat.heartbeat_interval,
        shutdown.clone(),
    ));

    let state: AppState = Arc::new(AppStateInner {
        service,
        jwt_secret: config.jwt_secret.clone(),
    });

    let open_routes = Router::new()
        .route("/health", get(health))
        .route("/gateway", get(ws_upgrade))
        .with_state(state.clone());

    let app = Router::new()
        .merge(open_routes)
        .merge(parley_api::routes(state))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Parley chat server listening on {}", addr);
    info!(
        "Delivery windows: break_time {} / after_work {} (UTC{})",
        config.chat.break_time, config.chat.after_work, config.chat.utc_offset
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    shutdown.cancel();
    Ok(())
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "connections": state.service.registry().len().await,
    }))
}

/// A token in the query string or Authorization header authenticates the
/// socket before the upgrade; without one the client must `identify`.
async fn ws_upgrade(
    State(state): State<AppState>,
    Query(query): Query<GatewayQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let token = query
        .token
        .or_else(|| bearer_token(&headers).map(str::to_string));

    let service = state.service.clone();
    match token {
        Some(token) => match decode_identity(&token, &state.jwt_secret) {
            Ok(identity) => ws
                .on_upgrade(move |socket| connection::handle_connection_authenticated(socket, service, identity))
                .into_response(),
            Err(err) => {
                warn!("Rejected gateway upgrade: {}", err);
                ApiError(err).into_response()
            }
        },
        None => {
            let secret = state.jwt_secret.clone();
            ws.on_upgrade(move |socket| connection::handle_connection(socket, service, secret))
                .into_response()
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                warn!("SIGTERM handler unavailable ({}), waiting for Ctrl+C", e);
                ctrl_c.await.ok();
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
