//! HTTP路由：WebSocket升级入口与健康检查

use std::sync::Arc;

use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;

use crate::connection_manager::ConnectionManager;
use crate::handler::MessageHandler;

#[derive(Clone)]
pub struct AppState {
    pub handler: Arc<MessageHandler>,
    pub manager: Arc<ConnectionManager>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_upgrade))
        .route("/health", get(health))
        .with_state(state)
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    let handler = Arc::clone(&state.handler);
    ws.on_upgrade(move |socket| handler.handle_socket(socket))
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "active_connections": state.manager.get_active_count().await,
        "total_queries": state.handler.total_queries(),
    }))
}
