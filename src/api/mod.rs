use crate::api::handlers::AppState;
use crate::websocket;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub mod handlers;

pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Vault operations
        .route("/vault/withdraw", post(handlers::withdraw))
        .route("/vault/emergency-stop", post(handlers::emergency_stop))
        .route("/vault/agent-trade", post(handlers::agent_trade))
        .route("/vault/state/:address", get(handlers::get_vault_state))
        // Operation notifications
        .route("/ws", get(websocket::ws_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
