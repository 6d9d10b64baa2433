//! brainTrace graph view server.
//!
//! Serves the detached graph window and its data, and relays sync messages
//! between windows. The application is organized into the following modules:
//!
//! - `normalize`: backend payloads into one graph shape
//! - `controller`: render state, highlights, camera and timelapse
//! - `sync` / `window`: cross-window mailbox and per-window session state
//! - `handlers` / `templates`: HTTP surface

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use braintrace_graph::{handlers, AppState, Config};

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "braintrace_graph=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    let bind = config.bind.clone();
    let state = Arc::new(AppState::new(config).expect("Failed to initialize application state"));

    let app = Router::new()
        .route("/graph-view", get(handlers::graph_view))
        .route("/api/graph/{brain_id}", get(handlers::graph_api))
        .route("/api/prefs/dark-mode", post(handlers::set_dark_mode))
        .route("/api/window/{brain_id}/{origin}/search", post(handlers::window_search))
        .route("/api/window/{brain_id}/{origin}/clear", post(handlers::window_clear))
        .route("/api/window/{brain_id}/{origin}/refresh", post(handlers::window_refresh))
        .route("/api/window/{brain_id}/{origin}/key", post(handlers::window_key))
        .route("/api/window/{brain_id}/{origin}/message", post(handlers::window_message))
        .route("/api/window/{brain_id}/{origin}/positions", post(handlers::window_positions))
        .route("/api/window/{brain_id}/{origin}/click", post(handlers::window_click))
        .route("/api/window/{brain_id}/{origin}/drag", post(handlers::window_drag))
        .route("/api/window/{brain_id}/{origin}/drag-end", post(handlers::window_drag_end))
        .route(
            "/api/window/{brain_id}/{origin}/timelapse",
            get(handlers::timelapse_frame).post(handlers::timelapse_start),
        )
        .route("/sync/{brain_id}/ws", get(handlers::sync_ws))
        .layer(TraceLayer::new_for_http())
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .unwrap_or_else(|e| panic!("Failed to bind to {}: {}", bind, e));

    tracing::info!(
        bind = %bind,
        backend = %state.config.backend_url,
        sync_db = %state.config.sync_db.display(),
        "graph view server running"
    );

    axum::serve(listener, app).await.expect("Server error");
}
