//! querysync server: a reactive query/subscription broker.
//!
//! Clients declare queries over a persistent WebSocket connection and receive
//! pushed, live-updating results whenever a write touches the underlying
//! collection. The live-query cache owns deduplication and recompute-on-
//! mutation; the connection registry resolves pushes to open sockets; the
//! auth/validation gate sits in front of both.

use axum::routing::get;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub mod auth;
pub mod cache;
pub mod config;
pub mod registry;
pub mod state;
pub mod store;
pub mod ws;

use state::AppState;

/// Build the router: a single WebSocket endpoint plus the usual layers.
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/ws", get(ws::ws_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
