//! HTTP gateway: routing, middleware wiring and the server loop.

pub mod error;
pub mod handlers;
pub mod openapi;
pub mod state;
pub mod types;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;

use crate::auth::auth_middleware;
use state::AppState;

/// Assemble the full application router.
pub fn router(state: Arc<AppState>) -> Router {
    // Token-guarded user operations.
    let protected = Router::new()
        .route(
            "/orders",
            post(handlers::submit_order).get(handlers::list_orders),
        )
        .route("/balance", get(handlers::balance))
        .route("/balance/withdraw", post(handlers::withdraw))
        .route("/withdrawals", get(handlers::list_withdrawals))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state.auth),
            auth_middleware,
        ));

    let public = Router::new()
        .route("/register", post(handlers::register))
        .route("/login", post(handlers::login));

    Router::new()
        .nest("/api/user", public.merge(protected))
        .route("/ping", get(handlers::ping))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until the shutdown flag flips; in-flight requests are allowed to
/// finish.
pub async fn run_server(
    listener: TcpListener,
    state: Arc<AppState>,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    let app = router(state);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            while !*shutdown.borrow() {
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
        })
        .await
}
