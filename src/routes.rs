use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};

use crate::handlers;
use crate::security::middleware::{
    client_context_middleware, ip_gate_middleware, rate_limit_middleware,
};
use crate::state::AppState;

pub fn create_router(state: AppState) -> Router {
    // Gate order on the request path is fixed: context extraction, then the
    // rate limiter, then the IP gate; velocity and risk run inside the
    // checkout handler once the body is available.
    let public = Router::new()
        .route("/api/checkout", post(handlers::checkout))
        .layer(middleware::from_fn_with_state(state.clone(), ip_gate_middleware))
        .layer(middleware::from_fn_with_state(state.clone(), rate_limit_middleware))
        .layer(middleware::from_fn(client_context_middleware));

    // Operator tooling sits outside the abuse gates
    let admin = Router::new()
        .route("/admin/blacklist", post(handlers::blacklist_add))
        .route("/admin/blacklist", get(handlers::blacklist_list))
        .route("/admin/blacklist/history", get(handlers::blacklist_history))
        .route("/admin/blacklist/cleanup", post(handlers::blacklist_cleanup))
        .route("/admin/blacklist/:identifier", delete(handlers::blacklist_remove))
        .route("/admin/review", get(handlers::review_list))
        .route("/admin/review/history", get(handlers::review_history))
        .route("/admin/review/cleanup", post(handlers::review_cleanup))
        .route("/admin/review/:entry_id", post(handlers::review_decide));

    Router::new()
        .merge(public)
        .merge(admin)
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::metrics_export))
        .with_state(state)
}
