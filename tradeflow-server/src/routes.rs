use axum::{
    Router, middleware,
    routing::{get, post},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{auth, run_handlers, state::AppState};

/// Assemble the service router. Every run operation sits behind the
/// access gate; only the health probe is public.
pub fn create_router(state: AppState) -> Router {
    let gated = Router::new()
        .route(
            "/runs",
            post(run_handlers::create_run_handler).get(run_handlers::list_runs_handler),
        )
        .route("/runs/{id}", get(run_handlers::get_run_handler))
        .route("/runs/{id}/stream", get(run_handlers::stream_run_handler))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_token,
        ));

    Router::new()
        .route("/health", get(run_handlers::health_handler))
        .merge(gated)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
