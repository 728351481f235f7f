use axum::{extract::DefaultBodyLimit, middleware as axum_mw, routing::get, Router};
use std::sync::Arc;

use crate::handlers;
use crate::middleware::timing;
use crate::AppState;

/// Builds the exporter's `Router`: scrape and push share one path.
///
/// Push bodies grow with the panel's client count, so `/metric` carries no
/// body size cap.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(
            "/metric",
            get(handlers::metric::scrape)
                .post(handlers::metric::push)
                .layer(DefaultBodyLimit::disable()),
        )
        .with_state(state)
        .layer(axum_mw::from_fn(timing::timing_middleware))
}
