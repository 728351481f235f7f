use axum::{
    body::Bytes,
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
};
use std::sync::Arc;

use crate::AppState;

use super::AppError;

// ─── GET /metric ─────────────────────────────────────────────────
/// Prometheus exposition of everything the store holds right now.
pub async fn scrape(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, AppError> {
    let body = state.store.render_scrape()?;
    Ok((
        [(header::CONTENT_TYPE, state.store.content_type())],
        body,
    ))
}

// ─── POST /metric ────────────────────────────────────────────────
/// Traffic push from the panel agent. Answers 204 once the consumer has
/// taken the payload, whether or not it decoded.
pub async fn push(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<StatusCode, AppError> {
    state.hub.accept(&body).await?;
    Ok(StatusCode::NO_CONTENT)
}
