pub mod metric;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use tracing::error;

use crate::ingest::HubClosed;
use crate::metrics::StoreError;

// ─── Unified error type ──────────────────────────────────────────

#[derive(Debug)]
pub enum AppError {
    /// The exposition could not be encoded
    Render(String),
    /// Push received while shutting down
    Closed,
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        Self::Render(e.to_string())
    }
}

impl From<HubClosed> for AppError {
    fn from(_: HubClosed) -> Self {
        Self::Closed
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::Render(msg) => {
                error!("metrics render failed: {msg}");
                (StatusCode::INTERNAL_SERVER_ERROR, format!("render: {msg}"))
            }
            Self::Closed => (
                StatusCode::SERVICE_UNAVAILABLE,
                "exporter is shutting down".into(),
            ),
        };

        let body = serde_json::json!({
            "error":  message,
            "status": status.as_u16(),
        });

        (status, Json(body)).into_response()
    }
}
