//! Prometheus exporter for 3X-UI panel traffic.
//!
//! Traffic arrives two ways: the panel agent pushes deltas to
//! `POST /metric`, and a timer pulls full counters from the panel API.
//! Both feed one [`metrics::MetricStore`], served on `GET /metric`.

pub mod app;
pub mod config;
pub mod handlers;
pub mod ingest;
pub mod logging;
pub mod metrics;
pub mod middleware;
pub mod panel;
pub mod scrape;
pub mod server;

use std::sync::Arc;

/// Shared application state available to every handler via `State<Arc<AppState>>`.
pub struct AppState {
    /// Gauges read by scrapes and written by both ingestion paths.
    pub store: Arc<metrics::MetricStore>,

    /// Hand-off point between push requests and the push consumer.
    pub hub: Arc<ingest::IngestHub>,
}
