use axum::{
    extract::{ConnectInfo, Request},
    middleware::Next,
    response::Response,
};
use std::net::SocketAddr;
use std::time::Instant;
use tracing::debug;

/// Logs every request with the caller's address and adds a
/// `Server-Timing` header carrying the handler wall time.
///
/// The caller is taken from `X-Real-IP` when a reverse proxy sets it,
/// otherwise from the socket peer.
pub async fn timing_middleware(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_owned();
    let caller = caller_addr(&req);

    let start = Instant::now();
    let mut response = next.run(req).await;
    let elapsed = start.elapsed();

    let server_timing =
        format!("total;dur={:.3}", elapsed.as_secs_f64() * 1000.0);
    if let Ok(val) = server_timing.parse() {
        response.headers_mut().insert("Server-Timing", val);
    }

    debug!(
        %method,
        %path,
        status = response.status().as_u16(),
        elapsed_us = elapsed.as_micros() as u64,
        %caller,
        "request served"
    );

    response
}

fn caller_addr(req: &Request) -> String {
    if let Some(ip) = req
        .headers()
        .get("X-Real-IP")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
    {
        return ip.to_owned();
    }

    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_else(|| "unknown".into())
}
