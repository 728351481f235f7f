//! In-process stand-in for the 3X-UI panel API.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Form, Json, Router,
};
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

pub const LOGIN: &str = "admin";
pub const PASSWORD: &str = "secret";

pub struct PanelState {
    pub logins: AtomicUsize,
    pub lists: AtomicUsize,
    pub onlines: AtomicUsize,
    /// Seconds from now written into the cookie's Expires attribute
    pub cookie_ttl_secs: Mutex<Option<i64>>,
    /// Max-Age attribute of the cookie
    pub cookie_max_age: Mutex<Option<i64>>,
    pub login_status: Mutex<StatusCode>,
    pub login_delay: Mutex<Duration>,
    pub list_status: Mutex<StatusCode>,
    pub list_body: Mutex<Value>,
    pub online_body: Mutex<Value>,
}

pub struct MockPanel {
    pub addr: SocketAddr,
    pub state: Arc<PanelState>,
    handle: JoinHandle<()>,
}

impl MockPanel {
    pub async fn start() -> Self {
        let state = Arc::new(PanelState {
            logins: AtomicUsize::new(0),
            lists: AtomicUsize::new(0),
            onlines: AtomicUsize::new(0),
            cookie_ttl_secs: Mutex::new(Some(3600)),
            cookie_max_age: Mutex::new(None),
            login_status: Mutex::new(StatusCode::OK),
            login_delay: Mutex::new(Duration::ZERO),
            list_status: Mutex::new(StatusCode::OK),
            list_body: Mutex::new(inbound_list(&[("edge", "vless", "inbound-443", vec![("a@x", 100, 50)])])),
            online_body: Mutex::new(json!({"success": true, "msg": "", "obj": ["a@x"]})),
        });

        let app = Router::new()
            .route("/login", post(login))
            .route("/panel/api/inbounds/list", get(list))
            .route("/panel/api/inbounds/onlines", post(onlines))
            .with_state(Arc::clone(&state));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            state,
            handle,
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn logins(&self) -> usize {
        self.state.logins.load(Ordering::SeqCst)
    }

    pub fn lists(&self) -> usize {
        self.state.lists.load(Ordering::SeqCst)
    }

    pub fn set_cookie_ttl(&self, secs: i64) {
        *self.state.cookie_ttl_secs.lock() = Some(secs);
    }

    pub fn set_cookie_max_age(&self, secs: i64) {
        *self.state.cookie_max_age.lock() = Some(secs);
    }

    /// Session cookie without Max-Age or Expires.
    pub fn set_cookie_without_expiry(&self) {
        *self.state.cookie_ttl_secs.lock() = None;
        *self.state.cookie_max_age.lock() = None;
    }

    pub fn set_list(&self, status: StatusCode, body: Value) {
        *self.state.list_status.lock() = status;
        *self.state.list_body.lock() = body;
    }
}

impl Drop for MockPanel {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// `{success, msg, obj}` listing of inbounds, each with its client stats.
pub fn inbound_list(inbounds: &[(&str, &str, &str, Vec<(&str, i64, i64)>)]) -> Value {
    let obj: Vec<Value> = inbounds
        .iter()
        .enumerate()
        .map(|(i, (remark, protocol, tag, clients))| {
            let stats: Vec<Value> = clients
                .iter()
                .map(|(email, up, down)| {
                    json!({
                        "id": 1, "inboundId": i + 1, "enable": true, "email": email,
                        "up": up, "down": down, "expiryTime": 0, "total": 0, "reset": 0
                    })
                })
                .collect();
            json!({
                "id": i + 1, "up": 0, "down": 0, "total": 0, "remark": remark,
                "enable": true, "expiryTime": 0, "clientStats": stats,
                "listen": "", "port": 443, "protocol": protocol, "settings": "{}",
                "streamSettings": "{}", "tag": tag, "sniffing": "{}"
            })
        })
        .collect();

    json!({"success": true, "msg": "", "obj": obj})
}

async fn login(
    State(state): State<Arc<PanelState>>,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    let status = *state.login_status.lock();
    if status != StatusCode::OK {
        return (status, "login backend unavailable").into_response();
    }

    if form.get("username").map(String::as_str) != Some(LOGIN)
        || form.get("password").map(String::as_str) != Some(PASSWORD)
    {
        return Json(json!({"success": false, "msg": "wrong username or password", "obj": null}))
            .into_response();
    }

    let delay = *state.login_delay.lock();
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    let n = state.logins.fetch_add(1, Ordering::SeqCst) + 1;
    let mut cookie = format!("3x-ui=session-{n}; Path=/");
    if let Some(age) = *state.cookie_max_age.lock() {
        cookie.push_str(&format!("; Max-Age={age}"));
    }
    if let Some(ttl) = *state.cookie_ttl_secs.lock() {
        let expires = Utc::now() + chrono::Duration::seconds(ttl);
        cookie.push_str(&format!(
            "; Expires={}",
            expires.format("%a, %d %b %Y %H:%M:%S GMT")
        ));
    }
    cookie.push_str("; HttpOnly");

    (
        [(header::SET_COOKIE, cookie)],
        Json(json!({"success": true, "msg": "Login Successfully", "obj": null})),
    )
        .into_response()
}

fn authorised(headers: &HeaderMap) -> bool {
    headers
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("3x-ui=session-"))
}

async fn list(State(state): State<Arc<PanelState>>, headers: HeaderMap) -> Response {
    if !authorised(&headers) {
        return StatusCode::NOT_FOUND.into_response();
    }
    state.lists.fetch_add(1, Ordering::SeqCst);

    let status = *state.list_status.lock();
    let body = state.list_body.lock().clone();
    (status, Json(body)).into_response()
}

async fn onlines(State(state): State<Arc<PanelState>>, headers: HeaderMap) -> Response {
    if !authorised(&headers) {
        return StatusCode::NOT_FOUND.into_response();
    }
    state.onlines.fetch_add(1, Ordering::SeqCst);
    Json(state.online_body.lock().clone()).into_response()
}
