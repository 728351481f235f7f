use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::{header, Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::models::{Envelope, Inbound, Online};
use super::PanelError;

// ─── Configuration ───────────────────────────────────────────────

pub const DEFAULT_COOKIE_NAME: &str = "3x-ui";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_SESSION_LIFETIME: Duration = Duration::from_secs(3600);

/// Connection settings for [`SessionClient`].
#[derive(Debug, Clone)]
pub struct PanelOptions {
    /// Panel root, e.g. `https://panel.example.com:2053`
    pub url: String,
    /// Optional secret sub-path placed between `url` and every API path
    pub base: String,
    pub login: String,
    pub password: String,
    /// Name of the cookie carrying the session
    pub cookie_name: String,
    /// PEM root certificate; without it certificate checks are skipped
    pub ca_file: Option<PathBuf>,
    /// Upper bound for each HTTP round-trip (login included)
    pub request_timeout: Duration,
    /// Validity assumed for a cookie that carries neither Max-Age nor Expires
    pub session_lifetime: Duration,
}

impl PanelOptions {
    pub fn new(url: impl Into<String>, login: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            base: String::new(),
            login: login.into(),
            password: password.into(),
            cookie_name: DEFAULT_COOKIE_NAME.into(),
            ca_file: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            session_lifetime: DEFAULT_SESSION_LIFETIME,
        }
    }
}

// ─── Session ─────────────────────────────────────────────────────

/// An authenticated panel session. Never mutated: a new login
/// produces a new value that replaces the old one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    cookie: String,
    expires_at: DateTime<Utc>,
}

impl Session {
    pub fn new(name: &str, value: &str, expires_at: DateTime<Utc>) -> Self {
        Self {
            cookie: format!("{name}={value}"),
            expires_at,
        }
    }

    /// A session may be used only while its expiry is strictly in the future.
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Value for the `Cookie` request header.
    pub fn cookie_header(&self) -> &str {
        &self.cookie
    }
}

// ─── SessionClient ───────────────────────────────────────────────

/// Panel API client owning a single reusable session.
///
/// The session slot is guarded by an async mutex that also covers the
/// login round-trip, so callers that discover an expired session at the
/// same time queue behind one login instead of each starting their own.
pub struct SessionClient {
    base: Url,
    login: String,
    password: String,
    cookie_name: String,
    session_lifetime: chrono::Duration,
    http: reqwest::Client,
    session: Mutex<Option<Arc<Session>>>,
}

impl SessionClient {
    pub fn new(opts: PanelOptions) -> Result<Self, PanelError> {
        let base = panel_url(&opts.url, &opts.base)?;

        let mut builder = reqwest::Client::builder().timeout(opts.request_timeout);
        builder = match &opts.ca_file {
            Some(path) => {
                let pem = std::fs::read(path)
                    .map_err(|e| PanelError::Tls(format!("{}: {e}", path.display())))?;
                let cert = reqwest::Certificate::from_pem(&pem)
                    .map_err(|e| PanelError::Tls(format!("{}: {e}", path.display())))?;
                builder.add_root_certificate(cert)
            }
            None => {
                if base.scheme() == "https" {
                    warn!("no CA file given, panel certificate will not be verified");
                }
                builder.danger_accept_invalid_certs(true)
            }
        };
        let http = builder.build()?;

        let session_lifetime = chrono::Duration::from_std(opts.session_lifetime)
            .unwrap_or_else(|_| chrono::Duration::hours(1));

        Ok(Self {
            base,
            login: opts.login,
            password: opts.password,
            cookie_name: opts.cookie_name,
            session_lifetime,
            http,
            session: Mutex::new(None),
        })
    }

    /// Log in unconditionally and store the resulting session.
    pub async fn authenticate(&self) -> Result<Arc<Session>, PanelError> {
        let mut slot = self.session.lock().await;
        self.login_into(&mut slot).await
    }

    /// Fetch every inbound together with its client counters.
    pub async fn fetch_inbounds(&self) -> Result<Vec<Inbound>, PanelError> {
        self.call(Method::GET, &["panel", "api", "inbounds", "list"])
            .await
    }

    /// Fetch the emails of the clients connected right now.
    pub async fn fetch_onlines(&self) -> Result<Online, PanelError> {
        self.call(Method::POST, &["panel", "api", "inbounds", "onlines"])
            .await
    }

    /// Current session if it is still usable, otherwise a fresh one.
    async fn session(&self) -> Result<Arc<Session>, PanelError> {
        let mut slot = self.session.lock().await;

        if let Some(session) = slot.as_ref() {
            if session.is_usable(Utc::now()) {
                return Ok(Arc::clone(session));
            }
            debug!(expired_at = %session.expires_at(), "panel session expired");
        }

        self.login_into(&mut slot).await
    }

    async fn login_into(
        &self,
        slot: &mut Option<Arc<Session>>,
    ) -> Result<Arc<Session>, PanelError> {
        debug!(user = %self.login, "logging in to panel");

        let response = self
            .http
            .post(self.endpoint(&["login"]))
            .form(&[("username", &self.login), ("password", &self.password)])
            .send()
            .await?;

        let status = response.status();
        let now = Utc::now();
        let session = response
            .cookies()
            .find(|c| c.name() == self.cookie_name)
            .map(|c| {
                // Max-Age wins over Expires, as in RFC 6265.
                let expires_at = c
                    .max_age()
                    .and_then(|age| chrono::Duration::from_std(age).ok())
                    .and_then(|age| now.checked_add_signed(age))
                    .or_else(|| c.expires().map(DateTime::<Utc>::from))
                    .or_else(|| now.checked_add_signed(self.session_lifetime))
                    .unwrap_or(now);
                Session::new(c.name(), c.value(), expires_at)
            });
        let body = response.text().await?;

        if status != StatusCode::OK {
            return Err(PanelError::Auth(body));
        }

        let Some(session) = session else {
            // The panel answers 200 with `success: false` on bad credentials.
            let message = serde_json::from_str::<Envelope<serde_json::Value>>(&body)
                .ok()
                .filter(|env| !env.success && !env.message.is_empty())
                .map(|env| env.message)
                .unwrap_or_else(|| format!("cookie '{}' was not set", self.cookie_name));
            return Err(PanelError::Auth(message));
        };

        info!(expires_at = %session.expires_at(), "panel session established");

        let session = Arc::new(session);
        *slot = Some(Arc::clone(&session));
        Ok(session)
    }

    async fn call<T>(&self, method: Method, path: &[&str]) -> Result<T, PanelError>
    where
        T: DeserializeOwned + Default,
    {
        let session = self.session().await?;

        let response = self
            .http
            .request(method, self.endpoint(path))
            .header(header::COOKIE, session.cookie_header())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(PanelError::RemoteStatus(status.as_u16()));
        }

        let body = response.bytes().await?;
        let envelope: Envelope<T> = serde_json::from_slice(&body)?;
        envelope.into_result()
    }

    fn endpoint(&self, path: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().extend(path);
        }
        url
    }
}

/// Parse the panel root and append the optional sub-path.
fn panel_url(url: &str, base: &str) -> Result<Url, PanelError> {
    let mut parsed =
        Url::parse(url).map_err(|e| PanelError::InvalidUrl(format!("{url}: {e}")))?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(PanelError::InvalidUrl(format!(
            "{url}: scheme must be http or https"
        )));
    }

    parsed
        .path_segments_mut()
        .map_err(|_| PanelError::InvalidUrl(format!("{url}: cannot be a base")))?
        .pop_if_empty()
        .extend(base.split('/').filter(|s| !s.is_empty()));

    Ok(parsed)
}
