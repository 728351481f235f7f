//! Command-line and environment configuration.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;

use crate::panel::client::DEFAULT_COOKIE_NAME;
use crate::panel::PanelOptions;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid listen address '{0}': {1}")]
    Listen(String, std::net::AddrParseError),

    #[error("--url must be an http(s) URL, got '{0}'")]
    Url(String),

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("--certfile and --keyfile must be given together")]
    TlsPair,
}

/// 3X-UI traffic exporter
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Address the metrics server listens on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:4500")]
    pub listen: String,

    /// PEM certificate for serving the metrics endpoint over HTTPS
    #[arg(long, env = "CERT")]
    pub certfile: Option<PathBuf>,

    /// PEM private key matching --certfile
    #[arg(long, env = "KEY")]
    pub keyfile: Option<PathBuf>,

    /// 3X-UI panel URL
    #[arg(long, env = "URL")]
    pub url: String,

    /// Panel secret sub-path, placed between the URL and the API paths
    #[arg(long, env = "BASE", default_value = "")]
    pub base: String,

    /// Panel user login
    #[arg(long, env = "LOGIN")]
    pub login: String,

    /// Panel user password
    #[arg(long, env = "PASSWORD", hide_env_values = true)]
    pub password: String,

    /// Name of the panel session cookie
    #[arg(long, env = "COOKIE_NAME", default_value = DEFAULT_COOKIE_NAME)]
    pub cookie_name: String,

    /// PEM CA certificate for the panel; certificate checks are off without it
    #[arg(long, env = "CA_FILE")]
    pub ca_file: Option<PathBuf>,

    /// Seconds between pull scrapes
    #[arg(long, env = "SCRAPE_INTERVAL", default_value = "15")]
    pub scrape_interval: u64,

    /// Per-request timeout towards the panel, in seconds
    #[arg(long, env = "REQUEST_TIMEOUT", default_value = "15")]
    pub request_timeout: u64,

    /// Session validity assumed when the cookie carries no expiry, in seconds
    #[arg(long, env = "SESSION_LIFETIME", default_value = "3600")]
    pub session_lifetime: u64,

    /// Seconds to wait for workers on shutdown
    #[arg(long, env = "SHUTDOWN_GRACE", default_value = "5")]
    pub shutdown_grace: u64,

    /// Also scrape the online client list
    #[arg(long, env = "TRACK_ONLINE")]
    pub track_online: bool,

    /// Enable debug logging
    #[arg(long, env = "ENV_DEBUG")]
    pub debug: bool,

    /// Log in JSON instead of human-readable lines
    #[arg(long, env = "LOG_JSON")]
    pub log_json: bool,

    /// Also write logs to a daily-rolling file in this directory
    #[arg(long, env = "LOG_DIR")]
    pub log_dir: Option<PathBuf>,
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.listen_addr()?;

        if !(self.url.starts_with("http://") || self.url.starts_with("https://")) {
            return Err(ConfigError::Url(self.url.clone()));
        }

        if self.certfile.is_some() != self.keyfile.is_some() {
            return Err(ConfigError::TlsPair);
        }

        for (name, value) in [
            ("--scrape-interval", self.scrape_interval),
            ("--request-timeout", self.request_timeout),
            ("--session-lifetime", self.session_lifetime),
        ] {
            if value == 0 {
                return Err(ConfigError::Zero(name));
            }
        }

        Ok(())
    }

    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.listen
            .parse()
            .map_err(|e| ConfigError::Listen(self.listen.clone(), e))
    }

    /// Certificate and key, when the endpoint is served over HTTPS.
    pub fn tls_files(&self) -> Option<(&Path, &Path)> {
        Some((self.certfile.as_deref()?, self.keyfile.as_deref()?))
    }

    #[must_use]
    pub const fn scrape_interval(&self) -> Duration {
        Duration::from_secs(self.scrape_interval)
    }

    #[must_use]
    pub const fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace)
    }

    pub fn panel_options(&self) -> PanelOptions {
        PanelOptions {
            url: self.url.clone(),
            base: self.base.clone(),
            login: self.login.clone(),
            password: self.password.clone(),
            cookie_name: self.cookie_name.clone(),
            ca_file: self.ca_file.clone(),
            request_timeout: Duration::from_secs(self.request_timeout),
            session_lifetime: Duration::from_secs(self.session_lifetime),
        }
    }
}
