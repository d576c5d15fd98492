//! Configuration types and structures.

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default HTTP port.
pub const DEFAULT_PORT: u16 = 8080;

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// SQLite database file.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Interface to bind.
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Public base URL, used to derive the OAuth redirect URI when none is set.
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            host: default_host(),
            port: default_port(),
            base_url: default_base_url(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("taskboard/taskboard.db")
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_base_url() -> String {
    format!("http://localhost:{}", DEFAULT_PORT)
}

/// Session and password settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Session lifetime in hours (default: 120).
    #[serde(default = "default_session_ttl_hours")]
    pub session_ttl_hours: u64,

    /// How long an OAuth state stays valid (default: 600).
    #[serde(default = "default_oauth_state_ttl_seconds")]
    pub oauth_state_ttl_seconds: u64,

    #[serde(default = "default_min_password_length")]
    pub min_password_length: usize,

    /// Mark the session cookie `Secure` (set when served over HTTPS).
    #[serde(default)]
    pub cookie_secure: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            session_ttl_hours: default_session_ttl_hours(),
            oauth_state_ttl_seconds: default_oauth_state_ttl_seconds(),
            min_password_length: default_min_password_length(),
            cookie_secure: false,
        }
    }
}

/// One year.
pub const MAX_SESSION_TTL_HOURS: u64 = 24 * 365;

pub const MAX_OAUTH_STATE_TTL_SECONDS: u64 = 3600;

impl AuthConfig {
    pub fn session_ttl_secs(&self) -> i64 {
        i64::try_from(self.session_ttl_hours.saturating_mul(3600)).unwrap_or(i64::MAX)
    }

    pub fn oauth_state_ttl_ms(&self) -> i64 {
        i64::try_from(self.oauth_state_ttl_seconds.saturating_mul(1000)).unwrap_or(i64::MAX)
    }
}

fn default_session_ttl_hours() -> u64 {
    120
}

fn default_oauth_state_ttl_seconds() -> u64 {
    600
}

fn default_min_password_length() -> usize {
    8
}

/// Google OAuth client settings. Google sign-in is off while the id or secret is empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoogleConfig {
    #[serde(default)]
    pub client_id: String,

    #[serde(default)]
    pub client_secret: String,

    /// Callback URL registered with Google. Empty means `<base_url>/auth/google/callback`.
    #[serde(default)]
    pub redirect_uri: String,

    /// Request timeout in seconds (default: 10).
    #[serde(default = "default_google_timeout")]
    pub timeout: u64,
}

impl GoogleConfig {
    /// Whether both client credentials are set.
    pub fn is_configured(&self) -> bool {
        !self.client_id.is_empty() && !self.client_secret.is_empty()
    }
}

impl Default for GoogleConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            redirect_uri: String::new(),
            timeout: default_google_timeout(),
        }
    }
}

fn default_google_timeout() -> u64 {
    10
}

/// Task list settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TasksConfig {
    #[serde(default = "default_page_size")]
    pub page_size: i64,
}

impl Default for TasksConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
        }
    }
}

fn default_page_size() -> i64 {
    10
}

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub google: GoogleConfig,

    #[serde(default)]
    pub tasks: TasksConfig,
}

impl Config {
    /// Load configuration from a single YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("Failed to read config {}: {}", path.display(), e))?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Fill derived values and reject unusable settings.
    pub fn finalize(&mut self) -> Result<()> {
        if self.google.redirect_uri.is_empty() {
            self.google.redirect_uri = format!(
                "{}/auth/google/callback",
                self.server.base_url.trim_end_matches('/')
            );
        }
        if self.tasks.page_size < 1 {
            return Err(anyhow!("tasks.page_size must be at least 1"));
        }
        if !(1..=MAX_SESSION_TTL_HOURS).contains(&self.auth.session_ttl_hours) {
            return Err(anyhow!(
                "auth.session_ttl_hours must be between 1 and {}",
                MAX_SESSION_TTL_HOURS
            ));
        }
        if !(1..=MAX_OAUTH_STATE_TTL_SECONDS).contains(&self.auth.oauth_state_ttl_seconds) {
            return Err(anyhow!(
                "auth.oauth_state_ttl_seconds must be between 1 and {}",
                MAX_OAUTH_STATE_TTL_SECONDS
            ));
        }
        if self.auth.min_password_length == 0 {
            return Err(anyhow!("auth.min_password_length must be at least 1"));
        }
        Ok(())
    }
}
