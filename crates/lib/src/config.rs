//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.oncourse/config.json`) and environment.
//! Covers the remote service address, session timeouts/retry, and where credentials live.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Remote service (HTTP API + Socket.IO) settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Conversation session timeouts and retry policy.
    #[serde(default)]
    pub session: SessionConfig,

    /// Stored login location.
    #[serde(default)]
    pub credentials: CredentialsConfig,
}

/// Where the remote service lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// HTTP base URL (default "http://localhost:8000"). Overridden by ONCOURSE_BASE_URL env.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Socket.IO mount path on the same host (default "/socket.io").
    #[serde(default = "default_socket_path")]
    pub socket_path: String,
}

fn default_base_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_socket_path() -> String {
    "/socket.io".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            socket_path: default_socket_path(),
        }
    }
}

/// Timeouts and retry for the summary fetch and the socket connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    /// Per-attempt timeout for the patient summary fetch (both calls together).
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,

    /// Per-attempt timeout for opening the socket and completing the Socket.IO connect.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_fetch_timeout_ms() -> u64 {
    10_000
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_ms: default_fetch_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            retry: RetryConfig::default(),
        }
    }
}

impl SessionConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Exponential backoff: initial, doubled per failed attempt, capped at max.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
    /// Attempts before giving up on the summary fetch. The socket keeps retrying at the capped delay after this.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    10_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `attempt` (1-based: the delay after the first failure is `initial`).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(20);
        let ms = self
            .initial_backoff_ms
            .saturating_mul(1u64 << shift)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }
}

/// Credentials file location.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialsConfig {
    /// Override for the stored login file (default ~/.oncourse/credentials.json).
    pub path: Option<PathBuf>,
}

/// Resolve the base URL: env ONCOURSE_BASE_URL overrides config. Trailing slashes are trimmed.
pub fn resolve_base_url(config: &Config) -> String {
    std::env::var("ONCOURSE_BASE_URL")
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| config.server.base_url.trim().to_string())
        .trim_end_matches('/')
        .to_string()
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("ONCOURSE_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".oncourse").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("config.json"))
        })
}

/// Resolve the credentials file: config override or ~/.oncourse/credentials.json.
pub fn resolve_credentials_path(config: &Config) -> PathBuf {
    config
        .credentials
        .path
        .clone()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| {
            dirs::home_dir()
                .map(|h| h.join(".oncourse").join("credentials.json"))
                .unwrap_or_else(|| PathBuf::from("credentials.json"))
        })
}

/// Load config from the given path (or the default path). Missing file => default config.
/// Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_from_empty_object() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.server.base_url, "http://localhost:8000");
        assert_eq!(config.server.socket_path, "/socket.io");
        assert_eq!(config.session.fetch_timeout_ms, 10_000);
        assert_eq!(config.session.retry.max_attempts, 5);
        assert!(config.credentials.path.is_none());
    }

    #[test]
    fn camel_case_fields_parse() {
        let config: Config = serde_json::from_str(
            r#"{"server":{"baseUrl":"http://10.0.0.2:8000"},"session":{"connectTimeoutMs":250,"retry":{"maxBackoffMs":2000}}}"#,
        )
        .unwrap();
        assert_eq!(config.server.base_url, "http://10.0.0.2:8000");
        assert_eq!(config.server.socket_path, "/socket.io");
        assert_eq!(config.session.connect_timeout(), Duration::from_millis(250));
        assert_eq!(config.session.retry.max_backoff_ms, 2000);
        assert_eq!(config.session.retry.initial_backoff_ms, 500);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let retry = RetryConfig {
            max_attempts: 5,
            initial_backoff_ms: 100,
            max_backoff_ms: 1000,
        };
        assert_eq!(retry.backoff(1), Duration::from_millis(100));
        assert_eq!(retry.backoff(2), Duration::from_millis(200));
        assert_eq!(retry.backoff(4), Duration::from_millis(800));
        assert_eq!(retry.backoff(5), Duration::from_millis(1000));
        assert_eq!(retry.backoff(60), Duration::from_millis(1000));
    }

    #[test]
    fn credentials_path_override() {
        let mut config = Config::default();
        config.credentials.path = Some(PathBuf::from("/tmp/creds.json"));
        assert_eq!(
            resolve_credentials_path(&config),
            PathBuf::from("/tmp/creds.json")
        );
    }

    #[test]
    fn base_url_trims_and_env_overrides() {
        let mut config = Config::default();
        config.server.base_url = " http://api.local:8000/ ".to_string();
        std::env::remove_var("ONCOURSE_BASE_URL");
        assert_eq!(resolve_base_url(&config), "http://api.local:8000");
        std::env::set_var("ONCOURSE_BASE_URL", "http://override:9000/");
        assert_eq!(resolve_base_url(&config), "http://override:9000");
        std::env::remove_var("ONCOURSE_BASE_URL");
    }

    #[test]
    fn load_missing_file_gives_defaults() {
        let path = std::env::temp_dir().join("oncourse-missing-config-does-not-exist.json");
        let (config, used) = load_config(Some(path.clone())).unwrap();
        assert_eq!(used, path);
        assert_eq!(config.server.base_url, "http://localhost:8000");
    }
}
