use anyhow::{Context, Result};
use reqwest::Url;
use std::path::PathBuf;

/// Pipeline configuration.
///
/// Constructed programmatically by the embedding application or loaded from
/// the environment. `store_path: None` selects the in-memory vault, which is
/// what tests and ephemeral sessions use; real sessions point it at a SQLite
/// file so the token pair survives restarts.
#[derive(Clone, Debug)]
pub struct AuthConfig {
    /// Base URL of the protected API, without trailing slash
    pub api_base_url: String,

    /// Refresh endpoint URL
    pub refresh_url: String,

    /// Hosts that authenticated requests may be sent to
    pub allowed_hosts: Vec<String>,

    // Timeouts
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,

    /// Upper bound on how long a caller waits for an in-flight refresh
    pub refresh_wait_timeout_secs: u64,

    /// SQLite vault location; None keeps tokens in memory only
    pub store_path: Option<PathBuf>,
}

impl AuthConfig {
    /// Build a configuration for the given API base URL with defaults for
    /// everything else. The refresh endpoint and the allowed host are derived
    /// from the base URL.
    pub fn new(api_base_url: &str) -> Self {
        let base = api_base_url.trim_end_matches('/').to_string();

        let allowed_hosts = Url::parse(&base)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .into_iter()
            .collect();

        Self {
            refresh_url: format!("{base}/auth/refresh"),
            api_base_url: base,
            allowed_hosts,
            connect_timeout_secs: 10,
            request_timeout_secs: 30,
            refresh_wait_timeout_secs: 30,
            store_path: None,
        }
    }

    /// Load configuration from the environment (reads `.env` if present).
    pub fn from_env() -> Result<Self> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        let base = std::env::var("AUTH_API_BASE_URL")
            .context("AUTH_API_BASE_URL is required (set it in the environment or .env)")?;

        let mut config = Self::new(&base);

        if let Ok(url) = std::env::var("AUTH_REFRESH_URL") {
            config.refresh_url = url;
        }

        // Extra hosts beyond the one derived from the base URL
        if let Ok(hosts) = std::env::var("AUTH_ALLOWED_HOSTS") {
            config.allowed_hosts.extend(
                hosts
                    .split(',')
                    .map(|h| h.trim().to_string())
                    .filter(|h| !h.is_empty()),
            );
        }

        config.connect_timeout_secs = std::env::var("AUTH_CONNECT_TIMEOUT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(config.connect_timeout_secs);

        config.request_timeout_secs = std::env::var("AUTH_REQUEST_TIMEOUT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(config.request_timeout_secs);

        config.refresh_wait_timeout_secs = std::env::var("AUTH_REFRESH_WAIT_TIMEOUT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(config.refresh_wait_timeout_secs);

        config.store_path = std::env::var("AUTH_STORE_FILE")
            .ok()
            .map(|s| expand_tilde(&s))
            .or_else(default_store_path);

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        Url::parse(&self.api_base_url)
            .with_context(|| format!("Invalid API base URL: {}", self.api_base_url))?;

        Url::parse(&self.refresh_url)
            .with_context(|| format!("Invalid refresh URL: {}", self.refresh_url))?;

        if self.allowed_hosts.is_empty() {
            anyhow::bail!("No allowed API hosts configured");
        }

        Ok(())
    }
}

/// Default vault location under the platform data directory
fn default_store_path() -> Option<PathBuf> {
    dirs::data_dir().map(|d| d.join("authkit").join("tokens.db"))
}

/// Expand tilde (~) in file paths to user's home directory
fn expand_tilde(path: &str) -> PathBuf {
    if path.starts_with("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(&path[2..]);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derived_defaults() {
        let config = AuthConfig::new("https://api.example.com/");
        assert_eq!(config.api_base_url, "https://api.example.com");
        assert_eq!(config.refresh_url, "https://api.example.com/auth/refresh");
        assert_eq!(config.allowed_hosts, vec!["api.example.com".to_string()]);
        assert!(config.store_path.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_base_url() {
        let mut config = AuthConfig::new("https://api.example.com");
        config.api_base_url = "not a url".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_host_set() {
        let mut config = AuthConfig::new("https://api.example.com");
        config.allowed_hosts.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_expand_tilde() {
        let path = expand_tilde("~/test/file.db");
        assert!(path.to_string_lossy().contains("test/file.db"));
        assert!(!path.to_string_lossy().starts_with("~"));

        let path = expand_tilde("/absolute/path");
        assert_eq!(path, PathBuf::from("/absolute/path"));
    }

    #[test]
    fn test_expand_tilde_relative_path() {
        let path = expand_tilde("relative/path");
        assert_eq!(path, PathBuf::from("relative/path"));
    }
}
