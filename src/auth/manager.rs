use anyhow::{Context, Result};
use reqwest::{Client, Method, Url};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::coordinator::RefreshCoordinator;
use super::encoder;
use super::executor::RequestExecutor;
use super::types::{RawOutcome, RefreshOutcome};
use crate::config::AuthConfig;
use crate::error::AuthError;
use crate::store::{MemoryVault, SqliteVault, TokenStore, TokenVault};

/// One initial attempt plus exactly one retry after a refresh. The bound
/// guarantees termination even against a server that always answers 401.
const MAX_ATTEMPTS: u32 = 2;

/// Authenticated-request pipeline.
///
/// Holds the current token pair, attaches credentials to outgoing requests,
/// and recovers from a 401 by refreshing once through the single-flight
/// coordinator. Cheap to share behind an `Arc`; every method takes `&self`.
pub struct AuthTokenManager {
    config: AuthConfig,

    /// Persisted token pair
    store: Arc<TokenStore>,

    /// Network I/O
    executor: RequestExecutor,

    /// Single-flight refresh
    coordinator: RefreshCoordinator,
}

impl AuthTokenManager {
    /// Create a manager from configuration. A configured `store_path` opens
    /// the SQLite vault; otherwise tokens live in memory for the session.
    pub fn new(config: AuthConfig) -> Result<Self> {
        let vault: Box<dyn TokenVault> = match &config.store_path {
            Some(path) => Box::new(SqliteVault::open(path)?),
            None => Box::new(MemoryVault::new()),
        };
        Self::with_vault(config, vault)
    }

    /// Create a manager over a caller-supplied vault backend.
    pub fn with_vault(config: AuthConfig, vault: Box<dyn TokenVault>) -> Result<Self> {
        config.validate()?;

        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;

        let store = Arc::new(TokenStore::new(vault));

        let refresh_url = Url::parse(&config.refresh_url)
            .with_context(|| format!("Invalid refresh URL: {}", config.refresh_url))?;

        let coordinator = RefreshCoordinator::new(
            client.clone(),
            Arc::clone(&store),
            refresh_url,
            Duration::from_secs(config.refresh_wait_timeout_secs),
        );

        Ok(Self {
            config,
            store,
            executor: RequestExecutor::new(client),
            coordinator,
        })
    }

    /// Entry point for the external login flow: persist the initial pair.
    pub fn login(&self, access_token: &str, refresh_token: &str, expires_in_secs: u64) -> Result<()> {
        self.store.save(access_token, refresh_token, expires_in_secs)
    }

    /// Drop the stored session.
    pub fn logout(&self) -> Result<()> {
        self.store.clear()
    }

    pub fn is_logged_in(&self) -> bool {
        self.store.is_logged_in()
    }

    /// The underlying store, for collaborators that manage the session
    /// lifecycle (login flow, account deletion).
    pub fn token_store(&self) -> Arc<TokenStore> {
        Arc::clone(&self.store)
    }

    /// Execute an authenticated request against a protected endpoint.
    ///
    /// On a 401 the token pair is refreshed (at most one physical refresh per
    /// wave of concurrent failures) and the request is retried exactly once.
    /// Returns the response body on 200/201; every failure mode maps to a
    /// typed [`AuthError`].
    pub async fn make_authenticated_request(
        &self,
        url: &str,
        method: Method,
        body: Option<&str>,
    ) -> std::result::Result<String, AuthError> {
        let url = self.validate_url(url)?;
        let request_id = Uuid::new_v4();

        for attempt in 0..MAX_ATTEMPTS {
            // The expiry hint is deliberately not consulted here; refresh is
            // reactive to a 401 only.
            let access_token = match self.store.access_token() {
                Ok(Some(token)) => token,
                Ok(None) => return Err(AuthError::SessionRequired),
                Err(e) => {
                    return Err(AuthError::UnknownError(format!(
                        "token store read failed: {e:#}"
                    )))
                }
            };

            let encoded = encoder::encode(method.clone(), &url, body, &access_token);

            tracing::debug!(
                request_id = %request_id,
                method = %encoded.method,
                url = %encoded.url,
                attempt = attempt + 1,
                "sending authenticated request"
            );

            match self.executor.send(&encoded).await {
                RawOutcome::Status {
                    code: 200 | 201,
                    body,
                } => {
                    tracing::debug!(request_id = %request_id, "request succeeded");
                    return Ok(body);
                }

                RawOutcome::Status { code: 401, .. } if attempt == 0 => {
                    tracing::warn!(
                        request_id = %request_id,
                        "request rejected with 401, refreshing session"
                    );
                    match self.coordinator.refresh(&access_token).await {
                        RefreshOutcome::Success => continue,
                        RefreshOutcome::RefreshExpired => return Err(AuthError::SessionExpired),
                        RefreshOutcome::NetworkError => return Err(AuthError::RefreshNetworkError),
                        RefreshOutcome::ServerError => return Err(AuthError::RefreshServerError),
                    }
                }

                // Second consecutive 401: the retry was already spent, no
                // further refresh is attempted
                RawOutcome::Status { code: 401, .. } => return Err(AuthError::SessionExpired),

                RawOutcome::Status { code: 403, .. } => return Err(AuthError::PermissionDenied),
                RawOutcome::Status { code: 405, .. } => return Err(AuthError::MethodNotAllowed),

                RawOutcome::Status { code, .. } if (400..=499).contains(&code) => {
                    return Err(AuthError::ClientError(code))
                }
                RawOutcome::Status { code, .. } if (500..=599).contains(&code) => {
                    return Err(AuthError::ServerError)
                }
                RawOutcome::Status { code, .. } => {
                    return Err(AuthError::UnknownError(format!(
                        "unexpected HTTP status {code}"
                    )))
                }

                RawOutcome::Timeout => return Err(AuthError::TimeoutError),
                RawOutcome::Io(detail) => {
                    tracing::warn!(request_id = %request_id, error = %detail, "network failure");
                    return Err(AuthError::NetworkError);
                }
                RawOutcome::Other(detail) => return Err(AuthError::UnknownError(detail)),
            }
        }

        // Only the refreshed-then-retried 401 path loops, and its second pass
        // terminates above; this is the loop's formal exit.
        Err(AuthError::SessionExpired)
    }

    /// Reject URLs that do not target an allowed API host.
    fn validate_url(&self, raw: &str) -> std::result::Result<Url, AuthError> {
        let url = Url::parse(raw).map_err(|_| AuthError::InvalidUrl(raw.to_string()))?;

        match url.scheme() {
            "http" | "https" => {}
            _ => return Err(AuthError::InvalidUrl(raw.to_string())),
        }

        let host = url
            .host_str()
            .ok_or_else(|| AuthError::InvalidUrl(raw.to_string()))?;

        if !self.config.allowed_hosts.iter().any(|h| h == host) {
            return Err(AuthError::InvalidUrl(raw.to_string()));
        }

        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_manager() -> AuthTokenManager {
        let config = AuthConfig::new("https://api.example.com");
        AuthTokenManager::new(config).unwrap()
    }

    #[test]
    fn test_validate_url_accepts_allowed_host() {
        let manager = test_manager();
        assert!(manager.validate_url("https://api.example.com/orders").is_ok());
    }

    #[test]
    fn test_validate_url_rejects_foreign_host() {
        let manager = test_manager();
        let err = manager
            .validate_url("https://evil.example.com/orders")
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidUrl(_)));
    }

    #[test]
    fn test_validate_url_rejects_garbage() {
        let manager = test_manager();
        assert!(matches!(
            manager.validate_url("not a url"),
            Err(AuthError::InvalidUrl(_))
        ));
        assert!(matches!(
            manager.validate_url("ftp://api.example.com/orders"),
            Err(AuthError::InvalidUrl(_))
        ));
    }

    #[tokio::test]
    async fn test_request_without_session_fails_before_network() {
        let manager = test_manager();
        // The configured host does not resolve; reaching the network would
        // surface as a different error kind
        let result = manager
            .make_authenticated_request("https://api.example.com/orders", Method::GET, None)
            .await;
        assert!(matches!(result, Err(AuthError::SessionRequired)));
    }

    #[test]
    fn test_login_logout_lifecycle() {
        let manager = test_manager();
        assert!(!manager.is_logged_in());

        manager.login("A0", "R0", 3600).unwrap();
        assert!(manager.is_logged_in());

        manager.logout().unwrap();
        assert!(!manager.is_logged_in());
    }
}
