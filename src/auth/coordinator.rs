// Single-flight refresh coordination
//
// Refresh tokens rotate on use, so two concurrent physical refresh calls
// invalidate each other and log the user out for no reason. At most one
// refresh is in flight process-wide; every concurrent caller waits on the
// same wave and observes the same outcome.

use reqwest::{Client, Url};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::time;

use super::types::{RefreshOutcome, RefreshRequest, RefreshResponse};
use crate::store::TokenStore;

/// Expiry lifetime assumed when the server omits `expiresIn`
const DEFAULT_EXPIRES_IN_SECS: u64 = 3600;

/// Completion signal of the wave currently in flight, if any
type InFlight = Option<watch::Receiver<Option<RefreshOutcome>>>;

pub(crate) struct RefreshCoordinator {
    client: Client,
    store: Arc<TokenStore>,
    refresh_url: Url,

    /// Upper bound on waiting for a wave; an unresponsive refresh endpoint
    /// must not hang callers forever
    wait_timeout: Duration,

    /// Mutated only while holding this mutex
    in_flight: Arc<Mutex<InFlight>>,
}

impl RefreshCoordinator {
    pub fn new(
        client: Client,
        store: Arc<TokenStore>,
        refresh_url: Url,
        wait_timeout: Duration,
    ) -> Self {
        Self {
            client,
            store,
            refresh_url,
            wait_timeout,
            in_flight: Arc::new(Mutex::new(None)),
        }
    }

    /// Refresh the token pair, sharing one physical call across concurrent
    /// callers.
    ///
    /// `observed_access` is the access token the caller's rejected request
    /// was sent with. If the store already holds a different one, an earlier
    /// wave has rotated the pair since the caller read it and no new call is
    /// needed.
    pub async fn refresh(&self, observed_access: &str) -> RefreshOutcome {
        let mut rx = {
            let mut in_flight = self.in_flight.lock().await;

            if let Some(rx) = in_flight.as_ref() {
                tracing::debug!("refresh already in flight, joining the wave");
                rx.clone()
            } else {
                match self.store.access_token() {
                    Ok(Some(current)) if current != observed_access => {
                        tracing::debug!("token already rotated by an earlier refresh");
                        return RefreshOutcome::Success;
                    }
                    _ => {}
                }

                let (tx, rx) = watch::channel(None);
                *in_flight = Some(rx.clone());

                let client = self.client.clone();
                let store = Arc::clone(&self.store);
                let url = self.refresh_url.clone();
                let slot = Arc::clone(&self.in_flight);

                // The wave is owned by no single caller: it runs on its own
                // task, so an abandoned request cannot cancel a refresh that
                // other waiters depend on.
                tokio::spawn(async move {
                    let outcome = perform_refresh(&client, &store, &url).await;

                    // Clear the slot before broadcasting so a caller arriving
                    // after completion starts a new wave instead of consuming
                    // a stale outcome.
                    {
                        let mut in_flight = slot.lock().await;
                        *in_flight = None;
                    }
                    let _ = tx.send(Some(outcome));
                });

                rx
            }
        };

        let outcome =
            match time::timeout(self.wait_timeout, rx.wait_for(|outcome| outcome.is_some())).await {
                Ok(Ok(outcome)) => (*outcome).unwrap_or(RefreshOutcome::NetworkError),
                Ok(Err(_)) => {
                    tracing::error!("refresh wave ended without an outcome");
                    RefreshOutcome::NetworkError
                }
                Err(_) => {
                    tracing::warn!(
                        wait_secs = self.wait_timeout.as_secs(),
                        "timed out waiting for in-flight refresh"
                    );
                    RefreshOutcome::NetworkError
                }
            };
        outcome
    }
}

/// The physical refresh call: POST the stored refresh token, persist the
/// rotated pair. Runs exactly once per wave.
async fn perform_refresh(client: &Client, store: &TokenStore, refresh_url: &Url) -> RefreshOutcome {
    let refresh_token = match store.load() {
        Ok(Some(pair)) => pair.refresh_token,
        Ok(None) => {
            tracing::warn!("refresh requested without a stored session");
            return RefreshOutcome::RefreshExpired;
        }
        Err(e) => {
            tracing::error!("token store read failed during refresh: {:#}", e);
            return RefreshOutcome::ServerError;
        }
    };

    tracing::info!("refreshing token pair...");

    let request = RefreshRequest {
        refresh_token: refresh_token.clone(),
    };

    let response = match client
        .post(refresh_url.clone())
        .header("User-Agent", refresh_user_agent())
        .json(&request)
        .send()
        .await
    {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!(error = %e, "refresh request failed at the transport level");
            return RefreshOutcome::NetworkError;
        }
    };

    match response.status().as_u16() {
        200 => {
            let data: RefreshResponse = match response.json().await {
                Ok(data) => data,
                Err(e) => {
                    tracing::error!(error = %e, "failed to parse refresh response");
                    return RefreshOutcome::ServerError;
                }
            };

            if data.access_token.is_empty() {
                tracing::error!("refresh response does not contain accessToken");
                return RefreshOutcome::ServerError;
            }

            // Non-rotating deployments omit refreshToken; the stored one
            // stays valid
            let next_refresh = data.refresh_token.unwrap_or(refresh_token);
            let expires_in = data.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS);

            if let Err(e) = store.save(&data.access_token, &next_refresh, expires_in) {
                tracing::error!("failed to persist refreshed tokens: {:#}", e);
                return RefreshOutcome::ServerError;
            }

            tracing::info!("token pair refreshed");
            RefreshOutcome::Success
        }
        401 => {
            tracing::warn!("refresh token rejected, clearing stored session");
            if let Err(e) = store.clear() {
                tracing::error!("failed to clear token store: {:#}", e);
            }
            RefreshOutcome::RefreshExpired
        }
        code => {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = code, body = %body, "refresh failed server-side");
            RefreshOutcome::ServerError
        }
    }
}

/// Device fingerprint for the refresh User-Agent
fn device_fingerprint() -> String {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let hostname = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());

    let mut hasher = DefaultHasher::new();
    hostname.hash(&mut hasher);
    format!("{:x}", hasher.finish())
}

fn refresh_user_agent() -> String {
    format!(
        "authkit/{}-{}",
        env!("CARGO_PKG_VERSION"),
        device_fingerprint()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryVault;
    use mockito::Matcher;
    use serde_json::json;

    fn memory_store() -> Arc<TokenStore> {
        Arc::new(TokenStore::new(Box::new(MemoryVault::new())))
    }

    fn coordinator_for(refresh_url: &str, store: Arc<TokenStore>) -> RefreshCoordinator {
        RefreshCoordinator::new(
            Client::new(),
            store,
            Url::parse(refresh_url).unwrap(),
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn test_successful_refresh_rotates_pair() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/refresh")
            .match_body(Matcher::PartialJson(json!({"refreshToken": "R0"})))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"accessToken":"A1","refreshToken":"R1","expiresIn":7200}"#)
            .expect(1)
            .create_async()
            .await;

        let store = memory_store();
        store.save("A0", "R0", 3600).unwrap();

        let coordinator = coordinator_for(&format!("{}/refresh", server.url()), Arc::clone(&store));
        assert_eq!(coordinator.refresh("A0").await, RefreshOutcome::Success);

        mock.assert_async().await;
        let pair = store.load().unwrap().unwrap();
        assert_eq!(pair.access_token, "A1");
        assert_eq!(pair.refresh_token, "R1");
    }

    #[tokio::test]
    async fn test_missing_refresh_token_keeps_existing_one() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/refresh")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"accessToken":"A1"}"#)
            .create_async()
            .await;

        let store = memory_store();
        store.save("A0", "R0", 3600).unwrap();

        let coordinator = coordinator_for(&format!("{}/refresh", server.url()), Arc::clone(&store));
        assert_eq!(coordinator.refresh("A0").await, RefreshOutcome::Success);

        let pair = store.load().unwrap().unwrap();
        assert_eq!(pair.access_token, "A1");
        assert_eq!(pair.refresh_token, "R0");
    }

    #[tokio::test]
    async fn test_rejected_refresh_clears_store() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/refresh")
            .with_status(401)
            .create_async()
            .await;

        let store = memory_store();
        store.save("A0", "R0", 3600).unwrap();

        let coordinator = coordinator_for(&format!("{}/refresh", server.url()), Arc::clone(&store));
        assert_eq!(coordinator.refresh("A0").await, RefreshOutcome::RefreshExpired);
        assert!(!store.is_logged_in());
    }

    #[tokio::test]
    async fn test_server_error_leaves_store_untouched() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/refresh")
            .with_status(503)
            .create_async()
            .await;

        let store = memory_store();
        store.save("A0", "R0", 3600).unwrap();

        let coordinator = coordinator_for(&format!("{}/refresh", server.url()), Arc::clone(&store));
        assert_eq!(coordinator.refresh("A0").await, RefreshOutcome::ServerError);

        let pair = store.load().unwrap().unwrap();
        assert_eq!(pair.access_token, "A0");
        assert_eq!(pair.refresh_token, "R0");
    }

    #[tokio::test]
    async fn test_empty_access_token_is_server_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/refresh")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"accessToken":""}"#)
            .create_async()
            .await;

        let store = memory_store();
        store.save("A0", "R0", 3600).unwrap();

        let coordinator = coordinator_for(&format!("{}/refresh", server.url()), Arc::clone(&store));
        assert_eq!(coordinator.refresh("A0").await, RefreshOutcome::ServerError);
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_network_error() {
        let store = memory_store();
        store.save("A0", "R0", 3600).unwrap();

        // Port 1 is never listening
        let coordinator = coordinator_for("http://127.0.0.1:1/refresh", store);
        assert_eq!(coordinator.refresh("A0").await, RefreshOutcome::NetworkError);
    }

    #[tokio::test]
    async fn test_refresh_without_session_is_expired() {
        let coordinator = coordinator_for("http://127.0.0.1:1/refresh", memory_store());
        assert_eq!(coordinator.refresh("A0").await, RefreshOutcome::RefreshExpired);
    }

    #[tokio::test]
    async fn test_already_rotated_token_short_circuits() {
        // The store moved on to A1 while this caller still held A0; no
        // physical call may be made (the endpoint is unreachable, so one
        // would surface as NetworkError).
        let store = memory_store();
        store.save("A1", "R1", 3600).unwrap();

        let coordinator = coordinator_for("http://127.0.0.1:1/refresh", store);
        assert_eq!(coordinator.refresh("A0").await, RefreshOutcome::Success);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_physical_call() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/refresh")
            .match_body(Matcher::PartialJson(json!({"refreshToken": "R0"})))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"accessToken":"A1","refreshToken":"R1","expiresIn":3600}"#)
            .expect(1)
            .create_async()
            .await;

        let store = memory_store();
        store.save("A0", "R0", 3600).unwrap();

        let coordinator = Arc::new(coordinator_for(
            &format!("{}/refresh", server.url()),
            Arc::clone(&store),
        ));

        let waves: Vec<_> = (0..4)
            .map(|_| {
                let coordinator = Arc::clone(&coordinator);
                tokio::spawn(async move { coordinator.refresh("A0").await })
            })
            .collect();

        for handle in waves {
            assert_eq!(handle.await.unwrap(), RefreshOutcome::Success);
        }

        mock.assert_async().await;
        let pair = store.load().unwrap().unwrap();
        assert_eq!(pair.access_token, "A1");
        assert_eq!(pair.refresh_token, "R1");
    }
}
