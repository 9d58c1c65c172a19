// Request execution
// Pure network I/O; classifies transport results, interprets nothing else

use reqwest::header::CONTENT_TYPE;
use reqwest::Client;

use super::types::{EncodedRequest, RawOutcome};

/// Sends encoded requests over the shared HTTP client.
///
/// No token logic and no retries live here; the pipeline above decides what a
/// status code means.
pub(crate) struct RequestExecutor {
    client: Client,
}

impl RequestExecutor {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Execute one request and capture its raw outcome. The response body is
    /// read fully before the connection is released, since it can only be
    /// read once.
    pub async fn send(&self, encoded: &EncodedRequest) -> RawOutcome {
        let mut request = self
            .client
            .request(encoded.method.clone(), encoded.url.clone());

        if let Some(body) = &encoded.body {
            request = request
                .header(CONTENT_TYPE, "application/json")
                .body(body.clone());
        }

        match request.send().await {
            Ok(response) => {
                let code = response.status().as_u16();
                match response.text().await {
                    Ok(body) => {
                        tracing::debug!(status = code, "received HTTP response");
                        RawOutcome::Status { code, body }
                    }
                    Err(e) if e.is_timeout() => RawOutcome::Timeout,
                    Err(e) => RawOutcome::Io(e.to_string()),
                }
            }
            Err(e) => classify_transport_error(e),
        }
    }
}

/// Categorize a reqwest error into the raw outcome taxonomy
fn classify_transport_error(e: reqwest::Error) -> RawOutcome {
    let error_kind = if e.is_timeout() {
        "timeout"
    } else if e.is_connect() {
        "connection_failed"
    } else if e.is_request() {
        "request_error"
    } else if e.is_body() {
        "body_error"
    } else {
        "unknown"
    };

    tracing::warn!(
        error_kind = error_kind,
        error = %e,
        "HTTP request error"
    );

    if e.is_timeout() {
        RawOutcome::Timeout
    } else if e.is_connect() || e.is_request() || e.is_body() {
        RawOutcome::Io(e.to_string())
    } else {
        RawOutcome::Other(e.to_string())
    }
}
