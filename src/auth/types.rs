// Pipeline types

use reqwest::{Method, Url};
use serde::{Deserialize, Serialize};

/// Outcome of one physical refresh call.
///
/// Produced exactly once per refresh wave and fanned out to every caller
/// waiting on that wave.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// A fresh token pair is in the store
    Success,
    /// The refresh token itself was rejected; the session is gone
    RefreshExpired,
    /// Transport-level failure; the store is untouched
    NetworkError,
    /// Server-side failure; the store is untouched
    ServerError,
}

/// Refresh endpoint request
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RefreshRequest {
    pub refresh_token: String,
}

/// Refresh endpoint response
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RefreshResponse {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: Option<u64>,
}

/// An authenticated request ready to send.
///
/// For read verbs the token lives in the URL query and `body` is None; for
/// write verbs the token has been merged into the JSON body.
#[derive(Debug, Clone)]
pub(crate) struct EncodedRequest {
    pub method: Method,
    pub url: Url,
    pub body: Option<String>,
}

/// Raw transport outcome of a single send, before pipeline classification
#[derive(Debug)]
pub(crate) enum RawOutcome {
    /// The server answered; body is fully read
    Status { code: u16, body: String },
    /// The request timed out
    Timeout,
    /// Connection-level I/O failure
    Io(String),
    /// Any other transport failure
    Other(String),
}
