// Error handling module
// Defines the typed failures surfaced to the calling layer

use thiserror::Error;

/// Errors that can occur during an authenticated request.
///
/// Every transport or parsing failure is converted into one of these kinds at
/// the pipeline boundary; no raw `reqwest` error escapes to the caller.
#[derive(Error, Debug)]
pub enum AuthError {
    /// URL does not match an allowed API host
    #[error("URL is not an allowed API host: {0}")]
    InvalidUrl(String),

    /// No stored session; login is required before calling
    #[error("No active session: login required")]
    SessionRequired,

    /// Session can no longer be recovered; re-authentication required
    #[error("Session expired: re-authentication required")]
    SessionExpired,

    /// Server rejected the request with 403
    #[error("Permission denied")]
    PermissionDenied,

    /// Server rejected the verb with 405
    #[error("Method not allowed")]
    MethodNotAllowed,

    /// Any other 4xx status
    #[error("Client error: HTTP {0}")]
    ClientError(u16),

    /// Any 5xx status
    #[error("Server error")]
    ServerError,

    /// The refresh call itself failed server-side
    #[error("Token refresh failed: server error")]
    RefreshServerError,

    /// The refresh call itself failed at the transport level
    #[error("Token refresh failed: network error")]
    RefreshNetworkError,

    /// Request timed out
    #[error("Request timed out")]
    TimeoutError,

    /// Transport-level I/O failure
    #[error("Network error")]
    NetworkError,

    /// Anything that does not fit the taxonomy above
    #[error("Unexpected failure: {0}")]
    UnknownError(String),
}

impl AuthError {
    /// True when the caller must send the user back through the login flow.
    /// All other kinds are transient or informational.
    pub fn requires_reauth(&self) -> bool {
        matches!(self, AuthError::SessionRequired | AuthError::SessionExpired)
    }

    /// True when retrying the same request later is a reasonable reaction.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AuthError::ServerError
                | AuthError::RefreshServerError
                | AuthError::RefreshNetworkError
                | AuthError::TimeoutError
                | AuthError::NetworkError
        )
    }
}
