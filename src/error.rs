//! Error taxonomy for backend API interactions.
//!
//! Every network or validation failure is classified into one of these
//! variants so the CLI can render a specific message (and, for quota
//! errors, suggest the upgrade path) instead of a raw transport error.

use thiserror::Error;

/// Maximum number of characters of a non-JSON body kept for diagnostics.
pub const RESPONSE_SNIPPET_LEN: usize = 500;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("network error: {0}")]
    Network(String),

    /// The server returned something that is not the JSON envelope we
    /// expect (typically an HTML error page from a misconfigured proxy).
    #[error("server returned a non-JSON response (status {status}): {snippet}")]
    MalformedResponse { status: u16, snippet: String },

    #[error("session expired, please log in again")]
    Unauthorized,

    #[error("permission denied")]
    PermissionDenied,

    /// Daily usage limit reached. Distinct from a generic 400 so the CLI
    /// can point at `/plans`.
    #[error("{0}")]
    QuotaExceeded(String),

    #[error("invalid email or password")]
    InvalidCredentials,

    #[error("an account with this email already exists, log in instead")]
    DuplicateAccount,

    /// Client-side validation failure; no request was sent.
    #[error("{0}")]
    Validation(String),

    /// The gateway already has an invocation in flight.
    #[error("another operation is already in progress")]
    AlreadyProcessing,

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },
}

/// Truncate a response body for inclusion in an error message.
pub fn body_snippet(body: &str) -> String {
    body.chars().take(RESPONSE_SNIPPET_LEN).collect()
}
