/// Failure categories for the Opsboard client core.
///
/// Expected failures are typed variants so callers can branch on category
/// without matching message strings. [`Error::is_transient`] is the retry
/// predicate the refresh scheduler uses; everything else is surfaced to the
/// caller at the boundary where it happened.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Malformed token material. Local and non-recoverable: the session
    /// holding such a token is cleared rather than retried.
    #[error("token decode error: {0}")]
    Decode(String),

    /// No usable response from the backend (DNS, connect, timeout, body
    /// read). Transient.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The backend rejected the credentials or the session (HTTP 401).
    /// Never retried.
    #[error("not authorized during {operation}")]
    Auth { operation: &'static str },

    /// The backend shed load (HTTP 429). Retried on the same fixed delay as
    /// any other transient failure.
    #[error("rate limited during {operation}")]
    RateLimited { operation: &'static str },

    /// Backend-side failure (HTTP 5xx). Transient.
    #[error("server error during {operation} (status {status})")]
    Server { operation: &'static str, status: u16 },

    /// Any other non-success backend response.
    #[error("{operation} failed (status {status}): {detail}")]
    Api {
        operation: &'static str,
        status: u16,
        detail: String,
    },

    /// Local input validation failure. Surfaced inline by the UI, never
    /// propagated to the session layer.
    #[error("validation error: {0}")]
    Validation(String),

    /// The persisted key-value store failed.
    #[error("store error: {0}")]
    Store(String),

    /// Missing or invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// A hierarchical section path that does not parse.
    #[error("invalid section path: {0:?}")]
    SectionPath(String),
}

impl Error {
    /// Whether the refresh scheduler may retry after this failure.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::Server { .. } | Self::RateLimited { .. }
        )
    }
}
