//! Error types surfaced by the feed client and the control call.

/// Errors raised while fetching the feed.
///
/// `Clone` so one failed fetch can be handed to every caller that was
/// waiting on it in the [`ResultCache`](crate::cache::ResultCache).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The feed answered with something other than `200 OK`.
    #[error("feed returned HTTP status {status_code}")]
    Status { status_code: u16 },

    #[error("feed request timed out")]
    Timeout,

    /// Connection-level failure (DNS, TLS, reset, ...).
    #[error("feed request failed: {0}")]
    Request(String),

    /// The body arrived but is not a feed document.
    #[error("feed body could not be decoded: {0}")]
    Decode(String),

    #[error("invalid feed endpoint: {0}")]
    InvalidEndpoint(String),
}

impl TransportError {
    /// HTTP status of the failed response, if the server answered at all.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            TransportError::Status { status_code } => Some(*status_code),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout
        } else if err.is_decode() {
            TransportError::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            TransportError::Status {
                status_code: status.as_u16(),
            }
        } else {
            TransportError::Request(err.to_string())
        }
    }
}

/// Errors raised by the outbound device control call.
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    /// Non-200 answer; the body is kept verbatim for the caller.
    #[error("control endpoint returned HTTP status {status_code}: {body}")]
    Status { status_code: u16, body: String },

    #[error("control request failed: {0}")]
    Request(String),

    #[error("invalid control endpoint: {0}")]
    InvalidEndpoint(String),
}

impl From<reqwest::Error> for ControlError {
    fn from(err: reqwest::Error) -> Self {
        ControlError::Request(err.to_string())
    }
}
