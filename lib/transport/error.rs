use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("callback {callback} was not invoked within {after:?}")]
    Timeout { callback: String, after: Duration },
    #[error("callback {callback} was dropped before it was invoked")]
    Abandoned { callback: String },
    #[error("unexpected HTTP status while fetching {resource}: {status}")]
    UnexpectedStatus { resource: String, status: u16 },
    #[error("malformed response body: {0}")]
    MalformedBody(String),
    #[error("invalid request url: {0}")]
    InvalidUrl(String),
    #[error(transparent)]
    Decode(#[from] serde_json::Error),
    #[error(transparent)]
    Request(#[from] reqwest::Error),
}

impl TransportError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Whether retrying the same request could plausibly succeed.
    ///
    /// The poller retries everything regardless; this only shapes log severity.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::Abandoned { .. } => true,
            Self::UnexpectedStatus { status, .. } => *status == 429 || *status >= 500,
            Self::Request(err) => err.is_timeout() || err.is_connect() || err.is_request(),
            Self::MalformedBody(_) | Self::InvalidUrl(_) | Self::Decode(_) => false,
        }
    }
}
