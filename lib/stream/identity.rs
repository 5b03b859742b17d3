use std::fmt;
use std::str::FromStr;

use super::error::StreamError;

/// Names one feed: the owning account and the stream under it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamIdentity {
    account: String,
    stream: String,
}

impl StreamIdentity {
    pub fn new(account: impl Into<String>, stream: impl Into<String>) -> Result<Self, StreamError> {
        let account = account.into();
        let stream = stream.into();
        if account.trim().is_empty() || stream.trim().is_empty() {
            return Err(StreamError::InvalidIdentity(format!("{account}/{stream}")));
        }
        Ok(Self { account, stream })
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }
}

impl FromStr for StreamIdentity {
    type Err = StreamError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let mut parts = raw.split('/');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(account), Some(stream), None) => Self::new(account, stream),
            _ => Err(StreamError::InvalidIdentity(raw.to_string())),
        }
    }
}

impl fmt::Display for StreamIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.account, self.stream)
    }
}
