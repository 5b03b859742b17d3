use crate::transport::TransportError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("invalid stream identity {0:?}: expected `account/stream`")]
    InvalidIdentity(String),
    #[error("unexpected payload from {resource}: {detail}")]
    UnexpectedPayload { resource: String, detail: String },
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl StreamError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Transport(err) if err.is_timeout())
    }
}
