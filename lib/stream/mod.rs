pub mod account;
mod cursor;
pub mod error;
mod identity;

pub use account::{AccountMetaParameters, AccountSource};
pub use cursor::Cursor;
pub use error::StreamError;
pub use identity::StreamIdentity;

use futures::future::BoxFuture;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use crate::transport::{encode_component, Dispatcher, QueryParams, QueryValue};

/// One raw record exactly as the server returned it.
pub type Record = Arc<Value>;

pub const DEFAULT_HOST: &str = "http://tweetriver.com";

/// Callback prefixes keep stream and meta identifiers visually distinct on the wire.
pub(crate) const STREAM_CALLBACK_PREFIX: &str = "_";
pub(crate) const META_CALLBACK_PREFIX: &str = "meta_";

/// Query options for one stream fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchParameters {
    pub limit: Option<u32>,
    pub since_id: Option<Cursor>,
    pub replies: bool,
    pub geo_hint: bool,
}

impl FetchParameters {
    pub fn to_query(&self) -> QueryParams {
        let mut params = QueryParams::new();
        params
            .push_opt("limit", self.limit)
            .push_opt("since_id", self.since_id.as_ref())
            .push_flag("replies", self.replies)
            .push_flag("geo_hint", self.geo_hint);
        params
    }
}

/// Query options for the stream meta endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetaParameters {
    pub disregard: Option<String>,
}

impl MetaParameters {
    pub fn to_query(&self) -> QueryParams {
        let mut params = QueryParams::new();
        if let Some(disregard) = &self.disregard {
            params.push("disregard", QueryValue::scalar(disregard.clone()));
        }
        params
    }
}

/// Fetches one page of a feed, newest record first.
///
/// The poller depends on this trait rather than on [`StreamSource`] so tick logic can be
/// exercised against scripted batches.
pub trait FeedFetcher: Send + Sync {
    fn fetch<'a>(
        &'a self,
        params: &'a FetchParameters,
    ) -> BoxFuture<'a, Result<Vec<Record>, StreamError>>;
}

impl<T> FeedFetcher for Arc<T>
where
    T: FeedFetcher + ?Sized,
{
    fn fetch<'a>(
        &'a self,
        params: &'a FetchParameters,
    ) -> BoxFuture<'a, Result<Vec<Record>, StreamError>> {
        (**self).fetch(params)
    }
}

/// A single feed on a host. Immutable once built.
pub struct StreamSource {
    identity: StreamIdentity,
    host: String,
    dispatcher: Arc<Dispatcher>,
}

impl StreamSource {
    pub fn new(identity: StreamIdentity, host: impl Into<String>, dispatcher: Arc<Dispatcher>) -> Self {
        let host = host.into().trim_end_matches('/').to_string();
        Self {
            identity,
            host,
            dispatcher,
        }
    }

    pub fn identity(&self) -> &StreamIdentity {
        &self.identity
    }

    pub fn stream_url(&self) -> String {
        format!(
            "{}/{}/{}.json",
            self.host,
            encode_component(self.identity.account()),
            encode_component(self.identity.stream())
        )
    }

    pub fn meta_url(&self) -> String {
        format!(
            "{}/{}/{}/meta.json",
            self.host,
            encode_component(self.identity.account()),
            encode_component(self.identity.stream())
        )
    }

    /// Fetches records newer than `params.since_id`, newest first.
    pub async fn load(&self, params: &FetchParameters) -> Result<Vec<Record>, StreamError> {
        let payload = self
            .dispatcher
            .dispatch(&self.stream_url(), params.to_query(), STREAM_CALLBACK_PREFIX)
            .await?;

        match payload {
            Value::Array(records) => Ok(records.into_iter().map(Arc::new).collect()),
            Value::Null => {
                debug!(event = "stream_empty_payload", stream = %self.identity);
                Ok(Vec::new())
            }
            other => Err(StreamError::UnexpectedPayload {
                resource: self.identity.to_string(),
                detail: format!("expected an array of records, got {}", json_kind(&other)),
            }),
        }
    }

    /// Loads one page and hands each record to `each`, oldest first.
    pub async fn load_each<F>(&self, params: &FetchParameters, mut each: F) -> Result<usize, StreamError>
    where
        F: FnMut(&Record),
    {
        let records = self.load(params).await?;
        step_through(&records, |record| each(record));
        Ok(records.len())
    }

    pub async fn meta(&self, params: &MetaParameters) -> Result<Value, StreamError> {
        let payload = self
            .dispatcher
            .dispatch(&self.meta_url(), params.to_query(), META_CALLBACK_PREFIX)
            .await?;
        Ok(payload)
    }
}

impl FeedFetcher for StreamSource {
    fn fetch<'a>(
        &'a self,
        params: &'a FetchParameters,
    ) -> BoxFuture<'a, Result<Vec<Record>, StreamError>> {
        Box::pin(self.load(params))
    }
}

/// Walks a newest-first batch from its oldest record to its newest.
pub fn step_through<F>(records: &[Record], mut each: F)
where
    F: FnMut(&Record),
{
    for record in records.iter().rev() {
        each(record);
    }
}

pub(crate) fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
