//! Outbound fetches with single-use callback identifiers and a fixed response window.
//!
//! Every request gets a fresh [`CallbackId`] from the [`CallbackRegistry`] and carries it
//! as the `jsonp` query parameter. The request runs on its own task and resolves the
//! registry entry when the response arrives; the caller waits on that entry for at most
//! the configured timeout. On expiry the entry is neutralized and the request task is
//! torn down, so a late response is discarded instead of being reported twice.

pub mod error;
mod query;
mod registry;

pub use error::TransportError;
pub use query::{encode_component, QueryParams, QueryValue};
pub use registry::{CallbackId, CallbackRegistry};

use futures::future::BoxFuture;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Fixed window a callback has to fire before the call is abandoned.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Query parameter naming the callback the response should invoke.
pub const CALLBACK_PARAM: &str = "jsonp";

/// Decoded response body, plus the callback name it was wrapped in, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub callback: Option<String>,
    pub payload: Value,
}

/// Performs one raw GET.
///
/// A trait so callers can run against scripted responses without network access.
pub trait Transport: Send + Sync {
    fn get<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Response, TransportError>>;
}

impl<T> Transport for Arc<T>
where
    T: Transport + ?Sized,
{
    fn get<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Response, TransportError>> {
        (**self).get(url)
    }
}

/// `reqwest`-backed transport used by the binary.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for HttpTransport {
    fn get<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Response, TransportError>> {
        Box::pin(async move {
            let response = self.client.get(url).send().await?;
            if !response.status().is_success() {
                return Err(TransportError::UnexpectedStatus {
                    resource: response.url().path().to_string(),
                    status: response.status().as_u16(),
                });
            }

            let body = response.text().await?;
            decode_body(&body)
        })
    }
}

/// Decodes either a bare JSON body or one wrapped as `callback_name(<json>);`.
pub fn decode_body(body: &str) -> Result<Response, TransportError> {
    let trimmed = body.trim().trim_end_matches(';').trim_end();
    if trimmed.is_empty() {
        return Err(TransportError::MalformedBody("empty body".to_string()));
    }
    if let Ok(payload) = serde_json::from_str::<Value>(trimmed) {
        return Ok(Response {
            callback: None,
            payload,
        });
    }

    let open = trimmed
        .find('(')
        .filter(|_| trimmed.ends_with(')'))
        .ok_or_else(|| TransportError::MalformedBody(preview(trimmed)))?;
    let name = trimmed[..open].trim();
    let is_identifier = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '$');
    if !is_identifier {
        return Err(TransportError::MalformedBody(preview(trimmed)));
    }

    let inner = &trimmed[open + 1..trimmed.len() - 1];
    Ok(Response {
        callback: Some(name.to_string()),
        payload: serde_json::from_str(inner)?,
    })
}

fn preview(body: &str) -> String {
    body.chars().take(64).collect()
}

/// Issues calls through a [`Transport`] and enforces the single-use callback contract.
pub struct Dispatcher {
    transport: Arc<dyn Transport>,
    registry: Arc<CallbackRegistry>,
    timeout: Duration,
}

impl Dispatcher {
    pub fn new(transport: Arc<dyn Transport>, timeout: Duration) -> Self {
        Self {
            transport,
            registry: Arc::new(CallbackRegistry::new()),
            timeout,
        }
    }

    pub fn http(timeout: Duration) -> Self {
        Self::new(Arc::new(HttpTransport::new()), timeout)
    }

    pub fn registry(&self) -> &CallbackRegistry {
        &self.registry
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Issues one call to `url` and waits for its callback.
    ///
    /// Resolves exactly once: with the payload, with the transport's error, or with
    /// [`TransportError::Timeout`] once the window expires. No retries happen here.
    pub async fn dispatch(
        &self,
        url: &str,
        mut params: QueryParams,
        prefix: &'static str,
    ) -> Result<Value, TransportError> {
        let (callback, rx) = self.registry.register(prefix);
        params.push(CALLBACK_PARAM, QueryValue::Scalar(callback.to_string()));
        let full_url = format!("{url}?{params}");
        debug!(event = "transport_dispatch", url = %full_url, callback = %callback);

        let in_flight = InFlight {
            callback: callback.clone(),
            registry: Arc::clone(&self.registry),
            request: spawn_request(
                Arc::clone(&self.transport),
                Arc::clone(&self.registry),
                callback.clone(),
                full_url,
            ),
        };

        let outcome = match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(TransportError::Abandoned {
                callback: callback.to_string(),
            }),
            Err(_) => {
                warn!(
                    event = "transport_timeout",
                    callback = %callback,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "callback not invoked in time, abandoning request"
                );
                Err(TransportError::Timeout {
                    callback: callback.to_string(),
                    after: self.timeout,
                })
            }
        };

        drop(in_flight);
        outcome
    }
}

fn spawn_request(
    transport: Arc<dyn Transport>,
    registry: Arc<CallbackRegistry>,
    callback: CallbackId,
    url: String,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let fired = match transport.get(&url).await {
            Ok(Response {
                callback: Some(name),
                payload,
            }) => registry.fulfill_named(&name, Ok(payload)),
            Ok(Response {
                callback: None,
                payload,
            }) => registry.fulfill(&callback, Ok(payload)),
            Err(err) => registry.fulfill(&callback, Err(err)),
        };
        if !fired {
            debug!(
                event = "transport_late_response",
                callback = %callback,
                "response arrived for a neutralized callback"
            );
        }
    })
}

/// Tears down an outstanding call: the callback entry and the request task.
///
/// Both are no-ops once the callback has fired.
struct InFlight {
    callback: CallbackId,
    registry: Arc<CallbackRegistry>,
    request: JoinHandle<()>,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.registry.neutralize(&self.callback);
        self.request.abort();
    }
}

#[cfg(test)]
mod tests;
