use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::json;

use super::{
    decode_body, Dispatcher, QueryParams, QueryValue, Response, Transport, TransportError,
};

/// Answers every request after `delay`, recording the URLs it saw.
struct ScriptedTransport {
    delay: Duration,
    reply: fn(&str) -> Result<Response, TransportError>,
    seen: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    fn new(delay: Duration, reply: fn(&str) -> Result<Response, TransportError>) -> Arc<Self> {
        Arc::new(Self {
            delay,
            reply,
            seen: Mutex::new(Vec::new()),
        })
    }

    fn seen(&self) -> Vec<String> {
        self.seen.lock().expect("seen mutex poisoned").clone()
    }
}

impl Transport for ScriptedTransport {
    fn get<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Response, TransportError>> {
        Box::pin(async move {
            self.seen
                .lock()
                .expect("seen mutex poisoned")
                .push(url.to_string());
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            (self.reply)(url)
        })
    }
}

fn bare_batch(_url: &str) -> Result<Response, TransportError> {
    Ok(Response {
        callback: None,
        payload: json!([{ "entity_id": 2 }, { "entity_id": 1 }]),
    })
}

fn echo_callback(url: &str) -> Result<Response, TransportError> {
    let name = url
        .split("jsonp=")
        .nth(1)
        .expect("callback param should be present")
        .to_string();
    Ok(Response {
        callback: Some(name),
        payload: json!({ "ok": true }),
    })
}

fn wrong_callback(_url: &str) -> Result<Response, TransportError> {
    Ok(Response {
        callback: Some("_999".to_string()),
        payload: json!({ "ok": true }),
    })
}

fn server_error(_url: &str) -> Result<Response, TransportError> {
    Err(TransportError::UnexpectedStatus {
        resource: "/acme/river.json".to_string(),
        status: 503,
    })
}

#[tokio::test]
async fn dispatch_appends_callback_param_and_returns_payload() {
    let transport = ScriptedTransport::new(Duration::ZERO, bare_batch);
    let dispatcher = Dispatcher::new(transport.clone(), Duration::from_secs(10));

    let mut params = QueryParams::new();
    params.push("limit", QueryValue::scalar("2"));
    let payload = dispatcher
        .dispatch("http://feeds.test/acme/river.json", params, "_")
        .await
        .expect("dispatch should succeed");

    assert_eq!(payload, json!([{ "entity_id": 2 }, { "entity_id": 1 }]));
    assert_eq!(
        transport.seen(),
        vec!["http://feeds.test/acme/river.json?limit=2&jsonp=_1".to_string()]
    );
    assert_eq!(dispatcher.registry().pending_count(), 0);
}

#[tokio::test]
async fn named_responses_resolve_their_own_callback() {
    let transport = ScriptedTransport::new(Duration::ZERO, echo_callback);
    let dispatcher = Dispatcher::new(transport, Duration::from_secs(10));

    let payload = dispatcher
        .dispatch("http://feeds.test/acme/river/meta.json", QueryParams::new(), "meta_")
        .await
        .expect("dispatch should succeed");
    assert_eq!(payload, json!({ "ok": true }));
}

#[tokio::test(start_paused = true)]
async fn responses_for_unknown_callbacks_end_in_timeout() {
    let transport = ScriptedTransport::new(Duration::ZERO, wrong_callback);
    let dispatcher = Dispatcher::new(transport, Duration::from_secs(10));

    let err = dispatcher
        .dispatch("http://feeds.test/acme/river.json", QueryParams::new(), "_")
        .await
        .expect_err("mismatched callback should never resolve");
    assert!(err.is_timeout());
    assert_eq!(dispatcher.registry().pending_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn slow_responses_time_out_and_are_discarded() {
    let transport = ScriptedTransport::new(Duration::from_secs(30), bare_batch);
    let dispatcher = Dispatcher::new(transport, Duration::from_secs(10));

    let started = tokio::time::Instant::now();
    let err = dispatcher
        .dispatch("http://feeds.test/acme/river.json", QueryParams::new(), "_")
        .await
        .expect_err("slow response should time out");
    assert!(matches!(err, TransportError::Timeout { ref callback, .. } if callback == "_1"));
    assert_eq!(started.elapsed(), Duration::from_secs(10));

    // Let the abandoned response window pass; nothing may be resurrected.
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(dispatcher.registry().pending_count(), 0);
}

#[tokio::test]
async fn transport_errors_resolve_without_waiting_for_timeout() {
    let transport = ScriptedTransport::new(Duration::ZERO, server_error);
    let dispatcher = Dispatcher::new(transport, Duration::from_secs(10));

    let err = dispatcher
        .dispatch("http://feeds.test/acme/river.json", QueryParams::new(), "_")
        .await
        .expect_err("server error should surface");
    assert!(matches!(
        err,
        TransportError::UnexpectedStatus { status: 503, .. }
    ));
}

#[test]
fn decode_body_accepts_bare_and_wrapped_json() {
    let bare = decode_body(" [1, 2] ").expect("bare array");
    assert_eq!(bare.callback, None);
    assert_eq!(bare.payload, json!([1, 2]));

    let wrapped = decode_body("river.callbacks._4([{\"a\":1}]);").expect("wrapped array");
    assert_eq!(wrapped.callback.as_deref(), Some("river.callbacks._4"));
    assert_eq!(wrapped.payload, json!([{ "a": 1 }]));

    let null = decode_body("null").expect("bare null");
    assert_eq!(null.payload, serde_json::Value::Null);
}

#[test]
fn decode_body_rejects_garbage() {
    assert!(matches!(
        decode_body("   "),
        Err(TransportError::MalformedBody(_))
    ));
    assert!(matches!(
        decode_body("<html>oops</html>"),
        Err(TransportError::MalformedBody(_))
    ));
    assert!(matches!(
        decode_body("cb([1,"),
        Err(TransportError::MalformedBody(_))
    ));
    assert!(matches!(decode_body("cb([1,)"), Err(TransportError::Decode(_))));
}
