use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use serde_json::json;
use tokio::sync::oneshot;

use crate::stream::{FeedFetcher, FetchParameters, Record, StreamError};
use crate::transport::TransportError;

pub(super) fn records(ids: &[u64]) -> Vec<Record> {
    ids.iter()
        .map(|id| Arc::new(json!({ "entity_id": id, "text": format!("record {id}") })))
        .collect()
}

pub(super) fn entity_ids(records: &[Record]) -> Vec<u64> {
    records
        .iter()
        .map(|record| record["entity_id"].as_u64().expect("entity_id should be numeric"))
        .collect()
}

pub(super) fn server_error() -> StreamError {
    StreamError::Transport(TransportError::UnexpectedStatus {
        resource: "/acme/river.json".to_string(),
        status: 503,
    })
}

struct Step {
    gate: Option<oneshot::Receiver<()>>,
    result: Result<Vec<Record>, StreamError>,
}

/// Replays scripted fetch results in order. Once the script runs out every fetch
/// returns an empty batch.
#[derive(Default)]
pub(super) struct ScriptedFeed {
    steps: Mutex<VecDeque<Step>>,
    seen: Mutex<Vec<FetchParameters>>,
}

impl ScriptedFeed {
    pub(super) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(super) fn then(&self, result: Result<Vec<Record>, StreamError>) -> &Self {
        self.steps
            .lock()
            .expect("steps mutex poisoned")
            .push_back(Step { gate: None, result });
        self
    }

    /// Queues a result that is only returned once the returned sender fires (or drops).
    pub(super) fn then_gated(&self, result: Result<Vec<Record>, StreamError>) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.steps
            .lock()
            .expect("steps mutex poisoned")
            .push_back(Step {
                gate: Some(rx),
                result,
            });
        tx
    }

    pub(super) fn calls(&self) -> usize {
        self.seen.lock().expect("seen mutex poisoned").len()
    }

    pub(super) fn seen(&self) -> Vec<FetchParameters> {
        self.seen.lock().expect("seen mutex poisoned").clone()
    }
}

impl FeedFetcher for ScriptedFeed {
    fn fetch<'a>(
        &'a self,
        params: &'a FetchParameters,
    ) -> BoxFuture<'a, Result<Vec<Record>, StreamError>> {
        Box::pin(async move {
            self.seen
                .lock()
                .expect("seen mutex poisoned")
                .push(params.clone());
            let step = self.steps.lock().expect("steps mutex poisoned").pop_front();
            match step {
                Some(Step { gate, result }) => {
                    if let Some(gate) = gate {
                        let _ = gate.await;
                    }
                    result
                }
                None => Ok(Vec::new()),
            }
        })
    }
}

/// Collects everything the poller hands to its callbacks.
#[derive(Default, Clone)]
pub(super) struct Observed {
    pub(super) batches: Arc<Mutex<Vec<Vec<u64>>>>,
    pub(super) each: Arc<Mutex<Vec<u64>>>,
}

impl Observed {
    pub(super) fn batches(&self) -> Vec<Vec<u64>> {
        self.batches.lock().expect("batches mutex poisoned").clone()
    }

    pub(super) fn each(&self) -> Vec<u64> {
        self.each.lock().expect("each mutex poisoned").clone()
    }
}
