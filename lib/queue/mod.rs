//! Single-consumer delivery queue with idle replay.
//!
//! Records are handed to the registered consumer one at a time. Each delivery takes a
//! fresh lock token; the consumer releases the queue by calling [`Completion::done`],
//! which only counts if its token is still the current one. The next delivery is always
//! scheduled on a new task rather than run inline, so a long run of records never
//! deepens the call stack.
//!
//! With a non-zero history size, delivered records are kept in a bounded ring. History
//! holds each record (by `Arc` identity) at most once. A
//! separate timer compares the arrival counter against its previous snapshot and, when
//! nothing arrived and nothing is pending, re-enqueues one random record from history.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use rand::Rng;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::poller::{Poller, DEFAULT_FREQUENCY};
use crate::server::monitoring::QUEUE_METRICS;
use crate::stream::{FeedFetcher, Record};

type Consumer = Arc<dyn Fn(Record, Completion) + Send + Sync>;
type Gate = Arc<dyn Fn() -> bool + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueOptions {
    /// Capacity of the replay history. `0` disables idle replay entirely.
    pub history_size: usize,
    /// Idle check period. Defaults to the poller's frequency when built from a poller.
    pub history_timeout: Option<Duration>,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            history_size: 0,
            history_timeout: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueCounters {
    /// Records that entered the queue, replays included.
    pub total: u64,
    /// Records currently waiting for delivery.
    pub enqueued: u64,
    pub delivered: u64,
    /// Records replayed from history.
    pub reused: u64,
}

struct Entry {
    record: Record,
    /// Picked from history; never re-inserted even if its slot was evicted meanwhile.
    recycled: bool,
}

struct QueueState {
    pending: VecDeque<Entry>,
    history: VecDeque<Record>,
    history_capacity: usize,
    locked: bool,
    lock_token: u64,
    counters: QueueCounters,
    consumer: Option<Consumer>,
}

struct QueueInner {
    state: Mutex<QueueState>,
    gate: Mutex<Option<Gate>>,
    runtime: Option<Handle>,
}

/// Releases the queue after a delivery. Cloning is allowed; only the first `done()` for a
/// given delivery has any effect.
#[derive(Clone)]
pub struct Completion {
    queue: Weak<QueueInner>,
    token: u64,
}

impl Completion {
    /// Signals that the delivered record has been handled.
    ///
    /// Returns `false` when this completion is stale: already used, or superseded by a
    /// later delivery.
    pub fn done(&self) -> bool {
        let Some(inner) = self.queue.upgrade() else {
            return false;
        };

        {
            let mut state = inner.lock_state();
            if !state.locked || state.lock_token != self.token {
                debug!(
                    event = "queue_stale_completion",
                    token = self.token,
                    current_token = state.lock_token,
                    "ignoring completion for an outdated delivery"
                );
                if let Some(metrics) = QUEUE_METRICS.get() {
                    metrics.stale_completions_total.inc();
                }
                return false;
            }
            state.locked = false;
        }

        inner.schedule_step();
        true
    }

    pub fn token(&self) -> u64 {
        self.token
    }
}

/// Paces bursty arrivals into one-at-a-time delivery to a single consumer.
///
/// Built inside a Tokio runtime; idle replay and deferred delivery run as tasks on it.
pub struct RecordQueue {
    inner: Arc<QueueInner>,
    replay: Option<CancellationToken>,
}

impl RecordQueue {
    pub fn new(options: QueueOptions) -> Self {
        let inner = Arc::new(QueueInner {
            state: Mutex::new(QueueState {
                pending: VecDeque::new(),
                history: VecDeque::with_capacity(options.history_size),
                history_capacity: options.history_size,
                locked: false,
                lock_token: 0,
                counters: QueueCounters::default(),
                consumer: None,
            }),
            gate: Mutex::new(None),
            runtime: Handle::try_current().ok(),
        });

        let replay = match (&inner.runtime, options.history_size) {
            (Some(runtime), size) if size > 0 => {
                let period = options.history_timeout.unwrap_or(DEFAULT_FREQUENCY);
                let cancel = CancellationToken::new();
                runtime.spawn(replay_loop(Arc::downgrade(&inner), period, cancel.clone()));
                Some(cancel)
            }
            _ => None,
        };

        Self { inner, replay }
    }

    /// Appends records in the order given; the first one is delivered first.
    pub fn enqueue<I>(&self, records: I)
    where
        I: IntoIterator<Item = Record>,
    {
        self.inner.enqueue(records);
    }

    /// Appends a newest-first batch so that its oldest record is delivered first.
    pub fn enqueue_batch(&self, newest_first: &[Record]) {
        self.inner.enqueue(newest_first.iter().rev().cloned());
    }

    /// Installs the sole consumer, replacing any previous one.
    ///
    /// A delivery already handed to the previous consumer still has to be completed
    /// before the new consumer receives anything.
    pub fn register_consumer<C>(&self, consumer: C)
    where
        C: Fn(Record, Completion) + Send + Sync + 'static,
    {
        self.inner.lock_state().consumer = Some(Arc::new(consumer));
        QueueInner::step(&self.inner);
    }

    /// Feeds every batch the poller fetches into this queue.
    ///
    /// Idle replay is suspended while the poller is stopped.
    pub fn attach<F>(&self, poller: &Poller<F>)
    where
        F: FeedFetcher + 'static,
    {
        let inner = Arc::clone(&self.inner);
        poller.batch(move |batch| inner.enqueue(batch.iter().rev().cloned()));
        *self.inner.lock_gate() = Some(Arc::new(poller.enabled_probe()));
    }

    pub fn counters(&self) -> QueueCounters {
        self.inner.lock_state().counters
    }

    pub fn pending_len(&self) -> usize {
        self.inner.lock_state().pending.len()
    }

    pub fn history_len(&self) -> usize {
        self.inner.lock_state().history.len()
    }

    pub fn is_locked(&self) -> bool {
        self.inner.lock_state().locked
    }
}

impl Drop for RecordQueue {
    fn drop(&mut self) {
        if let Some(replay) = self.replay.take() {
            replay.cancel();
        }
    }
}

impl<F> Poller<F>
where
    F: FeedFetcher + 'static,
{
    /// Builds a queue fed by this poller and hands its deliveries to `consumer`.
    pub fn queue<C>(&self, consumer: C, mut options: QueueOptions) -> RecordQueue
    where
        C: Fn(Record, Completion) + Send + Sync + 'static,
    {
        options
            .history_timeout
            .get_or_insert(self.options().frequency);
        let queue = RecordQueue::new(options);
        queue.attach(self);
        queue.register_consumer(consumer);
        queue
    }
}

impl QueueInner {
    fn enqueue<I>(self: &Arc<Self>, records: I)
    where
        I: IntoIterator<Item = Record>,
    {
        let added = {
            let mut state = self.lock_state();
            let before = state.pending.len();
            state.pending.extend(records.into_iter().map(|record| Entry {
                record,
                recycled: false,
            }));
            let added = (state.pending.len() - before) as u64;
            state.counters.total += added;
            state.counters.enqueued += added;
            added
        };

        if added > 0 {
            trace!(event = "queue_enqueued", records = added);
            QueueInner::step(self);
        }
    }

    /// Delivers the oldest pending record if the queue is free and has a consumer.
    fn step(self: &Arc<Self>) {
        let (consumer, record, completion, pending, history) = {
            let mut state = self.lock_state();
            if state.locked || state.pending.is_empty() {
                return;
            }
            let Some(consumer) = state.consumer.clone() else {
                return;
            };
            let Some(entry) = state.pending.pop_front() else {
                return;
            };

            state.lock_token += 1;
            state.locked = true;
            state.counters.enqueued = state.counters.enqueued.saturating_sub(1);
            state.counters.delivered += 1;

            let remembered = entry.recycled
                || state
                    .history
                    .iter()
                    .any(|record| Arc::ptr_eq(record, &entry.record));
            if state.history_capacity > 0 && !remembered {
                if state.history.len() >= state.history_capacity {
                    state.history.pop_front();
                }
                state.history.push_back(Arc::clone(&entry.record));
            }

            let completion = Completion {
                queue: Arc::downgrade(self),
                token: state.lock_token,
            };
            (
                consumer,
                entry.record,
                completion,
                state.pending.len(),
                state.history.len(),
            )
        };

        if let Some(metrics) = QUEUE_METRICS.get() {
            metrics.delivered_total.inc();
            metrics.pending.set(pending as i64);
            metrics.history_len.set(history as i64);
        }
        consumer(record, completion);
    }

    fn schedule_step(self: &Arc<Self>) {
        let inner = Arc::clone(self);
        match &self.runtime {
            Some(runtime) => {
                runtime.spawn(async move { QueueInner::step(&inner) });
            }
            None => QueueInner::step(&inner),
        }
    }

    /// Re-enqueues one random history record if nothing arrived since `last_total`.
    fn replay_if_idle(self: &Arc<Self>, last_total: u64) -> bool {
        let gate_open = self.lock_gate().as_ref().map_or(true, |gate| gate());
        if !gate_open {
            return false;
        }

        {
            let mut state = self.lock_state();
            if state.counters.total != last_total
                || !state.pending.is_empty()
                || state.history.is_empty()
            {
                return false;
            }

            let index = rand::thread_rng().gen_range(0..state.history.len());
            let Some(record) = state.history.get(index).cloned() else {
                return false;
            };
            state.pending.push_back(Entry {
                record,
                recycled: true,
            });
            state.counters.total += 1;
            state.counters.enqueued += 1;
            state.counters.reused += 1;
            debug!(
                event = "queue_idle_replay",
                history_index = index,
                reused = state.counters.reused,
                "replaying a record from history"
            );
        }

        if let Some(metrics) = QUEUE_METRICS.get() {
            metrics.reused_total.inc();
        }
        QueueInner::step(self);
        true
    }

    fn total(&self) -> u64 {
        self.lock_state().counters.total
    }

    fn lock_state(&self) -> MutexGuard<'_, QueueState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_gate(&self) -> MutexGuard<'_, Option<Gate>> {
        self.gate
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

async fn replay_loop(queue: Weak<QueueInner>, period: Duration, cancel: CancellationToken) {
    let mut last_total = match queue.upgrade() {
        Some(inner) => inner.total(),
        None => return,
    };

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(period) => {}
        }

        let Some(inner) = queue.upgrade() else {
            return;
        };
        inner.replay_if_idle(last_total);
        last_total = inner.total();
    }
}
