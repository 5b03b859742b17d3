//! Periodic fetch loop over one feed.
//!
//! A poller is either stopped or running. Each `start()` from the stopped state bumps the
//! generation and spawns a tick loop bound to it. A tick re-checks its generation before
//! fetching and again before acting on the result, so a fetch that completes after
//! `stop()` (or after a restart) is dropped instead of reaching the callbacks.

mod retry;

pub use retry::{compute_backoff_delay, RetryPolicy};

use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::server::monitoring::POLLER_METRICS;
use crate::stream::{step_through, Cursor, FeedFetcher, FetchParameters, Record, StreamError};

pub const DEFAULT_FREQUENCY: Duration = Duration::from_secs(30);

type BatchHandler = Arc<dyn Fn(&[Record]) + Send + Sync>;
type EachHandler = Arc<dyn Fn(&Record) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollerOptions {
    pub limit: Option<u32>,
    /// Starting cursor. Only records newer than this are requested.
    pub since_id: Option<Cursor>,
    pub replies: bool,
    pub geo_hint: bool,
    pub frequency: Duration,
    /// Re-poll immediately when a page comes back full.
    ///
    /// A full page is only a hint: a feed that naturally yields exactly `limit` records
    /// per interval will be polled back-to-back.
    pub catch_up: bool,
    pub retry_policy: RetryPolicy,
}

impl Default for PollerOptions {
    fn default() -> Self {
        Self {
            limit: None,
            since_id: None,
            replies: false,
            geo_hint: false,
            frequency: DEFAULT_FREQUENCY,
            catch_up: false,
            retry_policy: RetryPolicy::default(),
        }
    }
}

/// Point-in-time copy of the poller's bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollerSnapshot {
    pub enabled: bool,
    pub running: bool,
    pub alive: bool,
    pub generation: u64,
    pub consecutive_errors: u32,
    pub since_id: Option<Cursor>,
}

struct PollerState {
    enabled: bool,
    /// Cleared before each fetch, set again when a fetch of the live generation succeeds.
    alive: bool,
    generation: u64,
    consecutive_errors: u32,
    since_id: Option<Cursor>,
    /// Present while a tick loop is scheduled; cancelling it interrupts the inter-tick wait.
    schedule: Option<CancellationToken>,
}

#[derive(Default, Clone)]
struct Handlers {
    batch: Vec<BatchHandler>,
    each: Vec<EachHandler>,
}

struct PollerInner<F> {
    fetcher: F,
    options: PollerOptions,
    state: Mutex<PollerState>,
    handlers: Mutex<Handlers>,
    runtime: Option<Handle>,
}

/// Drives a feed on a fixed cadence and fans results out to registered callbacks.
///
/// Dropping the poller stops it.
pub struct Poller<F>
where
    F: FeedFetcher + 'static,
{
    inner: Arc<PollerInner<F>>,
}

impl<F> Poller<F>
where
    F: FeedFetcher + 'static,
{
    pub fn new(fetcher: F, options: PollerOptions) -> Self {
        let state = PollerState {
            enabled: false,
            alive: true,
            generation: 0,
            consecutive_errors: 0,
            since_id: options.since_id.clone(),
            schedule: None,
        };
        Self {
            inner: Arc::new(PollerInner {
                fetcher,
                options,
                state: Mutex::new(state),
                handlers: Mutex::new(Handlers::default()),
                runtime: Handle::try_current().ok(),
            }),
        }
    }

    /// Registers a callback that receives every non-empty batch, newest record first.
    pub fn batch<H>(&self, handler: H) -> &Self
    where
        H: Fn(&[Record]) + Send + Sync + 'static,
    {
        self.inner.lock_handlers().batch.push(Arc::new(handler));
        self
    }

    /// Registers a callback that receives every record, oldest first within each batch.
    pub fn each<H>(&self, handler: H) -> &Self
    where
        H: Fn(&Record) + Send + Sync + 'static,
    {
        self.inner.lock_handlers().each.push(Arc::new(handler));
        self
    }

    /// Begins polling. A no-op while already running.
    ///
    /// The loop runs on the Tokio runtime the poller was built in, or else the one
    /// `start()` is called from. With neither, the poller logs a warning and stays stopped.
    pub fn start(&self) -> &Self {
        self.inner.start();
        self
    }

    /// Stops polling. A fetch already in flight completes but its result is discarded.
    pub fn stop(&self) -> &Self {
        self.inner.stop();
        self
    }

    /// Restarts the loop if the last attempt never reported success.
    pub fn poke(&self) -> &Self {
        self.inner.poke();
        self
    }

    pub fn options(&self) -> &PollerOptions {
        &self.inner.options
    }

    pub fn snapshot(&self) -> PollerSnapshot {
        let state = self.inner.lock_state();
        PollerSnapshot {
            enabled: state.enabled,
            running: state.schedule.is_some(),
            alive: state.alive,
            generation: state.generation,
            consecutive_errors: state.consecutive_errors,
            since_id: state.since_id.clone(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.lock_state().enabled
    }

    pub fn since_id(&self) -> Option<Cursor> {
        self.inner.lock_state().since_id.clone()
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.inner.lock_state().consecutive_errors
    }

    pub fn generation(&self) -> u64 {
        self.inner.lock_state().generation
    }

    /// A cheap probe reporting whether this poller is still enabled.
    ///
    /// Reports `false` once the poller has been dropped.
    pub(crate) fn enabled_probe(&self) -> impl Fn() -> bool + Send + Sync + 'static {
        let inner: Weak<PollerInner<F>> = Arc::downgrade(&self.inner);
        move || {
            inner
                .upgrade()
                .map(|inner| inner.lock_state().enabled)
                .unwrap_or(false)
        }
    }
}

impl<F> Drop for Poller<F>
where
    F: FeedFetcher + 'static,
{
    fn drop(&mut self) {
        self.inner.stop();
    }
}

enum TickOutcome {
    Scheduled(Duration),
    Restart(Duration),
    Halt,
}

impl<F> PollerInner<F>
where
    F: FeedFetcher + 'static,
{
    fn start(self: &Arc<Self>) {
        let Some(runtime) = self.runtime.clone().or_else(|| Handle::try_current().ok()) else {
            warn!(
                event = "poller_no_runtime",
                "cannot start poll loop outside a Tokio runtime"
            );
            return;
        };

        let (generation, schedule) = {
            let mut state = self.lock_state();
            if state.schedule.is_some() {
                return;
            }
            state.enabled = true;
            state.generation += 1;
            let schedule = CancellationToken::new();
            state.schedule = Some(schedule.clone());
            (state.generation, schedule)
        };

        info!(event = "poller_started", generation, "starting poll loop");
        let inner = Arc::clone(self);
        runtime.spawn(async move { inner.run(generation, schedule).await });
    }

    fn stop(&self) {
        let mut state = self.lock_state();
        state.enabled = false;
        if let Some(schedule) = state.schedule.take() {
            schedule.cancel();
            info!(
                event = "poller_stopped",
                generation = state.generation,
                "stopped poll loop"
            );
        }
    }

    fn poke(self: &Arc<Self>) {
        self.restart(None);
    }

    /// Replaces the current loop with a fresh generation unless the last fetch succeeded.
    ///
    /// With `expected` set, only the loop of that generation may restart itself.
    fn restart(self: &Arc<Self>, expected: Option<u64>) {
        {
            let mut state = self.lock_state();
            if state.alive || !state.enabled {
                return;
            }
            if expected.is_some_and(|generation| generation != state.generation) {
                debug!(
                    event = "poller_stale_restart",
                    generation = expected,
                    current_generation = state.generation,
                    "superseded loop skipped its restart"
                );
                return;
            }
            if let Some(schedule) = state.schedule.take() {
                schedule.cancel();
            }
        }
        if let Some(metrics) = POLLER_METRICS.get() {
            metrics.restarts_total.inc();
        }
        self.start();
    }

    async fn run(self: Arc<Self>, generation: u64, schedule: CancellationToken) {
        loop {
            let params = {
                let mut state = self.lock_state();
                if !state.enabled || state.generation != generation {
                    return;
                }
                state.alive = false;
                FetchParameters {
                    limit: self.options.limit,
                    since_id: state.since_id.clone(),
                    replies: self.options.replies,
                    geo_hint: self.options.geo_hint,
                }
            };

            let outcome = match self.fetcher.fetch(&params).await {
                Ok(records) => self.on_success(generation, records),
                Err(err) => self.on_failure(generation, &err),
            };

            match outcome {
                TickOutcome::Scheduled(delay) => {
                    tokio::select! {
                        _ = schedule.cancelled() => return,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                TickOutcome::Restart(delay) => {
                    if !delay.is_zero() {
                        tokio::select! {
                            _ = schedule.cancelled() => return,
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                    self.restart(Some(generation));
                    return;
                }
                TickOutcome::Halt => return,
            }
        }
    }

    fn on_success(&self, generation: u64, records: Vec<Record>) -> TickOutcome {
        let catch_up = {
            let mut state = self.lock_state();
            if !state.enabled || state.generation != generation {
                debug!(
                    event = "poller_stale_result",
                    generation,
                    current_generation = state.generation,
                    records = records.len(),
                    "discarding result for superseded generation"
                );
                if let Some(metrics) = POLLER_METRICS.get() {
                    metrics.stale_results_total.inc();
                }
                return TickOutcome::Halt;
            }

            state.alive = true;
            state.consecutive_errors = 0;

            if let Some(newest) = records.first().and_then(|record| Cursor::from_record(record)) {
                match &state.since_id {
                    Some(current) if newest < *current => warn!(
                        event = "poller_cursor_regressed",
                        current = %current,
                        received = %newest,
                        "ignoring cursor older than the one already observed"
                    ),
                    _ => state.since_id = Some(newest),
                }
            }

            self.options.catch_up
                && self
                    .options
                    .limit
                    .is_some_and(|limit| records.len() == limit as usize)
        };

        if let Some(metrics) = POLLER_METRICS.get() {
            metrics.fetches_total.inc();
            metrics.consecutive_errors.set(0);
            metrics.batch_size.set(records.len() as i64);
        }
        debug!(
            event = "poller_batch",
            generation,
            records = records.len(),
            catch_up,
            "fetched batch"
        );

        if !records.is_empty() {
            let handlers = self.lock_handlers().clone();
            for handler in &handlers.batch {
                handler(&records);
            }
            step_through(&records, |record| {
                for handler in &handlers.each {
                    handler(record);
                }
            });
        }

        if catch_up {
            TickOutcome::Scheduled(Duration::ZERO)
        } else {
            TickOutcome::Scheduled(self.options.frequency)
        }
    }

    fn on_failure(&self, generation: u64, err: &StreamError) -> TickOutcome {
        let consecutive_errors = {
            let mut state = self.lock_state();
            if !state.enabled || state.generation != generation {
                return TickOutcome::Halt;
            }
            state.consecutive_errors += 1;
            state.consecutive_errors
        };

        if let Some(metrics) = POLLER_METRICS.get() {
            metrics.fetch_failures_total.inc();
            if err.is_timeout() {
                metrics.timeouts_total.inc();
            }
            metrics.consecutive_errors.set(consecutive_errors as i64);
        }
        warn!(
            event = "poller_fetch_failed",
            generation,
            consecutive_errors,
            timeout = err.is_timeout(),
            error = %err,
            "fetch failed, restarting poll loop"
        );

        // A timeout has already spent its full window waiting.
        let delay = if err.is_timeout() {
            Duration::ZERO
        } else {
            compute_backoff_delay(&self.options.retry_policy, consecutive_errors, generation)
        };
        TickOutcome::Restart(delay)
    }

    fn lock_state(&self) -> MutexGuard<'_, PollerState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_handlers(&self) -> MutexGuard<'_, Handlers> {
        self.handlers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod test_support;
