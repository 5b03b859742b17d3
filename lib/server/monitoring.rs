use crate::build_info;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::{counter::Counter, gauge::Gauge};
use prometheus_client::registry::Registry;
use tokio::sync::OnceCell;

/// Registers build metadata as a labeled gauge with value `1`.
pub fn register_build_info_metric(registry: &mut Registry, prefix: &str) {
    let build_info_metric = Family::<BuildInfoLabels, Gauge>::default();
    build_info_metric
        .get_or_create(&BuildInfoLabels {
            service: "river_poller",
            version: build_info::VERSION,
            commit: build_info::short_commit_hash(),
        })
        .set(1);
    let sub_registry = registry.sub_registry_with_prefix(prefix);
    sub_registry.register(
        "build_info",
        "Build identity labels for this process",
        build_info_metric,
    );
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct BuildInfoLabels {
    service: &'static str,
    version: &'static str,
    commit: &'static str,
}

#[derive(Clone)]
pub struct PollerMetrics {
    /// Fetches that returned a batch (possibly empty).
    pub fetches_total: Counter,
    pub fetch_failures_total: Counter,
    /// Subset of failures where the callback window expired.
    pub timeouts_total: Counter,
    /// Self-heal restarts triggered after a failed fetch.
    pub restarts_total: Counter,
    /// Results that arrived for a superseded generation and were dropped.
    pub stale_results_total: Counter,
    pub consecutive_errors: Gauge,
    pub batch_size: Gauge,
}

impl PollerMetrics {
    fn init() -> Self {
        Self {
            fetches_total: Counter::default(),
            fetch_failures_total: Counter::default(),
            timeouts_total: Counter::default(),
            restarts_total: Counter::default(),
            stale_results_total: Counter::default(),
            consecutive_errors: Gauge::default(),
            batch_size: Gauge::default(),
        }
    }

    pub fn register(registry: &mut Registry, prefix: &str) -> Self {
        let metrics = Self::init();
        let sub_registry = registry.sub_registry_with_prefix(prefix);
        sub_registry.register(
            "fetches",
            "Total number of completed stream fetches",
            metrics.fetches_total.clone(),
        );
        sub_registry.register(
            "fetch_failures",
            "Total number of failed stream fetches",
            metrics.fetch_failures_total.clone(),
        );
        sub_registry.register(
            "timeouts",
            "Total number of fetches abandoned after the callback window",
            metrics.timeouts_total.clone(),
        );
        sub_registry.register(
            "restarts",
            "Total number of self-heal restarts of the poll loop",
            metrics.restarts_total.clone(),
        );
        sub_registry.register(
            "stale_results",
            "Total number of fetch results dropped for a superseded generation",
            metrics.stale_results_total.clone(),
        );
        sub_registry.register(
            "consecutive_errors",
            "Failed fetches since the last success",
            metrics.consecutive_errors.clone(),
        );
        sub_registry.register(
            "batch_size",
            "Number of records in the latest batch",
            metrics.batch_size.clone(),
        );
        metrics
    }
}

pub static POLLER_METRICS: OnceCell<PollerMetrics> = OnceCell::const_new();

#[derive(Clone)]
pub struct QueueMetrics {
    pub delivered_total: Counter,
    pub reused_total: Counter,
    pub stale_completions_total: Counter,
    pub pending: Gauge,
    pub history_len: Gauge,
}

impl QueueMetrics {
    fn init() -> Self {
        Self {
            delivered_total: Counter::default(),
            reused_total: Counter::default(),
            stale_completions_total: Counter::default(),
            pending: Gauge::default(),
            history_len: Gauge::default(),
        }
    }

    pub fn register(registry: &mut Registry, prefix: &str) -> Self {
        let metrics = Self::init();
        let sub_registry = registry.sub_registry_with_prefix(prefix);
        sub_registry.register(
            "delivered",
            "Total number of records handed to the consumer",
            metrics.delivered_total.clone(),
        );
        sub_registry.register(
            "reused",
            "Total number of idle replays drawn from history",
            metrics.reused_total.clone(),
        );
        sub_registry.register(
            "stale_completions",
            "Total number of completion signals ignored for an outdated lock token",
            metrics.stale_completions_total.clone(),
        );
        sub_registry.register(
            "pending",
            "Records waiting for delivery",
            metrics.pending.clone(),
        );
        sub_registry.register(
            "history_len",
            "Records currently held in the replay history",
            metrics.history_len.clone(),
        );
        metrics
    }
}

pub static QUEUE_METRICS: OnceCell<QueueMetrics> = OnceCell::const_new();
