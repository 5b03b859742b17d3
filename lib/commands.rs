use crate::{
    cli::{AccountArgs, CommonArgs, MetaArgs, PollArgs},
    config::Config,
    context::{classify, ClassifyOptions, Context},
    logging::{format_error_report, init_logging},
    poller::{Poller, PollerOptions, RetryPolicy},
    queue::{Completion, QueueOptions},
    server::{register_metrics, setup_server_with_addr},
    state::AppState,
    stream::{
        AccountMetaParameters, AccountSource, Cursor, MetaParameters, Record, StreamError,
        StreamIdentity, StreamSource,
    },
    transport::Dispatcher,
};
use dotenv::dotenv;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const SERVICE: &str = "river_poller";

/// Everything `poll` needs, resolved from flags over environment over defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollPlan {
    pub identity: StreamIdentity,
    pub api_url: String,
    pub timeout: Duration,
    pub poller: PollerOptions,
    pub queue: QueueOptions,
    pub classify: ClassifyOptions,
    pub pace: Duration,
    pub metrics_bind: Option<SocketAddr>,
}

pub fn resolve_poll_plan(args: &PollArgs, config: &Config) -> Result<PollPlan, String> {
    let identity = resolve_identity(args.stream.as_deref(), config)?;
    let api_url = resolve_api_url(&args.common, config);
    let timeout = resolve_timeout(&args.common, config)?;

    if args.limit == Some(0) {
        return Err("--limit must be > 0, got 0".to_string());
    }
    if args.catch_up && args.limit.is_none() {
        return Err("--catch-up requires --limit".to_string());
    }
    let frequency = match args.frequency {
        Some(0) => return Err("--frequency must be > 0, got 0".to_string()),
        Some(secs) => Duration::from_secs(secs),
        None => config.frequency,
    };
    let history_timeout = match args.history_timeout {
        Some(0) => return Err("--history-timeout must be > 0, got 0".to_string()),
        Some(secs) => Some(Duration::from_secs(secs)),
        None => None,
    };
    let since_id = match args.since_id.as_deref().map(str::trim) {
        Some("") => return Err("--since-id must not be empty".to_string()),
        Some(raw) => Some(Cursor::new(raw)),
        None => None,
    };
    let metrics_bind = args
        .metrics_bind
        .as_deref()
        .map(|raw| {
            raw.parse::<SocketAddr>()
                .map_err(|err| format!("invalid --metrics-bind address `{raw}`: {err}"))
        })
        .transpose()?;

    let defaults = RetryPolicy::default();
    Ok(PollPlan {
        identity,
        api_url,
        timeout,
        poller: PollerOptions {
            limit: args.limit,
            since_id,
            replies: args.replies,
            geo_hint: args.geo_hint,
            frequency,
            catch_up: args.catch_up,
            retry_policy: RetryPolicy {
                max_backoff: frequency.max(defaults.initial_backoff),
                ..defaults
            },
        },
        queue: QueueOptions {
            history_size: args.history_size,
            history_timeout,
        },
        classify: ClassifyOptions {
            retweeted_by: !args.no_retweet_resolution,
            message_network: config.message_network.clone(),
        },
        pace: Duration::from_millis(args.pace_ms),
        metrics_bind,
    })
}

fn resolve_identity(raw: Option<&str>, config: &Config) -> Result<StreamIdentity, String> {
    match raw {
        Some(raw) => raw
            .parse::<StreamIdentity>()
            .map_err(|err| format!("{err}; expected `account/stream`")),
        None => config.require_stream().cloned().map_err(|err| err.to_string()),
    }
}

fn resolve_api_url(common: &CommonArgs, config: &Config) -> String {
    if let Some(value) = &common.api_url {
        return value.clone();
    }
    config.api_url.clone()
}

fn resolve_timeout(common: &CommonArgs, config: &Config) -> Result<Duration, String> {
    match common.timeout_ms {
        Some(0) => Err("--timeout-ms must be > 0, got 0".to_string()),
        Some(ms) => Ok(Duration::from_millis(ms)),
        None => Ok(config.timeout),
    }
}

/// The JSON line printed for one delivered record.
pub fn render_context(context: &Context) -> Value {
    json!({
        "source": context.source,
        "retweet": context.retweet,
        "retweeted_by": context.retweeted_by,
        "created_at": context.created_at().map(|at| at.to_rfc3339()),
        "record": context.record.as_ref(),
    })
}

fn load_config() -> Result<Config, i32> {
    Config::from_env().map_err(|err| {
        error!(event = "config_invalid", error = %err, "configuration rejected");
        eprintln!("{err}");
        2
    })
}

/// Cancels `shutdown` on SIGTERM or SIGINT.
async fn handle_shutdown_signals(shutdown: CancellationToken) {
    let (mut sigterm, mut sigint) =
        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
            (Err(err), _) | (_, Err(err)) => {
                error!(event = "signal_handler_failed", error = %err);
                return;
            }
        };

    tokio::select! {
        _ = sigterm.recv() => {
            info!(event = "shutdown_signal", signal = "SIGTERM", "SIGTERM received, shutting down");
        }
        _ = sigint.recv() => {
            info!(event = "shutdown_signal", signal = "SIGINT", "SIGINT received, shutting down");
        }
        _ = shutdown.cancelled() => return,
    }

    shutdown.cancel();
}

/// Prints each delivered record and acknowledges it once the pacing delay has passed.
///
/// Returns the number of records printed.
async fn print_records(
    deliveries: flume::Receiver<(Record, Completion)>,
    options: ClassifyOptions,
    pace: Duration,
    shutdown: CancellationToken,
) -> u64 {
    let mut printed = 0u64;
    loop {
        let delivery = tokio::select! {
            _ = shutdown.cancelled() => break,
            delivery = deliveries.recv_async() => delivery,
        };
        let Ok((record, completion)) = delivery else {
            break;
        };

        let context = classify(&record, &options);
        if context.known {
            println!("{}", render_context(&context));
            printed += 1;
            if !pace.is_zero() {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(pace) => {}
                }
            }
        } else {
            debug!(
                event = "record_skipped",
                shape = ?context.shape,
                "skipping record with unrecognised shape"
            );
        }
        completion.done();
    }
    printed
}

/// Polls one stream until SIGINT/SIGTERM.
pub async fn run_poll(args: PollArgs) -> i32 {
    dotenv().ok();

    let logging_context = init_logging(SERVICE, "poll", &args.common.log_level);
    let run_span = tracing::info_span!(
        "poller_run",
        service = %logging_context.service,
        environment = %logging_context.environment,
        mode = %logging_context.mode,
        run_id = %logging_context.run_id,
        build_version = %logging_context.build_version,
        build_commit = %logging_context.build_commit
    );
    let _run_guard = run_span.enter();

    let config = match load_config() {
        Ok(config) => config,
        Err(code) => return code,
    };
    let plan = match resolve_poll_plan(&args, &config) {
        Ok(plan) => plan,
        Err(err) => {
            eprintln!("{err}");
            return 2;
        }
    };
    info!(
        event = "poll_starting",
        stream = %plan.identity,
        api_url = %plan.api_url,
        frequency_secs = plan.poller.frequency.as_secs(),
        history_size = plan.queue.history_size,
        "starting poll run"
    );

    let shutdown = CancellationToken::new();
    let app_state = Arc::new(AppState::new(shutdown.clone()));
    let metrics_server_handle = match plan.metrics_bind {
        Some(addr) => match setup_server_with_addr(app_state.clone(), addr).await {
            Ok(handle) => Some(handle),
            Err(err) => {
                let error_report = format_error_report(&err);
                error!(
                    event = "metrics_server_start_failed",
                    bind = %addr,
                    error = %err,
                    error_report = %error_report,
                    "failed to start metrics endpoint"
                );
                eprintln!("failed to start metrics endpoint on {addr}: {err}");
                return 1;
            }
        },
        None => {
            register_metrics(&app_state).await;
            None
        }
    };
    let signals_handle = tokio::spawn(handle_shutdown_signals(shutdown.clone()));

    let dispatcher = Arc::new(Dispatcher::http(plan.timeout));
    let source = StreamSource::new(plan.identity.clone(), plan.api_url.clone(), dispatcher);
    let poller = Poller::new(source, plan.poller.clone());

    let (sender, receiver) = flume::bounded::<(Record, Completion)>(1);
    let queue = poller.queue(
        move |record, completion| {
            if let Err(err) = sender.try_send((record, completion)) {
                warn!(
                    event = "delivery_dropped",
                    error = %err,
                    "printer is not accepting deliveries"
                );
            }
        },
        plan.queue,
    );
    let printer_handle = tokio::spawn(print_records(
        receiver,
        plan.classify.clone(),
        plan.pace,
        shutdown.clone(),
    ));

    poller.start();

    let printed = match printer_handle.await {
        Ok(printed) => printed,
        Err(err) => {
            error!(event = "printer_task_failed", error = %err, "printer task failed");
            0
        }
    };

    poller.stop();
    drop(queue);
    shutdown.cancel();
    signals_handle.abort();
    if let Some(handle) = metrics_server_handle {
        let _ = handle.await;
    }

    let snapshot = poller.snapshot();
    info!(
        event = "poll_complete",
        printed,
        since_id = snapshot.since_id.as_ref().map(ToString::to_string),
        consecutive_errors = snapshot.consecutive_errors,
        "poll run stopped"
    );
    0
}

fn report_stream_error(event: &'static str, err: &StreamError) -> i32 {
    let error_report = format_error_report(err);
    error!(
        event,
        error = %err,
        timeout = err.is_timeout(),
        error_report = %error_report,
        "request failed"
    );
    eprintln!("{err}");
    1
}

fn print_document(document: &Value) -> i32 {
    match serde_json::to_string_pretty(document) {
        Ok(rendered) => {
            println!("{rendered}");
            0
        }
        Err(err) => {
            error!(event = "render_failed", error = %err);
            1
        }
    }
}

/// Fetches and prints a stream's meta document.
pub async fn run_meta(args: MetaArgs) -> i32 {
    dotenv().ok();
    init_logging(SERVICE, "meta", &args.common.log_level);

    let config = match load_config() {
        Ok(config) => config,
        Err(code) => return code,
    };
    let resolved = resolve_identity(args.stream.as_deref(), &config)
        .and_then(|identity| Ok((identity, resolve_timeout(&args.common, &config)?)));
    let (identity, timeout) = match resolved {
        Ok(value) => value,
        Err(err) => {
            eprintln!("{err}");
            return 2;
        }
    };

    let source = StreamSource::new(
        identity,
        resolve_api_url(&args.common, &config),
        Arc::new(Dispatcher::http(timeout)),
    );
    let params = MetaParameters {
        disregard: args.disregard,
    };
    match source.meta(&params).await {
        Ok(document) => print_document(&document),
        Err(err) => report_stream_error("stream_meta_failed", &err),
    }
}

/// Fetches and prints an account's meta document.
pub async fn run_account(args: AccountArgs) -> i32 {
    dotenv().ok();
    init_logging(SERVICE, "account", &args.common.log_level);

    let config = match load_config() {
        Ok(config) => config,
        Err(code) => return code,
    };
    if args.account.trim().is_empty() {
        eprintln!("account must not be empty");
        return 2;
    }
    let timeout = match resolve_timeout(&args.common, &config) {
        Ok(timeout) => timeout,
        Err(err) => {
            eprintln!("{err}");
            return 2;
        }
    };

    let account = AccountSource::new(
        args.account,
        resolve_api_url(&args.common, &config),
        Arc::new(Dispatcher::http(timeout)),
    );
    let params = AccountMetaParameters {
        quick_stats: args.quick_stats,
        streams: args.streams,
    };
    match account.meta(&params).await {
        Ok(document) => print_document(&document),
        Err(err) => report_stream_error("account_meta_failed", &err),
    }
}
