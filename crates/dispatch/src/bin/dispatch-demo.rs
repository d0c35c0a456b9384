//! dispatch-demo -- drive one owner-thread dispatcher from concurrent async producers.
//!
//! Spawns an owner thread that pumps its dispatcher, fans work in from
//! several tokio tasks, then cancels, disposes, and prints the dispatcher
//! metrics as JSON.
//!
//! # Usage
//!
//! ```bash
//! # Defaults: 4 producers x 250 items
//! dispatch-demo
//!
//! # Slow items, some of them failing, with a config file
//! dispatch-demo --producers 8 --items 50 --item-delay-ms 2 --fail-every 10 --config affinity.toml
//!
//! # Bounded run with a faster pump wake-up
//! dispatch-demo --items 100000 --run-secs 5 --wait-timeout-ms 20
//!
//! # Via environment variables (profile-aware, .env is honoured)
//! AFFINITY_PROFILE=bench BENCH_DISPATCH_WAIT_TIMEOUT_MS=20 dispatch-demo
//! ```

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use affinity_core::load_dotenv;
use affinity_dispatch::{CancelToken, DispatchConfig, DispatchError, Dispatcher, DispatcherRegistry};

// ── CLI ─────────────────────────────────────────────────────────────

/// Fan work from async producers into a single owner thread.
#[derive(Parser, Debug)]
#[command(name = "dispatch-demo", version, about)]
struct Cli {
    /// Optional TOML config file with a `[dispatcher]` table.
    #[arg(long, env = "AFFINITY_CONFIG")]
    config: Option<String>,

    /// Number of concurrent producer tasks.
    #[arg(long, env = "DEMO_PRODUCERS", default_value_t = 4)]
    producers: usize,

    /// Work items submitted by each producer.
    #[arg(long, env = "DEMO_ITEMS", default_value_t = 250)]
    items: usize,

    /// Simulated work per item in milliseconds.
    #[arg(long, env = "DEMO_ITEM_DELAY_MS", default_value_t = 0)]
    item_delay_ms: u64,

    /// Make every Nth item fail (0 = never).
    #[arg(long, env = "DEMO_FAIL_EVERY", default_value_t = 0)]
    fail_every: usize,

    /// Override the pump loop wait timeout from the loaded config.
    #[arg(long, env = "DEMO_WAIT_TIMEOUT_MS")]
    wait_timeout_ms: Option<u64>,

    /// Stop after this many seconds even if producers are still busy.
    #[arg(long, env = "DEMO_RUN_SECS")]
    run_secs: Option<u64>,
}

impl Cli {
    fn load_config(&self) -> anyhow::Result<DispatchConfig> {
        let mut config = match &self.config {
            Some(path) => DispatchConfig::from_file(path)
                .with_context(|| format!("loading dispatcher config from {path}"))?,
            None => DispatchConfig::from_env(),
        };
        if let Some(ms) = self.wait_timeout_ms {
            config.wait_timeout_ms = ms;
        }
        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Default)]
struct ProducerReport {
    succeeded: usize,
    failed: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    load_dotenv();
    let cli = Cli::parse();
    info!(?cli, "starting dispatch-demo");

    let config = cli.load_config()?;
    config.log_summary();

    let registry = Arc::new(DispatcherRegistry::with_config(config.clone()));
    let token = CancelToken::new();

    // Owner thread: registers itself and pumps until cancelled.
    let owner = {
        let registry = registry.clone();
        let token = token.clone();
        thread::Builder::new()
            .name("dispatch-owner".into())
            .spawn(move || registry.current().run(token))
            .context("spawning owner thread")?
    };
    let dispatcher = registry.dispatcher_for_thread(owner.thread());

    let started = Instant::now();
    let producers: Vec<_> = (0..cli.producers)
        .map(|p| tokio::spawn(produce(dispatcher.clone(), p, cli.items, cli.item_delay_ms, cli.fail_every)))
        .collect();

    let mut totals = ProducerReport::default();
    tokio::select! {
        reports = join_producers(producers) => {
            for report in reports? {
                totals.succeeded += report.succeeded;
                totals.failed += report.failed;
            }
        }
        _ = run_deadline(cli.run_secs) => {
            warn!(run_secs = ?cli.run_secs, "run duration elapsed, abandoning remaining work");
        }
        _ = shutdown_signal() => {
            warn!("shutdown signal received, abandoning remaining work");
        }
    }
    let elapsed = started.elapsed();

    // Stop the pump, then release the dispatcher once the run has exited.
    token.cancel();
    let disposer = dispatcher.clone();
    tokio::task::spawn_blocking(move || disposer.dispose()).await?;
    match owner.join() {
        Ok(result) => result?,
        Err(_) => anyhow::bail!("owner thread panicked"),
    }

    info!(
        succeeded = totals.succeeded,
        failed = totals.failed,
        elapsed_ms = elapsed.as_millis() as u64,
        "dispatch-demo finished"
    );

    let summary = serde_json::json!({
        "dispatcher": dispatcher.id(),
        "config": config,
        "succeeded": totals.succeeded,
        "failed": totals.failed,
        "elapsed_ms": elapsed.as_millis() as u64,
        "metrics": dispatcher.metrics(),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

/// Submit `items` work items and await each result.
async fn produce(
    dispatcher: Arc<Dispatcher>,
    producer: usize,
    items: usize,
    delay_ms: u64,
    fail_every: usize,
) -> ProducerReport {
    let delay = Duration::from_millis(delay_ms);
    let futures: Vec<_> = (1..=items)
        .map(|i| {
            let fail = fail_every > 0 && i % fail_every == 0;
            dispatcher.invoke_fallible(move || {
                if !delay.is_zero() {
                    thread::sleep(delay);
                }
                if fail {
                    Err(format!("producer {producer} item {i}: synthetic failure"))
                } else {
                    Ok(i)
                }
            })
        })
        .collect();

    let mut report = ProducerReport::default();
    for future in futures {
        match future.await {
            Ok(_) => report.succeeded += 1,
            Err(DispatchError::ItemFailure(_)) => report.failed += 1,
            Err(e) => {
                warn!(producer, error = %e, "work item did not complete");
                report.failed += 1;
            }
        }
    }
    report
}

/// Await every producer task, surfacing the first join error.
async fn join_producers(
    handles: Vec<tokio::task::JoinHandle<ProducerReport>>,
) -> Result<Vec<ProducerReport>, tokio::task::JoinError> {
    let mut reports = Vec::with_capacity(handles.len());
    for handle in handles {
        reports.push(handle.await?);
    }
    Ok(reports)
}

/// Resolve after `secs` seconds, or never when no limit is set.
async fn run_deadline(secs: Option<u64>) {
    match secs {
        Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
        None => std::future::pending().await,
    }
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to register SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {},
            _ = sigterm.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.expect("failed to listen for ctrl_c");
    }
}
