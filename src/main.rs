// =============================================================================
// clob-mirror — Main Entry Point
// =============================================================================
//
// Startup sequence: parse CLI flags, resolve the source trader's wallet,
// bootstrap from recent activity, then run the market WS reader and the
// periodic reconcile loop side by side until a shutdown signal arrives.
// =============================================================================

mod book_cache;
mod config;
mod dedup;
mod execution;
mod http_client;
mod identity;
mod reconcile;
mod state;
mod telemetry;
mod trade_processor;
mod types;
mod ws_client;

use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::execution::{ExecutionAdapter, SubprocessAdapter, UnsupportedAdapter};
use crate::http_client::MarketClient;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let raw_args: Vec<String> = std::env::args().skip(1).collect();

    if raw_args.iter().any(|a| a == "--help" || a == "-h") {
        println!("{}", config::USAGE);
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg = match config::parse_args(&raw_args) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "configuration error");
            eprintln!("{}\n{}", e, config::USAGE);
            std::process::exit(1);
        }
    };

    info!(
        source = %cfg.source,
        mode = ?cfg.mode,
        profile = ?cfg.profile,
        size_mode = ?cfg.size_mode,
        "clob-mirror starting"
    );

    let client = MarketClient::new(&cfg.profile_base_url, &cfg.activity_base_url, &cfg.book_base_url);

    let wallet = match identity::resolve_wallet(&client, &cfg.source).await {
        Ok(w) => w,
        Err(e) => {
            error!(error = %e, "failed to resolve source trader");
            std::process::exit(1);
        }
    };
    info!(wallet = %wallet, "source trader resolved");

    // The adapter is only ever invoked in live mode — see
    // `trade_processor::process_trade`, which branches on `cfg.mode` before
    // calling it at all. `python-bridge` is the only implemented adapter;
    // any other `--live-exec` value fails closed with an explanatory message.
    let executor: Arc<dyn ExecutionAdapter> = match cfg.live_exec.as_str() {
        "python-bridge" => Arc::new(SubprocessAdapter::new(cfg.execution_bridge.clone())),
        other => Arc::new(UnsupportedAdapter {
            configured_value: other.to_string(),
        }),
    };

    let ws_url = cfg.ws_url.clone();
    let benchmark_seconds = cfg.benchmark_seconds;
    let state = Arc::new(AppState::new(cfg, wallet, client, executor));

    if let Err(e) = reconcile::bootstrap(&state).await {
        warn!(error = %e, "bootstrap pass failed, continuing with an empty seen set");
    }

    let ws_state = Arc::clone(&state);
    let ws_handle = tokio::spawn(async move {
        ws_client::run_market_ws(ws_state, ws_url).await;
    });

    let reconcile_state = Arc::clone(&state);
    let reconcile_handle = tokio::spawn(async move {
        reconcile::run_reconcile_loop(reconcile_state).await;
    });

    if benchmark_seconds > 0 {
        let bench_state = Arc::clone(&state);
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_secs(benchmark_seconds)).await;
            info!(after_secs = benchmark_seconds, "benchmark window elapsed, stopping");
            bench_state.request_stop();
        });
    }

    info!("engine running — press Ctrl+C to stop");
    wait_for_shutdown_signal(&state).await;

    warn!("shutdown signal received — stopping gracefully");
    state.request_stop();
    ws_handle.abort();
    reconcile_handle.abort();

    state.latency.log_summary();
    info!(
        trades_seen = state.seen.len(),
        tracked_assets = state.tracked_assets.len(),
        "clob-mirror shut down complete"
    );
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal(state: &Arc<AppState>) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => return,
            _ = sigterm.recv() => return,
            _ = tokio::time::sleep(std::time::Duration::from_millis(200)) => {
                if state.is_stopped() {
                    return;
                }
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal(state: &Arc<AppState>) {
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => return,
            _ = tokio::time::sleep(std::time::Duration::from_millis(200)) => {
                if state.is_stopped() {
                    return;
                }
            }
        }
    }
}
