// =============================================================================
// Trade Processor — filter, price, size, and dispatch a single trade
// =============================================================================
//
// Every rejection here is silent (a `debug!` log, not an error) — a filtered
// trade is the expected, common case, not a failure. Only the execution
// adapter's own failure is logged at `warn!`.
// =============================================================================

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::execution::ExecutionAdapter;
use crate::http_client::MarketClient;
use crate::state::AppState;
use crate::types::{now_ms, DispatchReason, LatencySample, Side, TradeItem, TriggerMeta};

/// Why a trade was rejected — used only for structured logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    InvalidTrade,
    PriceOutOfBand,
    Stale,
    SpreadTooWide,
    MissingBookSide,
    NoSourceNotional,
    NonPositiveCopyNotional,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::InvalidTrade => "invalid_trade",
            Self::PriceOutOfBand => "price_out_of_band",
            Self::Stale => "stale",
            Self::SpreadTooWide => "spread_too_wide",
            Self::MissingBookSide => "missing_book_side",
            Self::NoSourceNotional => "no_source_notional",
            Self::NonPositiveCopyNotional => "non_positive_copy_notional",
        };
        write!(f, "{s}")
    }
}

/// The priced-and-sized mirror order, ready for dispatch.
#[derive(Debug, Clone, Copy)]
pub struct MirrorOrder {
    pub px: f64,
    pub src_usdc: f64,
    pub copy_usdc: f64,
    pub shares: f64,
    pub lag_ms: u64,
    pub spread: Option<f64>,
}

/// Process one `TradeItem`: validate, filter, price, size, and — if it
/// survives every gate — dispatch through the execution adapter (live mode)
/// or record a synthetic paper fill (paper mode).
///
/// Returns `Ok(Some(order))` on dispatch, `Ok(None)` on a silent filter
/// rejection, consistent with "every failure here is a reject, not an
/// error" from the spec.
pub async fn process_trade(
    state: &Arc<AppState>,
    client: &MarketClient,
    executor: &dyn ExecutionAdapter,
    item: &TradeItem,
    reason: DispatchReason,
    meta: TriggerMeta,
) -> Option<MirrorOrder> {
    let cfg = &state.config;

    // 1. Validate side + asset.
    if item.asset.is_empty() {
        reject(item, RejectReason::InvalidTrade);
        return None;
    }

    // 2. Price accept-window.
    if item.price < cfg.min_price || item.price > cfg.max_price {
        reject(item, RejectReason::PriceOutOfBand);
        return None;
    }

    // 3. Lag.
    let recv_ts = meta.recv_ts_ms.unwrap_or_else(now_ms);
    let event_ts = meta.event_ts_ms;
    let lag_ms = event_ts.map(|e| recv_ts.saturating_sub(e)).unwrap_or(0);
    if let Some(e) = event_ts {
        if recv_ts.saturating_sub(e) > cfg.max_lag_ms {
            reject(item, RejectReason::Stale);
            return None;
        }
    }

    // 4. Top-of-book + spread filter.
    let book = state.book_cache.top_of_book(client, &item.asset).await;
    if let Some(spread) = book.spread() {
        if spread > cfg.max_spread {
            reject(item, RejectReason::SpreadTooWide);
            return None;
        }
    }

    // 5. Price the mirror order.
    let raw_px = match item.side {
        Side::Buy => match book.best_ask {
            Some(ask) => (cfg.max_price).min(ask + cfg.cross_tick),
            None => {
                reject(item, RejectReason::MissingBookSide);
                return None;
            }
        },
        Side::Sell => match book.best_bid {
            Some(bid) => (cfg.min_price).max(bid - cfg.cross_tick),
            None => {
                reject(item, RejectReason::MissingBookSide);
                return None;
            }
        },
    };
    let px = round_to_tick(raw_px.clamp(cfg.min_price, cfg.max_price));

    // 6. Source notional.
    let src_usdc = match item.usdc_size {
        Some(u) if u > 0.0 => u,
        _ if item.size > 0.0 => item.size * px,
        _ => {
            reject(item, RejectReason::NoSourceNotional);
            return None;
        }
    };

    // 7. Copy notional.
    let copy_usdc = match cfg.size_mode {
        crate::config::SizeMode::Percent => {
            src_usdc * (cfg.my_balance_usdc / cfg.source_balance_usdc)
        }
        crate::config::SizeMode::Fixed => cfg.fixed_order_usdc,
    };
    if copy_usdc <= 0.0 {
        reject(item, RejectReason::NonPositiveCopyNotional);
        return None;
    }

    // 8. Shares.
    let shares = copy_usdc / px;

    // 9. Decision timestamp.
    let decision_ts = now_ms();

    let order = MirrorOrder {
        px,
        src_usdc,
        copy_usdc,
        shares,
        lag_ms,
        spread: book.spread(),
    };

    // 10. Dispatch.
    let (submit_ts, ack_ts) = match cfg.mode {
        crate::config::Mode::Paper => {
            info!(
                reason = %reason,
                side = %item.side,
                token = %truncate_token(&item.asset),
                px = order.px,
                src_px = item.price,
                src_usdc = order.src_usdc,
                copy_usdc = order.copy_usdc,
                shares = order.shares,
                lag_ms = order.lag_ms,
                spread = ?order.spread,
                "[PAPER] mirror order intent"
            );
            (decision_ts, now_ms())
        }
        crate::config::Mode::Live => {
            let submit_ts = now_ms();
            let outcome = executor
                .place_order(&item.asset, item.side, order.px, order.shares)
                .await;
            let ack_ts = now_ms();

            if outcome.success {
                info!(
                    reason = %reason,
                    side = %item.side,
                    token = %truncate_token(&item.asset),
                    px = order.px,
                    src_px = item.price,
                    src_usdc = order.src_usdc,
                    copy_usdc = order.copy_usdc,
                    shares = order.shares,
                    lag_ms = order.lag_ms,
                    spread = ?order.spread,
                    message = %outcome.message,
                    "[LIVE] mirror order placed"
                );
            } else {
                warn!(
                    reason = %reason,
                    side = %item.side,
                    token = %truncate_token(&item.asset),
                    message = %outcome.message,
                    "[LIVE FAIL] mirror order rejected"
                );
            }
            (submit_ts, ack_ts)
        }
    };

    // 11. Latency sample.
    let sample = LatencySample {
        event_ts,
        recv_ts,
        decision_ts,
        submit_ts,
        ack_ts,
    };
    let count = state.latency.record(sample);
    if cfg.stats_every > 0 && count.is_multiple_of(cfg.stats_every) {
        state.latency.log_summary();
    }

    state
        .dispatched_count
        .fetch_add(1, std::sync::atomic::Ordering::Relaxed);

    Some(order)
}

fn reject(item: &TradeItem, reason: RejectReason) {
    debug!(
        asset = %truncate_token(&item.asset),
        side = %item.side,
        reason = %reason,
        "trade rejected by filter"
    );
}

fn truncate_token(asset: &str) -> String {
    if asset.len() <= 10 {
        asset.to_string()
    } else {
        format!("{}..{}", &asset[..6], &asset[asset.len() - 4..])
    }
}

/// Round to the nearest cent (tick size 0.01).
fn round_to_tick(px: f64) -> f64 {
    (px * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, Mode, SizeMode};
    use crate::execution::{ExecutionAdapter, ExecutionOutcome};
    use crate::types::{BookSnapshot, Side};
    use async_trait::async_trait;

    struct NoopExecutor;

    #[async_trait]
    impl ExecutionAdapter for NoopExecutor {
        async fn place_order(&self, _token_id: &str, _side: Side, _price: f64, _shares: f64) -> ExecutionOutcome {
            ExecutionOutcome {
                success: true,
                message: "ok".to_string(),
            }
        }
    }

    fn base_config() -> Config {
        let mut cfg = Config::default();
        cfg.mode = Mode::Paper;
        cfg.size_mode = SizeMode::Percent;
        cfg.my_balance_usdc = 100.0;
        cfg.source_balance_usdc = 20000.0;
        cfg.cross_tick = 0.01;
        cfg.min_price = 0.01;
        cfg.max_price = 0.99;
        cfg.max_spread = 0.05;
        cfg.max_lag_ms = 1500;
        cfg
    }

    fn trade(side: Side, price: f64, size: f64, usdc: Option<f64>, ts_ms: u64) -> TradeItem {
        TradeItem {
            transaction_hash: "0xabc".to_string(),
            asset: "asset-1".to_string(),
            side,
            timestamp_ms: ts_ms,
            price,
            size,
            usdc_size: usdc,
        }
    }

    async fn run(
        state: &Arc<AppState>,
        item: &TradeItem,
        meta: TriggerMeta,
    ) -> Option<MirrorOrder> {
        let client = MarketClient::new("http://x", "http://x", "http://x");
        let executor = NoopExecutor;
        process_trade(
            state,
            &client,
            &executor,
            item,
            DispatchReason::WsTrigger,
            meta,
        )
        .await
    }

    #[tokio::test]
    async fn s1_percent_paper_buy_fresh() {
        let cfg = base_config();
        let state = Arc::new(AppState::new(cfg, "0xabc".to_string(), MarketClient::new("http://x", "http://x", "http://x"), Arc::new(NoopExecutor)));
        state.book_cache.update(
            "asset-1",
            BookSnapshot {
                best_bid: Some(0.50),
                best_ask: Some(0.52),
                updated_at_ms: now_ms(),
            },
        );

        let now = now_ms();
        let item = trade(Side::Buy, 0.51, 0.0, Some(2000.0), now.saturating_sub(100));
        let meta = TriggerMeta {
            event_ts_ms: Some(now.saturating_sub(100)),
            recv_ts_ms: Some(now),
        };

        let order = run(&state, &item, meta).await.expect("should dispatch");
        assert!((order.px - 0.53).abs() < 1e-9);
        assert!((order.copy_usdc - 10.0).abs() < 1e-9);
        assert!((order.shares - (10.0 / 0.53)).abs() < 1e-3);
    }

    #[tokio::test]
    async fn s2_spread_filter_rejects() {
        let mut cfg = base_config();
        cfg.max_spread = 0.03;
        let state = Arc::new(AppState::new(cfg, "0xabc".to_string(), MarketClient::new("http://x", "http://x", "http://x"), Arc::new(NoopExecutor)));
        state.book_cache.update(
            "asset-1",
            BookSnapshot {
                best_bid: Some(0.40),
                best_ask: Some(0.60),
                updated_at_ms: now_ms(),
            },
        );

        let now = now_ms();
        let item = trade(Side::Buy, 0.51, 0.0, Some(2000.0), now);
        let meta = TriggerMeta {
            event_ts_ms: Some(now),
            recv_ts_ms: Some(now),
        };

        assert!(run(&state, &item, meta).await.is_none());
    }

    #[tokio::test]
    async fn s3_stale_event_rejects() {
        let mut cfg = base_config();
        cfg.max_lag_ms = 1200;
        let state = Arc::new(AppState::new(cfg, "0xabc".to_string(), MarketClient::new("http://x", "http://x", "http://x"), Arc::new(NoopExecutor)));
        state.book_cache.update(
            "asset-1",
            BookSnapshot {
                best_bid: Some(0.50),
                best_ask: Some(0.52),
                updated_at_ms: now_ms(),
            },
        );

        let now = now_ms();
        let item = trade(Side::Buy, 0.51, 0.0, Some(2000.0), now.saturating_sub(5000));
        let meta = TriggerMeta {
            event_ts_ms: Some(now.saturating_sub(5000)),
            recv_ts_ms: Some(now),
        };

        assert!(run(&state, &item, meta).await.is_none());
    }

    #[tokio::test]
    async fn s4_fixed_sell_bid_only_cross() {
        let mut cfg = base_config();
        cfg.size_mode = SizeMode::Fixed;
        cfg.fixed_order_usdc = 1.0;
        let state = Arc::new(AppState::new(cfg, "0xabc".to_string(), MarketClient::new("http://x", "http://x", "http://x"), Arc::new(NoopExecutor)));
        state.book_cache.update(
            "asset-1",
            BookSnapshot {
                best_bid: Some(0.70),
                best_ask: Some(0.72),
                updated_at_ms: now_ms(),
            },
        );

        let now = now_ms();
        let item = trade(Side::Sell, 0.71, 5.0, Some(0.0), now);
        let meta = TriggerMeta {
            event_ts_ms: Some(now),
            recv_ts_ms: Some(now),
        };

        let order = run(&state, &item, meta).await.expect("should dispatch");
        assert!((order.px - 0.69).abs() < 1e-9);
        assert!((order.copy_usdc - 1.0).abs() < 1e-9);
        assert!((order.shares - (1.0 / 0.69)).abs() < 1e-3);
        assert!((order.src_usdc - 3.45).abs() < 1e-9);
    }

    #[tokio::test]
    async fn missing_book_side_rejects() {
        let cfg = base_config();
        let state = Arc::new(AppState::new(cfg, "0xabc".to_string(), MarketClient::new("http://x", "http://x", "http://x"), Arc::new(NoopExecutor)));
        state.book_cache.update(
            "asset-1",
            BookSnapshot {
                best_bid: None,
                best_ask: None,
                updated_at_ms: now_ms(),
            },
        );

        let now = now_ms();
        let item = trade(Side::Buy, 0.51, 0.0, Some(2000.0), now);
        let meta = TriggerMeta {
            event_ts_ms: Some(now),
            recv_ts_ms: Some(now),
        };

        assert!(run(&state, &item, meta).await.is_none());
    }

    #[tokio::test]
    async fn price_out_of_band_rejects() {
        let cfg = base_config();
        let state = Arc::new(AppState::new(cfg, "0xabc".to_string(), MarketClient::new("http://x", "http://x", "http://x"), Arc::new(NoopExecutor)));
        state.book_cache.update(
            "asset-1",
            BookSnapshot {
                best_bid: Some(0.50),
                best_ask: Some(0.52),
                updated_at_ms: now_ms(),
            },
        );

        let now = now_ms();
        let item = trade(Side::Buy, 0.999, 0.0, Some(2000.0), now);
        let meta = TriggerMeta {
            event_ts_ms: Some(now),
            recv_ts_ms: Some(now),
        };

        assert!(run(&state, &item, meta).await.is_none());
    }
}
