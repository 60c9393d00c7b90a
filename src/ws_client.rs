// =============================================================================
// WebSocket Client — market channel subscribe, event parsing, reconnect
// =============================================================================
//
// Connects to the market channel, subscribes with the current
// `TrackedAssetSet`, and handles two event types: `book` (updates the book
// cache) and `last_trade_price` (routes into the debounced refresh router).
// On disconnect, reconnects after a fixed 3s delay — no exponential backoff
// in v1, matching the per-stream reconnect loops in the reference engine's
// `market_data` module, just with a longer, spec-mandated delay.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::state::AppState;
use crate::types::{now_ms, parse_numeric, BookSnapshot, TriggerMeta};

const RECONNECT_DELAY_SECS: u64 = 3;

/// Run the market WS client until `state.stopped`, reconnecting on every
/// disconnect after [`RECONNECT_DELAY_SECS`]. Takes the resubscribe receiver
/// once and holds it across reconnects, so a tracked-asset-set growth signal
/// raised while disconnected is simply replayed (harmlessly — the next
/// connect's initial subscribe frame already carries the full set).
pub async fn run_market_ws(state: Arc<AppState>, ws_url: String) {
    let mut resubscribe_rx = state.take_resubscribe_rx();

    while !state.is_stopped() {
        if let Err(e) = run_once(&state, &ws_url, &mut resubscribe_rx).await {
            warn!(error = %e, "market WS connection error");
        }

        if state.is_stopped() {
            return;
        }
        info!(delay_secs = RECONNECT_DELAY_SECS, "reconnecting market WS");
        tokio::time::sleep(Duration::from_secs(RECONNECT_DELAY_SECS)).await;
    }
}

async fn run_once(
    state: &Arc<AppState>,
    ws_url: &str,
    resubscribe_rx: &mut mpsc::UnboundedReceiver<()>,
) -> anyhow::Result<()> {
    info!(url = %ws_url, "connecting to market WebSocket");
    let (ws_stream, _response) = connect_async(ws_url).await?;
    info!("market WebSocket connected");

    let (mut write, mut read) = ws_stream.split();

    let subscribe_frame = build_subscribe_frame(&state.tracked_assets.snapshot());
    write.send(Message::Text(subscribe_frame)).await?;

    // Drop signals queued while disconnected — the frame just sent above
    // already carries every asset tracked so far.
    while resubscribe_rx.try_recv().is_ok() {}

    loop {
        if state.is_stopped() {
            return Ok(());
        }

        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => handle_event(state, &text),
                    Some(Ok(Message::Close(_))) => {
                        warn!("market WebSocket closed by server");
                        return Ok(());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        error!(error = %e, "market WebSocket read error");
                        return Err(e.into());
                    }
                    None => {
                        warn!("market WebSocket stream ended");
                        return Ok(());
                    }
                }
            }
            Some(()) = resubscribe_rx.recv() => {
                let frame = build_subscribe_frame(&state.tracked_assets.snapshot());
                write.send(Message::Text(frame)).await?;
                info!("re-subscribed with expanded tracked asset set");
            }
        }
    }
}

/// Build the `{assets_ids: [...], type: "MARKET"}` subscribe frame.
pub fn build_subscribe_frame(assets: &[String]) -> String {
    serde_json::json!({
        "assets_ids": assets,
        "type": "MARKET",
    })
    .to_string()
}

fn handle_event(state: &Arc<AppState>, text: &str) {
    let root: serde_json::Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            debug!(error = %e, "dropped malformed WS frame");
            return;
        }
    };

    let event_type = match root.get("event_type").and_then(|v| v.as_str()) {
        Some(t) => t,
        None => return,
    };

    match event_type {
        "book" => handle_book_event(state, &root),
        "last_trade_price" => handle_trade_price_event(state, &root),
        _ => debug!(event_type, "ignored unrecognized WS event type"),
    }
}

fn handle_book_event(state: &Arc<AppState>, root: &serde_json::Value) {
    let asset_id = match root.get("asset_id").and_then(|v| v.as_str()) {
        Some(a) => a,
        None => return,
    };

    let best_bid = root
        .get("bids")
        .and_then(|v| v.as_array())
        .and_then(|a| a.first())
        .and_then(|lvl| lvl.get("price"))
        .and_then(parse_numeric);
    let best_ask = root
        .get("asks")
        .and_then(|v| v.as_array())
        .and_then(|a| a.first())
        .and_then(|lvl| lvl.get("price"))
        .and_then(parse_numeric);

    state.book_cache.update(
        asset_id,
        BookSnapshot {
            best_bid,
            best_ask,
            updated_at_ms: now_ms(),
        },
    );
}

/// Candidate fields for the WS trade timestamp, tried in order. The
/// server's canonical field is undocumented upstream; the first non-empty
/// one is accepted (see DESIGN.md for the resolved open question).
const TIMESTAMP_FIELDS: [&str; 4] = ["timestamp", "ts", "created_at", "createdAt"];

fn handle_trade_price_event(state: &Arc<AppState>, root: &serde_json::Value) {
    let asset_id = match root.get("asset_id").and_then(|v| v.as_str()) {
        Some(a) => a,
        None => return,
    };

    if !state.tracked_assets.contains(asset_id) {
        return;
    }

    let now = now_ms();
    if !state.asset_cooldown_elapsed(asset_id, now) {
        return;
    }

    let event_ts_ms = extract_event_timestamp(root);
    let meta = TriggerMeta {
        event_ts_ms,
        recv_ts_ms: Some(now),
    };

    if let Some(delay_ms) = state.refresh_router.request_refresh(asset_id, meta, now) {
        let state = Arc::clone(state);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            crate::reconcile::run_activity_refresh(&state).await;
        });
    }
}

fn extract_event_timestamp(root: &serde_json::Value) -> Option<u64> {
    for field in TIMESTAMP_FIELDS {
        if let Some(raw) = root.get(field).and_then(parse_numeric) {
            return Some(crate::types::normalize_to_ms(raw));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_frame_carries_asset_list_and_type() {
        let frame = build_subscribe_frame(&["A".to_string(), "B".to_string()]);
        let v: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(v["type"], "MARKET");
        assert_eq!(v["assets_ids"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn event_timestamp_prefers_first_present_field() {
        let root = serde_json::json!({ "ts": 1700000000, "created_at": 1 });
        assert_eq!(extract_event_timestamp(&root), Some(1_700_000_000_000));
    }

    #[test]
    fn event_timestamp_falls_back_through_candidates() {
        let root = serde_json::json!({ "createdAt": "1700000000000" });
        assert_eq!(extract_event_timestamp(&root), Some(1_700_000_000_000));
    }

    #[test]
    fn event_timestamp_none_when_no_candidate_present() {
        let root = serde_json::json!({ "asset_id": "A" });
        assert_eq!(extract_event_timestamp(&root), None);
    }
}
