// =============================================================================
// Dedup Router & Debounced Refresh — coalesces WS triggers into HTTP pulls
// =============================================================================
//
// Modeled as an explicit state machine with fields
// `{timer_armed, in_flight, pending, last_fetched_at}`, with transitions at
// `request_refresh`, `timer_fire`, `fetch_start`, `fetch_end` — the shape
// the spec calls for instead of the closures-over-shared-state idiom the
// reference engine otherwise favors for periodic loops (see `reconcile.rs`).
// =============================================================================

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;
use tracing::debug;

use crate::types::TriggerMeta;

/// Internal state shared between `request_refresh` (called from the WS
/// reader) and the refresh-timer task (spawned once, reused for the life of
/// the run).
struct RouterState {
    pending: HashSet<String>,
    pending_meta: HashMap<String, TriggerMeta>,
    timer_armed: bool,
    in_flight: bool,
    last_fetched_at_ms: u64,
}

/// Coalesces bursts of `last_trade_price` WS triggers into a single activity
/// pull, while preserving per-trigger latency attribution via `pending_meta`.
pub struct RefreshRouter {
    state: Mutex<RouterState>,
    debounce_ms: u64,
}

/// A snapshot of pending work taken atomically at the moment a pull begins.
pub struct RefreshBatch {
    pub focus_assets: HashSet<String>,
    pub meta: HashMap<String, TriggerMeta>,
}

impl RefreshRouter {
    pub fn new(debounce_ms: u64) -> Self {
        Self {
            state: Mutex::new(RouterState {
                pending: HashSet::new(),
                pending_meta: HashMap::new(),
                timer_armed: false,
                in_flight: false,
                last_fetched_at_ms: 0,
            }),
            debounce_ms,
        }
    }

    /// Register a refresh request for `asset`. Returns `Some(delay_ms)` the
    /// first time a timer needs to be armed for this burst; returns `None`
    /// if a timer is already armed (the caller should not spawn another).
    pub fn request_refresh(&self, asset: &str, meta: TriggerMeta, now_ms: u64) -> Option<u64> {
        let mut state = self.state.lock();
        state.pending.insert(asset.to_string());
        state.pending_meta.entry(asset.to_string()).or_insert(meta);

        if state.timer_armed {
            return None;
        }

        state.timer_armed = true;
        let elapsed = now_ms.saturating_sub(state.last_fetched_at_ms);
        let delay = self.debounce_ms.saturating_sub(elapsed);
        debug!(asset, delay_ms = delay, "refresh timer armed");
        Some(delay)
    }

    /// Called when the refresh timer fires. Returns `None` if a fetch is
    /// already in flight (guards against re-entrant firing); otherwise marks
    /// the router in-flight, disarms the timer, and snapshots+clears the
    /// pending set atomically.
    pub fn fetch_start(&self) -> Option<RefreshBatch> {
        let mut state = self.state.lock();
        if state.in_flight {
            return None;
        }
        state.in_flight = true;
        state.timer_armed = false;

        let focus_assets = std::mem::take(&mut state.pending);
        let meta = std::mem::take(&mut state.pending_meta);
        Some(RefreshBatch { focus_assets, meta })
    }

    /// Called after the activity pull completes. Returns `true` if new
    /// triggers arrived during the pull and a follow-up pull should be
    /// armed immediately.
    pub fn fetch_end(&self, now_ms: u64) -> bool {
        let mut state = self.state.lock();
        state.in_flight = false;
        state.last_fetched_at_ms = now_ms;
        !state.pending.is_empty()
    }
}
