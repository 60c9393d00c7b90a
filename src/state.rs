// =============================================================================
// Central Application State — shared across the WS reader, reconcile loop,
// refresh router, and trade processor
// =============================================================================
//
// Ties together the five collections the spec calls out as shared mutable
// state: SeenSet, TrackedAssetSet, BookCache, PendingRefresh (the
// `RefreshRouter`), and LatencySamples. Each is independently locked with
// `parking_lot`, matching the reference engine's choice of fine-grained
// `RwLock`s over a single coarse lock.
// =============================================================================

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::sync::Semaphore;

use crate::book_cache::BookCache;
use crate::config::Config;
use crate::dedup::RefreshRouter;
use crate::execution::ExecutionAdapter;
use crate::http_client::MarketClient;
use crate::telemetry::LatencyRing;

/// Monotonically-growing set of trade-identity keys already dispatched.
pub struct SeenSet {
    inner: RwLock<HashSet<String>>,
}

impl SeenSet {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashSet::new()),
        }
    }

    /// Returns `true` if `key` was newly inserted (i.e. not seen before).
    pub fn insert_if_new(&self, key: &str) -> bool {
        self.inner.write().insert(key.to_string())
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }
}

impl Default for SeenSet {
    fn default() -> Self {
        Self::new()
    }
}

/// Monotonically-growing set of assets subscribed on the market WS channel.
pub struct TrackedAssetSet {
    inner: RwLock<HashSet<String>>,
}

impl TrackedAssetSet {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashSet::new()),
        }
    }

    /// Returns `true` if `asset` is new to the tracked set.
    pub fn insert(&self, asset: &str) -> bool {
        self.inner.write().insert(asset.to_string())
    }

    pub fn contains(&self, asset: &str) -> bool {
        self.inner.read().contains(asset)
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.inner.read().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }
}

impl Default for TrackedAssetSet {
    fn default() -> Self {
        Self::new()
    }
}

/// Central shared state for one engine run, wrapped in `Arc` and cloned
/// (cheaply, via the inner `Arc`s) into every spawned task.
pub struct AppState {
    pub config: Config,
    pub wallet: String,

    pub client: MarketClient,
    pub executor: Arc<dyn ExecutionAdapter>,

    pub seen: SeenSet,
    pub tracked_assets: TrackedAssetSet,
    pub book_cache: BookCache,
    pub refresh_router: RefreshRouter,
    pub latency: LatencyRing,

    /// Caps concurrent trade-processing tasks at `config.max_parallel`.
    pub trade_semaphore: Arc<Semaphore>,

    /// Pushed to whenever `tracked_assets` grows, so the market WS reader
    /// can re-send a subscribe frame carrying the full asset set without a
    /// reconnect. Drained once by `ws_client::run_market_ws` at startup via
    /// [`AppState::take_resubscribe_rx`]; signals sent while disconnected
    /// queue harmlessly and are drained on the next connect, which already
    /// subscribes with the full snapshot.
    pub resubscribe_tx: mpsc::UnboundedSender<()>,
    resubscribe_rx: Mutex<Option<mpsc::UnboundedReceiver<()>>>,

    /// Per-asset cooldown bookkeeping for WS-triggered refreshes
    /// (`minAssetRefreshMs`), keyed by asset id.
    pub last_asset_trigger_ms: RwLock<std::collections::HashMap<String, u64>>,

    /// Last activity payload and the time it was fetched, for
    /// `activityCacheMs` reuse.
    pub last_activity_payload: RwLock<Option<(u64, Vec<crate::types::TradeItem>)>>,

    /// True once a graceful shutdown has been requested; short-circuits
    /// reconnect, reconcile rearm, and benchmark teardown.
    pub stopped: AtomicBool,

    /// Count of trades dispatched this run (used only for logging/tests).
    pub dispatched_count: AtomicUsize,
}

impl AppState {
    pub fn new(
        config: Config,
        wallet: String,
        client: MarketClient,
        executor: Arc<dyn ExecutionAdapter>,
    ) -> Self {
        let max_parallel = config.max_parallel;
        let ttl_ms = config.book_ttl_ms;
        let http_fallback = config.book_http_fallback;
        let debounce_ms = config.refresh_debounce_ms;
        let (resubscribe_tx, resubscribe_rx) = mpsc::unbounded_channel();

        Self {
            config,
            wallet,
            client,
            executor,
            seen: SeenSet::new(),
            tracked_assets: TrackedAssetSet::new(),
            book_cache: BookCache::new(ttl_ms, http_fallback),
            refresh_router: RefreshRouter::new(debounce_ms),
            latency: LatencyRing::new(),
            trade_semaphore: Arc::new(Semaphore::new(max_parallel)),
            resubscribe_tx,
            resubscribe_rx: Mutex::new(Some(resubscribe_rx)),
            last_asset_trigger_ms: RwLock::new(std::collections::HashMap::new()),
            last_activity_payload: RwLock::new(None),
            stopped: AtomicBool::new(false),
            dispatched_count: AtomicUsize::new(0),
        }
    }

    /// Takes the resubscribe receiver. Must be called exactly once — by the
    /// market WS task at startup — since `UnboundedReceiver` has a single
    /// owner across reconnects.
    pub fn take_resubscribe_rx(&self) -> mpsc::UnboundedReceiver<()> {
        self.resubscribe_rx
            .lock()
            .take()
            .expect("resubscribe receiver already taken")
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn request_stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    /// `true` if the per-asset WS-trigger cooldown has elapsed for `asset`.
    pub fn asset_cooldown_elapsed(&self, asset: &str, now_ms: u64) -> bool {
        let mut map = self.last_asset_trigger_ms.write();
        let last = map.get(asset).copied().unwrap_or(0);
        if now_ms.saturating_sub(last) >= self.config.min_asset_refresh_ms {
            map.insert(asset.to_string(), now_ms);
            true
        } else {
            false
        }
    }
}
