// =============================================================================
// Book Cache — per-asset top-of-book with TTL and optional HTTP fallback
// =============================================================================

use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::debug;

use crate::http_client::MarketClient;
use crate::types::{now_ms, BookSnapshot};

/// Caches one [`BookSnapshot`] per asset, updated by WS `book` events and
/// read by the trade processor via [`BookCache::top_of_book`].
pub struct BookCache {
    books: RwLock<HashMap<String, BookSnapshot>>,
    ttl_ms: u64,
    http_fallback: bool,
}

impl BookCache {
    pub fn new(ttl_ms: u64, http_fallback: bool) -> Self {
        Self {
            books: RwLock::new(HashMap::new()),
            ttl_ms,
            http_fallback,
        }
    }

    /// Store the latest WS-observed book for `asset`. `updated_at_ms` must be
    /// monotonic per asset — an out-of-order WS frame is dropped rather than
    /// regressing the cached timestamp.
    pub fn update(&self, asset: &str, snapshot: BookSnapshot) {
        let mut books = self.books.write();
        match books.get(asset) {
            Some(existing) if existing.updated_at_ms > snapshot.updated_at_ms => {
                debug!(asset, "dropped out-of-order book update");
            }
            _ => {
                books.insert(asset.to_string(), snapshot);
            }
        }
    }

    fn cached(&self, asset: &str) -> Option<BookSnapshot> {
        self.books.read().get(asset).copied()
    }

    /// Resolve the top of book for `asset`, per the three-step policy in
    /// the spec: fresh cache hit, then HTTP probe if enabled, then whatever
    /// is cached (possibly stale), then a null snapshot.
    pub async fn top_of_book(&self, client: &MarketClient, asset: &str) -> BookSnapshot {
        let now = now_ms();

        if let Some(snap) = self.cached(asset) {
            if !snap.is_stale(now, self.ttl_ms) {
                return snap;
            }
        }

        if self.http_fallback {
            match client.get_book(asset, now_ms()).await {
                Ok(fresh) => {
                    self.update(asset, fresh);
                    return fresh;
                }
                Err(e) => {
                    debug!(asset, error = %e, "book HTTP probe failed, falling back to cache");
                }
            }
        }

        self.cached(asset).unwrap_or_else(|| BookSnapshot::null(now_ms()))
    }
}
