// =============================================================================
// Core Data Types — trades, sides, book snapshots, latency samples
// =============================================================================
//
// Mirrors the dynamically-typed shape of the upstream feeds (numeric fields
// arrive as JSON strings or numbers, timestamps arrive in seconds or
// milliseconds) with explicit optional fields and defensive parsing instead
// of panicking on a malformed payload.
// =============================================================================

use serde::{Deserialize, Serialize};
use std::fmt;

/// Which side of the book a trade or mirror order sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// Parse from a loosely-cased string as it arrives from the activity feed.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_uppercase().as_str() {
            "BUY" => Some(Self::Buy),
            "SELL" => Some(Self::Sell),
            _ => None,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

/// One entry from the source-activity feed.
///
/// `timestamp_ms` is normalized to milliseconds since epoch at parse time —
/// the upstream feed emits either seconds or milliseconds and the two are
/// distinguished by magnitude (see [`normalize_to_ms`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeItem {
    pub transaction_hash: String,
    pub asset: String,
    pub side: Side,
    pub timestamp_ms: u64,
    pub price: f64,
    pub size: f64,
    pub usdc_size: Option<f64>,
}

impl TradeItem {
    /// Parse a single activity-feed entry from its raw JSON shape.
    ///
    /// Returns `None` (rather than an error) for a structurally invalid
    /// entry — a bad item in a batch should not fail the whole fetch.
    pub fn from_json(v: &serde_json::Value) -> Option<Self> {
        let transaction_hash = v.get("transactionHash")?.as_str()?.to_string();
        let asset = v.get("asset")?.as_str()?.to_string();
        let side = Side::parse(v.get("side")?.as_str()?)?;

        let raw_ts = parse_numeric(v.get("timestamp")?)?;
        let timestamp_ms = normalize_to_ms(raw_ts);

        let price = parse_numeric(v.get("price")?)?;
        let size = v.get("size").and_then(parse_numeric).unwrap_or(0.0);
        let usdc_size = v.get("usdcSize").and_then(parse_numeric);

        Some(Self {
            transaction_hash,
            asset,
            side,
            timestamp_ms,
            price,
            size,
            usdc_size,
        })
    }

    /// Opaque deduplication key: `(transactionHash, asset, side, timestamp, price, size)`.
    pub fn identity_key(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}|{}",
            self.transaction_hash, self.asset, self.side, self.timestamp_ms, self.price, self.size
        )
    }
}

/// Parse a JSON value that may be a string or a number into an `f64`.
pub fn parse_numeric(v: &serde_json::Value) -> Option<f64> {
    if let Some(n) = v.as_f64() {
        return Some(n);
    }
    v.as_str()?.parse().ok()
}

/// Normalize a timestamp that may be in seconds or milliseconds to milliseconds.
///
/// Anything below 10^12 is assumed to be seconds.
pub fn normalize_to_ms(raw: f64) -> u64 {
    if raw < 1_000_000_000_000.0 {
        (raw * 1000.0) as u64
    } else {
        raw as u64
    }
}

/// Cached top-of-book for a single asset.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BookSnapshot {
    pub best_bid: Option<f64>,
    pub best_ask: Option<f64>,
    pub updated_at_ms: u64,
}

impl BookSnapshot {
    pub fn null(now_ms: u64) -> Self {
        Self {
            best_bid: None,
            best_ask: None,
            updated_at_ms: now_ms,
        }
    }

    /// `bestAsk - bestBid`, or `None` if either side is missing.
    pub fn spread(&self) -> Option<f64> {
        match (self.best_bid, self.best_ask) {
            (Some(bid), Some(ask)) => Some(ask - bid),
            _ => None,
        }
    }

    pub fn is_stale(&self, now_ms: u64, ttl_ms: u64) -> bool {
        now_ms.saturating_sub(self.updated_at_ms) > ttl_ms
    }
}

/// Why a trade was dispatched — carried through into the log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchReason {
    Bootstrap,
    Reconcile,
    WsTrigger,
}

impl fmt::Display for DispatchReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bootstrap => write!(f, "bootstrap"),
            Self::Reconcile => write!(f, "reconcile"),
            Self::WsTrigger => write!(f, "ws_trigger"),
        }
    }
}

/// Per-asset event metadata carried from a WS trigger through to the trade
/// processor, used to attribute decision latency to the originating event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TriggerMeta {
    pub event_ts_ms: Option<u64>,
    pub recv_ts_ms: Option<u64>,
}

/// Per-trade latency timestamps and derived stage durations.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LatencySample {
    pub event_ts: Option<u64>,
    pub recv_ts: u64,
    pub decision_ts: u64,
    pub submit_ts: u64,
    pub ack_ts: u64,
}

impl LatencySample {
    pub fn ingest_ms(&self) -> u64 {
        self.recv_ts.saturating_sub(self.event_ts.unwrap_or(self.recv_ts))
    }

    pub fn decision_ms(&self) -> u64 {
        self.decision_ts.saturating_sub(self.recv_ts)
    }

    pub fn submit_ms(&self) -> u64 {
        self.submit_ts.saturating_sub(self.decision_ts)
    }

    pub fn ack_ms(&self) -> u64 {
        self.ack_ts.saturating_sub(self.submit_ts)
    }

    pub fn total_ms(&self) -> u64 {
        self.ack_ts.saturating_sub(self.event_ts.unwrap_or(self.recv_ts))
    }
}

/// Current wall-clock time in milliseconds since epoch.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock before UNIX epoch")
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn side_parse_is_case_insensitive() {
        assert_eq!(Side::parse("buy"), Some(Side::Buy));
        assert_eq!(Side::parse("SELL"), Some(Side::Sell));
        assert_eq!(Side::parse("hold"), None);
    }

    #[test]
    fn normalize_seconds_vs_millis() {
        assert_eq!(normalize_to_ms(1_700_000_000.0), 1_700_000_000_000);
        assert_eq!(normalize_to_ms(1_700_000_000_000.0), 1_700_000_000_000);
    }

    #[test]
    fn trade_item_parses_string_and_numeric_fields() {
        let v = serde_json::json!({
            "transactionHash": "0xabc",
            "asset": "123",
            "side": "BUY",
            "timestamp": "1700000000",
            "price": "0.51",
            "size": "10",
            "usdcSize": "5.1"
        });
        let item = TradeItem::from_json(&v).unwrap();
        assert_eq!(item.asset, "123");
        assert_eq!(item.side, Side::Buy);
        assert_eq!(item.timestamp_ms, 1_700_000_000_000);
        assert!((item.price - 0.51).abs() < 1e-9);
        assert_eq!(item.usdc_size, Some(5.1));
    }

    #[test]
    fn trade_item_rejects_missing_required_field() {
        let v = serde_json::json!({
            "transactionHash": "0xabc",
            "asset": "123",
            "side": "BUY",
            "price": "0.51"
        });
        assert!(TradeItem::from_json(&v).is_none());
    }

    #[test]
    fn identity_key_is_stable_for_identical_items() {
        let v = serde_json::json!({
            "transactionHash": "0xabc",
            "asset": "123",
            "side": "BUY",
            "timestamp": "1700000000000",
            "price": 0.51,
            "size": 10.0,
        });
        let a = TradeItem::from_json(&v).unwrap();
        let b = TradeItem::from_json(&v).unwrap();
        assert_eq!(a.identity_key(), b.identity_key());
    }

    #[test]
    fn book_snapshot_spread_requires_both_sides() {
        let mut snap = BookSnapshot::null(0);
        assert_eq!(snap.spread(), None);
        snap.best_bid = Some(0.5);
        assert_eq!(snap.spread(), None);
        snap.best_ask = Some(0.52);
        assert!((snap.spread().unwrap() - 0.02).abs() < 1e-9);
    }

    #[test]
    fn book_snapshot_staleness() {
        let snap = BookSnapshot {
            best_bid: Some(0.5),
            best_ask: Some(0.52),
            updated_at_ms: 1000,
        };
        assert!(!snap.is_stale(1500, 1000));
        assert!(snap.is_stale(3000, 1000));
    }
}
