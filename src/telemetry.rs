// =============================================================================
// Latency Telemetry — ring buffer of per-trade timestamps + percentile rollup
// =============================================================================
//
// A fixed-capacity circular buffer, matching the reference engine's
// bounded-history collections (e.g. its recent-errors / recent-decisions
// ring buffers in `app_state.rs`), rather than unbounded growth with
// periodic trimming.
// =============================================================================

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tracing::info;

use crate::types::LatencySample;

const RING_CAPACITY: usize = 5000;

/// Bounded history of recent [`LatencySample`]s with percentile rollup.
pub struct LatencyRing {
    samples: RwLock<VecDeque<LatencySample>>,
    total_recorded: AtomicU64,
}

impl LatencyRing {
    pub fn new() -> Self {
        Self {
            samples: RwLock::new(VecDeque::with_capacity(RING_CAPACITY)),
            total_recorded: AtomicU64::new(0),
        }
    }

    /// Record a sample, evicting the oldest entry once at capacity. Returns
    /// the running count of samples ever recorded this run — tracked
    /// independently of the ring's bounded length, since that length pins at
    /// `RING_CAPACITY` once the ring saturates.
    pub fn record(&self, sample: LatencySample) -> u64 {
        let mut samples = self.samples.write();
        if samples.len() == RING_CAPACITY {
            samples.pop_front();
        }
        samples.push_back(sample);
        drop(samples);
        self.total_recorded.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn len(&self) -> usize {
        self.samples.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Build a percentile summary of the samples currently in the ring.
    pub fn summary(&self) -> Summary {
        let samples = self.samples.read();
        let count = samples.len();

        let mut total: Vec<u64> = samples.iter().map(|s| s.total_ms()).collect();
        let mut ingest: Vec<u64> = samples.iter().map(|s| s.ingest_ms()).collect();
        let mut decision: Vec<u64> = samples.iter().map(|s| s.decision_ms()).collect();
        let mut submit: Vec<u64> = samples.iter().map(|s| s.submit_ms()).collect();
        let mut ack: Vec<u64> = samples.iter().map(|s| s.ack_ms()).collect();

        total.sort_unstable();
        ingest.sort_unstable();
        decision.sort_unstable();
        submit.sort_unstable();
        ack.sort_unstable();

        Summary {
            count,
            total_p50: percentile(&total, 50),
            total_p90: percentile(&total, 90),
            total_p99: percentile(&total, 99),
            ingest_p50: percentile(&ingest, 50),
            decision_p50: percentile(&decision, 50),
            decision_p90: percentile(&decision, 90),
            submit_p50: percentile(&submit, 50),
            ack_p50: percentile(&ack, 50),
        }
    }

    /// Emit the percentile summary through `tracing::info!`. A no-op if no
    /// samples have been recorded yet.
    pub fn log_summary(&self) {
        if self.is_empty() {
            return;
        }
        let s = self.summary();
        info!(
            count = s.count,
            total_p50 = s.total_p50,
            total_p90 = s.total_p90,
            total_p99 = s.total_p99,
            ingest_p50 = s.ingest_p50,
            decision_p50 = s.decision_p50,
            decision_p90 = s.decision_p90,
            submit_p50 = s.submit_p50,
            ack_p50 = s.ack_p50,
            "latency summary"
        );
    }
}

impl Default for LatencyRing {
    fn default() -> Self {
        Self::new()
    }
}

/// A single percentile rollup over the ring's current contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Summary {
    pub count: usize,
    pub total_p50: u64,
    pub total_p90: u64,
    pub total_p99: u64,
    pub ingest_p50: u64,
    pub decision_p50: u64,
    pub decision_p90: u64,
    pub submit_p50: u64,
    pub ack_p50: u64,
}

/// Nearest-rank percentile over an already-sorted slice.
fn percentile(sorted: &[u64], pct: usize) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let rank = (pct * sorted.len()).div_ceil(100).saturating_sub(1);
    sorted[rank.min(sorted.len() - 1)]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(total: u64) -> LatencySample {
        LatencySample {
            event_ts: Some(0),
            recv_ts: 0,
            decision_ts: 0,
            submit_ts: 0,
            ack_ts: total,
        }
    }

    #[test]
    fn ring_evicts_oldest_past_capacity() {
        let ring = LatencyRing::new();
        for i in 0..(RING_CAPACITY + 10) {
            ring.record(sample(i as u64));
        }
        assert_eq!(ring.len(), RING_CAPACITY);
    }

    #[test]
    fn record_count_keeps_growing_past_ring_capacity() {
        let ring = LatencyRing::new();
        let mut last = 0;
        for i in 0..(RING_CAPACITY + 20) {
            last = ring.record(sample(i as u64));
        }
        assert_eq!(last, (RING_CAPACITY + 20) as u64);
        assert_eq!(ring.len(), RING_CAPACITY);
    }

    #[test]
    fn stats_every_cadence_holds_past_ring_capacity() {
        let ring = LatencyRing::new();
        let stats_every = 50u64;
        let mut summary_ticks = 0;
        for i in 0..(RING_CAPACITY as u64 + 120) {
            let count = ring.record(sample(i));
            if count.is_multiple_of(stats_every) {
                summary_ticks += 1;
            }
        }
        // Exactly one tick per `stats_every` samples, not one per trade —
        // the bug this guards against pinned `count` at RING_CAPACITY once
        // the ring saturated, firing on every subsequent call.
        assert_eq!(summary_ticks, (RING_CAPACITY as u64 + 120) / stats_every);
    }

    #[test]
    fn percentile_of_empty_is_zero() {
        assert_eq!(percentile(&[], 50), 0);
    }

    #[test]
    fn percentile_matches_known_distribution() {
        let sorted: Vec<u64> = (1..=100).collect();
        assert_eq!(percentile(&sorted, 50), 50);
        assert_eq!(percentile(&sorted, 90), 90);
        assert_eq!(percentile(&sorted, 99), 99);
    }

    #[test]
    fn summary_reflects_recorded_samples() {
        let ring = LatencyRing::new();
        for i in 1..=10u64 {
            ring.record(sample(i * 10));
        }
        let s = ring.summary();
        assert_eq!(s.count, 10);
        assert!(s.total_p99 >= s.total_p50);
    }
}
