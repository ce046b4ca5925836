// Process-wide pipeline counters
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// `processed` and `indexed` counters; reporting only, never reset
#[derive(Debug, Default)]
pub struct PipelineStats {
    processed: AtomicU64,
    indexed: AtomicU64,
}

/// Point-in-time copy of `PipelineStats`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub processed: u64,
    pub indexed: u64,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a post that reached a final decision
    pub fn record_processed(&self) -> u64 {
        self.processed.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Count a post that was written to the store; returns the new total
    pub fn record_indexed(&self) -> u64 {
        self.indexed.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            processed: self.processed.load(Ordering::Relaxed),
            indexed: self.indexed.load(Ordering::Relaxed),
        }
    }
}
