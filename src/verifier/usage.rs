// Token usage accounting for the AI verifier

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Running token totals, updated after every completed AI call
#[derive(Debug)]
pub struct UsageTracker {
    prompt_tokens: AtomicU64,
    completion_tokens: AtomicU64,
    requests: AtomicU64,
    last_reset_at: Mutex<DateTime<Utc>>,
}

/// Point-in-time copy of the usage counters
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageCounters {
    pub total_prompt_tokens: u64,
    pub total_completion_tokens: u64,
    pub total_tokens: u64,
    pub request_count: u64,
    pub last_reset_at: DateTime<Utc>,
}

impl UsageCounters {
    /// Estimated spend given USD prices per million tokens
    pub fn estimated_cost_usd(&self, prompt_per_mtok: f64, completion_per_mtok: f64) -> f64 {
        (self.total_prompt_tokens as f64 * prompt_per_mtok
            + self.total_completion_tokens as f64 * completion_per_mtok)
            / 1_000_000.0
    }
}

impl UsageTracker {
    pub fn new() -> Self {
        Self {
            prompt_tokens: AtomicU64::new(0),
            completion_tokens: AtomicU64::new(0),
            requests: AtomicU64::new(0),
            last_reset_at: Mutex::new(Utc::now()),
        }
    }

    /// Add one completed request's token counts
    pub fn record(&self, prompt_tokens: u64, completion_tokens: u64) {
        self.prompt_tokens.fetch_add(prompt_tokens, Ordering::Relaxed);
        self.completion_tokens
            .fetch_add(completion_tokens, Ordering::Relaxed);
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> UsageCounters {
        let prompt = self.prompt_tokens.load(Ordering::Relaxed);
        let completion = self.completion_tokens.load(Ordering::Relaxed);

        UsageCounters {
            total_prompt_tokens: prompt,
            total_completion_tokens: completion,
            total_tokens: prompt + completion,
            request_count: self.requests.load(Ordering::Relaxed),
            last_reset_at: *self.lock_reset(),
        }
    }

    /// Zero all counters and stamp the reset time
    pub fn reset(&self) {
        let mut last_reset_at = self.lock_reset();
        self.prompt_tokens.store(0, Ordering::Relaxed);
        self.completion_tokens.store(0, Ordering::Relaxed);
        self.requests.store(0, Ordering::Relaxed);
        *last_reset_at = Utc::now();
    }

    fn lock_reset(&self) -> std::sync::MutexGuard<'_, DateTime<Utc>> {
        self.last_reset_at
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for UsageTracker {
    fn default() -> Self {
        Self::new()
    }
}
