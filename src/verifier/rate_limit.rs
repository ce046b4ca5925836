// Minimum-spacing rate limiter for the external classification service

use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{self, Instant};

/// Soft per-process limiter: consecutive turns start at least `min_delay` apart
///
/// The timestamp lock is held for the whole wait, so concurrent callers are
/// served one at a time in submission order (tokio's mutex is FIFO) and never
/// compute overlapping wait windows.
#[derive(Debug)]
pub struct RateLimiter {
    min_delay: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(min_delay: Duration) -> Self {
        Self {
            min_delay,
            last_request: Mutex::new(None),
        }
    }

    /// Suspend until this caller may start a request
    pub async fn await_turn(&self) {
        let mut last = self.last_request.lock().await;

        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.min_delay {
                let wait = self.min_delay - elapsed;
                tracing::trace!("Rate limiter waiting {:?}", wait);
                time::sleep(wait).await;
            }
        }

        *last = Some(Instant::now());
    }

    pub fn min_delay(&self) -> Duration {
        self.min_delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_first_turn_is_immediate() {
        let limiter = RateLimiter::new(Duration::from_millis(200));
        let start = Instant::now();
        limiter.await_turn().await;
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_back_to_back_turns_are_spaced() {
        let limiter = RateLimiter::new(Duration::from_millis(50));

        limiter.await_turn().await;
        let first = Instant::now();
        limiter.await_turn().await;
        let second = Instant::now();

        assert!(second - first >= Duration::from_millis(45));
    }

    #[tokio::test]
    async fn test_no_wait_after_idle_period() {
        let limiter = RateLimiter::new(Duration::from_millis(20));
        limiter.await_turn().await;
        time::sleep(Duration::from_millis(40)).await;

        let start = Instant::now();
        limiter.await_turn().await;
        assert!(start.elapsed() < Duration::from_millis(15));
    }

    #[tokio::test]
    async fn test_concurrent_turns_never_overlap() {
        let delay = Duration::from_millis(30);
        let limiter = Arc::new(RateLimiter::new(delay));
        let stamps = Arc::new(std::sync::Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let limiter = limiter.clone();
            let stamps = stamps.clone();
            handles.push(tokio::spawn(async move {
                limiter.await_turn().await;
                stamps.lock().unwrap().push(Instant::now());
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let mut stamps = stamps.lock().unwrap().clone();
        stamps.sort();
        for pair in stamps.windows(2) {
            // Small slack for the push happening after the turn was granted
            assert!(pair[1] - pair[0] >= delay - Duration::from_millis(5));
        }
    }
}
