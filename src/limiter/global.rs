use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

/// Per-bot global throttle: at most one send per `1/GLOBAL_RPS` seconds for
/// a given bot_id, independent of chat. The outer mutex only guards
/// lookup/insertion into the map; the actual wait happens under each
/// bot's own mutex so unrelated bots never block each other.
pub struct GlobalLimiter {
    delay: Duration,
    entries: Mutex<HashMap<i64, Arc<Mutex<Instant>>>>,
}

impl GlobalLimiter {
    pub fn new(rps: f64) -> Self {
        Self {
            delay: Duration::from_secs_f64(1.0 / rps),
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub async fn acquire(&self, bot_id: i64) {
        let entry = {
            let mut map = self.entries.lock().await;
            map.entry(bot_id)
                .or_insert_with(|| {
                    Arc::new(Mutex::new(
                        Instant::now()
                            .checked_sub(self.delay)
                            .unwrap_or_else(Instant::now),
                    ))
                })
                .clone()
        };

        let mut last_send = entry.lock().await;
        let now = Instant::now();
        let earliest = *last_send + self.delay;
        if earliest > now {
            tokio::time::sleep(earliest - now).await;
        }
        *last_send = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_first_acquire_does_not_wait() {
        let limiter = GlobalLimiter::new(28.0);
        let start = Instant::now();
        limiter.acquire(1).await;
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_successive_acquires_are_spaced() {
        let limiter = GlobalLimiter::new(1000.0 / 100.0); // 10ms delay
        let start = Instant::now();
        limiter.acquire(1).await;
        limiter.acquire(1).await;
        limiter.acquire(1).await;
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[tokio::test]
    async fn test_different_bots_do_not_share_delay() {
        let limiter = GlobalLimiter::new(1000.0 / 200.0); // 200ms delay
        limiter.acquire(1).await;
        let start = Instant::now();
        limiter.acquire(2).await;
        assert!(start.elapsed() < Duration::from_millis(50));
    }
}
