use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// How long a blocked caller sleeps before polling the bucket again.
pub const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Shared token bucket gating outbound packets. Clones share one bucket.
#[derive(Clone, Debug)]
pub struct RateLimiter {
    bucket: Arc<Mutex<TokenBucket>>,
}

#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    capacity: f64,
    rate: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(self.last_refill);
        self.tokens = (self.tokens + elapsed.as_secs_f64() * self.rate).min(self.capacity);
        self.last_refill = now;
    }
}

impl RateLimiter {
    /// Steady rate of `tokens_per_sec` with a burst of three seconds worth of tokens.
    pub fn new(tokens_per_sec: u32) -> Self {
        let rate = tokens_per_sec.max(1);
        Self::with_burst(rate, rate.saturating_mul(3))
    }

    /// The bucket starts full.
    pub fn with_burst(tokens_per_sec: u32, burst: u32) -> Self {
        let capacity = f64::from(burst.max(1));
        let bucket = TokenBucket {
            tokens: capacity,
            capacity,
            rate: f64::from(tokens_per_sec.max(1)),
            last_refill: Instant::now(),
        };
        RateLimiter { bucket: Arc::new(Mutex::new(bucket)) }
    }

    /// Take one token if one is available.
    pub fn allow(&self) -> bool {
        let mut bucket = self.bucket.lock().unwrap_or_else(|e| e.into_inner());
        bucket.refill();
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Wait until a token is available, polling every [`POLL_INTERVAL`].
    pub async fn acquire(&self) {
        while !self.allow() {
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    pub fn rate(&self) -> f64 {
        self.bucket.lock().unwrap_or_else(|e| e.into_inner()).rate
    }

    pub fn burst(&self) -> f64 {
        self.bucket.lock().unwrap_or_else(|e| e.into_inner()).capacity
    }
}
