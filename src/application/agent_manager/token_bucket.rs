//! The single globally-contended LLM rate-limit resource (§5).
//!
//! Owned by the Agent Manager and shared (via `Arc`) with every agent's AI
//! Decision Engine, so there is exactly one writer of the refill state and
//! exactly one budget, not one per caller. The clock is injected explicitly
//! (`now: DateTime<Utc>`) rather than read from the system clock so
//! scheduling-fairness tests are deterministic.

use chrono::{DateTime, Utc};
use std::sync::Mutex;

pub struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    state: Mutex<BucketState>,
}

struct BucketState {
    tokens: f64,
    last_refill: DateTime<Utc>,
}

impl TokenBucket {
    pub fn new(capacity_per_minute: u32, now: DateTime<Utc>) -> Self {
        let capacity = capacity_per_minute.max(1) as f64;
        Self {
            capacity,
            refill_per_sec: capacity / 60.0,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: now,
            }),
        }
    }

    /// Attempt to withdraw one token. Non-blocking; callers that fail must
    /// defer or skip, never wait synchronously (§5 back-pressure).
    pub fn try_acquire(&self, now: DateTime<Utc>) -> bool {
        let mut state = self.state.lock().expect("token bucket mutex poisoned");
        Self::refill(&mut state, self.capacity, self.refill_per_sec, now);
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn refill(state: &mut BucketState, capacity: f64, refill_per_sec: f64, now: DateTime<Utc>) {
        let elapsed_ms = now.signed_duration_since(state.last_refill).num_milliseconds();
        if elapsed_ms <= 0 {
            return;
        }
        let elapsed_secs = elapsed_ms as f64 / 1000.0;
        state.tokens = (state.tokens + elapsed_secs * refill_per_sec).min(capacity);
        state.last_refill = now;
    }

    #[cfg(test)]
    pub fn available(&self, now: DateTime<Utc>) -> f64 {
        let mut state = self.state.lock().unwrap();
        Self::refill(&mut state, self.capacity, self.refill_per_sec, now);
        state.tokens
    }
}
