//! Pre-flight rate limiting and daily budget enforcement (spec §5: "Rate
//! limiters, quotas, daily budgets are consulted before expensive work;
//! they may reject with a typed error the boundary surfaces as HTTP 429").

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// A token-bucket rate limiter: `capacity` tokens refill every `window`
/// (spec §4.3's rate limiter shape, reused here for the per-caller
/// request rate — spec §8 testable property 7).
#[derive(Debug, Clone)]
pub struct TokenBucket {
    capacity: u32,
    window: Duration,
    remaining: u32,
    last_reset: Instant,
}

impl TokenBucket {
    /// Build a bucket starting full.
    pub fn new(capacity: u32, window: Duration) -> Self {
        Self {
            capacity,
            window,
            remaining: capacity,
            last_reset: Instant::now(),
        }
    }

    /// Construct a bucket with explicit starting state, for deterministic
    /// tests of the reset/decrement behavior.
    #[doc(hidden)]
    pub fn with_state(capacity: u32, window: Duration, remaining: u32, last_reset: Instant) -> Self {
        Self { capacity, window, remaining, last_reset }
    }

    /// Atomically reset when `now - last_reset >= window`, then try to
    /// decrement. Returns `false` on exhaustion without mutating state.
    pub fn allow(&mut self) -> bool {
        let now = Instant::now();
        if now.duration_since(self.last_reset) >= self.window {
            self.remaining = self.capacity;
            self.last_reset = now;
        }
        if self.remaining == 0 {
            return false;
        }
        self.remaining -= 1;
        true
    }
}

/// Per-caller daily counters, reset when a UTC day boundary is crossed.
#[derive(Debug, Clone)]
struct DailyCounters {
    day: chrono::NaiveDate,
    requests: u32,
    tokens: u64,
}

impl DailyCounters {
    fn for_today() -> Self {
        Self { day: chrono::Utc::now().date_naive(), requests: 0, tokens: 0 }
    }

    fn roll_if_new_day(&mut self) {
        let today = chrono::Utc::now().date_naive();
        if today != self.day {
            self.day = today;
            self.requests = 0;
            self.tokens = 0;
        }
    }
}

/// Why a pre-flight usage check rejected a turn.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UsageError {
    /// The per-minute rate limit has no capacity left.
    #[error("rate limit exceeded")]
    RateLimited,
    /// The daily request count ceiling would be exceeded.
    #[error("daily request limit exceeded")]
    DailyRequestLimitExceeded,
    /// The daily token budget would be exceeded.
    #[error("daily token budget exceeded")]
    DailyTokenBudgetExceeded,
}

/// Per-caller state: a per-minute token bucket plus daily counters.
struct CallerState {
    bucket: TokenBucket,
    daily: DailyCounters,
}

/// In-process pre-flight usage gate, keyed by caller id. Consulted before
/// the Executor does any provider/tool work (spec §5).
pub struct UsageGate {
    callers: Mutex<HashMap<String, CallerState>>,
}

impl UsageGate {
    /// Build an empty gate.
    pub fn new() -> Self {
        Self { callers: Mutex::new(HashMap::new()) }
    }

    /// Check the per-minute rate limit and daily request ceiling for
    /// `caller_id`, consuming one unit of each on success. Does not check
    /// the token budget — that's verified after the turn completes, once
    /// actual usage is known, via [`UsageGate::record_tokens`].
    pub fn check_and_consume_request(
        &self,
        caller_id: &str,
        rate_limit_per_minute: Option<u32>,
        daily_request_limit: Option<u32>,
    ) -> Result<(), UsageError> {
        let mut callers = self.callers.lock().unwrap_or_else(|e| e.into_inner());
        let state = callers.entry(caller_id.to_string()).or_insert_with(|| CallerState {
            bucket: TokenBucket::new(rate_limit_per_minute.unwrap_or(u32::MAX), Duration::from_secs(60)),
            daily: DailyCounters::for_today(),
        });

        if let Some(limit) = rate_limit_per_minute {
            if limit == 0 {
                return Err(UsageError::RateLimited);
            }
            if !state.bucket.allow() {
                return Err(UsageError::RateLimited);
            }
        }

        state.daily.roll_if_new_day();
        if let Some(limit) = daily_request_limit {
            if state.daily.requests >= limit {
                return Err(UsageError::DailyRequestLimitExceeded);
            }
        }
        state.daily.requests += 1;
        Ok(())
    }

    /// Record tokens actually spent by a completed turn, rejecting (for
    /// the *next* turn) once the daily budget is exceeded. The current
    /// turn is never retroactively rejected — quota gates run pre-flight,
    /// never mid-turn.
    pub fn record_tokens(&self, caller_id: &str, tokens: u64, daily_token_budget: Option<u64>) -> Result<(), UsageError> {
        let mut callers = self.callers.lock().unwrap_or_else(|e| e.into_inner());
        let state = callers.entry(caller_id.to_string()).or_insert_with(|| CallerState {
            bucket: TokenBucket::new(u32::MAX, Duration::from_secs(60)),
            daily: DailyCounters::for_today(),
        });
        state.daily.roll_if_new_day();
        state.daily.tokens += tokens;
        if let Some(budget) = daily_token_budget {
            if state.daily.tokens > budget {
                return Err(UsageError::DailyTokenBudgetExceeded);
            }
        }
        Ok(())
    }
}

impl Default for UsageGate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_token_bucket_exhausts_then_resets() {
        let mut bucket = TokenBucket::new(1, Duration::from_secs(60));
        assert!(bucket.allow());
        assert!(!bucket.allow());
    }

    #[test]
    fn bucket_resets_after_window_elapses() {
        let past = Instant::now() - Duration::from_secs(61);
        let mut bucket = TokenBucket::with_state(3, Duration::from_secs(60), 0, past);
        assert!(bucket.allow());
        assert!(bucket.allow());
        assert!(bucket.allow());
        assert!(!bucket.allow());
    }

    #[test]
    fn rate_limit_zero_always_rejects() {
        let gate = UsageGate::new();
        assert_eq!(
            gate.check_and_consume_request("u1", Some(0), None),
            Err(UsageError::RateLimited)
        );
    }

    #[test]
    fn daily_request_limit_enforced() {
        let gate = UsageGate::new();
        assert!(gate.check_and_consume_request("u1", None, Some(1)).is_ok());
        assert_eq!(
            gate.check_and_consume_request("u1", None, Some(1)),
            Err(UsageError::DailyRequestLimitExceeded)
        );
    }

    #[test]
    fn daily_token_budget_enforced() {
        let gate = UsageGate::new();
        gate.record_tokens("u1", 900, Some(1000)).unwrap();
        assert_eq!(
            gate.record_tokens("u1", 200, Some(1000)),
            Err(UsageError::DailyTokenBudgetExceeded)
        );
    }
}
