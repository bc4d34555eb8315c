//! Core admission controller.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use super::clock::{Clock, SystemClock};
use super::key::RateLimitKey;
use super::store::CounterStore;
use crate::error::{Result, TurnstileError};

/// Quota applied to one segment: at most `max_hits` requests per client
/// within each window of `window_ms` milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitPolicy {
    /// Segment (protected resource) this policy guards
    pub segment: String,
    /// Maximum admitted requests per window
    pub max_hits: u64,
    /// Window length in milliseconds
    pub window_ms: u64,
}

impl RateLimitPolicy {
    /// Create a validated policy.
    pub fn new(segment: impl Into<String>, max_hits: u64, window: Duration) -> Result<Self> {
        let policy = Self {
            segment: segment.into(),
            max_hits,
            window_ms: u64::try_from(window.as_millis()).unwrap_or(u64::MAX),
        };
        policy.validate()?;
        Ok(policy)
    }

    /// Reject policies that would silently always admit or always reject,
    /// or whose segment name cannot be used as a key prefix or path segment.
    pub fn validate(&self) -> Result<()> {
        if self.segment.is_empty() {
            return Err(TurnstileError::Config(
                "rate limit segment must not be empty".to_string(),
            ));
        }
        if !self.segment.chars().all(is_segment_char) {
            return Err(TurnstileError::Config(format!(
                "segment '{}': only ASCII letters, digits, '-', '_' and '.' are allowed",
                self.segment
            )));
        }
        if self.max_hits == 0 {
            return Err(TurnstileError::Config(format!(
                "segment '{}': max_hits must be positive",
                self.segment
            )));
        }
        if self.window_ms == 0 {
            return Err(TurnstileError::Config(format!(
                "segment '{}': window_ms must be positive",
                self.segment
            )));
        }
        Ok(())
    }

    /// Window length as a duration.
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

fn is_segment_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')
}

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Decision {
    /// The request may proceed
    Admit,
    /// The request must be refused without performing its action
    Reject,
}

impl Decision {
    /// Whether the request was admitted.
    pub fn is_admit(&self) -> bool {
        matches!(self, Decision::Admit)
    }
}

/// Detailed result of an admission check, for clients that report quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitStatus {
    /// The admission decision
    pub decision: Decision,
    /// Configured maximum per window
    pub limit: u64,
    /// Requests left in the current window
    pub remaining: u64,
    /// Absolute window reset time, milliseconds since the Unix epoch
    pub reset_at_ms: u64,
    /// Time left until the window resets
    pub retry_after: Duration,
}

/// Admission controller for one segment.
///
/// Counter state lives in the injected [`CounterStore`], so several limiters
/// (one per protected route) can share a store while keeping their quotas
/// apart by segment. The limiter is thread-safe and can be shared across
/// tasks behind an `Arc`.
pub struct RateLimiter {
    policy: RateLimitPolicy,
    store: CounterStore,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    /// Create a limiter using the system clock.
    pub fn new(policy: RateLimitPolicy, store: CounterStore) -> Result<Self> {
        Self::with_clock(policy, store, Arc::new(SystemClock))
    }

    /// Create a limiter with an explicit time source.
    pub fn with_clock(
        policy: RateLimitPolicy,
        store: CounterStore,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        policy.validate()?;
        debug!(
            segment = %policy.segment,
            max_hits = policy.max_hits,
            window_ms = policy.window_ms,
            "Rate limiter configured"
        );
        Ok(Self {
            policy,
            store,
            clock,
        })
    }

    /// Decide whether a request from `client` in `segment` at `now` may
    /// proceed, and record it.
    ///
    /// Rejected requests still count towards the current window. An empty
    /// `segment` falls back to this limiter's segment; an empty `client`
    /// falls back to the shared unknown-client bucket. A limiter only records
    /// hits in its own segment: any other segment is rejected without
    /// touching the store.
    pub fn check_and_record(&self, segment: &str, client: &str, now: u64) -> Decision {
        self.check_and_record_status(segment, client, now).decision
    }

    /// Like [`check_and_record`](Self::check_and_record), reporting the
    /// remaining quota and reset time as well.
    pub fn check_and_record_status(&self, segment: &str, client: &str, now: u64) -> RateLimitStatus {
        let segment = if segment.is_empty() {
            self.policy.segment.as_str()
        } else {
            segment
        };
        if segment != self.policy.segment {
            warn!(
                segment = %segment,
                limiter = %self.policy.segment,
                "Refusing to record a hit for a foreign segment"
            );
            return self.foreign_segment_status(now);
        }
        let key = RateLimitKey::new(segment, client);

        if key.is_unknown_client() {
            trace!(segment = %segment, "No client identity, using shared bucket");
        }

        let snapshot = self.store.record_hit(key.clone(), now, self.policy.window());

        let decision = if snapshot.count > self.policy.max_hits {
            debug!(
                key = %key,
                count = snapshot.count,
                max_hits = self.policy.max_hits,
                "Rate limit exceeded"
            );
            Decision::Reject
        } else {
            Decision::Admit
        };

        trace!(key = %key, count = snapshot.count, decision = ?decision, "Admission decided");

        RateLimitStatus {
            decision,
            limit: self.policy.max_hits,
            remaining: self.policy.max_hits.saturating_sub(snapshot.count),
            reset_at_ms: snapshot.window_reset_at,
            retry_after: snapshot.duration_until_reset(now),
        }
    }

    fn foreign_segment_status(&self, now: u64) -> RateLimitStatus {
        RateLimitStatus {
            decision: Decision::Reject,
            limit: self.policy.max_hits,
            remaining: 0,
            reset_at_ms: now,
            retry_after: Duration::ZERO,
        }
    }

    /// Check `client` against this limiter's segment at the current time.
    pub fn check(&self, client: &str) -> RateLimitStatus {
        let now = self.clock.now_ms();
        self.check_and_record_status(&self.policy.segment, client, now)
    }

    /// Current count for `client` without recording a request.
    pub fn peek(&self, client: &str) -> Option<u64> {
        let key = RateLimitKey::new(&self.policy.segment, client);
        self.store.count(&key, self.clock.now_ms())
    }

    /// Drop `client`'s record in this segment, restoring its full quota.
    pub fn forget(&self, client: &str) -> bool {
        let key = RateLimitKey::new(&self.policy.segment, client);
        self.store.remove(&key)
    }

    /// The policy this limiter enforces.
    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    /// The segment this limiter guards.
    pub fn segment(&self) -> &str {
        &self.policy.segment
    }

    /// The backing store.
    pub fn store(&self) -> &CounterStore {
        &self.store
    }

    /// Number of active records in this limiter's segment.
    pub fn active_clients(&self) -> usize {
        self.store.segment_len(&self.policy.segment)
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("policy", &self.policy)
            .field("records", &self.store.len())
            .finish()
    }
}
