//! Per-segment limiter table.
//!
//! Each protected route group gets its own [`RateLimiter`] built from a
//! [`RateLimitPolicy`]. All limiters in a table share one [`CounterStore`];
//! their records stay apart because keys are namespaced by segment.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::info;

use super::clock::Clock;
use super::limiter::{Decision, RateLimitPolicy, RateLimiter};
use super::store::CounterStore;
use crate::error::{Result, TurnstileError};

/// Limiters indexed by segment name.
#[derive(Debug, Default)]
pub struct SegmentTable {
    limiters: BTreeMap<String, Arc<RateLimiter>>,
}

impl SegmentTable {
    /// Build one limiter per policy on top of a shared store.
    ///
    /// Fails if any policy is invalid or a segment is configured twice.
    pub fn build(
        policies: &[RateLimitPolicy],
        store: &CounterStore,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let mut limiters = BTreeMap::new();

        for policy in policies {
            if limiters.contains_key(&policy.segment) {
                return Err(TurnstileError::Config(format!(
                    "segment '{}' is configured more than once",
                    policy.segment
                )));
            }

            let limiter = RateLimiter::with_clock(policy.clone(), store.clone(), Arc::clone(&clock))?;
            limiters.insert(policy.segment.clone(), Arc::new(limiter));
        }

        info!(segments = limiters.len(), "Rate limit segments loaded");
        Ok(Self { limiters })
    }

    /// Limiter for `segment`, if configured.
    pub fn get(&self, segment: &str) -> Option<&Arc<RateLimiter>> {
        self.limiters.get(segment)
    }

    /// Route a hit to the limiter owning `segment`.
    ///
    /// Returns `None` when no limiter is configured for `segment`.
    pub fn check_and_record(&self, segment: &str, client: &str, now: u64) -> Option<Decision> {
        self.get(segment)
            .map(|limiter| limiter.check_and_record(segment, client, now))
    }

    /// Iterate over `(segment, limiter)` pairs in segment order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<RateLimiter>)> {
        self.limiters.iter().map(|(segment, limiter)| (segment.as_str(), limiter))
    }

    /// Number of configured segments.
    pub fn len(&self) -> usize {
        self.limiters.len()
    }

    /// Whether no segment is configured.
    pub fn is_empty(&self) -> bool {
        self.limiters.is_empty()
    }
}
