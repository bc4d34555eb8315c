//! Background removal of expired counter records.
//!
//! Admission checks reset expired windows lazily, but a record for a client
//! that never returns would otherwise stay in the store forever. The sweeper
//! periodically drops every record whose window has elapsed.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::clock::Clock;
use super::store::CounterStore;
use crate::error::{Result, TurnstileError};

/// Running totals kept by a [`Sweeper`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    /// Number of completed sweep passes
    pub runs: u64,
    /// Records removed by the most recent pass
    pub last_removed: usize,
    /// Records removed since the sweeper started
    pub total_removed: u64,
}

/// Handle to a running sweep task.
///
/// Dropping the handle also stops the loop.
pub struct Sweeper {
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
    stats: Arc<Mutex<SweepStats>>,
}

impl Sweeper {
    /// Spawn a sweep loop on the current tokio runtime.
    ///
    /// The first pass runs immediately, then once every `interval`. A zero
    /// interval is a configuration error.
    pub fn spawn(store: CounterStore, clock: Arc<dyn Clock>, interval: Duration) -> Result<Self> {
        if interval.is_zero() {
            return Err(TurnstileError::Config(
                "sweep interval must be positive".to_string(),
            ));
        }

        let (shutdown, mut shutdown_rx) = oneshot::channel();
        let stats = Arc::new(Mutex::new(SweepStats::default()));
        let task_stats = Arc::clone(&stats);

        info!(interval_ms = interval.as_millis() as u64, "Starting counter sweeper");

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = store.sweep(clock.now_ms());
                        {
                            let mut stats = task_stats.lock();
                            stats.runs += 1;
                            stats.last_removed = removed;
                            stats.total_removed += removed as u64;
                        }
                        if removed > 0 {
                            debug!(removed, remaining = store.len(), "Swept expired counters");
                        }
                    }
                    _ = &mut shutdown_rx => break,
                }
            }

            debug!("Counter sweeper stopped");
        });

        Ok(Self {
            shutdown,
            handle,
            stats,
        })
    }

    /// Totals collected so far.
    pub fn stats(&self) -> SweepStats {
        *self.stats.lock()
    }

    /// Stop the loop and wait for the task to finish.
    pub async fn shutdown(self) {
        // The task may already be gone if the runtime is shutting down.
        let _ = self.shutdown.send(());
        if let Err(e) = self.handle.await {
            if e.is_panic() {
                error!(error = %e, "Counter sweeper panicked");
            } else {
                debug!(error = %e, "Counter sweeper was cancelled");
            }
        }
    }
}
