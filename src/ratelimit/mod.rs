//! Rate limiting logic and state management.

mod clock;
mod counter;
mod key;
mod limiter;
mod rules;
mod store;
mod sweeper;

pub use clock::{Clock, ManualClock, SystemClock};
pub use counter::{CounterRecord, CounterSnapshot};
pub use key::{RateLimitKey, UNKNOWN_CLIENT};
pub use limiter::{Decision, RateLimitPolicy, RateLimitStatus, RateLimiter};
pub use rules::SegmentTable;
pub use store::CounterStore;
pub use sweeper::{SweepStats, Sweeper};
