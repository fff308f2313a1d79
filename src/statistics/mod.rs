pub mod aggregate;
pub mod rate_limiter;
mod record;

pub use aggregate::AggregatedMetric;
pub use rate_limiter::{Clock, RateLimiter, SystemClock, SAMPLING_RATE_ALWAYS};
pub use record::{ExecutionStats, MetricsRecord};

/*
    Statistics are only ever accumulated in memory. Every distinct query shape gets one
    MetricsRecord which is created the first time an execution of that shape finishes and
    then updated in place by every later execution. Records live in the partitioned store
    (see storage) and are gone once they are evicted or the store is replaced.

    Computing a shape is not free (it walks the whole command) so the rate limiter decides
    up front whether a request takes part at all. A sampling rate of zero or less switches
    collection off, SAMPLING_RATE_ALWAYS skips the window bookkeeping entirely.
 */
