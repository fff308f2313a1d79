use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::storage::StatsStore;

/// Process wide counters of the query stats service.
#[derive(Debug, Default)]
pub struct QueryStatsMetrics {
    num_evicted: AtomicU64,
    num_rate_limited_requests: AtomicU64,
    num_store_write_errors: AtomicU64
}

impl QueryStatsMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_evicted(&self, evicted: usize) {
        if evicted > 0 {
            self.num_evicted.fetch_add(evicted as u64, Ordering::Relaxed);
        }
    }

    pub fn record_rate_limited(&self) {
        self.num_rate_limited_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_store_write_error(&self) {
        self.num_store_write_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// The size estimate and entry count are read from the store handed in.
    pub fn report(&self, store: &StatsStore) -> MetricsReport {
        MetricsReport {
            num_evicted: self.num_evicted.load(Ordering::Relaxed),
            num_rate_limited_requests: self.num_rate_limited_requests.load(Ordering::Relaxed),
            num_query_stats_store_write_errors: self.num_store_write_errors.load(Ordering::Relaxed),
            query_stats_store_size_estimate_bytes: store.estimated_size() as u64,
            num_entries: store.len() as u64
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsReport {
    pub num_evicted: u64,
    pub num_rate_limited_requests: u64,
    pub num_query_stats_store_write_errors: u64,
    pub query_stats_store_size_estimate_bytes: u64,
    pub num_entries: u64
}
