/*
    Ties the pieces together for the query engine. The engine calls register_request when a
    query starts, the context then carries the registration (key, hash and the summed up
    cost of every batch) until finalize writes it into the active store. A request that is
    not admitted, runs against an encrypted state collection or produces an encrypted
    payload marker while its shape is built simply stays idle, the query itself is never
    affected by anything that happens in here.

    There is no global state, the engine owns one QueryStats and hands it to every request.
 */
mod context;
mod metrics;

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::{debug, info};

use crate::config::{resolve_store_size, ConfigError, QueryStatsConfig};
use crate::shape::{HmacKey, QueryRequest, ShapeDescriptor, ShapeKey, ShapeKeyBuilder, ShapeKeyHash};
use crate::statistics::{Clock, ExecutionStats, MetricsRecord, RateLimiter, SystemClock};
use crate::storage::StoreManager;
use crate::types::Namespace;

pub use context::{PendingQueryStats, RequestContext, RequestState};
pub use metrics::{MetricsReport, QueryStatsMetrics};

#[derive(Debug, thiserror::Error)]
pub enum QueryStatsError {
    #[error("query stats are disabled")]
    FeatureDisabled,
    #[error(transparent)]
    Config(#[from] ConfigError)
}

/// How a snapshot is rendered. With an HMAC key every identifier in the reported shapes is
/// redacted.
#[derive(Debug, Clone, Default)]
pub struct SnapshotOptions {
    pub hmac_key: Option<HmacKey>
}

impl SnapshotOptions {
    pub fn redacted(key: HmacKey) -> Self {
        SnapshotOptions { hmac_key: Some(key) }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryStatsEntry {
    pub key_hash: String,
    pub key: Arc<ShapeKey>,
    pub metrics: ExecutionStats
}

impl QueryStatsEntry {
    pub fn to_json(&self) -> JsonValue {
        serde_json::to_value(self).unwrap_or(JsonValue::Null)
    }
}

pub struct QueryStats {
    // Fixed for the lifetime of the process
    feature_enabled: bool,
    manager: StoreManager,
    rate_limiter: RateLimiter,
    builder: ShapeKeyBuilder,
    metrics: QueryStatsMetrics
}

impl QueryStats {
    pub fn new(config: &QueryStatsConfig) -> Result<QueryStats, QueryStatsError> {
        Self::with_clock(config, Arc::new(SystemClock::new()))
    }

    pub fn with_clock(config: &QueryStatsConfig, clock: Arc<dyn Clock>) -> Result<QueryStats, QueryStatsError> {
        config.validate()?;
        let manager = if config.enabled {
            let budget = config.store_size_bytes()?;
            let manager = StoreManager::new(budget, config.partitions_hint());
            info!(budget, partitions = manager.store().partition_count(), sampling_rate = config.sampling_rate,
                "query stats enabled");
            manager
        } else {
            info!("query stats disabled");
            StoreManager::new(0, 1)
        };
        Ok(QueryStats {
            feature_enabled: config.enabled,
            manager,
            rate_limiter: RateLimiter::with_clock(config.sampling_rate, clock),
            builder: ShapeKeyBuilder::new(),
            metrics: QueryStatsMetrics::new()
        })
    }

    /// Enabled and with room to store anything.
    pub fn is_enabled(&self) -> bool {
        self.feature_enabled && self.manager.max_size() > 0
    }

    /// Consumes a slot of the rate limiter when it returns true.
    pub fn should_collect(&self, namespace: &Namespace) -> bool {
        if !self.is_enabled() || self.rate_limiter.sampling_rate() <= 0 {
            return false;
        }
        if namespace.is_encrypted_state_collection() {
            return false;
        }
        if !self.rate_limiter.admit() {
            self.metrics.record_rate_limited();
            return false;
        }
        true
    }

    /// Computes the shape of the request and attaches it to the context. Does nothing unless
    /// the context is idle.
    pub fn register_request(&self, request: &QueryRequest, ctx: &mut RequestContext) {
        if ctx.state() != RequestState::Idle || !self.should_collect(&request.namespace) {
            return;
        }
        let descriptor = Arc::new(ShapeDescriptor::new(request.clone(), ctx.application_name().map(str::to_string)));
        match descriptor.materialize(&self.builder) {
            Ok(key) => ctx.attach(PendingQueryStats::new(Arc::new(key), descriptor)),
            Err(err) => debug!(namespace = %request.namespace, error = %err, "not collecting query stats")
        }
    }

    /// Writes the registration into the store, adding the cost of the final batch. Does
    /// nothing if the request was never registered.
    pub fn finalize(&self, ctx: &mut RequestContext, exec_micros: u64, docs_returned: u64) {
        let mut pending = match ctx.take_for_finalize() {
            Some(pending) => pending,
            None => return
        };
        pending.accumulate(exec_micros, docs_returned);
        let store = self.manager.store();
        let result = store.insert_if_absent(pending.hash(), || {
            MetricsRecord::new(pending.descriptor().clone(), Some(pending.key().clone()))
        });
        match result {
            Ok(insertion) => {
                self.metrics.record_evicted(insertion.evicted);
                insertion.record.record_execution(pending.exec_micros(), pending.docs_returned());
            }
            Err(err) => {
                self.metrics.record_store_write_error();
                debug!(hash = %pending.hash(), error = %err, "failed to write query stats");
            }
        }
    }

    /// Entries of the active store. Each partition is read consistently, the store as a whole
    /// is not. Entries whose shape can't be rebuilt with the requested redaction are skipped.
    pub fn snapshot(&self, options: &SnapshotOptions) -> Result<impl Iterator<Item = QueryStatsEntry>, QueryStatsError> {
        if !self.is_enabled() {
            return Err(QueryStatsError::FeatureDisabled);
        }
        let redacting = options.hmac_key.is_some();
        let builder = match &options.hmac_key {
            Some(key) => ShapeKeyBuilder::with_redaction(key.clone()),
            None => self.builder.clone()
        };
        let records = self.manager.store().records();
        Ok(records.into_iter().filter_map(move |record| {
            let key = if redacting {
                record.descriptor().materialize(&builder).map(Arc::new)
            } else {
                record.shape_key(&builder)
            };
            match key {
                Ok(key) => Some(QueryStatsEntry {
                    key_hash: ShapeKeyHash::of(key.canonical_bytes()).to_string(),
                    key,
                    metrics: record.stats()
                }),
                Err(err) => {
                    debug!(namespace = %record.namespace(), error = %err, "skipping query stats entry");
                    None
                }
            }
        }))
    }

    /// Resizes the store to the given size string. Everything collected so far is dropped,
    /// returns the number of entries that were evicted that way.
    pub fn on_cache_size_changed(&self, cache_size: &str) -> Result<usize, QueryStatsError> {
        if !self.feature_enabled {
            return Err(QueryStatsError::FeatureDisabled);
        }
        let budget = resolve_store_size(cache_size)?;
        let evicted = self.manager.reset_size(budget);
        self.metrics.record_evicted(evicted);
        Ok(evicted)
    }

    pub fn on_sampling_rate_changed(&self, sampling_rate: i32) -> Result<(), QueryStatsError> {
        if !self.feature_enabled {
            return Err(QueryStatsError::FeatureDisabled);
        }
        self.rate_limiter.set_sampling_rate(sampling_rate);
        info!(sampling_rate, "query stats sampling rate changed");
        Ok(())
    }

    pub fn metrics(&self) -> MetricsReport {
        self.metrics.report(&self.manager.store())
    }

    pub fn max_size(&self) -> usize {
        self.manager.max_size()
    }

    pub fn manager(&self) -> &StoreManager {
        &self.manager
    }
}
