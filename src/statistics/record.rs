use std::sync::{Arc, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::Serialize;

use crate::shape::{ShapeDescriptor, ShapeError, ShapeKey, ShapeKeyBuilder};
use crate::types::Namespace;

use super::aggregate::AggregatedMetric;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExecutionStats {
    pub exec_count: u64,
    pub last_execution_micros: u64,
    pub total_exec_micros: AggregatedMetric,
    pub docs_returned: AggregatedMetric,
    pub first_seen_millis: u64,
    pub latest_seen_millis: u64
}

/// Aggregated statistics for one query shape. Shared between the cache partition and any
/// request currently writing to it, so eviction never invalidates a handed out record.
#[derive(Debug)]
pub struct MetricsRecord {
    namespace: Namespace,
    descriptor: Arc<ShapeDescriptor>,
    key: OnceLock<Arc<ShapeKey>>,
    stats: Mutex<ExecutionStats>
}

fn now_millis() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}

impl MetricsRecord {
    pub fn new(descriptor: Arc<ShapeDescriptor>, key: Option<Arc<ShapeKey>>) -> MetricsRecord {
        let cell = OnceLock::new();
        if let Some(key) = key {
            let _ = cell.set(key);
        }
        let now = now_millis();
        MetricsRecord {
            namespace: descriptor.namespace().clone(),
            descriptor,
            key: cell,
            stats: Mutex::new(ExecutionStats { first_seen_millis: now, latest_seen_millis: now, ..Default::default() })
        }
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    pub fn descriptor(&self) -> &Arc<ShapeDescriptor> {
        &self.descriptor
    }

    pub fn cached_key(&self) -> Option<&Arc<ShapeKey>> {
        self.key.get()
    }

    // Materializes the key at most once per record. Concurrent callers may both build it,
    // only the first result is kept.
    pub fn shape_key(&self, builder: &ShapeKeyBuilder) -> Result<Arc<ShapeKey>, ShapeError> {
        if let Some(key) = self.key.get() {
            return Ok(key.clone());
        }
        let key = Arc::new(self.descriptor.materialize(builder)?);
        Ok(self.key.get_or_init(|| key).clone())
    }

    pub fn record_execution(&self, exec_micros: u64, docs_returned: u64) {
        let mut stats = self.stats.lock();
        stats.exec_count += 1;
        stats.last_execution_micros = exec_micros;
        stats.total_exec_micros.aggregate(exec_micros);
        stats.docs_returned.aggregate(docs_returned);
        stats.latest_seen_millis = now_millis();
    }

    pub fn stats(&self) -> ExecutionStats {
        self.stats.lock().clone()
    }

    pub fn estimated_size(&self) -> usize {
        let key_size = match self.key.get() {
            Some(key) => key.estimated_size(),
            None => 0
        };
        std::mem::size_of::<Self>() + self.descriptor.estimated_size() + key_size
    }
}
