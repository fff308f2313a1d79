use std::sync::Arc;

use crate::shape::ShapeKeyHash;
use crate::statistics::MetricsRecord;

use super::partition::{Insertion, Partition, PartitionError};

// Fixed part of a record. Shapes add their own size on top of this.
pub const RECORD_SIZE_ESTIMATE: usize = std::mem::size_of::<MetricsRecord>();

// A partition should have room for at least this many records, otherwise we trade
// contention for capacity
const MIN_RECORDS_PER_PARTITION: usize = 10;

/// Fixed array of partitions. The partition count never changes, resizing means
/// building a new store.
pub struct StatsStore {
    partitions: Vec<Partition>,
    budget: usize
}

impl StatsStore {
    pub fn new(budget: usize, partitions_hint: usize) -> StatsStore {
        let partition_count = Self::partition_count_for(budget, partitions_hint);
        let partition_budget = budget / partition_count;
        let partitions = (0..partition_count).map(|_| Partition::new(partition_budget)).collect();
        StatsStore { partitions, budget }
    }

    pub fn partition_count_for(budget: usize, partitions_hint: usize) -> usize {
        let hint = partitions_hint.max(1);
        if budget / hint < RECORD_SIZE_ESTIMATE * MIN_RECORDS_PER_PARTITION {
            (budget / RECORD_SIZE_ESTIMATE).clamp(1, hint)
        } else {
            hint
        }
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    pub fn partition_for(&self, hash: ShapeKeyHash) -> &Partition {
        &self.partitions[(hash.0 % self.partitions.len() as u64) as usize]
    }

    pub fn lookup(&self, hash: ShapeKeyHash) -> Option<Arc<MetricsRecord>> {
        self.partition_for(hash).lookup(hash)
    }

    pub fn insert_if_absent<F>(&self, hash: ShapeKeyHash, factory: F) -> Result<Insertion, PartitionError>
    where
        F: FnOnce() -> MetricsRecord
    {
        self.partition_for(hash).insert_if_absent(hash, factory)
    }

    pub fn len(&self) -> usize {
        self.partitions.iter().map(Partition::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.iter().all(Partition::is_empty)
    }

    pub fn estimated_size(&self) -> usize {
        self.partitions.iter().map(Partition::estimated_size).sum()
    }

    // Consistent per partition, not across the whole store
    pub fn records(&self) -> Vec<Arc<MetricsRecord>> {
        self.partitions.iter().flat_map(Partition::records).collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::doc;
    use crate::shape::{QueryRequest, ShapeDescriptor, ShapeKeyHash};
    use crate::statistics::MetricsRecord;
    use crate::types::Namespace;

    use super::{StatsStore, RECORD_SIZE_ESTIMATE};

    fn record() -> MetricsRecord {
        MetricsRecord::new(Arc::new(ShapeDescriptor::new(
            QueryRequest::find(Namespace::new("db", "c"), doc! { "filter" => doc! { "a" => 1 } }),
            None
        )), None)
    }

    #[test]
    fn partition_count() {
        let roomy = RECORD_SIZE_ESTIMATE * 100 * 8;
        assert_eq!(StatsStore::partition_count_for(roomy, 8), 8);
        // Too small for ten records per partition
        assert_eq!(StatsStore::partition_count_for(RECORD_SIZE_ESTIMATE * 4, 8), 4);
        assert_eq!(StatsStore::partition_count_for(0, 8), 1);
        assert_eq!(StatsStore::partition_count_for(roomy, 0), 1);
        assert_eq!(StatsStore::new(0, 16).partition_count(), 1);
    }

    #[test]
    fn routing_is_deterministic() {
        let store = StatsStore::new(1 << 20, 4);
        assert_eq!(store.partition_count(), 4);
        for h in 0..32 {
            let a = store.partition_for(ShapeKeyHash(h)) as *const _;
            let b = store.partition_for(ShapeKeyHash(h)) as *const _;
            assert_eq!(a, b);
        }
        assert!(!std::ptr::eq(store.partition_for(ShapeKeyHash(0)), store.partition_for(ShapeKeyHash(1))));
    }

    #[test]
    fn entries_spread_over_partitions() {
        let store = StatsStore::new(1 << 20, 4);
        for h in 0..40 {
            store.insert_if_absent(ShapeKeyHash(h), record).unwrap();
        }
        assert_eq!(store.len(), 40);
        assert_eq!(store.records().len(), 40);
        assert!(!store.is_empty());
        assert!(store.estimated_size() <= store.budget());
        for h in 0..40 {
            assert!(store.lookup(ShapeKeyHash(h)).is_some());
        }
    }
}
