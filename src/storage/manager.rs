use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

use super::store::StatsStore;

/// Owns the active store. Readers clone the `Arc` and keep using the store they got even
/// if it is replaced in the meantime, the old store is freed once the last reader drops it.
pub struct StoreManager {
    store: RwLock<Arc<StatsStore>>,
    // Only written with the store lock held so the two never disagree for writers
    max_size: AtomicUsize,
    partitions_hint: usize
}

impl StoreManager {
    pub fn new(budget: usize, partitions_hint: usize) -> StoreManager {
        StoreManager {
            store: RwLock::new(Arc::new(StatsStore::new(budget, partitions_hint))),
            max_size: AtomicUsize::new(budget),
            partitions_hint
        }
    }

    pub fn store(&self) -> Arc<StatsStore> {
        self.store.read().clone()
    }

    pub fn max_size(&self) -> usize {
        self.max_size.load(Ordering::Acquire)
    }

    /// Replaces the store with an empty one of the given budget and returns how many
    /// entries the old store held. Statistics collected so far are dropped.
    pub fn reset_size(&self, budget: usize) -> usize {
        // Allocating the partitions doesn't need the lock
        let fresh = Arc::new(StatsStore::new(budget, self.partitions_hint));
        let old = {
            let mut store = self.store.write();
            self.max_size.store(budget, Ordering::Release);
            std::mem::replace(&mut *store, fresh)
        };
        let evicted = old.len();
        info!(budget, evicted, partitions = old.partition_count(), "query stats store resized");
        evicted
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;

    use crate::doc;
    use crate::shape::{QueryRequest, ShapeDescriptor, ShapeKeyHash};
    use crate::statistics::MetricsRecord;
    use crate::types::Namespace;

    use super::StoreManager;

    fn record() -> MetricsRecord {
        MetricsRecord::new(Arc::new(ShapeDescriptor::new(
            QueryRequest::find(Namespace::new("db", "c"), doc! { "filter" => doc! { "a" => 1 } }),
            None
        )), None)
    }

    #[test]
    fn reset_returns_old_entry_count() {
        let manager = StoreManager::new(1 << 20, 2);
        let store = manager.store();
        for h in 0..5 {
            store.insert_if_absent(ShapeKeyHash(h), record).unwrap();
        }
        assert_eq!(manager.reset_size(1 << 16), 5);
        assert_eq!(manager.max_size(), 1 << 16);
        assert!(manager.store().is_empty());
        assert_eq!(manager.store().budget(), 1 << 16);
        // The old handle still works, it's just no longer reachable through the manager
        assert_eq!(store.len(), 5);
    }

    #[test]
    fn zero_budget() {
        let manager = StoreManager::new(0, 4);
        assert_eq!(manager.max_size(), 0);
        assert!(manager.store().insert_if_absent(ShapeKeyHash(1), record).is_err());
    }

    #[test]
    fn readers_see_a_whole_store() {
        let budgets = [1usize << 16, 1 << 18, 1 << 20];
        let manager = Arc::new(StoreManager::new(budgets[0], 4));
        let done = Arc::new(AtomicBool::new(false));
        let readers: Vec<_> = (0..4).map(|_| {
            let manager = manager.clone();
            let done = done.clone();
            thread::spawn(move || {
                while !done.load(Ordering::Relaxed) {
                    let store = manager.store();
                    assert!(budgets.contains(&store.budget()));
                    store.insert_if_absent(ShapeKeyHash(3), record).unwrap();
                    assert!(store.lookup(ShapeKeyHash(3)).is_some());
                }
            })
        }).collect();
        for i in 0..300 {
            manager.reset_size(budgets[i % budgets.len()]);
        }
        done.store(true, Ordering::Relaxed);
        for r in readers {
            r.join().unwrap();
        }
        assert_eq!(manager.max_size(), budgets[299 % budgets.len()]);
        assert_eq!(manager.store().budget(), manager.max_size());
    }
}
