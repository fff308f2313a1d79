use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::shape::ShapeKeyHash;
use crate::statistics::MetricsRecord;

use super::clock_replacer::ClockReplacer;
use super::replacer::Replacer;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PartitionError {
    #[error("query stats record of {size} bytes does not fit into a partition of {budget} bytes")]
    RecordTooLargeForPartition { size: usize, budget: usize }
}

struct PartitionEntry {
    record: Arc<MetricsRecord>,
    size: usize
}

struct PartitionState<R: Replacer> {
    entries: HashMap<ShapeKeyHash, PartitionEntry, ahash::RandomState>,
    replacer: R,
    footprint: usize
}

/// Result of [`Partition::insert_if_absent`].
pub struct Insertion {
    pub record: Arc<MetricsRecord>,
    // false if another request created the record first
    pub inserted: bool,
    pub evicted: usize
}

pub struct Partition<R: Replacer = ClockReplacer> {
    // Lookup, insertion and eviction all happen under this one lock so two requests racing
    // on the same shape can never both create a record
    state: Mutex<PartitionState<R>>,
    budget: usize
}

impl Partition<ClockReplacer> {
    pub fn new(budget: usize) -> Self {
        Partition::with_replacer(budget, ClockReplacer::new())
    }
}

impl<R: Replacer> Partition<R> {
    pub fn with_replacer(budget: usize, replacer: R) -> Self {
        Partition {
            state: Mutex::new(PartitionState { entries: HashMap::default(), replacer, footprint: 0 }),
            budget
        }
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    pub fn lookup(&self, hash: ShapeKeyHash) -> Option<Arc<MetricsRecord>> {
        let mut state = self.state.lock();
        let record = state.entries.get(&hash).map(|e| e.record.clone())?;
        state.replacer.use_entry(hash);
        Some(record)
    }

    pub fn insert_if_absent<F>(&self, hash: ShapeKeyHash, factory: F) -> Result<Insertion, PartitionError>
    where
        F: FnOnce() -> MetricsRecord
    {
        let mut state = self.state.lock();
        if let Some(entry) = state.entries.get(&hash) {
            let record = entry.record.clone();
            state.replacer.use_entry(hash);
            return Ok(Insertion { record, inserted: false, evicted: 0 });
        }
        let record = Arc::new(factory());
        let size = record.estimated_size();
        if size > self.budget {
            return Err(PartitionError::RecordTooLargeForPartition { size, budget: self.budget });
        }
        let mut evicted = 0;
        while state.footprint + size > self.budget {
            let victim = match state.replacer.find_victim() {
                Some(victim) => victim,
                None => break
            };
            state.replacer.remove_entry(victim);
            match state.entries.remove(&victim) {
                Some(entry) => {
                    state.footprint -= entry.size;
                    evicted += 1;
                }
                // Replacer and map disagree, nothing more we can free
                None => break
            }
        }
        if state.footprint + size > self.budget {
            return Err(PartitionError::RecordTooLargeForPartition { size, budget: self.budget });
        }
        state.entries.insert(hash, PartitionEntry { record: record.clone(), size });
        state.replacer.add_entry(hash);
        state.footprint += size;
        Ok(Insertion { record, inserted: true, evicted })
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn estimated_size(&self) -> usize {
        self.state.lock().footprint
    }

    // Copies the record handles out so the lock isn't held while callers read them
    pub fn records(&self) -> Vec<Arc<MetricsRecord>> {
        self.state.lock().entries.values().map(|e| e.record.clone()).collect()
    }
}
