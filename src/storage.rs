/*
    In-memory storage for query statistics. The store is split into a fixed number of
    partitions, each with its own lock, byte budget and clock replacer, so requests on
    different shapes rarely contend. The manager owns the active store and swaps in a fresh
    one when the budget changes.
 */
pub mod replacer;
pub mod clock_replacer;
pub mod partition;
pub mod store;
pub mod manager;

pub use clock_replacer::ClockReplacer;
pub use manager::StoreManager;
pub use partition::{Insertion, Partition, PartitionError};
pub use replacer::Replacer;
pub use store::{StatsStore, RECORD_SIZE_ESTIMATE};
