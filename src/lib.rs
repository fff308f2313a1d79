pub mod types;
pub mod shape;
pub mod statistics;
pub mod storage;
pub mod config;
pub mod query_stats;
