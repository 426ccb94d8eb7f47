//! Two-level result cache and its delayed batch writer
pub mod disk;
pub mod key;
pub mod two_level;
pub mod write_manager;

pub use two_level::TwoLevelCache;
pub use write_manager::{DelayedBatchWriteManager, MainCacheUpdater};
