/*!
 * CLH Sync Library
 * Queue-based blocking synchronizers built from pluggable state policies
 */

pub mod core;
pub mod monitoring;

// Re-exports
pub use crate::core::errors::{SyncError, SyncResult};
pub use crate::core::sync::locks::{BooleanLatch, ExclusiveLock};
pub use crate::core::sync::{
    Condition, QueuedSynchronizer, SyncConfig, SyncPolicy, SyncState, ThreadHandle,
};
pub use monitoring::init_tracing;
