/*!
 * Reference Primitives
 *
 * Ready-made policies over [`QueuedSynchronizer`](super::QueuedSynchronizer):
 * - Exclusive lock (non-reentrant mutex, optional fair mode)
 * - Boolean latch (one-shot gate released in shared mode)
 */

mod exclusive;
mod latch;

pub use exclusive::{ExclusiveGuard, ExclusiveLock, ExclusivePolicy};
pub use latch::{BooleanLatch, LatchPolicy};
