/*!
 * Queued Synchronizers
 *
 * A framework for blocking primitives built on one atomic integer and one
 * FIFO wait queue. A primitive supplies only a [`SyncPolicy`] (what the state
 * means, when acquisition succeeds); the engine supplies queuing, parking,
 * wakeup, cancellation and condition waits.
 *
 * # Architecture
 *
 * - `node` / `queue`: the CLH-style wait queue, lock-free enqueue at the tail
 * - `synchronizer`: the acquire/release loops, exclusive and shared
 * - `condition`: wait/signal layered on the same queue
 * - `parker`: the per-thread park/unpark + interrupt primitive
 * - `locks`: ready-made policies
 *
 * # Use Cases
 *
 * - **Mutexes**: exclusive mode, optionally fair
 * - **Latches and semaphores**: shared mode with propagation
 * - **Monitors**: exclusive mode plus [`Condition`]
 *
 * Node bookkeeping (wait status, node mode) stays inside the engine:
 *
 * ```compile_fail
 * use clh_sync::core::sync::WaitStatus;
 * ```
 */

mod condition;
mod config;
mod node;
mod parker;
mod policy;
mod queue;
mod state;
mod synchronizer;

pub mod locks;

pub use condition::Condition;
pub use config::{SyncConfig, SPIN_THRESHOLD_ENV};
pub use parker::ThreadHandle;
pub use policy::SyncPolicy;
pub use state::SyncState;
pub use synchronizer::QueuedSynchronizer;
