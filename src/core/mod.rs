/*!
 * Core Module
 * Synchronizer framework and error handling
 */

pub mod errors;
pub mod sync;

// Re-export for convenience
pub use errors::*;
