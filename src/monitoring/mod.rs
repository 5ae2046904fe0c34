/*!
 * Monitoring
 * Tracing subscriber setup for binaries embedding the synchronizers
 */

mod tracer;

pub use tracer::{init_tracing, TRACE_JSON_ENV};
