/*!
 * Error Types
 * Centralized synchronizer error handling with thiserror and miette
 */

use miette::Diagnostic;
use thiserror::Error;

/// Failures surfaced by the acquire/release engine, policy hooks and conditions
///
/// Timeouts are not errors: timed operations report them through their return
/// value (`false` or a non-positive remaining duration).
#[derive(Error, Debug, Clone, PartialEq, Eq, Diagnostic)]
pub enum SyncError {
    #[error("Unsupported synchronization mode: {0} is not implemented by this policy")]
    #[diagnostic(
        code(sync::unsupported_mode),
        help("Implement the hook on the SyncPolicy or use the other acquisition mode.")
    )]
    UnsupportedMode(&'static str),

    #[error("Illegal synchronizer state: {0}")]
    #[diagnostic(
        code(sync::illegal_state),
        help("A policy hook found its own invariants violated. This is a programming error.")
    )]
    IllegalState(String),

    #[error("Current thread does not hold the synchronizer exclusively")]
    #[diagnostic(
        code(sync::illegal_monitor_state),
        help("Conditions can only be used while holding the owning synchronizer in exclusive mode.")
    )]
    IllegalMonitorState,

    #[error("Thread was interrupted while waiting")]
    #[diagnostic(
        code(sync::interrupted),
        help("The waiter's node has been cancelled. Retry or propagate the interruption.")
    )]
    Interrupted,

    #[error("Illegal argument: {0}")]
    #[diagnostic(
        code(sync::illegal_argument),
        help("The condition passed in belongs to a different synchronizer.")
    )]
    IllegalArgument(String),
}

impl SyncError {
    /// Whether the error comes from a cooperative interruption request
    #[inline]
    pub fn is_interrupted(&self) -> bool {
        matches!(self, SyncError::Interrupted)
    }
}

/// Result type for synchronizer operations
pub type SyncResult<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SyncError::UnsupportedMode("try_acquire_shared");
        assert!(err.to_string().contains("try_acquire_shared"));

        let err = SyncError::IllegalState("release without hold".into());
        assert_eq!(
            err.to_string(),
            "Illegal synchronizer state: release without hold"
        );
    }

    #[test]
    fn test_diagnostic_codes() {
        let err = SyncError::IllegalMonitorState;
        let code = err.code().map(|c| c.to_string());
        assert_eq!(code.as_deref(), Some("sync::illegal_monitor_state"));
        assert!(err.help().is_some());
    }

    #[test]
    fn test_is_interrupted() {
        assert!(SyncError::Interrupted.is_interrupted());
        assert!(!SyncError::IllegalArgument("foreign".into()).is_interrupted());
    }
}
