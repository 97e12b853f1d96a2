//! Error types for the scheduling layer.

use thiserror::Error;

/// Result type alias for scheduler operations.
pub type SchedResult<T> = Result<T, SchedError>;

/// Error variants for scheduler operations.
///
/// All variants are cheap to clone so that a single drain error can be
/// delivered to every queued request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedError {
    /// A policy swap was requested while requests are queued or in flight.
    #[error("scheduler busy: {pending} queued, {inflight} in flight")]
    Busy {
        /// Requests still held by the outgoing policy.
        pending: usize,
        /// Requests dispatched but not yet completed.
        inflight: usize,
    },

    /// The named scheduling policy is not registered.
    #[error("unknown scheduling policy: {0}")]
    UnknownPolicy(String),

    /// The device disappeared; queued requests are failed with this error.
    #[error("device gone: {reason}")]
    DeviceGone {
        /// Description of why the device went away.
        reason: String,
    },
}
