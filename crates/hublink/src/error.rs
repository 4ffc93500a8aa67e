//! Core error type.

use hublink_wire::WireError;
use thiserror::Error;

/// Errors surfaced by the protocol core.
///
/// Only setup faults (`connect`/`bind`) and lifecycle misuse reach the
/// caller; steady-state operational faults are reported through the
/// registered callbacks and logging instead.
#[derive(Debug, Error)]
pub enum LinkError {
    /// A transport-level fault during setup.
    #[error(transparent)]
    Wire(#[from] WireError),

    /// The agent is in the wrong lifecycle state for the operation.
    #[error("agent is {current}, cannot {operation}")]
    InvalidState {
        /// Current lifecycle state.
        current: &'static str,
        /// The operation that was attempted.
        operation: &'static str,
    },
}
