//! Agent lifecycle state, shared by both node types.

use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle of an agent: ready (connected/bound), running, closed.
///
/// `Closed` is terminal; there is no way back to `Running`. Reconnection is
/// an external concern of constructing a new agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum AgentState {
    Ready = 0,
    Running = 1,
    Closed = 2,
}

impl AgentState {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Closed => "closed",
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Ready,
            1 => Self::Running,
            _ => Self::Closed,
        }
    }
}

/// Atomic state cell with one-way transitions.
#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) fn new() -> Self {
        Self(AtomicU8::new(AgentState::Ready as u8))
    }

    pub(crate) fn get(&self) -> AgentState {
        AgentState::from_u8(self.0.load(Ordering::SeqCst))
    }

    /// Ready → Running. Fails with the observed state otherwise.
    pub(crate) fn begin_running(&self) -> Result<(), AgentState> {
        self.0
            .compare_exchange(
                AgentState::Ready as u8,
                AgentState::Running as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .map(|_| ())
            .map_err(AgentState::from_u8)
    }

    /// Transition to Closed from any state. Returns true on the first call.
    pub(crate) fn close(&self) -> bool {
        self.0.swap(AgentState::Closed as u8, Ordering::SeqCst) != AgentState::Closed as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_transitions() {
        let state = StateCell::new();
        assert_eq!(state.get(), AgentState::Ready);

        state.begin_running().unwrap();
        assert_eq!(state.get(), AgentState::Running);
        assert_eq!(state.begin_running(), Err(AgentState::Running));

        assert!(state.close());
        assert!(!state.close());
        assert_eq!(state.get(), AgentState::Closed);
        assert_eq!(state.begin_running(), Err(AgentState::Closed));
    }
}
