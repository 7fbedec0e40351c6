use thiserror::Error;

use crate::peer::state::Phase;

/// Errors surfaced by the call orchestrator to its UI collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    /// Camera/microphone denied or absent
    #[error("local media unavailable: {0}")]
    MediaUnavailable(String),

    /// Malformed or incompatible session description
    #[error("negotiation failed: {0}")]
    Negotiation(String),

    /// Expected descriptor field missing (offer retracted mid-accept)
    #[error("session descriptor inconsistent: {0}")]
    Consistency(String),

    /// Shared-store read/write failure that the store could not recover from
    #[error("signaling I/O failed: {0}")]
    SignalingIo(String),

    #[error("{operation} is not valid in phase {phase:?}")]
    InvalidPhase {
        operation: &'static str,
        phase: Phase,
    },

    #[error("no remote media after {0} s of negotiation")]
    NegotiationTimeout(u64),

    #[error("invalid configuration: {0}")]
    Config(String),

    /// The orchestrator has been disposed
    #[error("call session closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, CallError>;

/// Errors reported by a [`DocumentStore`](crate::store::DocumentStore).
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("document not found: {0}")]
    NotFound(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<StoreError> for CallError {
    fn from(err: StoreError) -> Self {
        CallError::SignalingIo(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_surface_as_signaling_io() {
        let err: CallError = StoreError::Unavailable("offline".into()).into();
        assert_eq!(err, CallError::SignalingIo("store unavailable: offline".into()));
    }

    #[test]
    fn invalid_phase_names_operation() {
        let err = CallError::InvalidPhase {
            operation: "accept_call",
            phase: Phase::Idle,
        };
        assert_eq!(err.to_string(), "accept_call is not valid in phase Idle");
    }
}
