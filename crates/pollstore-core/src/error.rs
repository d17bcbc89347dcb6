//! Fault types.
//!
//! A rejected duplicate vote is not a fault; it is reported through
//! [`crate::VoteOutcome::Rejected`]. Faults are the conditions the contract
//! cannot absorb.

use thiserror::Error;

/// Backend faults.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Fault {
    /// The engine could not be reached.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// A referenced poll or option does not exist.
    #[error("schema violation: {0}")]
    SchemaViolation(String),

    /// The engine reported a failure that is neither connectivity nor schema.
    #[error("engine error: {0}")]
    Engine(String),
}

impl Fault {
    /// Create a schema violation for an unknown poll.
    pub fn unknown_poll(poll: impl std::fmt::Display) -> Self {
        Fault::SchemaViolation(format!("poll {} does not exist", poll))
    }

    /// Create a schema violation for an option that is not part of the poll.
    pub fn unknown_option(poll: impl std::fmt::Display, option: impl std::fmt::Display) -> Self {
        Fault::SchemaViolation(format!("option {} is not part of poll {}", option, poll))
    }

    /// Whether this fault means the backend should be skipped for the rest of a run.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Fault::BackendUnavailable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fault_messages() {
        assert_eq!(
            Fault::unknown_poll(7).to_string(),
            "schema violation: poll 7 does not exist"
        );
        assert_eq!(
            Fault::unknown_option(1, "Z").to_string(),
            "schema violation: option Z is not part of poll 1"
        );
        assert_eq!(
            Fault::BackendUnavailable("connection refused".into()).to_string(),
            "backend unavailable: connection refused"
        );
    }

    #[test]
    fn test_is_unavailable() {
        assert!(Fault::BackendUnavailable("down".into()).is_unavailable());
        assert!(!Fault::SchemaViolation("x".into()).is_unavailable());
        assert!(!Fault::Engine("x".into()).is_unavailable());
    }
}
