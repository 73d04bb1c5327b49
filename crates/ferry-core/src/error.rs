//! Error types for Ferry

use thiserror::Error;

use crate::{ObjectId, SubscriberId};

/// Replication errors
///
/// Cloneable because a single deferred resolution is handed to every waiter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReplicationError {
    #[error("Subscriber {0} is gone")]
    SubscriberGone(SubscriberId),

    #[error("Resource not ready")]
    NotReady,

    #[error("Unknown object: {0}")]
    UnknownObject(ObjectId),

    #[error("Transport error: {0}")]
    Transport(String),
}

impl ReplicationError {
    /// Whether re-issuing the same call may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, ReplicationError::NotReady)
    }
}

/// Result type for Ferry operations
pub type ReplicationResult<T> = Result<T, ReplicationError>;

/// Status code returned alongside synchronous lookups
///
/// Lets the receiving side tell "not assigned yet" apart from a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Success,
    NotReady,
}

impl Status {
    pub fn is_success(self) -> bool {
        self == Status::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_not_ready_is_retryable() {
        assert!(ReplicationError::NotReady.is_retryable());
        assert!(!ReplicationError::SubscriberGone(SubscriberId::new(1)).is_retryable());
        assert!(!ReplicationError::Transport("boom".into()).is_retryable());
    }

    #[test]
    fn test_error_messages() {
        let err = ReplicationError::SubscriberGone(SubscriberId::new(7));
        assert_eq!(err.to_string(), "Subscriber 7 is gone");
    }
}
