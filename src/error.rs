//! Error types for vault operations.

use thiserror::Error;

use crate::buffer::BufferId;
use crate::ledger::OwnerState;

/// Result type alias for vault operations.
pub type Result<T> = std::result::Result<T, VaultError>;

/// Errors reported by the buffer vault.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VaultError {
    /// The ledger was asked to move an entry along an edge that does not exist,
    /// or the entry was not in the expected state. Nothing was committed.
    #[error("buffer {id} cannot move from {from} to {to}")]
    InvalidTransition {
        /// The buffer concerned.
        id: BufferId,
        /// The state the entry was actually in.
        from: OwnerState,
        /// The requested target state.
        to: OwnerState,
    },

    /// The id is not present in the ledger, or not in a state the caller may act on.
    #[error("buffer {0} is not known to the vault")]
    UnknownBuffer(BufferId),

    /// A remote package could not be turned into a local buffer.
    #[error("failed to construct local buffer {id}: {source}")]
    Construction {
        /// The id that was dropped from the ledger.
        id: BufferId,
        /// The factory's reason.
        #[source]
        source: ConstructionError,
    },

    /// The withdraw request was broken by vault teardown.
    #[error("withdraw request cancelled: the vault was torn down")]
    Cancelled,
}

/// Failure raised by a [`ClientBufferFactory`](crate::ClientBufferFactory).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct ConstructionError {
    reason: String,
}

impl ConstructionError {
    /// Creates a construction error with a human readable reason.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    /// Returns the reason given by the factory.
    #[must_use]
    pub fn reason(&self) -> &str {
        &self.reason
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = VaultError::InvalidTransition {
            id: BufferId::new(7),
            from: OwnerState::Free,
            to: OwnerState::AtServer,
        };
        assert_eq!(err.to_string(), "buffer #7 cannot move from free to at-server");

        let err = VaultError::Construction {
            id: BufferId::new(3),
            source: ConstructionError::new("bad fd"),
        };
        assert!(err.to_string().contains("bad fd"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
