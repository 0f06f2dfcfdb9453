//! Authority error taxonomy.

use tandem_proto::{ObjectId, ParticipantId};
use thiserror::Error;

use crate::transport::TransportError;

/// Why an authority operation did not take effect.
///
/// None of these are fatal. Interactive callers swallow them: when authority
/// cannot be acquired the interaction simply does not happen.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthorityError {
    /// Another participant holds the object.
    #[error("authority over {object} denied (held by {holder:?})")]
    Denied {
        /// Target object.
        object: ObjectId,
        /// Current holder, if known.
        holder: Option<ParticipantId>,
    },

    /// No grant or denial arrived in time.
    #[error("authority request for {object} timed out")]
    Timeout {
        /// Target object.
        object: ObjectId,
    },

    /// The object or participant was already removed.
    #[error("stale reference to {object}")]
    StaleReference {
        /// Target object.
        object: ObjectId,
    },

    /// The request could not be sent.
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),
}

impl AuthorityError {
    /// Whether retrying the acquire later can succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Denied { .. } | Self::Timeout { .. } | Self::Transport(_) => true,
            Self::StaleReference { .. } => false,
        }
    }

    /// Whether this failure says something about connection health.
    ///
    /// Timeouts and transport failures are logged as health signals, plain
    /// denials are not.
    pub fn is_transport_health_signal(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Transport(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn denial_is_retryable_but_not_a_health_signal() {
        let err = AuthorityError::Denied { object: ObjectId(1), holder: Some(ParticipantId(2)) };
        assert!(err.is_retryable());
        assert!(!err.is_transport_health_signal());
    }

    #[test]
    fn timeout_is_health_signal() {
        let err = AuthorityError::Timeout { object: ObjectId(1) };
        assert!(err.is_retryable());
        assert!(err.is_transport_health_signal());
    }

    #[test]
    fn stale_reference_is_final() {
        let err = AuthorityError::StaleReference { object: ObjectId(1) };
        assert!(!err.is_retryable());
    }

    #[test]
    fn error_display() {
        let err = AuthorityError::Timeout { object: ObjectId(4) };
        assert_eq!(err.to_string(), "authority request for obj-4 timed out");
    }
}
