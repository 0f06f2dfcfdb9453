//! Client error types.

use tandem_core::ownership::OwnershipError;
use tandem_proto::{Capability, Field, HandChannel, ObjectId};
use thiserror::Error;

/// Errors from client operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    /// No session is established.
    #[error("not connected")]
    NotConnected,

    /// `Connect` while already connected or connecting.
    #[error("already connected")]
    AlreadyConnected,

    /// Write or trigger without holding authority.
    #[error("not the authority for {object}")]
    NotAuthority {
        /// Target object.
        object: ObjectId,
    },

    /// A transform component is NaN or infinite.
    #[error("non-finite {field:?} for {object}")]
    NonFinite {
        /// Target object.
        object: ObjectId,
        /// Offending field.
        field: Field,
    },

    /// The local device does not animate the trigger's channel.
    #[error("{capability:?} participants do not drive {channel:?}")]
    UnsupportedChannel {
        /// Requested channel.
        channel: HandChannel,
        /// Local capability.
        capability: Capability,
    },

    /// Only the leader may start the session.
    #[error("only the leader may start the session")]
    NotLeader,

    /// Ownership state does not allow the request.
    #[error("ownership: {0}")]
    Ownership(#[from] OwnershipError),

    /// The coordinator sent a message only participants may send.
    #[error("unexpected message from coordinator: {kind}")]
    UnexpectedMessage {
        /// Message kind.
        kind: &'static str,
    },
}

impl ClientError {
    /// Returns true if this error is fatal (unrecoverable).
    ///
    /// Fatal errors indicate protocol violations by the coordinator.
    /// Everything else is an interaction that silently did not happen.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::UnexpectedMessage { .. } => true,

            Self::NotConnected
            | Self::AlreadyConnected
            | Self::NotAuthority { .. }
            | Self::NonFinite { .. }
            | Self::UnsupportedChannel { .. }
            | Self::NotLeader
            | Self::Ownership(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_authority_is_transient() {
        let err = ClientError::NotAuthority { object: ObjectId(1) };
        assert!(!err.is_fatal());
    }

    #[test]
    fn unexpected_message_is_fatal() {
        let err = ClientError::UnexpectedMessage { kind: "Hello" };
        assert!(err.is_fatal());
    }

    #[test]
    fn error_display() {
        let err = ClientError::Ownership(OwnershipError::Pending(ObjectId(3)));
        assert_eq!(err.to_string(), "ownership: request for obj-3 already pending");
    }
}
