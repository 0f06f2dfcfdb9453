//! Operations for model-based testing.
//!
//! Operations are generated randomly (by proptest or a fuzzer) and applied to
//! both the model and the simulated system.

use arbitrary::Arbitrary;
use tandem_proto::{FieldValue, HandChannel, ObjectId, Transform, TriggerEvent};

/// Client index (0-based).
pub type ClientId = u8;

/// Object index (0-based). Maps to prop id `index + 1`.
pub type ModelObjectId = u8;

/// Operations that can be applied to the system.
#[derive(Debug, Clone, Arbitrary)]
pub enum Operation {
    /// Client asks for authority.
    Acquire {
        /// Client performing the operation.
        client_id: ClientId,
        /// Target object.
        object: ModelObjectId,
    },

    /// Client writes one field.
    Publish {
        /// Client performing the operation.
        client_id: ClientId,
        /// Target object.
        object: ModelObjectId,
        /// Value to write.
        value: SmallValue,
    },

    /// Client hands authority back.
    Release {
        /// Client performing the operation.
        client_id: ClientId,
        /// Target object.
        object: ModelObjectId,
    },

    /// Client writes one field and releases in the same step.
    PublishThenRelease {
        /// Client performing the operation.
        client_id: ClientId,
        /// Target object.
        object: ModelObjectId,
        /// Final value.
        value: SmallValue,
    },

    /// Client fires a trigger on an object it holds.
    Trigger {
        /// Client performing the operation.
        client_id: ClientId,
        /// Source object.
        object: ModelObjectId,
        /// Distinguishes triggers in the delivery log.
        seed: u8,
    },

    /// Client's connection drops without a goodbye.
    Disconnect {
        /// Client losing its connection.
        client_id: ClientId,
    },

    /// Advance simulation time.
    AdvanceTime {
        /// Milliseconds to advance (clamped to stay below every timeout).
        millis: u16,
    },

    /// Deliver pending messages.
    ///
    /// The model delivers instantly, so this is a no-op there.
    DeliverPending,
}

impl Operation {
    /// Client the operation targets, if any.
    pub fn client_id(&self) -> Option<ClientId> {
        match self {
            Self::Acquire { client_id, .. }
            | Self::Publish { client_id, .. }
            | Self::Release { client_id, .. }
            | Self::PublishThenRelease { client_id, .. }
            | Self::Trigger { client_id, .. }
            | Self::Disconnect { client_id } => Some(*client_id),
            Self::AdvanceTime { .. } | Self::DeliverPending => None,
        }
    }
}

/// Compact field write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Arbitrary)]
pub struct SmallValue {
    /// Selects the field (mod 3).
    pub field: u8,
    /// Selects the value.
    pub value: u8,
}

impl SmallValue {
    /// Expand to a real field value.
    pub fn to_field_value(self) -> FieldValue {
        match self.field % 3 {
            0 => FieldValue::Grabbed(self.value % 2 == 1),
            1 => FieldValue::Active(self.value % 2 == 1),
            _ => FieldValue::Transform(Transform::at([f32::from(self.value), 0.0, 0.0])),
        }
    }
}

/// Real object id of a model object.
pub fn object_id(object: ModelObjectId) -> ObjectId {
    ObjectId(u64::from(object) + 1)
}

/// Trigger fired by [`Operation::Trigger`].
pub fn trigger_event(seed: u8) -> TriggerEvent {
    TriggerEvent::fire(HandChannel::LeftHand, format!("t{seed}"))
}

/// Result of applying an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationResult {
    /// Operation succeeded.
    Ok,

    /// Operation failed with expected error.
    Error(OperationError),
}

/// Expected errors that can occur during operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationError {
    /// Someone else holds the object.
    Denied,

    /// Write or release without holding authority.
    NotAuthority,

    /// Object does not exist.
    UnknownObject,

    /// Client's connection is gone.
    NotConnected,

    /// Invalid client ID.
    InvalidClient,

    /// An authority request timed out.
    Timeout,
}

impl OperationResult {
    /// Check if operation succeeded.
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }

    /// Check if operation failed.
    pub fn is_err(&self) -> bool {
        !self.is_ok()
    }
}
