//! Protocol messages.
//!
//! # Flow
//!
//! ```text
//! participant                         coordinator
//!     │ Hello ─────────────────────────▶ │  join roster
//!     │ ◀──────────────────── Welcome    │  id + object snapshots
//!     │ SetProfile / SetReady ────────▶  │
//!     │ ◀───────────── Roster/ReadyState │
//!     │ AcquireRequest ───────────────▶  │  ledger decides
//!     │ ◀──── AuthorityGranted/Denied    │
//!     │ StateUpdate ──────────────────▶  │  coalesced per tick
//!     │                    Replicate ──▶ │  (to everyone else)
//!     │ ReleaseRequest(final state) ──▶  │  write, then release
//!     │ ◀────────────── ReleaseConfirmed │
//! ```

use serde::{Deserialize, Serialize};

use crate::{
    error::ProtocolError,
    ids::{ObjectId, ParticipantId, RequestId},
    payloads::{
        relay::TriggerEvent,
        replication::{FieldValue, ObjectSnapshot, Revision},
        session::{ParticipantInfo, Profile, SessionPhase},
    },
};

/// Protocol version spoken by this build.
pub const PROTOCOL_VERSION: u8 = 1;

/// A protocol message in either direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    // Participant -> coordinator
    /// First message on a new connection.
    Hello {
        /// Protocol version spoken by the participant.
        version: u8,
    },
    /// Set display name and capability. Accepted once.
    SetProfile(Profile),
    /// Set the lobby ready flag.
    SetReady {
        /// New flag value.
        ready: bool,
    },
    /// Flip the lobby ready flag.
    ToggleReady,
    /// Leader asks to leave the lobby and start the session.
    StartSession,
    /// Ask for write authority over an object.
    AcquireRequest {
        /// Target object.
        object: ObjectId,
        /// Correlation id.
        request_id: RequestId,
    },
    /// Hand authority back after writing `final_state`.
    ///
    /// The coordinator applies `final_state` before releasing, so the last
    /// write is visible to the next holder.
    ReleaseRequest {
        /// Target object.
        object: ObjectId,
        /// Correlation id.
        request_id: RequestId,
        /// Writes to apply before the release.
        final_state: Vec<FieldValue>,
    },
    /// Persistent field writes from the holder.
    StateUpdate {
        /// Target object.
        object: ObjectId,
        /// Latest value per written field.
        fields: Vec<FieldValue>,
    },
    /// Trigger events from the holder, in enqueue order.
    TriggerBatch {
        /// Source object.
        object: ObjectId,
        /// Events in enqueue order.
        events: Vec<TriggerEvent>,
    },
    /// Keeps an otherwise quiet connection from hitting the idle timeout.
    Heartbeat,
    /// Graceful disconnect, valid in both directions.
    Goodbye {
        /// Reason for logging.
        reason: String,
    },

    // Coordinator -> participant
    /// Reply to `Hello`.
    Welcome {
        /// Identity assigned to the participant.
        participant: ParticipantId,
        /// Current session phase.
        phase: SessionPhase,
        /// Every live shared object.
        objects: Vec<ObjectSnapshot>,
    },
    /// Full roster in insertion order.
    Roster {
        /// Participants, slot 0 first.
        participants: Vec<ParticipantInfo>,
    },
    /// Aggregate readiness, sent to the leader.
    ReadyState {
        /// Every participant ready and the minimum head count reached.
        all_ready: bool,
    },
    /// The leader started the session.
    SessionStarted,
    /// Authority request granted.
    AuthorityGranted {
        /// Correlation id.
        request_id: RequestId,
        /// State of the object at grant time.
        snapshot: ObjectSnapshot,
    },
    /// Authority request denied.
    AuthorityDenied {
        /// Target object.
        object: ObjectId,
        /// Correlation id.
        request_id: RequestId,
        /// Current holder, `None` if the object no longer exists.
        holder: Option<ParticipantId>,
    },
    /// Release processed.
    ReleaseConfirmed {
        /// Target object.
        object: ObjectId,
        /// Correlation id.
        request_id: RequestId,
    },
    /// Authority holder changed.
    AuthorityChanged {
        /// Target object.
        object: ObjectId,
        /// New holder, `None` for the coordinator.
        holder: Option<ParticipantId>,
        /// Object revision after the change.
        revision: Revision,
    },
    /// Persistent field values relayed by the coordinator.
    Replicate {
        /// Target object.
        object: ObjectId,
        /// Object revision after the writes.
        revision: Revision,
        /// Latest value per changed field.
        fields: Vec<FieldValue>,
    },
    /// Trigger events relayed by the coordinator.
    Triggers {
        /// Source object.
        object: ObjectId,
        /// Events in enqueue order.
        events: Vec<TriggerEvent>,
    },
    /// A shared object was spawned.
    ObjectSpawned(ObjectSnapshot),
    /// A shared object was despawned.
    ObjectDespawned {
        /// Removed object.
        object: ObjectId,
    },
    /// The coordinator refused the request or connection.
    Rejected {
        /// Human readable reason.
        reason: String,
    },
}

impl Message {
    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Hello { .. } => "Hello",
            Self::SetProfile(_) => "SetProfile",
            Self::SetReady { .. } => "SetReady",
            Self::ToggleReady => "ToggleReady",
            Self::StartSession => "StartSession",
            Self::AcquireRequest { .. } => "AcquireRequest",
            Self::ReleaseRequest { .. } => "ReleaseRequest",
            Self::StateUpdate { .. } => "StateUpdate",
            Self::TriggerBatch { .. } => "TriggerBatch",
            Self::Heartbeat => "Heartbeat",
            Self::Goodbye { .. } => "Goodbye",
            Self::Welcome { .. } => "Welcome",
            Self::Roster { .. } => "Roster",
            Self::ReadyState { .. } => "ReadyState",
            Self::SessionStarted => "SessionStarted",
            Self::AuthorityGranted { .. } => "AuthorityGranted",
            Self::AuthorityDenied { .. } => "AuthorityDenied",
            Self::ReleaseConfirmed { .. } => "ReleaseConfirmed",
            Self::AuthorityChanged { .. } => "AuthorityChanged",
            Self::Replicate { .. } => "Replicate",
            Self::Triggers { .. } => "Triggers",
            Self::ObjectSpawned(_) => "ObjectSpawned",
            Self::ObjectDespawned { .. } => "ObjectDespawned",
            Self::Rejected { .. } => "Rejected",
        }
    }

    /// Serialize to CBOR, appending to `dst`.
    pub fn encode(&self, dst: &mut Vec<u8>) -> Result<(), ProtocolError> {
        ciborium::ser::into_writer(self, dst).map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    /// Deserialize from CBOR.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        ciborium::de::from_reader(bytes).map_err(|e| ProtocolError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        HandChannel,
        payloads::replication::{ObjectKind, Transform},
    };

    #[test]
    fn release_request_serde() {
        let message = Message::ReleaseRequest {
            object: ObjectId(1),
            request_id: RequestId(2),
            final_state: vec![
                FieldValue::Grabbed(false),
                FieldValue::Transform(Transform::at([1.0, 2.0, 3.0])),
            ],
        };

        let mut bytes = Vec::new();
        message.encode(&mut bytes).expect("encode");

        assert_eq!(Message::decode(&bytes).expect("decode"), message);
    }

    #[test]
    fn grant_carries_snapshot() {
        let message = Message::AuthorityGranted {
            request_id: RequestId(4),
            snapshot: ObjectSnapshot {
                object: ObjectId(1),
                kind: ObjectKind::Prop,
                holder: Some(ParticipantId(3)),
                revision: 12,
                fields: vec![FieldValue::Grabbed(true)],
            },
        };

        let mut bytes = Vec::new();
        message.encode(&mut bytes).expect("encode");

        match Message::decode(&bytes).expect("decode") {
            Message::AuthorityGranted { snapshot, .. } => {
                assert_eq!(snapshot.revision, 12);
                assert_eq!(snapshot.holder, Some(ParticipantId(3)));
            },
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn trigger_batch_preserves_order() {
        let events = vec![
            TriggerEvent::reset(HandChannel::RightHand, "Point"),
            TriggerEvent::fire(HandChannel::RightHand, "Grab"),
            TriggerEvent::fire(HandChannel::LeftHand, "Grab"),
        ];
        let message = Message::TriggerBatch { object: ObjectId(9), events: events.clone() };

        let mut bytes = Vec::new();
        message.encode(&mut bytes).expect("encode");

        match Message::decode(&bytes).expect("decode") {
            Message::TriggerBatch { events: decoded, .. } => assert_eq!(decoded, events),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn decode_garbage_fails() {
        let result = Message::decode(&[0xff, 0x00, 0x13]);
        assert!(matches!(result, Err(ProtocolError::Decode(_))));
    }

    #[test]
    fn kind_names() {
        assert_eq!(Message::ToggleReady.kind(), "ToggleReady");
        assert_eq!(Message::Hello { version: PROTOCOL_VERSION }.kind(), "Hello");
    }
}
