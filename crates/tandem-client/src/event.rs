//! Client events and actions.

use tandem_core::{AuthorityError, transport::Reliability};
use tandem_proto::{
    FieldValue, Message, ObjectId, ObjectSnapshot, ParticipantId, ParticipantInfo, Profile,
    SessionPhase, TriggerEvent,
};

/// Events fed into the client state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// Open a session with the given profile. The transport connection is
    /// already established by the caller.
    Connect {
        /// Display name and capability sent once the coordinator welcomes us.
        profile: Profile,
    },

    /// A message arrived from the coordinator.
    MessageReceived(Message),

    /// Periodic tick: expire pending requests and flush outbound queues.
    Tick,

    /// The transport connection was lost.
    Disconnected,

    /// Set the lobby ready flag.
    SetReady {
        /// New value.
        ready: bool,
    },

    /// Flip the lobby ready flag.
    ToggleReady,

    /// Ask the coordinator to start the session (leader only).
    StartSession,

    /// Request authority over an object.
    Acquire {
        /// Target object.
        object: ObjectId,
    },

    /// Write a persistent field of an owned object.
    Publish {
        /// Target object.
        object: ObjectId,
        /// New value.
        value: FieldValue,
    },

    /// Hand authority back, carrying any unsent writes.
    Release {
        /// Target object.
        object: ObjectId,
    },

    /// Write the final values and release in one step.
    PublishThenRelease {
        /// Target object.
        object: ObjectId,
        /// Final values.
        values: Vec<FieldValue>,
    },

    /// Queue a trigger for the next tick.
    EnqueueTrigger {
        /// Source object.
        object: ObjectId,
        /// The trigger.
        event: TriggerEvent,
    },
}

/// Actions produced by the client for the caller to execute.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientAction {
    /// Send a message to the coordinator.
    Send {
        /// Message to send.
        message: Message,
        /// Delivery class.
        reliability: Reliability,
    },

    /// The coordinator accepted us into the session.
    Welcomed {
        /// Our participant id.
        participant: ParticipantId,
        /// Phase at join time.
        phase: SessionPhase,
    },

    /// The roster changed.
    RosterChanged {
        /// Participants in roster order.
        participants: Vec<ParticipantInfo>,
    },

    /// Aggregate readiness changed (leader only).
    ReadyStateChanged {
        /// Whether the session may start.
        all_ready: bool,
    },

    /// The session left the lobby.
    SessionStarted,

    /// An object's authority holder changed.
    AuthorityChanged {
        /// Target object.
        object: ObjectId,
        /// New holder, `None` for the coordinator.
        holder: Option<ParticipantId>,
    },

    /// An acquire finished.
    AcquireResolved {
        /// Target object.
        object: ObjectId,
        /// `Ok` when authority is held.
        result: Result<(), AuthorityError>,
    },

    /// A release finished.
    ReleaseResolved {
        /// Target object.
        object: ObjectId,
        /// `Ok` when the coordinator confirmed.
        result: Result<(), AuthorityError>,
    },

    /// A persistent field changed value.
    FieldChanged {
        /// Target object.
        object: ObjectId,
        /// New value.
        value: FieldValue,
        /// Previous value, `None` if unknown.
        previous: Option<FieldValue>,
        /// Whether the change came from a local write.
        local: bool,
    },

    /// A relayed trigger arrived.
    TriggerFired {
        /// Source object.
        object: ObjectId,
        /// The trigger.
        event: TriggerEvent,
    },

    /// A shared object appeared.
    ObjectSpawned {
        /// Its full state.
        snapshot: ObjectSnapshot,
    },

    /// A shared object was removed.
    ObjectDespawned {
        /// Removed object.
        object: ObjectId,
    },

    /// The coordinator refused something.
    Rejected {
        /// Human-readable reason.
        reason: String,
    },
}

impl ClientAction {
    pub(crate) fn reliable(message: Message) -> Self {
        Self::Send { message, reliability: Reliability::Reliable }
    }

    pub(crate) fn best_effort(message: Message) -> Self {
        Self::Send { message, reliability: Reliability::BestEffort }
    }
}
