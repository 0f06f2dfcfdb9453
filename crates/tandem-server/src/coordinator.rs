//! Session Coordinator
//!
//! The single authoritative decision point of a session.
//!
//! ## Responsibilities
//!
//! - Roster: joins, profiles, readiness and leader hand-over
//! - Authority: every acquire and release goes through the ledger owned here,
//!   which linearizes them per object
//! - Replication: holds the authoritative copy of every object's fields,
//!   bumps revisions and fans out coalesced state on each tick
//! - Relay: forwards the holder's trigger batches untouched
//! - Spawning: scene props at startup, one avatar per participant once the
//!   session starts
//!
//! ## Design
//!
//! - Action-based: all methods return actions, no direct I/O
//! - Removals race with in-flight requests, so requests for unknown objects
//!   or participants are answered or dropped, never treated as errors

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tandem_core::{
    capability::profile_for,
    ledger::{Acquire, AuthorityLedger, LedgerError, Release},
    replication::ReplicaStore,
    roster::{Roster, RosterConfig, RosterError, RosterEvent},
    transport::Reliability,
};
use tandem_proto::{
    Field, FieldValue, Message, ObjectId, ObjectKind, ObjectSnapshot, ParticipantId,
    ParticipantInfo, Profile, RequestId, Revision, SessionPhase, Transform, TriggerEvent,
};

/// Object snapshots carried in a `Welcome`. The rest follow as
/// `ObjectSpawned` messages.
pub const WELCOME_OBJECTS: usize = 32;

/// Actions returned by the coordinator for the driver to execute.
#[derive(Debug, Clone, PartialEq)]
pub enum CoordinatorAction {
    /// Send to one participant.
    Send {
        /// Recipient.
        participant: ParticipantId,
        /// Message to send.
        message: Message,
        /// Delivery class.
        reliability: Reliability,
    },

    /// Send to every participant in the roster.
    Broadcast {
        /// Message to send.
        message: Message,
        /// Participant to skip (usually the originator).
        exclude: Option<ParticipantId>,
        /// Delivery class.
        reliability: Reliability,
    },
}

impl CoordinatorAction {
    fn send(participant: ParticipantId, message: Message) -> Self {
        Self::Send { participant, message, reliability: Reliability::Reliable }
    }

    fn broadcast(message: Message, exclude: Option<ParticipantId>) -> Self {
        Self::Broadcast { message, exclude, reliability: Reliability::Reliable }
    }
}

/// Errors from coordinator operations
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    /// Roster refused the operation
    #[error("roster: {0}")]
    Roster(#[from] RosterError),

    /// Ledger refused the operation
    #[error("ledger: {0}")]
    Ledger(#[from] LedgerError),
}

/// Roster, authority ledger and authoritative object state of one session.
#[derive(Debug)]
pub struct Coordinator {
    roster: Roster,
    ledger: AuthorityLedger,
    store: ReplicaStore,
    /// Spawned objects, ordered by id for deterministic snapshots.
    kinds: BTreeMap<ObjectId, ObjectKind>,
    /// Objects written since the last flush.
    dirty: BTreeSet<ObjectId>,
    avatars: HashMap<ParticipantId, ObjectId>,
    phase: SessionPhase,
    next_object: u64,
}

impl Coordinator {
    /// Create a coordinator in the lobby phase with no objects.
    pub fn new(config: RosterConfig) -> Self {
        Self {
            roster: Roster::new(config),
            ledger: AuthorityLedger::new(),
            store: ReplicaStore::new(),
            kinds: BTreeMap::new(),
            dirty: BTreeSet::new(),
            avatars: HashMap::new(),
            phase: SessionPhase::Lobby,
            next_object: 1,
        }
    }

    /// Current phase.
    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Roster in join order.
    pub fn participants(&self) -> Vec<ParticipantInfo> {
        self.roster.infos()
    }

    /// Whether `participant` is in the roster.
    pub fn is_member(&self, participant: ParticipantId) -> bool {
        self.roster.contains(participant)
    }

    /// Roster members except `exclude`, in roster order.
    pub fn recipients(&self, exclude: Option<ParticipantId>) -> Vec<ParticipantId> {
        self.roster.iter().map(|p| p.id).filter(|id| Some(*id) != exclude).collect()
    }

    /// Current authority holder of `object`.
    pub fn holder(&self, object: ObjectId) -> Option<ParticipantId> {
        self.ledger.current_holder(object)
    }

    /// Authoritative value of one field.
    pub fn field(&self, object: ObjectId, field: Field) -> Option<FieldValue> {
        self.store.get(object, field)
    }

    /// Current revision of `object`.
    pub fn revision(&self, object: ObjectId) -> Option<Revision> {
        self.store.revision(object)
    }

    /// Avatar spawned for `participant`.
    pub fn avatar_of(&self, participant: ParticipantId) -> Option<ObjectId> {
        self.avatars.get(&participant).copied()
    }

    /// Full state of `object`.
    pub fn snapshot(&self, object: ObjectId) -> Option<ObjectSnapshot> {
        let kind = *self.kinds.get(&object)?;
        Some(ObjectSnapshot {
            object,
            kind,
            holder: self.ledger.current_holder(object),
            revision: self.store.revision(object)?,
            fields: self.store.fields(object),
        })
    }

    /// Full state of every object, ordered by id.
    pub fn snapshots(&self) -> Vec<ObjectSnapshot> {
        self.kinds.keys().filter_map(|object| self.snapshot(*object)).collect()
    }

    /// Spawn a scene prop with a fixed id. Authority starts with the
    /// coordinator.
    ///
    /// # Errors
    ///
    /// Returns `CoordinatorError::Ledger` if the id is taken.
    pub fn spawn_prop(&mut self, object: ObjectId) -> Result<Vec<CoordinatorAction>, CoordinatorError> {
        let fields = [
            FieldValue::Grabbed(false),
            FieldValue::Active(true),
            FieldValue::Transform(Transform::IDENTITY),
        ];
        self.spawn(object, ObjectKind::Prop, None, fields)
    }

    /// Remove an object. Unknown objects are ignored.
    pub fn despawn(&mut self, object: ObjectId) -> Vec<CoordinatorAction> {
        if self.kinds.remove(&object).is_none() {
            return Vec::new();
        }

        let _ = self.ledger.unregister(object);
        self.store.remove(object);
        self.dirty.remove(&object);
        self.avatars.retain(|_, avatar| *avatar != object);

        tracing::debug!(%object, "object despawned");
        vec![CoordinatorAction::broadcast(Message::ObjectDespawned { object }, None)]
    }

    fn spawn(
        &mut self,
        object: ObjectId,
        kind: ObjectKind,
        holder: Option<ParticipantId>,
        fields: impl IntoIterator<Item = FieldValue>,
    ) -> Result<Vec<CoordinatorAction>, CoordinatorError> {
        self.ledger.register(object, holder)?;
        self.kinds.insert(object, kind);
        self.store.insert(object, 0);
        self.store.apply_all(object, fields);

        tracing::debug!(%object, ?kind, ?holder, "object spawned");
        Ok(self
            .snapshot(object)
            .map(|snapshot| CoordinatorAction::broadcast(Message::ObjectSpawned(snapshot), None))
            .into_iter()
            .collect())
    }

    fn allocate_object(&mut self) -> ObjectId {
        while self.kinds.contains_key(&ObjectId(self.next_object)) {
            self.next_object += 1;
        }
        let object = ObjectId(self.next_object);
        self.next_object += 1;
        object
    }

    /// Spawn the avatar of a profiled participant, owned by that participant.
    fn spawn_avatar(
        &mut self,
        owner: ParticipantId,
    ) -> Result<Vec<CoordinatorAction>, CoordinatorError> {
        if self.avatars.contains_key(&owner) {
            return Ok(Vec::new());
        }
        let Some(participant) = self.roster.get(owner) else {
            return Ok(Vec::new());
        };

        let capability = participant.capability;
        let profile = profile_for(capability);
        let object = self.allocate_object();
        let actions = self.spawn(
            object,
            ObjectKind::Avatar { owner, capability },
            Some(owner),
            profile.initial_avatar_fields(),
        )?;
        self.avatars.insert(owner, object);

        tracing::info!(participant = %owner, %object, template = profile.avatar_template(), "avatar spawned");
        Ok(actions)
    }

    /// Add a participant: welcome it with the current object state, then
    /// broadcast the new roster.
    ///
    /// # Errors
    ///
    /// Returns `CoordinatorError::Roster` if the session is full or the
    /// participant already joined.
    pub fn join(
        &mut self,
        participant: ParticipantId,
    ) -> Result<Vec<CoordinatorAction>, CoordinatorError> {
        let events = self.roster.join(participant)?;
        tracing::info!(%participant, participants = self.roster.len(), "participant joined");

        // Large scenes go out as a welcome followed by individual spawns so
        // no single frame outgrows the codec limit
        let mut objects = self.snapshots();
        let rest = objects.split_off(objects.len().min(WELCOME_OBJECTS));
        let mut actions = vec![CoordinatorAction::send(
            participant,
            Message::Welcome { participant, phase: self.phase, objects },
        )];
        actions.extend(
            rest.into_iter()
                .map(|snapshot| CoordinatorAction::send(participant, Message::ObjectSpawned(snapshot))),
        );
        actions.extend(roster_actions(events));
        Ok(actions)
    }

    /// Remove a participant. Everything it held reverts to the coordinator,
    /// its avatar is despawned and the roster is rebroadcast.
    pub fn leave(&mut self, participant: ParticipantId) -> Vec<CoordinatorAction> {
        let Some((_, events)) = self.roster.leave(participant) else {
            return Vec::new();
        };
        let exclude = Some(participant);
        let mut actions = Vec::new();

        // Last writes still go out before authority changes hands
        let held: Vec<ObjectId> = self.ledger.held_by(participant).collect();
        for object in &held {
            actions.extend(self.flush_object(*object, exclude));
        }
        for object in self.ledger.release_all(participant) {
            actions.extend(self.authority_changed(object, None, exclude));
        }

        if let Some(avatar) = self.avatars.get(&participant).copied() {
            actions.extend(self.despawn(avatar));
        }
        actions.extend(roster_actions(events));

        tracing::info!(%participant, released = held.len(), "participant left");
        actions
    }

    /// Accept a participant's display name and capability. Only the first
    /// profile counts.
    pub fn set_profile(
        &mut self,
        participant: ParticipantId,
        profile: Profile,
    ) -> Result<Vec<CoordinatorAction>, CoordinatorError> {
        let events = match self.roster.set_profile(participant, profile) {
            Ok(events) => events,
            Err(RosterError::ProfileAlreadySet(_)) => {
                tracing::warn!(%participant, "ignoring second profile");
                return Ok(Vec::new());
            },
            Err(err @ RosterError::DisplayNameTooLong { .. }) => {
                tracing::warn!(%participant, %err, "refusing profile");
                return Ok(vec![CoordinatorAction::send(
                    participant,
                    Message::Rejected { reason: err.to_string() },
                )]);
            },
            Err(err) => return Err(err.into()),
        };

        let mut actions = roster_actions(events);
        if self.phase == SessionPhase::InSession {
            actions.extend(self.spawn_avatar(participant)?);
        }
        Ok(actions)
    }

    /// Set a participant's ready flag.
    pub fn set_ready(
        &mut self,
        participant: ParticipantId,
        ready: bool,
    ) -> Result<Vec<CoordinatorAction>, CoordinatorError> {
        Ok(roster_actions(self.roster.set_ready(participant, ready)?))
    }

    /// Flip a participant's ready flag.
    pub fn toggle_ready(
        &mut self,
        participant: ParticipantId,
    ) -> Result<Vec<CoordinatorAction>, CoordinatorError> {
        Ok(roster_actions(self.roster.toggle_ready(participant)?))
    }

    /// Leave the lobby. Honoured only from the leader when everyone is
    /// ready; otherwise the requester gets `Rejected`.
    pub fn start_session(
        &mut self,
        participant: ParticipantId,
    ) -> Result<Vec<CoordinatorAction>, CoordinatorError> {
        let is_leader = self.roster.leader().is_some_and(|leader| leader.id == participant);
        let refusal = if !is_leader {
            Some("only the leader may start the session")
        } else if self.phase == SessionPhase::InSession {
            Some("session already started")
        } else if !self.roster.is_ready_to_start() {
            Some("not everyone is ready")
        } else {
            None
        };
        if let Some(reason) = refusal {
            tracing::debug!(%participant, reason, "start refused");
            return Ok(vec![CoordinatorAction::send(
                participant,
                Message::Rejected { reason: reason.to_string() },
            )]);
        }

        self.phase = SessionPhase::InSession;
        tracing::info!(participants = self.roster.len(), "session started");

        let mut actions = vec![CoordinatorAction::broadcast(Message::SessionStarted, None)];
        let profiled: Vec<ParticipantId> =
            self.roster.iter().filter(|p| p.has_profile()).map(|p| p.id).collect();
        for owner in profiled {
            actions.extend(self.spawn_avatar(owner)?);
        }
        Ok(actions)
    }

    /// Decide an acquire request.
    pub fn acquire(
        &mut self,
        participant: ParticipantId,
        object: ObjectId,
        request_id: RequestId,
    ) -> Vec<CoordinatorAction> {
        let denied = |holder| {
            vec![CoordinatorAction::send(
                participant,
                Message::AuthorityDenied { object, request_id, holder },
            )]
        };

        match self.ledger.try_acquire(object, participant) {
            Ok(Acquire::Granted) => {
                self.store.bump_revision(object);
                tracing::debug!(%participant, %object, "authority granted");

                let mut actions = self.grant(participant, object, request_id);
                if let Some(revision) = self.store.revision(object) {
                    actions.push(CoordinatorAction::broadcast(
                        Message::AuthorityChanged { object, holder: Some(participant), revision },
                        Some(participant),
                    ));
                }
                actions
            },
            Ok(Acquire::AlreadyHeld) => self.grant(participant, object, request_id),
            Ok(Acquire::Denied { holder }) => {
                tracing::debug!(%participant, %object, %holder, "authority denied");
                denied(Some(holder))
            },
            Err(LedgerError::UnknownObject(_) | LedgerError::AlreadyRegistered(_)) => {
                tracing::debug!(%participant, %object, "acquire of unknown object");
                denied(None)
            },
        }
    }

    fn grant(
        &self,
        participant: ParticipantId,
        object: ObjectId,
        request_id: RequestId,
    ) -> Vec<CoordinatorAction> {
        self.snapshot(object)
            .map(|snapshot| {
                CoordinatorAction::send(participant, Message::AuthorityGranted { request_id, snapshot })
            })
            .into_iter()
            .collect()
    }

    /// Apply a holder's writes. Writes from anyone else are dropped.
    pub fn state_update(
        &mut self,
        participant: ParticipantId,
        object: ObjectId,
        fields: Vec<FieldValue>,
    ) {
        if !self.ledger.is_holder(object, participant) {
            tracing::debug!(%participant, %object, "dropping write from non-holder");
            return;
        }
        self.write(object, fields);
    }

    fn write(&mut self, object: ObjectId, mut fields: Vec<FieldValue>) {
        let before = fields.len();
        fields.retain(FieldValue::is_finite);
        if fields.len() < before {
            tracing::warn!(%object, dropped = before - fields.len(), "dropping non-finite field values");
        }
        if self.store.apply_all(object, fields).is_empty() {
            return;
        }
        self.store.bump_revision(object);
        self.dirty.insert(object);
    }

    /// Write the final state, replicate it, then release.
    ///
    /// Releases from anyone but the holder are confirmed without effect so
    /// that duplicate retries are harmless.
    pub fn release(
        &mut self,
        participant: ParticipantId,
        object: ObjectId,
        request_id: RequestId,
        final_state: Vec<FieldValue>,
    ) -> Vec<CoordinatorAction> {
        let mut actions = Vec::new();

        if self.ledger.is_holder(object, participant) {
            self.write(object, final_state);
            actions.extend(self.flush_object(object, Some(participant)));

            if let Ok(Release::Released) = self.ledger.release(object, participant) {
                tracing::debug!(%participant, %object, "authority released");
                actions.extend(self.authority_changed(object, None, None));
            }
        } else {
            tracing::debug!(%participant, %object, "release from non-holder");
        }

        actions.push(CoordinatorAction::send(
            participant,
            Message::ReleaseConfirmed { object, request_id },
        ));
        actions
    }

    /// Relay a holder's trigger batch to everyone else, best-effort.
    pub fn relay(
        &self,
        participant: ParticipantId,
        object: ObjectId,
        events: Vec<TriggerEvent>,
    ) -> Vec<CoordinatorAction> {
        if !self.ledger.is_holder(object, participant) {
            tracing::debug!(%participant, %object, "dropping triggers from non-holder");
            return Vec::new();
        }
        if events.is_empty() {
            return Vec::new();
        }

        vec![CoordinatorAction::Broadcast {
            message: Message::Triggers { object, events },
            exclude: Some(participant),
            reliability: Reliability::BestEffort,
        }]
    }

    /// Replicate every object written since the last flush.
    pub fn flush(&mut self) -> Vec<CoordinatorAction> {
        let dirty = std::mem::take(&mut self.dirty);
        dirty
            .into_iter()
            .filter_map(|object| {
                let writer = self.ledger.current_holder(object);
                self.replicate(object, writer)
            })
            .collect()
    }

    fn flush_object(
        &mut self,
        object: ObjectId,
        exclude: Option<ParticipantId>,
    ) -> Option<CoordinatorAction> {
        if !self.dirty.remove(&object) {
            return None;
        }
        self.replicate(object, exclude)
    }

    /// Whole-object replication so a receiver skipping a stale revision
    /// never misses a field.
    fn replicate(&self, object: ObjectId, exclude: Option<ParticipantId>) -> Option<CoordinatorAction> {
        let revision = self.store.revision(object)?;
        let fields = self.store.fields(object);
        Some(CoordinatorAction::broadcast(Message::Replicate { object, revision, fields }, exclude))
    }

    fn authority_changed(
        &mut self,
        object: ObjectId,
        holder: Option<ParticipantId>,
        exclude: Option<ParticipantId>,
    ) -> Option<CoordinatorAction> {
        let revision = self.store.bump_revision(object)?;
        Some(CoordinatorAction::broadcast(
            Message::AuthorityChanged { object, holder, revision },
            exclude,
        ))
    }
}

fn roster_actions(events: Vec<RosterEvent>) -> Vec<CoordinatorAction> {
    events
        .into_iter()
        .map(|event| match event {
            RosterEvent::Changed(participants) => {
                CoordinatorAction::broadcast(Message::Roster { participants }, None)
            },
            RosterEvent::ReadinessChanged { leader, all_ready } => {
                CoordinatorAction::send(leader, Message::ReadyState { all_ready })
            },
        })
        .collect()
}
