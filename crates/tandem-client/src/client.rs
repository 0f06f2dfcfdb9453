//! Client state machine.
//!
//! The `Client` is the participant side of a tandem session. It follows the
//! coordinator's roster and authority decisions, runs the ownership transfer
//! protocol for objects the application wants to mutate, and keeps a local
//! replica of every shared object's persistent fields.

use std::{collections::HashMap, time::Instant};

use tandem_core::{
    AuthorityError,
    capability::profile_for,
    env::Environment,
    ownership::{GrantOutcome, OwnershipState, OwnershipTracker, PendingKind},
    relay::TriggerQueue,
    replication::{FieldChange, PendingWrites, ReplicaStore},
};
use tandem_proto::{
    Field, FieldValue, Message, ObjectId, ObjectKind, ObjectSnapshot, PROTOCOL_VERSION,
    ParticipantId, ParticipantInfo, Profile, RequestId, Revision, SessionPhase, TriggerEvent,
};

use crate::{
    config::ClientConfig,
    error::ClientError,
    event::{ClientAction, ClientEvent},
};

/// Connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No session.
    #[default]
    Disconnected,
    /// `Hello` sent, waiting for `Welcome`.
    Joining,
    /// Welcomed by the coordinator.
    Connected {
        /// Our participant id.
        participant: ParticipantId,
    },
}

/// What the client knows about a shared object besides its fields.
#[derive(Debug, Clone, Copy)]
struct ObjectView {
    kind: ObjectKind,
    holder: Option<ParticipantId>,
    /// Revision of the last applied holder change.
    holder_revision: Revision,
}

/// Participant state machine.
///
/// Pure state machine - returns actions, caller handles I/O.
///
/// # Type Parameters
///
/// - `E`: Environment implementation for time
#[derive(Debug)]
pub struct Client<E: Environment> {
    env: E,
    config: ClientConfig,
    state: ConnectionState,
    profile: Option<Profile>,
    phase: SessionPhase,
    roster: Vec<ParticipantInfo>,
    objects: HashMap<ObjectId, ObjectView>,
    replicas: ReplicaStore,
    /// Fields known before the last disconnect, diffed against the next
    /// welcome so hooks only see what changed meanwhile.
    retained: ReplicaStore,
    ownership: OwnershipTracker,
    outbound: PendingWrites,
    triggers: TriggerQueue,
    /// When we last sent anything, for heartbeats.
    last_sent: Option<Instant>,
}

impl<E: Environment> Client<E> {
    /// Create a disconnected client.
    pub fn new(env: E, config: ClientConfig) -> Self {
        Self {
            env,
            config,
            state: ConnectionState::Disconnected,
            profile: None,
            phase: SessionPhase::default(),
            roster: Vec::new(),
            objects: HashMap::new(),
            replicas: ReplicaStore::new(),
            retained: ReplicaStore::new(),
            ownership: OwnershipTracker::new(),
            outbound: PendingWrites::new(),
            triggers: TriggerQueue::new(),
            last_sent: None,
        }
    }

    /// Connection lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Our participant id once welcomed.
    pub fn participant(&self) -> Option<ParticipantId> {
        match self.state {
            ConnectionState::Connected { participant } => Some(participant),
            ConnectionState::Disconnected | ConnectionState::Joining => None,
        }
    }

    /// Whether the coordinator welcomed us.
    pub fn is_connected(&self) -> bool {
        self.participant().is_some()
    }

    /// Current session phase.
    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Last roster received, in roster order.
    pub fn roster(&self) -> &[ParticipantInfo] {
        &self.roster
    }

    /// Whether we are the session leader.
    pub fn is_leader(&self) -> bool {
        let me = self.participant();
        self.roster.iter().any(|p| p.leader && Some(p.id) == me)
    }

    /// Whether `object` is known.
    pub fn knows(&self, object: ObjectId) -> bool {
        self.objects.contains_key(&object)
    }

    /// Known objects.
    pub fn objects(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.objects.keys().copied()
    }

    /// What `object` represents.
    pub fn kind(&self, object: ObjectId) -> Option<ObjectKind> {
        self.objects.get(&object).map(|view| view.kind)
    }

    /// Last known authority holder of `object`.
    pub fn holder(&self, object: ObjectId) -> Option<ParticipantId> {
        self.objects.get(&object).and_then(|view| view.holder)
    }

    /// Locally applied value of one field.
    pub fn field(&self, object: ObjectId, field: Field) -> Option<FieldValue> {
        self.replicas.get(object, field)
    }

    /// Ownership state of `object`.
    pub fn ownership(&self, object: ObjectId) -> OwnershipState {
        self.ownership.state(object)
    }

    /// Process an event and return resulting actions.
    ///
    /// # Errors
    ///
    /// Returns `ClientError` if the event cannot be processed. Only
    /// [`ClientError::is_fatal`] errors indicate a broken session.
    pub fn handle(&mut self, event: ClientEvent) -> Result<Vec<ClientAction>, ClientError> {
        let actions = self.dispatch(event)?;
        if actions.iter().any(|action| matches!(action, ClientAction::Send { .. })) {
            self.last_sent = Some(self.env.now());
        }
        Ok(actions)
    }

    fn dispatch(&mut self, event: ClientEvent) -> Result<Vec<ClientAction>, ClientError> {
        match event {
            ClientEvent::Connect { profile } => self.handle_connect(profile),
            ClientEvent::MessageReceived(message) => self.handle_message(message),
            ClientEvent::Tick => Ok(self.handle_tick()),
            ClientEvent::Disconnected => Ok(self.handle_disconnected()),
            ClientEvent::SetReady { ready } => self.send_lobby(Message::SetReady { ready }),
            ClientEvent::ToggleReady => self.send_lobby(Message::ToggleReady),
            ClientEvent::StartSession => self.handle_start_session(),
            ClientEvent::Acquire { object } => self.handle_acquire(object),
            ClientEvent::Publish { object, value } => self.handle_publish(object, value),
            ClientEvent::Release { object } => self.handle_release(object),
            ClientEvent::PublishThenRelease { object, values } => {
                self.handle_publish_then_release(object, values)
            },
            ClientEvent::EnqueueTrigger { object, event } => {
                self.handle_enqueue_trigger(object, event)
            },
        }
    }

    fn me(&self) -> Result<ParticipantId, ClientError> {
        self.participant().ok_or(ClientError::NotConnected)
    }

    fn handle_connect(&mut self, profile: Profile) -> Result<Vec<ClientAction>, ClientError> {
        if self.state != ConnectionState::Disconnected {
            return Err(ClientError::AlreadyConnected);
        }

        self.profile = Some(profile);
        self.state = ConnectionState::Joining;

        Ok(vec![ClientAction::reliable(Message::Hello { version: PROTOCOL_VERSION })])
    }

    fn handle_message(&mut self, message: Message) -> Result<Vec<ClientAction>, ClientError> {
        if self.state == ConnectionState::Disconnected {
            tracing::debug!(kind = message.kind(), "dropping message while disconnected");
            return Ok(Vec::new());
        }

        match message {
            Message::Welcome { participant, phase, objects } => {
                Ok(self.on_welcome(participant, phase, objects))
            },
            Message::Roster { participants } => {
                self.roster.clone_from(&participants);
                Ok(vec![ClientAction::RosterChanged { participants }])
            },
            Message::ReadyState { all_ready } => {
                Ok(vec![ClientAction::ReadyStateChanged { all_ready }])
            },
            Message::SessionStarted => {
                self.phase = SessionPhase::InSession;
                Ok(vec![ClientAction::SessionStarted])
            },
            Message::AuthorityGranted { request_id, snapshot } => {
                Ok(self.on_granted(request_id, snapshot))
            },
            Message::AuthorityDenied { object, request_id, holder } => {
                Ok(self.on_denied(object, request_id, holder))
            },
            Message::ReleaseConfirmed { object, request_id } => {
                Ok(self.on_release_confirmed(object, request_id))
            },
            Message::AuthorityChanged { object, holder, revision } => {
                Ok(self.on_authority_changed(object, holder, revision))
            },
            Message::Replicate { object, revision, fields } => {
                Ok(self.on_replicate(object, revision, fields))
            },
            Message::Triggers { object, events } => {
                if !self.knows(object) {
                    tracing::debug!(%object, "dropping triggers for unknown object");
                    return Ok(Vec::new());
                }
                Ok(events.into_iter().map(|event| ClientAction::TriggerFired { object, event }).collect())
            },
            Message::ObjectSpawned(snapshot) => Ok(self.on_spawned(snapshot)),
            Message::ObjectDespawned { object } => Ok(self.on_despawned(object)),
            Message::Rejected { reason } => {
                tracing::warn!(%reason, "coordinator rejected request");
                if self.state == ConnectionState::Joining {
                    self.state = ConnectionState::Disconnected;
                }
                Ok(vec![ClientAction::Rejected { reason }])
            },
            other @ (Message::Hello { .. }
            | Message::SetProfile(_)
            | Message::SetReady { .. }
            | Message::ToggleReady
            | Message::StartSession
            | Message::AcquireRequest { .. }
            | Message::ReleaseRequest { .. }
            | Message::StateUpdate { .. }
            | Message::TriggerBatch { .. }
            | Message::Heartbeat
            | Message::Goodbye { .. }) => {
                Err(ClientError::UnexpectedMessage { kind: other.kind() })
            },
        }
    }

    fn on_welcome(
        &mut self,
        participant: ParticipantId,
        phase: SessionPhase,
        objects: Vec<ObjectSnapshot>,
    ) -> Vec<ClientAction> {
        self.state = ConnectionState::Connected { participant };
        self.phase = phase;
        tracing::info!(%participant, ?phase, objects = objects.len(), "joined session");

        let mut actions = vec![ClientAction::Welcomed { participant, phase }];
        for snapshot in objects {
            actions.extend(self.on_spawned(snapshot));
        }
        if let Some(profile) = self.profile.clone() {
            actions.push(ClientAction::reliable(Message::SetProfile(profile)));
        }
        actions
    }

    fn on_spawned(&mut self, snapshot: ObjectSnapshot) -> Vec<ClientAction> {
        if self.knows(snapshot.object) {
            return self.apply_snapshot(&snapshot);
        }

        let object = snapshot.object;
        self.objects.insert(
            object,
            ObjectView { kind: snapshot.kind, holder: snapshot.holder, holder_revision: snapshot.revision },
        );
        let changes = self.replicas.load(&snapshot).unwrap_or_default();

        // Avatars spawn with their owner already holding authority
        if snapshot.holder.is_some() && snapshot.holder == self.participant() {
            self.ownership.adopt(object);
        }

        let mut actions = vec![ClientAction::ObjectSpawned { snapshot }];
        actions.extend(self.initial_changes(object, changes));
        actions
    }

    /// Field changes for a newly known object. Values retained from before
    /// a disconnect that are still current are not reported again.
    fn initial_changes(&mut self, object: ObjectId, changes: Vec<FieldChange>) -> Vec<ClientAction> {
        if !self.retained.contains(object) {
            return changes.into_iter().map(|change| field_changed(change, false)).collect();
        }

        let actions = changes
            .into_iter()
            .filter_map(|mut change| {
                let before = self.retained.get(object, change.value.field());
                if before == Some(change.value) {
                    return None;
                }
                change.previous = before;
                Some(field_changed(change, false))
            })
            .collect();
        self.retained.remove(object);
        actions
    }

    fn on_despawned(&mut self, object: ObjectId) -> Vec<ClientAction> {
        if self.objects.remove(&object).is_none() {
            return Vec::new();
        }

        self.replicas.remove(object);
        self.outbound.discard(object);
        let lost = self.triggers.discard(object);
        if lost > 0 {
            tracing::debug!(%object, lost, "dropped queued triggers of despawned object");
        }

        let stale = Err(AuthorityError::StaleReference { object });
        let mut actions = Vec::new();
        match self.ownership.forget(object) {
            OwnershipState::AcquirePending { .. } => {
                actions.push(ClientAction::AcquireResolved { object, result: stale });
            },
            OwnershipState::ReleasePending { .. } => {
                actions.push(ClientAction::ReleaseResolved { object, result: stale });
            },
            OwnershipState::Unowned | OwnershipState::Owned => {},
        }
        actions.push(ClientAction::ObjectDespawned { object });
        actions
    }

    /// Apply a full snapshot of a known object, ignoring stale parts.
    fn apply_snapshot(&mut self, snapshot: &ObjectSnapshot) -> Vec<ClientAction> {
        let mut actions: Vec<ClientAction> = self
            .replicas
            .load(snapshot)
            .unwrap_or_default()
            .into_iter()
            .map(|change| field_changed(change, false))
            .collect();
        actions.extend(self.update_holder(snapshot.object, snapshot.holder, snapshot.revision));
        actions
    }

    fn update_holder(
        &mut self,
        object: ObjectId,
        holder: Option<ParticipantId>,
        revision: Revision,
    ) -> Option<ClientAction> {
        let view = self.objects.get_mut(&object)?;
        if revision < view.holder_revision {
            tracing::trace!(%object, revision, "ignoring stale holder change");
            return None;
        }

        view.holder_revision = revision;
        if view.holder == holder {
            return None;
        }
        view.holder = holder;
        Some(ClientAction::AuthorityChanged { object, holder })
    }

    fn on_granted(&mut self, request_id: RequestId, snapshot: ObjectSnapshot) -> Vec<ClientAction> {
        let object = snapshot.object;
        let mut actions = if self.knows(object) {
            self.apply_snapshot(&snapshot)
        } else {
            self.on_spawned(snapshot)
        };

        match self.ownership.on_granted(object, request_id) {
            GrantOutcome::Accepted => {
                tracing::debug!(%object, %request_id, "authority granted");
                actions.push(ClientAction::AcquireResolved { object, result: Ok(()) });
            },
            GrantOutcome::Unsolicited => {
                tracing::warn!(%object, %request_id, "grant arrived after timeout, handing it back");
                self.ownership.adopt(object);
                match self.release(object) {
                    Ok(release) => actions.extend(release),
                    Err(err) => tracing::warn!(%object, %err, "could not hand back authority"),
                }
            },
            GrantOutcome::Stale => {
                tracing::debug!(%object, %request_id, "ignoring stale grant");
            },
        }
        actions
    }

    fn on_denied(
        &mut self,
        object: ObjectId,
        request_id: RequestId,
        holder: Option<ParticipantId>,
    ) -> Vec<ClientAction> {
        if !self.ownership.on_denied(object, request_id) {
            tracing::debug!(%object, %request_id, "ignoring stale denial");
            return Vec::new();
        }

        let error = match holder {
            Some(_) => AuthorityError::Denied { object, holder },
            None => AuthorityError::StaleReference { object },
        };
        tracing::debug!(%object, %error, "acquire failed");
        vec![ClientAction::AcquireResolved { object, result: Err(error) }]
    }

    fn on_release_confirmed(&mut self, object: ObjectId, request_id: RequestId) -> Vec<ClientAction> {
        if !self.ownership.on_release_confirmed(object, request_id) {
            tracing::debug!(%object, %request_id, "ignoring stale release confirmation");
            return Vec::new();
        }
        vec![ClientAction::ReleaseResolved { object, result: Ok(()) }]
    }

    fn on_authority_changed(
        &mut self,
        object: ObjectId,
        holder: Option<ParticipantId>,
        revision: Revision,
    ) -> Vec<ClientAction> {
        let Some(action) = self.update_holder(object, holder, revision) else {
            return Vec::new();
        };

        if holder != self.participant() && self.ownership.is_owned(object) {
            tracing::warn!(%object, ?holder, "authority revoked by coordinator");
            self.ownership.forget(object);
            self.outbound.discard(object);
            self.triggers.discard(object);
        }
        vec![action]
    }

    fn on_replicate(
        &mut self,
        object: ObjectId,
        revision: Revision,
        fields: Vec<FieldValue>,
    ) -> Vec<ClientAction> {
        match self.ownership.state(object) {
            OwnershipState::Owned | OwnershipState::ReleasePending { .. } => {
                tracing::trace!(%object, revision, "ignoring replication of owned object");
                return Vec::new();
            },
            OwnershipState::Unowned | OwnershipState::AcquirePending { .. } => {},
        }

        match self.replicas.apply_remote(object, revision, fields) {
            Some(changes) => changes.into_iter().map(|change| field_changed(change, false)).collect(),
            None => {
                tracing::trace!(%object, revision, "ignoring stale replication");
                Vec::new()
            },
        }
    }

    fn handle_tick(&mut self) -> Vec<ClientAction> {
        let now = self.env.now();
        let mut actions = Vec::new();

        for expired in self.ownership.expire(now) {
            let object = expired.object;
            let result = Err(AuthorityError::Timeout { object });
            tracing::warn!(%object, request_id = %expired.request_id, kind = ?expired.kind, "authority request timed out");
            match expired.kind {
                PendingKind::Acquire => actions.push(ClientAction::AcquireResolved { object, result }),
                PendingKind::Release => actions.push(ClientAction::ReleaseResolved { object, result }),
            }
        }

        if self.is_connected() {
            actions.extend(self.flush());

            let quiet = self.last_sent.is_none_or(|at| now >= at + self.config.heartbeat_interval);
            if quiet && !actions.iter().any(|action| matches!(action, ClientAction::Send { .. })) {
                actions.push(ClientAction::reliable(Message::Heartbeat));
            }
        }
        actions
    }

    /// Drain the outbound queues into messages.
    fn flush(&mut self) -> Vec<ClientAction> {
        let mut actions = Vec::new();

        for (object, fields) in self.outbound.drain() {
            if self.ownership.is_owned(object) {
                actions.push(ClientAction::reliable(Message::StateUpdate { object, fields }));
            }
        }
        for (object, events) in self.triggers.drain() {
            if self.ownership.is_owned(object) {
                actions.push(ClientAction::best_effort(Message::TriggerBatch { object, events }));
            }
        }
        actions
    }

    fn handle_disconnected(&mut self) -> Vec<ClientAction> {
        let mut actions = Vec::new();
        for (object, state) in self.ownership.reset() {
            let result = Err(AuthorityError::Timeout { object });
            match state {
                OwnershipState::AcquirePending { .. } => {
                    actions.push(ClientAction::AcquireResolved { object, result });
                },
                OwnershipState::ReleasePending { .. } => {
                    actions.push(ClientAction::ReleaseResolved { object, result });
                },
                OwnershipState::Unowned | OwnershipState::Owned => {},
            }
        }

        self.outbound.clear();
        let lost = self.triggers.clear();
        self.objects.clear();
        if !self.replicas.is_empty() {
            self.retained = std::mem::take(&mut self.replicas);
        }
        self.roster.clear();
        self.phase = SessionPhase::default();
        self.state = ConnectionState::Disconnected;
        self.last_sent = None;

        tracing::info!(unresolved = actions.len(), lost_triggers = lost, "disconnected");
        actions
    }

    fn send_lobby(&self, message: Message) -> Result<Vec<ClientAction>, ClientError> {
        self.me()?;
        Ok(vec![ClientAction::reliable(message)])
    }

    fn handle_start_session(&self) -> Result<Vec<ClientAction>, ClientError> {
        self.me()?;
        if !self.is_leader() {
            return Err(ClientError::NotLeader);
        }
        Ok(vec![ClientAction::reliable(Message::StartSession)])
    }

    fn handle_acquire(&mut self, object: ObjectId) -> Result<Vec<ClientAction>, ClientError> {
        self.me()?;

        if !self.knows(object) {
            tracing::debug!(%object, "acquire of unknown object");
            let result = Err(AuthorityError::StaleReference { object });
            return Ok(vec![ClientAction::AcquireResolved { object, result }]);
        }
        if self.ownership.is_owned(object) {
            return Ok(vec![ClientAction::AcquireResolved { object, result: Ok(()) }]);
        }

        let request_id =
            self.ownership.begin_acquire(object, self.env.now(), self.config.acquire_timeout)?;
        Ok(vec![ClientAction::reliable(Message::AcquireRequest { object, request_id })])
    }

    fn handle_publish(
        &mut self,
        object: ObjectId,
        value: FieldValue,
    ) -> Result<Vec<ClientAction>, ClientError> {
        self.me()?;
        if !self.ownership.is_owned(object) {
            return Err(ClientError::NotAuthority { object });
        }
        if !value.is_finite() {
            return Err(ClientError::NonFinite { object, field: value.field() });
        }
        Ok(self.write(object, value))
    }

    fn handle_release(&mut self, object: ObjectId) -> Result<Vec<ClientAction>, ClientError> {
        self.me()?;
        self.release(object)
    }

    fn handle_publish_then_release(
        &mut self,
        object: ObjectId,
        values: Vec<FieldValue>,
    ) -> Result<Vec<ClientAction>, ClientError> {
        self.me()?;
        if !self.ownership.is_owned(object) {
            return Err(ClientError::NotAuthority { object });
        }
        if let Some(value) = values.iter().find(|value| !value.is_finite()) {
            return Err(ClientError::NonFinite { object, field: value.field() });
        }

        let mut actions = Vec::new();
        for value in values {
            actions.extend(self.write(object, value));
        }
        actions.extend(self.release(object)?);
        Ok(actions)
    }

    fn handle_enqueue_trigger(
        &mut self,
        object: ObjectId,
        event: TriggerEvent,
    ) -> Result<Vec<ClientAction>, ClientError> {
        self.me()?;
        if !self.ownership.is_owned(object) {
            return Err(ClientError::NotAuthority { object });
        }

        let capability = self.profile.as_ref().map(|p| p.capability).unwrap_or_default();
        if !profile_for(capability).drives_channel(event.channel) {
            return Err(ClientError::UnsupportedChannel { channel: event.channel, capability });
        }

        self.triggers.enqueue(object, event);
        Ok(Vec::new())
    }

    /// Apply a local write and queue it for the next tick.
    fn write(&mut self, object: ObjectId, value: FieldValue) -> Vec<ClientAction> {
        self.outbound.publish(object, value);
        self.replicas.apply(object, value).map(|change| field_changed(change, true)).into_iter().collect()
    }

    /// `Owned -> ReleasePending`, folding queued writes into the request.
    ///
    /// Queued triggers are flushed first so they leave while we still hold
    /// authority.
    fn release(&mut self, object: ObjectId) -> Result<Vec<ClientAction>, ClientError> {
        let request_id =
            self.ownership.begin_release(object, self.env.now(), self.config.release_timeout)?;

        let mut actions = Vec::new();
        let events = self.triggers.take(object);
        if !events.is_empty() {
            actions.push(ClientAction::best_effort(Message::TriggerBatch { object, events }));
        }

        let final_state = self.outbound.take(object);
        actions.push(ClientAction::reliable(Message::ReleaseRequest {
            object,
            request_id,
            final_state,
        }));
        Ok(actions)
    }
}

fn field_changed(change: FieldChange, local: bool) -> ClientAction {
    ClientAction::FieldChanged {
        object: change.object,
        value: change.value,
        previous: change.previous,
        local,
    }
}
