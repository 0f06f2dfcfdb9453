//! Sans-IO server driver.
//!
//! Turns connection-level events into coordinator calls and coordinator
//! actions into per-connection sends. Owns no sockets: the runtime (or the
//! simulation harness) feeds [`ServerEvent`]s in and executes the returned
//! [`ServerAction`]s.
//!
//! # Connection lifecycle
//!
//! ```text
//! ConnectionAccepted ──> Hello ──> Welcome + Roster ──> ... ──> Goodbye / close / idle
//!                          │
//!                          └─ bad version or session full ──> Rejected + CloseConnection
//! ```

use std::time::Duration;

use tandem_core::{env::Environment, roster::RosterConfig, transport::Reliability};
use tandem_proto::{Message, ObjectId, PROTOCOL_VERSION, ParticipantId, ProtocolError};
use thiserror::Error;

use crate::{
    coordinator::{Coordinator, CoordinatorAction, CoordinatorError},
    registry::ConnectionRegistry,
};

/// Driver configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Roster capacity.
    pub max_participants: usize,
    /// Head count needed before the leader may start.
    pub min_participants: usize,
    /// How often the runtime should send [`ServerEvent::Tick`].
    pub tick_interval: Duration,
    /// Connections silent for this long are dropped.
    pub idle_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_participants: 8,
            min_participants: 1,
            tick_interval: Duration::from_millis(50),
            idle_timeout: Duration::from_secs(30),
        }
    }
}

/// Input to the driver.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// A transport accepted a connection for `participant`.
    ConnectionAccepted {
        /// Id from [`ServerDriver::allocate_participant`].
        participant: ParticipantId,
    },
    /// The connection went away without a `Goodbye`.
    ConnectionClosed {
        /// Affected participant.
        participant: ParticipantId,
        /// Reason for logging.
        reason: String,
    },
    /// A decoded message arrived.
    MessageReceived {
        /// Sender.
        participant: ParticipantId,
        /// Message.
        message: Message,
    },
    /// Periodic timer.
    Tick,
}

/// Output of the driver, executed by the runtime.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerAction {
    /// Send to one connection.
    SendToParticipant {
        /// Recipient.
        participant: ParticipantId,
        /// Message.
        message: Message,
        /// Delivery class.
        reliability: Reliability,
    },
    /// Send the same message to several connections.
    Broadcast {
        /// Recipients in roster order.
        recipients: Vec<ParticipantId>,
        /// Message.
        message: Message,
        /// Delivery class.
        reliability: Reliability,
    },
    /// Close a connection after flushing what was queued for it.
    CloseConnection {
        /// Affected participant.
        participant: ParticipantId,
        /// Reason for logging.
        reason: String,
    },
}

/// Errors from processing an event.
///
/// None of these are fatal to the server; the runtime logs them and keeps
/// serving.
#[derive(Debug, Error)]
pub enum DriverError {
    /// Event for a connection the driver does not know.
    #[error("unknown participant {0}")]
    UnknownParticipant(ParticipantId),

    /// Two connections were given the same id.
    #[error("participant {0} already connected")]
    DuplicateConnection(ParticipantId),

    /// Session message before the handshake.
    #[error("participant {0} has not completed the handshake")]
    NotJoined(ParticipantId),

    /// Message that only flows coordinator -> participant, or a second
    /// `Hello`.
    #[error("unexpected {kind} from participant {participant}")]
    UnexpectedMessage {
        /// Sender.
        participant: ParticipantId,
        /// Message name.
        kind: &'static str,
    },

    /// Frame encoding failed.
    #[error("protocol: {0}")]
    Protocol(#[from] ProtocolError),

    /// Coordinator refused the operation.
    #[error("coordinator: {0}")]
    Coordinator(#[from] CoordinatorError),
}

/// Connection-level front of the [`Coordinator`].
#[derive(Debug)]
pub struct ServerDriver<E: Environment> {
    env: E,
    config: ServerConfig,
    coordinator: Coordinator,
    registry: ConnectionRegistry,
}

impl<E: Environment> ServerDriver<E> {
    /// Create a driver with an empty session.
    pub fn new(env: E, config: ServerConfig) -> Self {
        let coordinator = Coordinator::new(RosterConfig {
            max_participants: config.max_participants,
            min_participants: config.min_participants,
        });
        Self { env, config, coordinator, registry: ConnectionRegistry::new() }
    }

    /// Configuration in use.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Session state, for inspection.
    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    /// Open connections, for inspection.
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Pick an id for a new connection that no open connection uses.
    pub fn allocate_participant(&self) -> ParticipantId {
        loop {
            let participant = ParticipantId(self.env.random_u64());
            if !self.registry.contains(participant) {
                return participant;
            }
        }
    }

    /// Spawn a scene prop. Only meaningful before anyone has joined, since
    /// the spawn broadcast goes to the current roster.
    pub fn spawn_prop(&mut self, object: ObjectId) -> Result<Vec<ServerAction>, DriverError> {
        let actions = self.coordinator.spawn_prop(object)?;
        Ok(self.expand(actions))
    }

    /// Process one event.
    pub fn process_event(&mut self, event: ServerEvent) -> Result<Vec<ServerAction>, DriverError> {
        match event {
            ServerEvent::ConnectionAccepted { participant } => {
                if !self.registry.insert(participant, self.env.now()) {
                    return Err(DriverError::DuplicateConnection(participant));
                }
                tracing::debug!(%participant, "connection accepted");
                Ok(Vec::new())
            },
            ServerEvent::ConnectionClosed { participant, reason } => {
                tracing::debug!(%participant, %reason, "connection closed");
                Ok(self.disconnect(participant))
            },
            ServerEvent::MessageReceived { participant, message } => {
                self.handle_message(participant, message)
            },
            ServerEvent::Tick => Ok(self.tick()),
        }
    }

    fn handle_message(
        &mut self,
        participant: ParticipantId,
        message: Message,
    ) -> Result<Vec<ServerAction>, DriverError> {
        if !self.registry.contains(participant) {
            return Err(DriverError::UnknownParticipant(participant));
        }
        self.registry.touch(participant, self.env.now());

        if !self.registry.is_joined(participant) {
            return match message {
                Message::Hello { version } => self.handshake(participant, version),
                Message::Goodbye { .. } => Ok(self.close(participant, "goodbye")),
                other => {
                    tracing::debug!(%participant, kind = other.kind(), "message before hello");
                    Err(DriverError::NotJoined(participant))
                },
            };
        }

        let coordinator = &mut self.coordinator;
        let actions = match message {
            Message::SetProfile(profile) => coordinator.set_profile(participant, profile)?,
            Message::SetReady { ready } => coordinator.set_ready(participant, ready)?,
            Message::ToggleReady => coordinator.toggle_ready(participant)?,
            Message::StartSession => coordinator.start_session(participant)?,
            Message::AcquireRequest { object, request_id } => {
                coordinator.acquire(participant, object, request_id)
            },
            Message::ReleaseRequest { object, request_id, final_state } => {
                coordinator.release(participant, object, request_id, final_state)
            },
            Message::StateUpdate { object, fields } => {
                coordinator.state_update(participant, object, fields);
                Vec::new()
            },
            Message::TriggerBatch { object, events } => {
                coordinator.relay(participant, object, events)
            },
            Message::Heartbeat => Vec::new(),
            Message::Goodbye { reason } => {
                tracing::info!(%participant, %reason, "participant said goodbye");
                return Ok(self.close(participant, "goodbye"));
            },
            other => {
                return Err(DriverError::UnexpectedMessage { participant, kind: other.kind() });
            },
        };

        Ok(self.expand(actions))
    }

    fn handshake(
        &mut self,
        participant: ParticipantId,
        version: u8,
    ) -> Result<Vec<ServerAction>, DriverError> {
        if version != PROTOCOL_VERSION {
            let err = ProtocolError::UnsupportedVersion { expected: PROTOCOL_VERSION, actual: version };
            tracing::warn!(%participant, %err, "rejecting connection");
            return Ok(self.reject(participant, err.to_string()));
        }

        match self.coordinator.join(participant) {
            Ok(actions) => {
                self.registry.mark_joined(participant);
                Ok(self.expand(actions))
            },
            Err(err) => {
                tracing::warn!(%participant, %err, "rejecting connection");
                Ok(self.reject(participant, err.to_string()))
            },
        }
    }

    fn reject(&mut self, participant: ParticipantId, reason: String) -> Vec<ServerAction> {
        self.registry.remove(participant);
        vec![
            ServerAction::SendToParticipant {
                participant,
                message: Message::Rejected { reason: reason.clone() },
                reliability: Reliability::Reliable,
            },
            ServerAction::CloseConnection { participant, reason },
        ]
    }

    /// Remove a participant from the session and close its connection.
    fn close(&mut self, participant: ParticipantId, reason: &str) -> Vec<ServerAction> {
        let mut actions = self.disconnect(participant);
        actions.push(ServerAction::CloseConnection { participant, reason: reason.to_string() });
        actions
    }

    /// Forget a connection. Joined participants leave the session, which
    /// releases everything they held.
    fn disconnect(&mut self, participant: ParticipantId) -> Vec<ServerAction> {
        match self.registry.remove(participant) {
            Some(info) if info.joined => {
                let actions = self.coordinator.leave(participant);
                self.expand(actions)
            },
            _ => Vec::new(),
        }
    }

    fn tick(&mut self) -> Vec<ServerAction> {
        let now = self.env.now();
        let mut actions = Vec::new();

        for participant in self.registry.idle(now, self.config.idle_timeout) {
            tracing::info!(%participant, "idle timeout");
            actions.extend(self.close(participant, "idle timeout"));
        }

        let flushed = self.coordinator.flush();
        actions.extend(self.expand(flushed));
        actions
    }

    /// Resolve coordinator broadcasts to concrete recipients.
    fn expand(&self, actions: Vec<CoordinatorAction>) -> Vec<ServerAction> {
        actions
            .into_iter()
            .filter_map(|action| match action {
                CoordinatorAction::Send { participant, message, reliability } => {
                    Some(ServerAction::SendToParticipant { participant, message, reliability })
                },
                CoordinatorAction::Broadcast { message, exclude, reliability } => {
                    let recipients = self.coordinator.recipients(exclude);
                    (!recipients.is_empty()).then_some(ServerAction::Broadcast {
                        recipients,
                        message,
                        reliability,
                    })
                },
            })
            .collect()
    }
}
