//! The simulated system behind the model's interface.
//!
//! Each operation is fed to the affected client and followed by a zero-time
//! tick, so queued writes and triggers are flushed, replicated and
//! delivered before the next operation. That makes the outcome of every
//! operation observable and comparable with [`ModelWorld`](crate::ModelWorld).

use std::time::Duration;

use tandem_client::{AuthorityError, ClientAction, ClientError, ClientEvent};
use tandem_proto::{Capability, Field, ObjectId, ParticipantId, Profile};
use tandem_server::DriverConfig;

use crate::{
    model::{
        ClientId, ModelObjectId, ObservableState, Operation, OperationError, OperationResult,
        operation::{object_id, trigger_event},
    },
    network::SimNetwork,
};

/// Largest single time step, well below the request and idle timeouts.
const MAX_STEP: Duration = Duration::from_millis(2_000);

/// Session of real clients and a real server driver on a [`SimNetwork`].
#[derive(Debug)]
pub struct SimWorld {
    network: SimNetwork,
    num_objects: usize,
}

impl SimWorld {
    /// Create a world of `num_clients` VR participants and `num_objects`
    /// props on a fault-free network.
    pub fn new(num_clients: usize, num_objects: usize, seed: u64) -> Self {
        let server = DriverConfig { max_participants: num_clients.max(1), ..DriverConfig::default() };
        let props = u64::try_from(num_objects).unwrap_or(u64::MAX);
        let mut network = SimNetwork::new(seed, server, props);

        for index in 0..num_clients {
            network.join(Profile::new(format!("player-{index}"), Capability::Vr));
        }
        Self { network, num_objects }
    }

    /// Underlying network.
    pub fn network(&self) -> &SimNetwork {
        &self.network
    }

    /// Apply an operation and return the result.
    pub fn apply(&mut self, op: &Operation) -> OperationResult {
        if let Some(client_id) = op.client_id() {
            if usize::from(client_id) >= self.network.len() {
                return OperationResult::Error(OperationError::InvalidClient);
            }
        }

        match op {
            Operation::Acquire { client_id, object } => {
                self.request(*client_id, *object, ClientEvent::Acquire { object: object_id(*object) })
            },
            Operation::Publish { client_id, object, value } => self.request(
                *client_id,
                *object,
                ClientEvent::Publish { object: object_id(*object), value: value.to_field_value() },
            ),
            Operation::Release { client_id, object } => {
                self.request(*client_id, *object, ClientEvent::Release { object: object_id(*object) })
            },
            Operation::PublishThenRelease { client_id, object, value } => self.request(
                *client_id,
                *object,
                ClientEvent::PublishThenRelease {
                    object: object_id(*object),
                    values: vec![value.to_field_value()],
                },
            ),
            Operation::Trigger { client_id, object, seed } => self.request(
                *client_id,
                *object,
                ClientEvent::EnqueueTrigger { object: object_id(*object), event: trigger_event(*seed) },
            ),
            Operation::Disconnect { client_id } => {
                let index = usize::from(*client_id);
                if !self.network.peer(index).is_some_and(|peer| peer.is_connected()) {
                    return OperationResult::Error(OperationError::NotConnected);
                }
                self.network.drop_connection(index);
                self.network.tick(Duration::ZERO);
                OperationResult::Ok
            },
            Operation::AdvanceTime { millis } => {
                let step = Duration::from_millis(u64::from(*millis)).min(MAX_STEP);
                self.network.tick(step);
                OperationResult::Ok
            },
            Operation::DeliverPending => {
                self.network.settle();
                OperationResult::Ok
            },
        }
    }

    fn request(&mut self, client_id: ClientId, object: ModelObjectId, event: ClientEvent) -> OperationResult {
        let index = usize::from(client_id);
        let before = self.network.peer(index).map_or(0, |peer| peer.observed().len());

        if let Err(err) = self.network.apply(index, event) {
            return OperationResult::Error(match err {
                ClientError::NotConnected => OperationError::NotConnected,
                _ => OperationError::NotAuthority,
            });
        }
        self.network.tick(Duration::ZERO);

        let target = object_id(object);
        let observed = self.network.peer(index).map_or(&[][..], |peer| &peer.observed()[before..]);
        let resolved = observed.iter().rev().find_map(|action| match action {
            ClientAction::AcquireResolved { object, result }
            | ClientAction::ReleaseResolved { object, result }
                if *object == target =>
            {
                Some(result.clone())
            },
            _ => None,
        });

        match resolved {
            None | Some(Ok(())) => OperationResult::Ok,
            Some(Err(AuthorityError::Denied { .. })) => OperationResult::Error(OperationError::Denied),
            Some(Err(AuthorityError::StaleReference { .. })) => {
                OperationResult::Error(OperationError::UnknownObject)
            },
            Some(Err(AuthorityError::Timeout { .. } | AuthorityError::Transport(_))) => {
                OperationResult::Error(OperationError::Timeout)
            },
        }
    }

    /// Extract observable state for comparison.
    pub fn observable_state(&self) -> ObservableState {
        let coordinator = self.network.driver().coordinator();
        let objects: Vec<ObjectId> = (0..self.num_objects)
            .filter_map(|index| u8::try_from(index).ok())
            .map(object_id)
            .collect();

        ObservableState {
            holders: objects
                .iter()
                .map(|object| coordinator.holder(*object).and_then(|holder| self.client_id(holder)))
                .collect(),
            fields: objects
                .iter()
                .map(|object| {
                    coordinator.snapshot(*object).map(|snapshot| snapshot.fields).unwrap_or_default()
                })
                .collect(),
            triggers: (0..self.network.len())
                .map(|index| {
                    self.network
                        .peer(index)
                        .map(|peer| {
                            peer.observed()
                                .iter()
                                .filter_map(|action| match action {
                                    ClientAction::TriggerFired { object, event } => {
                                        let index = u8::try_from(object.0.checked_sub(1)?).ok()?;
                                        Some((index, event.transition.clone()))
                                    },
                                    _ => None,
                                })
                                .collect()
                        })
                        .unwrap_or_default()
                })
                .collect(),
            connected: (0..self.network.len())
                .map(|index| self.network.peer(index).is_some_and(|peer| peer.is_connected()))
                .collect(),
        }
    }

    /// Every connected client agrees with the coordinator on holders and
    /// field values. Returns the first disagreement.
    pub fn check_convergence(&self) -> Result<(), String> {
        let coordinator = self.network.driver().coordinator();

        for snapshot in coordinator.snapshots() {
            for index in 0..self.network.len() {
                let Some(peer) = self.network.peer(index).filter(|peer| peer.is_connected()) else {
                    continue;
                };
                let client = peer.client();
                let object = snapshot.object;

                if client.holder(object) != snapshot.holder {
                    return Err(format!(
                        "client {index} sees holder {:?} of {object}, coordinator has {:?}",
                        client.holder(object),
                        snapshot.holder
                    ));
                }
                for field in [Field::Grabbed, Field::Active, Field::Transform] {
                    let expected = snapshot.get(field).copied();
                    if client.field(object, field) != expected {
                        return Err(format!(
                            "client {index} sees {field:?} of {object} as {:?}, coordinator has {expected:?}",
                            client.field(object, field)
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    fn client_id(&self, participant: ParticipantId) -> Option<ClientId> {
        (0..self.network.len())
            .find(|index| self.network.participant(*index) == participant)
            .and_then(|index| u8::try_from(index).ok())
    }
}
