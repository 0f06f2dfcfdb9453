//! In-memory network between one server driver and many clients.
//!
//! Every message crosses the wire codec, so framing is exercised exactly as
//! over TCP. Each direction of each link is a lossless FIFO queue and
//! delivery happens only when the caller settles the network, which keeps
//! the Sans-IO machines in lockstep with the reference model. Loss, latency
//! and partitions are exercised against the real runtime on turmoil instead
//! (see [`SimServer`](crate::SimServer)).

use std::{
    collections::{BTreeMap, VecDeque},
    sync::{Mutex, PoisonError},
    time::Duration,
};

use bytes::{Bytes, BytesMut};
use tandem_client::{Client, ClientAction, ClientConfig, ClientError, ClientEvent};
use tandem_core::transport::{Reliability, Transport, TransportError};
use tandem_proto::{Message, ObjectId, ParticipantId, Profile, decode_frame, encode_frame};
use tandem_server::{DriverConfig, ServerAction, ServerDriver, ServerEvent};

use crate::step_env::StepEnv;

/// Rounds after which [`SimNetwork::settle`] gives up.
const MAX_SETTLE_ROUNDS: usize = 256;

#[derive(Debug, Default)]
struct Link {
    queue: VecDeque<(Reliability, Bytes)>,
    closed: bool,
}

/// Server-to-client queues behind the [`Transport`] seam.
#[derive(Debug, Default)]
pub struct QueueTransport {
    links: Mutex<BTreeMap<ParticipantId, Link>>,
}

impl QueueTransport {
    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<ParticipantId, Link>> {
        self.links.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn open(&self, participant: ParticipantId) {
        self.lock().insert(participant, Link::default());
    }

    fn pending(&self) -> usize {
        self.lock().values().map(|link| link.queue.len() + usize::from(link.closed)).sum()
    }

    /// Take everything queued for `participant` and whether the link closed.
    fn drain(&self, participant: ParticipantId) -> (Vec<(Reliability, Bytes)>, bool) {
        let mut links = self.lock();
        let Some(link) = links.get_mut(&participant) else {
            return (Vec::new(), false);
        };
        let frames = link.queue.drain(..).collect();
        let closed = link.closed;
        if closed {
            links.remove(&participant);
        }
        (frames, closed)
    }
}

impl Transport for QueueTransport {
    fn send(
        &self,
        participant: ParticipantId,
        reliability: Reliability,
        frame: Bytes,
    ) -> Result<(), TransportError> {
        match self.lock().get_mut(&participant) {
            Some(link) if !link.closed => {
                link.queue.push_back((reliability, frame));
                Ok(())
            },
            _ => Err(TransportError::Disconnected(participant)),
        }
    }

    fn disconnect(&self, participant: ParticipantId) {
        if let Some(link) = self.lock().get_mut(&participant) {
            link.closed = true;
        }
    }
}

/// One simulated participant.
#[derive(Debug)]
pub struct Peer {
    id: ParticipantId,
    client: Client<StepEnv>,
    uplink: VecDeque<(Reliability, Bytes)>,
    observed: Vec<ClientAction>,
    connected: bool,
}

impl Peer {
    /// Participant id assigned by the driver.
    pub fn id(&self) -> ParticipantId {
        self.id
    }

    /// The participant's state machine.
    pub fn client(&self) -> &Client<StepEnv> {
        &self.client
    }

    /// Every non-send action the client produced, in order.
    pub fn observed(&self) -> &[ClientAction] {
        &self.observed
    }

    /// Whether the connection is still open.
    pub fn is_connected(&self) -> bool {
        self.connected
    }
}

/// Server driver, clients and the links between them.
#[derive(Debug)]
pub struct SimNetwork {
    env: StepEnv,
    driver: ServerDriver<StepEnv>,
    transport: QueueTransport,
    peers: Vec<Peer>,
}

impl SimNetwork {
    /// Create a network whose server has `props` scene props with ids
    /// `1..=props`.
    pub fn new(seed: u64, server: DriverConfig, props: u64) -> Self {
        let env = StepEnv::with_seed(seed);
        let mut driver = ServerDriver::new(env.clone(), server);
        for id in 1..=props {
            if let Err(err) = driver.spawn_prop(ObjectId(id)) {
                tracing::error!(%err, "failed to spawn prop");
            }
        }

        Self { env, driver, transport: QueueTransport::default(), peers: Vec::new() }
    }

    /// Shared environment.
    pub fn env(&self) -> &StepEnv {
        &self.env
    }

    /// Server driver.
    pub fn driver(&self) -> &ServerDriver<StepEnv> {
        &self.driver
    }

    /// Number of peers ever added.
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// Whether no peer was added.
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Peer by index.
    pub fn peer(&self, index: usize) -> Option<&Peer> {
        self.peers.get(index)
    }

    /// Client of a peer.
    ///
    /// # Panics
    ///
    /// If `index` is out of range.
    pub fn client(&self, index: usize) -> &Client<StepEnv> {
        &self.peers[index].client
    }

    /// Participant id of a peer.
    ///
    /// # Panics
    ///
    /// If `index` is out of range.
    pub fn participant(&self, index: usize) -> ParticipantId {
        self.peers[index].id
    }

    /// Forget what peers observed so far.
    pub fn clear_observed(&mut self) {
        for peer in &mut self.peers {
            peer.observed.clear();
        }
    }

    /// Connect a new participant and let the handshake complete. Returns
    /// the peer index.
    pub fn join(&mut self, profile: Profile) -> usize {
        let id = self.driver.allocate_participant();
        self.transport.open(id);
        self.server_event(ServerEvent::ConnectionAccepted { participant: id });

        let client = Client::new(self.env.clone(), ClientConfig::default());
        self.peers.push(Peer {
            id,
            client,
            uplink: VecDeque::new(),
            observed: Vec::new(),
            connected: true,
        });

        let index = self.peers.len() - 1;
        if let Err(err) = self.apply(index, ClientEvent::Connect { profile }) {
            tracing::error!(%err, "connect failed");
        }
        self.settle();
        index
    }

    /// Feed an application event to a client. Resulting sends are queued,
    /// not delivered.
    pub fn apply(&mut self, index: usize, event: ClientEvent) -> Result<(), ClientError> {
        let Some(peer) = self.peers.get_mut(index) else {
            return Err(ClientError::NotConnected);
        };
        let actions = peer.client.handle(event)?;
        Self::route(peer, actions);
        Ok(())
    }

    /// Hand a message straight to a client, bypassing the server.
    pub fn inject(&mut self, index: usize, message: Message) -> Result<(), ClientError> {
        self.apply(index, ClientEvent::MessageReceived(message))
    }

    /// Advance time, tick every client, deliver, tick the server, deliver.
    pub fn tick(&mut self, by: Duration) {
        self.env.advance(by);
        for index in 0..self.peers.len() {
            if self.peers[index].connected {
                let _ = self.apply(index, ClientEvent::Tick);
            }
        }
        self.settle();
        self.server_event(ServerEvent::Tick);
        self.settle();
    }

    /// Lose the connection without a goodbye.
    pub fn drop_connection(&mut self, index: usize) {
        let Some(peer) = self.peers.get_mut(index) else {
            return;
        };
        if !peer.connected {
            return;
        }
        peer.connected = false;
        peer.uplink.clear();
        let id = peer.id;
        let actions = peer.client.handle(ClientEvent::Disconnected).unwrap_or_default();
        Self::route(peer, actions);
        peer.uplink.clear();

        self.transport.disconnect(id);
        self.server_event(ServerEvent::ConnectionClosed {
            participant: id,
            reason: "connection lost".to_string(),
        });
        self.settle();
    }

    /// Say goodbye and wait for the server to close the link.
    pub fn leave(&mut self, index: usize) {
        let Some(peer) = self.peers.get_mut(index) else {
            return;
        };
        if !peer.connected {
            return;
        }
        let frame = encode(&Message::Goodbye { reason: "leaving".to_string() });
        peer.uplink.push_back((Reliability::Reliable, frame));
        self.settle();
    }

    /// Deliver until every queue is empty. Returns `false` if traffic was
    /// still flowing after the round limit.
    pub fn settle(&mut self) -> bool {
        for _ in 0..MAX_SETTLE_ROUNDS {
            if self.pending() == 0 {
                return true;
            }
            self.deliver_uplinks();
            self.deliver_downlinks();
        }
        tracing::warn!(pending = self.pending(), "network did not settle");
        false
    }

    fn pending(&self) -> usize {
        self.transport.pending() + self.peers.iter().map(|peer| peer.uplink.len()).sum::<usize>()
    }

    fn deliver_uplinks(&mut self) {
        for index in 0..self.peers.len() {
            let frames: Vec<_> = self.peers[index].uplink.drain(..).collect();
            let participant = self.peers[index].id;

            for (_, frame) in frames {
                let Some(message) = decode(&frame) else { continue };
                self.server_event(ServerEvent::MessageReceived { participant, message });
            }
        }
    }

    fn deliver_downlinks(&mut self) {
        for index in 0..self.peers.len() {
            let participant = self.peers[index].id;
            let (frames, closed) = self.transport.drain(participant);

            for (_, frame) in frames {
                let Some(message) = decode(&frame) else { continue };
                let peer = &mut self.peers[index];
                match peer.client.handle(ClientEvent::MessageReceived(message)) {
                    Ok(actions) => Self::route(peer, actions),
                    Err(err) => tracing::warn!(%participant, %err, "client rejected message"),
                }
            }

            if closed {
                let peer = &mut self.peers[index];
                if peer.connected {
                    peer.connected = false;
                    let actions = peer.client.handle(ClientEvent::Disconnected).unwrap_or_default();
                    Self::route(peer, actions);
                    peer.uplink.clear();
                }
            }
        }
    }

    fn server_event(&mut self, event: ServerEvent) {
        let actions = match self.driver.process_event(event) {
            Ok(actions) => actions,
            Err(err) => {
                tracing::debug!(%err, "driver refused event");
                return;
            },
        };

        for action in actions {
            match action {
                ServerAction::SendToParticipant { participant, message, reliability } => {
                    let _ = self.transport.send(participant, reliability, encode(&message));
                },
                ServerAction::Broadcast { recipients, message, reliability } => {
                    let frame = encode(&message);
                    for participant in recipients {
                        let _ = self.transport.send(participant, reliability, frame.clone());
                    }
                },
                ServerAction::CloseConnection { participant, .. } => {
                    self.transport.disconnect(participant);
                },
            }
        }
    }

    fn route(peer: &mut Peer, actions: Vec<ClientAction>) {
        for action in actions {
            match action {
                ClientAction::Send { message, reliability } => {
                    if peer.connected {
                        peer.uplink.push_back((reliability, encode(&message)));
                    }
                },
                other => peer.observed.push(other),
            }
        }
    }
}

fn encode(message: &Message) -> Bytes {
    encode_frame(message).unwrap_or_else(|err| {
        tracing::error!(%err, kind = message.kind(), "failed to encode");
        Bytes::new()
    })
}

fn decode(frame: &Bytes) -> Option<Message> {
    let mut buf = BytesMut::from(&frame[..]);
    match decode_frame(&mut buf) {
        Ok(Some(message)) if buf.is_empty() => Some(message),
        Ok(_) => {
            tracing::error!(len = frame.len(), "incomplete frame");
            None
        },
        Err(err) => {
            tracing::error!(%err, "undecodable frame");
            None
        },
    }
}
