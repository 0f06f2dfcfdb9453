//! A framed tandem participant as a turmoil client.
//!
//! Wraps a real [`Client`] and does what an application loop does: writes
//! its `Send` actions as frames, feeds decoded frames back in, and ticks it
//! on a fixed interval. Everything else the client emits is recorded so
//! tests can assert on hooks-level output.

use std::{io, time::Duration};

use bytes::BytesMut;
use tandem_client::{Client, ClientAction, ClientConfig, ClientEvent, OwnershipState};
use tandem_proto::{ObjectId, Profile, decode_frame, encode_frame};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    time::{Interval, MissedTickBehavior},
};
use turmoil::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

use crate::{sim_env::SimEnv, sim_transport::SimTransport};

/// How often the client is ticked.
pub const TICK: Duration = Duration::from_millis(50);

/// How long [`SimClient::connect`] waits for the welcome.
pub const JOIN_TIMEOUT: Duration = Duration::from_secs(10);

enum Wake {
    Read(io::Result<usize>),
    Tick,
    Deadline,
}

/// Participant connected over the simulated network.
pub struct SimClient {
    client: Client<SimEnv>,
    reader: Option<OwnedReadHalf>,
    writer: Option<OwnedWriteHalf>,
    buf: BytesMut,
    observed: Vec<ClientAction>,
    ticker: Interval,
}

impl SimClient {
    /// Dial `addr`, join with `profile` and wait for the welcome.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection fails or no welcome arrives
    /// within [`JOIN_TIMEOUT`].
    pub async fn connect(addr: &str, env: SimEnv, profile: Profile) -> io::Result<Self> {
        let mut ticker = tokio::time::interval(TICK);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut sim = Self {
            client: Client::new(env, ClientConfig::default()),
            reader: None,
            writer: None,
            buf: BytesMut::with_capacity(8 * 1024),
            observed: Vec::new(),
            ticker,
        };
        sim.join(addr, profile).await?;
        Ok(sim)
    }

    /// Drop the current connection, if any, and join again on a fresh one.
    ///
    /// The same [`Client`] is reused, so replicas kept from the previous
    /// session are diffed against the new welcome.
    ///
    /// # Errors
    ///
    /// Same as [`connect`](Self::connect).
    pub async fn reconnect(&mut self, addr: &str, profile: Profile) -> io::Result<()> {
        self.connection_lost("reconnecting");
        self.join(addr, profile).await
    }

    async fn join(&mut self, addr: &str, profile: Profile) -> io::Result<()> {
        let stream = SimTransport::client().connect_to_host(addr).await?;
        let (reader, writer) = stream.into_split();
        self.reader = Some(reader);
        self.writer = Some(writer);
        self.buf.clear();

        self.apply(ClientEvent::Connect { profile }).await?;
        if self.run_until(JOIN_TIMEOUT, |sim| sim.client.is_connected()).await? {
            Ok(())
        } else {
            Err(io::Error::new(io::ErrorKind::TimedOut, "no welcome from coordinator"))
        }
    }

    /// The wrapped client.
    pub fn client(&self) -> &Client<SimEnv> {
        &self.client
    }

    /// Non-send actions recorded so far.
    pub fn observed(&self) -> &[ClientAction] {
        &self.observed
    }

    /// Forget recorded actions.
    pub fn clear_observed(&mut self) {
        self.observed.clear();
    }

    /// Whether the connection is still up as far as this side knows.
    pub fn is_open(&self) -> bool {
        self.reader.is_some()
    }

    /// Feed `event` to the client and execute what it asks for.
    ///
    /// # Errors
    ///
    /// Returns the client's refusal as an [`io::Error`].
    pub async fn apply(&mut self, event: ClientEvent) -> io::Result<()> {
        let actions = self.client.handle(event).map_err(io::Error::other)?;
        self.execute(actions).await
    }

    /// Ask for authority over `object` and wait for the answer.
    ///
    /// Returns whether authority is held afterwards.
    ///
    /// # Errors
    ///
    /// Returns an error if the client refuses the request.
    pub async fn acquire(&mut self, object: ObjectId, timeout: Duration) -> io::Result<bool> {
        self.apply(ClientEvent::Acquire { object }).await?;
        self.run_until(timeout, |sim| {
            !matches!(sim.client.ownership(object), OwnershipState::AcquirePending { .. })
        })
        .await?;
        Ok(self.client.ownership(object) == OwnershipState::Owned)
    }

    /// Keep the connection serviced for `duration`.
    ///
    /// # Errors
    ///
    /// Returns an error if the client refuses a tick.
    pub async fn wait(&mut self, duration: Duration) -> io::Result<()> {
        self.run_until(duration, |_| false).await.map(|_| ())
    }

    /// Service the connection until `done` holds or `timeout` passes.
    ///
    /// Returns whether `done` held.
    ///
    /// # Errors
    ///
    /// Returns an error if the client refuses a tick or a frame fails to
    /// encode.
    pub async fn run_until(
        &mut self,
        timeout: Duration,
        mut done: impl FnMut(&Self) -> bool,
    ) -> io::Result<bool> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            if done(self) {
                return Ok(true);
            }

            let wake = match self.reader.as_mut() {
                Some(reader) => tokio::select! {
                    read = reader.read_buf(&mut self.buf) => Wake::Read(read),
                    _ = self.ticker.tick() => Wake::Tick,
                    () = tokio::time::sleep_until(deadline) => Wake::Deadline,
                },
                None => tokio::select! {
                    _ = self.ticker.tick() => Wake::Tick,
                    () = tokio::time::sleep_until(deadline) => Wake::Deadline,
                },
            };

            match wake {
                Wake::Read(Ok(0)) => self.connection_lost("peer closed"),
                Wake::Read(Ok(_)) => self.drain().await?,
                Wake::Read(Err(err)) => self.connection_lost(&err.to_string()),
                Wake::Tick if self.is_open() && self.client.is_connected() => {
                    self.apply(ClientEvent::Tick).await?;
                },
                Wake::Tick => {},
                Wake::Deadline => return Ok(done(self)),
            }
        }
    }

    async fn drain(&mut self) -> io::Result<()> {
        loop {
            match decode_frame(&mut self.buf) {
                Ok(Some(message)) => {
                    match self.client.handle(ClientEvent::MessageReceived(message)) {
                        Ok(actions) => self.execute(actions).await?,
                        Err(err) => tracing::debug!(%err, "client refused message"),
                    }
                },
                Ok(None) => return Ok(()),
                Err(err) => {
                    self.connection_lost(&err.to_string());
                    return Ok(());
                },
            }
        }
    }

    async fn execute(&mut self, actions: Vec<ClientAction>) -> io::Result<()> {
        let mut failed = None;

        for action in actions {
            match action {
                ClientAction::Send { message, .. } => {
                    let Some(writer) = self.writer.as_mut() else { continue };
                    if failed.is_some() {
                        continue;
                    }
                    let frame = encode_frame(&message).map_err(io::Error::other)?;
                    if let Err(err) = writer.write_all(&frame).await {
                        failed = Some(err);
                    }
                },
                other => self.observed.push(other),
            }
        }

        if let Some(err) = failed {
            self.connection_lost(&err.to_string());
        }
        Ok(())
    }

    fn connection_lost(&mut self, reason: &str) {
        let was_open = self.reader.take().is_some() | self.writer.take().is_some();
        self.buf.clear();
        if !was_open {
            return;
        }

        tracing::debug!(participant = ?self.client.participant(), reason, "connection lost");
        match self.client.handle(ClientEvent::Disconnected) {
            Ok(actions) => self
                .observed
                .extend(actions.into_iter().filter(|action| !matches!(action, ClientAction::Send { .. }))),
            Err(err) => tracing::warn!(%err, "disconnect handling failed"),
        }
    }
}

impl std::fmt::Debug for SimClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimClient")
            .field("participant", &self.client.participant())
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}
