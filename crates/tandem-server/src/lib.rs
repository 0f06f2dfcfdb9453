//! Tandem session coordinator server.
//!
//! Production runtime around the Sans-IO [`ServerDriver`]:
//! - [`ServerRuntime`]: one reader task and one writer task per connection,
//!   over any byte stream (Tokio TCP here, turmoil in the simulation harness)
//! - Length-prefixed CBOR frames (see `tandem_proto::codec`)
//! - System time and OS entropy
//!
//! ## Architecture
//!
//! ```text
//! tandem-server
//!   ├─ Server             (Tokio listener feeding a ServerRuntime)
//!   ├─ ServerRuntime      (tick loop and per-connection tasks)
//!   ├─ SystemEnv          (production Environment impl)
//!   ├─ TcpTransport       (per-connection send queues)
//!   ├─ ActionExecutor     (frames actions onto the transport)
//!   ├─ ServerDriver       (Sans-IO connection front)
//!   ├─ ConnectionRegistry (handshake and idle tracking)
//!   └─ Coordinator        (roster, authority, replication, relay)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod coordinator;
mod driver;
mod error;
mod executor;
mod registry;
mod system_env;
mod transport;

use std::{net::SocketAddr, sync::Arc};

use bytes::BytesMut;
pub use coordinator::{Coordinator, CoordinatorAction, CoordinatorError};
pub use driver::{DriverError, ServerAction, ServerConfig as DriverConfig, ServerDriver, ServerEvent};
pub use error::ServerError;
pub use executor::{ActionExecutor, BroadcastPolicy, ExecutorError};
pub use registry::{ConnectionInfo, ConnectionRegistry};
pub use system_env::SystemEnv;
use tandem_core::env::Environment;
use tandem_proto::{ObjectId, ParticipantId, decode_frame};
pub use transport::TcpTransport;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite},
    net::TcpListener,
    sync::{Mutex, Notify},
};

/// Server configuration for the production runtime.
#[derive(Debug, Clone)]
pub struct ServerRuntimeConfig {
    /// Address to bind to (e.g., "0.0.0.0:7777")
    pub bind_address: String,
    /// Scene props spawned at startup, with ids `1..=props`. At most
    /// [`MAX_PROPS`].
    pub props: u64,
    /// Frames each connection's best-effort queue holds before dropping.
    pub best_effort_queue_depth: usize,
    /// Driver configuration (limits, timers)
    pub driver: DriverConfig,
}

impl Default for ServerRuntimeConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:7777".to_string(),
            props: 0,
            best_effort_queue_depth: 256,
            driver: DriverConfig::default(),
        }
    }
}

/// Upper bound on scene props.
pub const MAX_PROPS: u64 = 1024;

/// Upper bound on the roster, so a roster broadcast fits in one frame.
pub const MAX_PARTICIPANTS: usize = 256;

/// Driver, executor and tick loop shared by every connection.
///
/// Independent of the socket type: [`serve`](Self::serve) takes the two
/// halves of any byte stream.
pub struct ServerRuntime<E: Environment> {
    driver: Arc<Mutex<ServerDriver<E>>>,
    executor: Arc<ActionExecutor<TcpTransport, E>>,
}

impl<E: Environment> Clone for ServerRuntime<E> {
    fn clone(&self) -> Self {
        Self { driver: Arc::clone(&self.driver), executor: Arc::clone(&self.executor) }
    }
}

impl<E: Environment> ServerRuntime<E> {
    /// Validate the configuration and spawn the configured props.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Config`] for an empty roster, a zero tick
    /// interval or more than [`MAX_PROPS`] props.
    pub fn new(env: E, config: &ServerRuntimeConfig) -> Result<Self, ServerError> {
        if config.driver.max_participants == 0 {
            return Err(ServerError::Config("max_participants must be at least 1".into()));
        }
        if config.driver.tick_interval.is_zero() {
            return Err(ServerError::Config("tick interval must be non-zero".into()));
        }
        if config.driver.max_participants > MAX_PARTICIPANTS {
            return Err(ServerError::Config(format!(
                "at most {MAX_PARTICIPANTS} participants are supported, got {}",
                config.driver.max_participants
            )));
        }
        if config.props > MAX_PROPS {
            return Err(ServerError::Config(format!(
                "at most {MAX_PROPS} props are supported, got {}",
                config.props
            )));
        }

        let mut driver = ServerDriver::new(env.clone(), config.driver.clone());
        for id in 1..=config.props {
            // Nobody is connected yet, so there is nothing to send
            let _ = driver.spawn_prop(ObjectId(id))?;
        }

        let transport = TcpTransport::new(config.best_effort_queue_depth);
        let executor = ActionExecutor::new(transport, env, BroadcastPolicy::BestEffort);

        Ok(Self { driver: Arc::new(Mutex::new(driver)), executor: Arc::new(executor) })
    }

    /// Tick the driver forever at the configured interval.
    pub async fn tick_loop(self) {
        let period = self.driver.lock().await.config().tick_interval;
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            let mut driver = self.driver.lock().await;
            match driver.process_event(ServerEvent::Tick) {
                Ok(actions) => {
                    if let Err(err) = self.executor.execute(actions).await {
                        tracing::error!(%err, "tick actions failed");
                    }
                },
                Err(err) => tracing::warn!(%err, "tick failed"),
            }
        }
    }

    /// Drive one connection from accept to close.
    ///
    /// # Errors
    ///
    /// Returns an error if the driver refuses the connection events.
    pub async fn serve<R, W>(&self, reader: R, writer: W, addr: SocketAddr) -> Result<(), ServerError>
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (participant, closed) = {
            let mut driver = self.driver.lock().await;
            let participant = driver.allocate_participant();
            let closed = self.executor.transport().register(participant, writer);
            let actions = driver.process_event(ServerEvent::ConnectionAccepted { participant })?;
            if let Err(err) = self.executor.execute(actions).await {
                tracing::error!(%participant, %err, "failed to execute actions");
            }
            (participant, closed)
        };
        tracing::debug!(%participant, %addr, "new connection");

        let reason = self.read_loop(participant, reader, &closed).await;

        {
            let mut driver = self.driver.lock().await;
            let actions =
                driver.process_event(ServerEvent::ConnectionClosed { participant, reason })?;
            if let Err(err) = self.executor.execute(actions).await {
                tracing::error!(%participant, %err, "failed to execute actions");
            }
        }
        self.executor.transport().unregister(participant);

        Ok(())
    }

    /// Run `f` against the driver, for inspection.
    pub async fn with_driver<T>(&self, f: impl FnOnce(&ServerDriver<E>) -> T) -> T {
        f(&*self.driver.lock().await)
    }

    /// Read frames until the peer goes away or the connection is closed from
    /// this side. Returns the reason for logging.
    async fn read_loop<R>(&self, participant: ParticipantId, mut reader: R, closed: &Notify) -> String
    where
        R: AsyncRead + Unpin + Send,
    {
        let mut buf = BytesMut::with_capacity(8 * 1024);

        loop {
            let read = tokio::select! {
                () = closed.notified() => return "closed by server".to_string(),
                read = reader.read_buf(&mut buf) => read,
            };
            match read {
                Ok(0) => return "peer closed".to_string(),
                Ok(_) => {},
                Err(err) => return err.to_string(),
            }

            loop {
                let message = match decode_frame(&mut buf) {
                    Ok(Some(message)) => message,
                    Ok(None) => break,
                    Err(err) => {
                        tracing::warn!(%participant, %err, "frame decode error");
                        return err.to_string();
                    },
                };

                // Executing under the driver lock keeps per-connection send
                // order identical to decision order.
                let mut driver = self.driver.lock().await;
                match driver.process_event(ServerEvent::MessageReceived { participant, message }) {
                    Ok(actions) => {
                        if let Err(err) = self.executor.execute(actions).await {
                            tracing::error!(%participant, %err, "failed to execute actions");
                        }
                    },
                    Err(err) => tracing::warn!(%participant, %err, "message processing error"),
                }
            }
        }
    }
}

/// Production tandem server.
///
/// A [`ServerRuntime`] on the system environment behind a Tokio listener.
pub struct Server {
    runtime: ServerRuntime<SystemEnv>,
    listener: TcpListener,
}

impl Server {
    /// Create and bind a new server, spawning the configured props.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - Binding to the address fails
    /// - The configuration is invalid
    pub async fn bind(config: ServerRuntimeConfig) -> Result<Self, ServerError> {
        let runtime = ServerRuntime::new(SystemEnv::new(), &config)?;
        let listener = TcpListener::bind(&config.bind_address).await?;
        Ok(Self { runtime, listener })
    }

    /// Run the server, accepting connections and processing frames.
    ///
    /// This method runs until the server is shut down or an error occurs.
    pub async fn run(self) -> Result<(), ServerError> {
        tracing::info!(addr = %self.listener.local_addr()?, "server starting");

        tokio::spawn(self.runtime.clone().tick_loop());

        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    if let Err(err) = stream.set_nodelay(true) {
                        tracing::debug!(%addr, %err, "failed to set nodelay");
                    }
                    let runtime = self.runtime.clone();
                    tokio::spawn(async move {
                        let (reader, writer) = stream.into_split();
                        if let Err(err) = runtime.serve(reader, writer, addr).await {
                            tracing::error!(%addr, %err, "connection error");
                        }
                    });
                },
                Err(err) => {
                    tracing::error!(%err, "accept error");
                },
            }
        }
    }

    /// Get the local address the server is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }
}
