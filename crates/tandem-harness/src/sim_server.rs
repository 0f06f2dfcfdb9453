//! The production server runtime as a turmoil host.

use std::io;

use tandem_server::{ServerError, ServerRuntime, ServerRuntimeConfig};

use crate::{sim_env::SimEnv, sim_transport::SimTransport};

/// Port the simulated server listens on.
pub const SERVER_PORT: u16 = 7777;

/// Address clients dial to reach a server hosted as `"server"`.
pub const SERVER_ADDR: &str = "server:7777";

/// [`ServerRuntime`] on [`SimEnv`] behind a turmoil listener.
///
/// Everything above the socket is the production code path: the driver,
/// the executor, the per-connection writer tasks and the codec.
pub struct SimServer {
    runtime: ServerRuntime<SimEnv>,
}

impl SimServer {
    /// Validate `config` and spawn its props on a fresh runtime.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Config`] for a configuration the production
    /// server would refuse.
    pub fn new(seed: u64, config: &ServerRuntimeConfig) -> Result<Self, ServerError> {
        Ok(Self { runtime: ServerRuntime::new(SimEnv::with_seed(seed), config)? })
    }

    /// The runtime, for inspecting coordinator state.
    pub fn runtime(&self) -> &ServerRuntime<SimEnv> {
        &self.runtime
    }

    /// Listen on [`SERVER_PORT`] and serve connections until the host is
    /// torn down.
    ///
    /// # Errors
    ///
    /// Returns an error if binding or accepting fails.
    pub async fn run(self) -> io::Result<()> {
        let transport = SimTransport::bind(&format!("0.0.0.0:{SERVER_PORT}")).await?;
        tokio::spawn(self.runtime.clone().tick_loop());

        loop {
            let (stream, addr) = transport.accept().await?;
            let runtime = self.runtime.clone();
            tokio::spawn(async move {
                let (reader, writer) = stream.into_split();
                if let Err(err) = runtime.serve(reader, writer, addr).await {
                    tracing::warn!(%addr, %err, "connection error");
                }
            });
        }
    }
}

/// Register a `"server"` host on `sim` running a [`SimServer`].
///
/// The host is rebuilt from `config` if turmoil restarts it.
pub fn host(sim: &mut turmoil::Sim<'_>, seed: u64, config: ServerRuntimeConfig) {
    sim.host("server", move || {
        let config = config.clone();
        async move {
            SimServer::new(seed, &config)?.run().await?;
            Ok(())
        }
    });
}
