//! TCP on the turmoil network.

use std::{io, net::SocketAddr};

use turmoil::net::{TcpListener, TcpStream};

/// Listening or dialing endpoint on the simulated network.
///
/// Streams behave like Tokio TCP streams, so the production server runtime
/// and codec run over them unchanged while turmoil injects latency, loss
/// and partitions underneath.
pub struct SimTransport {
    listener: Option<TcpListener>,
}

impl SimTransport {
    /// Listen on `addr`, e.g. `"0.0.0.0:7777"`.
    pub async fn bind(addr: &str) -> io::Result<Self> {
        Ok(Self { listener: Some(TcpListener::bind(addr).await?) })
    }

    /// Endpoint that only dials out.
    pub fn client() -> Self {
        Self { listener: None }
    }

    /// Wait for the next inbound connection.
    pub async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        match &self.listener {
            Some(listener) => listener.accept().await,
            None => Err(io::Error::new(io::ErrorKind::NotConnected, "transport is not listening")),
        }
    }

    /// Dial `addr`, e.g. `"server:7777"`.
    pub async fn connect_to_host(&self, addr: &str) -> io::Result<TcpStream> {
        TcpStream::connect(addr).await
    }
}

impl std::fmt::Debug for SimTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimTransport").field("listening", &self.listener.is_some()).finish()
    }
}
