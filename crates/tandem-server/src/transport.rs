//! TCP transport.
//!
//! Each connection gets a writer task fed by two queues: an unbounded queue
//! for reliable frames and a bounded one for best-effort frames. A full
//! best-effort queue drops the frame instead of stalling the coordinator.
//! Frames on the reliable queue are written in send order.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use bytes::Bytes;
use tandem_core::transport::{Reliability, Transport, TransportError};
use tandem_proto::ParticipantId;
use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    sync::{Notify, mpsc},
};

struct ConnectionHandle {
    reliable: mpsc::UnboundedSender<Bytes>,
    best_effort: mpsc::Sender<Bytes>,
    closed: Arc<Notify>,
}

type Connections = Arc<Mutex<HashMap<ParticipantId, ConnectionHandle>>>;

/// Per-participant send queues over TCP.
#[derive(Clone)]
pub struct TcpTransport {
    connections: Connections,
    best_effort_depth: usize,
}

impl TcpTransport {
    /// Create a transport whose best-effort queues hold `best_effort_depth`
    /// frames.
    pub fn new(best_effort_depth: usize) -> Self {
        Self { connections: Arc::default(), best_effort_depth: best_effort_depth.max(1) }
    }

    /// Number of registered connections.
    pub fn len(&self) -> usize {
        lock(&self.connections).len()
    }

    /// Whether no connection is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Start the writer task for a new connection.
    ///
    /// The returned [`Notify`] fires when the connection is closed from this
    /// side (explicit disconnect or a write failure); the reader should stop
    /// then.
    pub fn register<W>(&self, participant: ParticipantId, writer: W) -> Arc<Notify>
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (reliable, reliable_rx) = mpsc::unbounded_channel();
        let (best_effort, best_effort_rx) = mpsc::channel(self.best_effort_depth);
        let closed = Arc::new(Notify::new());

        lock(&self.connections).insert(
            participant,
            ConnectionHandle { reliable, best_effort, closed: Arc::clone(&closed) },
        );

        let connections = Arc::clone(&self.connections);
        let notify = Arc::clone(&closed);
        tokio::spawn(async move {
            if let Err(err) = write_loop(writer, reliable_rx, best_effort_rx).await {
                tracing::debug!(%participant, %err, "write failed");
            }
            lock(&connections).remove(&participant);
            notify.notify_one();
        });

        closed
    }

    /// Forget a connection whose reader has finished.
    pub fn unregister(&self, participant: ParticipantId) {
        lock(&self.connections).remove(&participant);
    }
}

impl std::fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpTransport")
            .field("connections", &self.len())
            .field("best_effort_depth", &self.best_effort_depth)
            .finish()
    }
}

impl Transport for TcpTransport {
    fn send(
        &self,
        participant: ParticipantId,
        reliability: Reliability,
        frame: Bytes,
    ) -> Result<(), TransportError> {
        let connections = lock(&self.connections);
        let handle =
            connections.get(&participant).ok_or(TransportError::Disconnected(participant))?;

        match reliability {
            Reliability::Reliable => handle
                .reliable
                .send(frame)
                .map_err(|_| TransportError::Disconnected(participant)),
            Reliability::BestEffort => handle.best_effort.try_send(frame).map_err(|err| match err {
                mpsc::error::TrySendError::Full(_) => TransportError::Backpressure(participant),
                mpsc::error::TrySendError::Closed(_) => TransportError::Disconnected(participant),
            }),
        }
    }

    fn disconnect(&self, participant: ParticipantId) {
        // Dropping the senders lets the writer drain what is queued and then
        // shut the socket down.
        if let Some(handle) = lock(&self.connections).remove(&participant) {
            handle.closed.notify_one();
        }
    }
}

async fn write_loop<W: AsyncWrite + Unpin>(
    mut writer: W,
    mut reliable: mpsc::UnboundedReceiver<Bytes>,
    mut best_effort: mpsc::Receiver<Bytes>,
) -> std::io::Result<()> {
    loop {
        let frame = tokio::select! {
            biased;
            Some(frame) = reliable.recv() => frame,
            Some(frame) = best_effort.recv() => frame,
            else => break,
        };
        writer.write_all(&frame).await?;
    }
    writer.shutdown().await
}

fn lock(
    connections: &Mutex<HashMap<ParticipantId, ConnectionHandle>>,
) -> std::sync::MutexGuard<'_, HashMap<ParticipantId, ConnectionHandle>> {
    connections.lock().unwrap_or_else(PoisonError::into_inner)
}
