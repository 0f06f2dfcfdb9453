//! Transport seam.
//!
//! The coordinator never touches sockets. Drivers implement [`Transport`] over
//! whatever carries frames (TCP in production, in-memory queues in the
//! simulation harness).

use bytes::Bytes;
use tandem_proto::ParticipantId;
use thiserror::Error;

/// Delivery class of a send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reliability {
    /// Must arrive while the connection lives. Authority traffic and
    /// persistent state.
    Reliable,
    /// May be dropped under pressure. Trigger relays.
    BestEffort,
}

/// Errors from sending a frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The participant has no live connection.
    #[error("participant {0} is not connected")]
    Disconnected(ParticipantId),

    /// A best-effort queue was full and the frame was dropped.
    #[error("send queue full for participant {0}")]
    Backpressure(ParticipantId),

    /// Underlying I/O failure.
    #[error("i/o error: {0}")]
    Io(String),
}

/// Frame delivery used by the coordinator's action executor.
pub trait Transport {
    /// Queue `frame` for one participant.
    fn send(
        &self,
        participant: ParticipantId,
        reliability: Reliability,
        frame: Bytes,
    ) -> Result<(), TransportError>;

    /// Close a participant's connection.
    fn disconnect(&self, participant: ParticipantId);
}
