//! Protocol error types.

use thiserror::Error;

/// Errors from encoding, decoding or framing messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// CBOR serialization failed.
    #[error("failed to encode message: {0}")]
    Encode(String),

    /// CBOR deserialization failed.
    #[error("failed to decode message: {0}")]
    Decode(String),

    /// A frame announced or produced a payload larger than allowed.
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge {
        /// Announced or actual payload size.
        size: usize,
        /// Maximum accepted payload size.
        max: usize,
    },

    /// Peer speaks a protocol version we do not understand.
    #[error("unsupported protocol version {actual} (expected {expected})")]
    UnsupportedVersion {
        /// Version this build speaks.
        expected: u8,
        /// Version announced by the peer.
        actual: u8,
    },
}
