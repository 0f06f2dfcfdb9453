//! Tandem wire protocol.
//!
//! Every message exchanged between a participant and the session coordinator
//! is a [`Message`]. Messages are CBOR-encoded and carried in length-prefixed
//! frames (see [`codec`]).
//!
//! # Layout
//!
//! - [`ids`]: participant, object and request identifiers
//! - [`payloads`]: the data carried by messages (roster entries, field
//!   values, snapshots, trigger events)
//! - [`message`]: the [`Message`] enum and its CBOR encoding
//! - [`codec`]: stream framing

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod codec;
pub mod error;
pub mod ids;
pub mod message;
pub mod payloads;

pub use codec::{FRAME_HEADER_SIZE, MAX_FRAME_SIZE, decode_frame, encode_frame};
pub use error::ProtocolError;
pub use ids::{ObjectId, ParticipantId, RequestId};
pub use message::{Message, PROTOCOL_VERSION};
pub use payloads::{
    relay::{HandChannel, TriggerEvent},
    replication::{Field, FieldValue, ObjectKind, ObjectSnapshot, Revision, Transform},
    session::{Capability, DEFAULT_DISPLAY_NAME, ParticipantInfo, Profile, SessionPhase},
};
