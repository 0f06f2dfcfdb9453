//! Identifiers.
//!
//! All identifiers are opaque `u64` newtypes. They serialize transparently so
//! the wire format stays compact.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identity of a connected participant.
///
/// Assigned by the coordinator when the connection is accepted. Stable for the
/// lifetime of the connection; a reconnect yields a new id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(pub u64);

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{:016x}", self.0)
    }
}

/// Stable identity of a shared object, assigned at spawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(pub u64);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "obj-{}", self.0)
    }
}

/// Correlates an authority request with its grant, denial or confirmation.
///
/// Allocated by the requesting participant. Only needs to be unique per
/// participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_formats() {
        assert_eq!(ObjectId(7).to_string(), "obj-7");
        assert_eq!(RequestId(3).to_string(), "req-3");
        assert_eq!(ParticipantId(0xab).to_string(), "p00000000000000ab");
    }

    #[test]
    fn ids_serialize_transparently() {
        let mut bytes = Vec::new();
        ciborium::ser::into_writer(&ObjectId(5), &mut bytes).expect("encode");

        let mut raw = Vec::new();
        ciborium::ser::into_writer(&5u64, &mut raw).expect("encode");

        assert_eq!(bytes, raw);
    }
}
