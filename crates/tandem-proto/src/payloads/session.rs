//! Session and roster payload types.

use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};

use crate::ids::ParticipantId;

/// Display name shown for a participant whose profile has not arrived yet.
pub const DEFAULT_DISPLAY_NAME: &str = "Loading...";

/// Device capability of a participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum Capability {
    /// Head-mounted display with tracked hands.
    Vr = 0,
    /// Flat screen, keyboard and mouse.
    #[default]
    Desktop = 1,
}

/// Identity data a participant chooses before joining.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    /// Name shown in the lobby.
    pub display_name: String,
    /// Device capability.
    pub capability: Capability,
}

impl Profile {
    /// Build a profile.
    pub fn new(display_name: impl Into<String>, capability: Capability) -> Self {
        Self { display_name: display_name.into(), capability }
    }
}

/// Roster entry as seen by every participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantInfo {
    /// Connection identity.
    pub id: ParticipantId,
    /// Display name, [`DEFAULT_DISPLAY_NAME`] until the profile is set.
    pub display_name: String,
    /// Device capability, `Desktop` until the profile is set.
    pub capability: Capability,
    /// Ready flag toggled in the lobby.
    pub ready: bool,
    /// True for the first participant in roster order.
    pub leader: bool,
}

/// Coarse session phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum SessionPhase {
    /// Participants are gathering and toggling ready.
    #[default]
    Lobby = 0,
    /// The leader started the session; avatars are spawned.
    InSession = 1,
}
