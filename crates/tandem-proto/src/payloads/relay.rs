//! Transient trigger events.
//!
//! Triggers are one-shot animation cues. Unlike persistent fields they are
//! never coalesced: every enqueued event is delivered in order, or the whole
//! batch is lost.

use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};

/// Animation channel a trigger targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum HandChannel {
    /// Left hand animator.
    LeftHand = 0,
    /// Right hand animator.
    RightHand = 1,
}

/// A single animation trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerEvent {
    /// Target animator.
    pub channel: HandChannel,
    /// Name of the animator transition.
    pub transition: String,
    /// Reset the trigger instead of firing it.
    pub reset: bool,
}

impl TriggerEvent {
    /// Fire `transition` on `channel`.
    pub fn fire(channel: HandChannel, transition: impl Into<String>) -> Self {
        Self { channel, transition: transition.into(), reset: false }
    }

    /// Reset `transition` on `channel`.
    pub fn reset(channel: HandChannel, transition: impl Into<String>) -> Self {
        Self { channel, transition: transition.into(), reset: true }
    }
}
