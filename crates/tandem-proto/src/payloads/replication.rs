//! Persistent replicated state.
//!
//! A shared object has three persistent fields: `grabbed`, `active` and its
//! transform. Values are carried as [`FieldValue`], which pairs the field key
//! with a value of the right type so the two can never disagree.

use serde::{Deserialize, Serialize};

use crate::{
    ids::{ObjectId, ParticipantId},
    payloads::session::Capability,
};

/// Coordinator-assigned per-object revision.
///
/// Bumped on every accepted state write and every authority change. Receivers
/// discard object messages that are not newer than what they already applied,
/// which keeps replicas correct when the transport reorders messages.
pub type Revision = u64;

/// Position and orientation.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Transform {
    /// World-space position.
    pub position: [f32; 3],
    /// Orientation quaternion `(x, y, z, w)`.
    pub rotation: [f32; 4],
}

impl Transform {
    /// Identity rotation at the origin.
    pub const IDENTITY: Self = Self { position: [0.0; 3], rotation: [0.0, 0.0, 0.0, 1.0] };

    /// Identity rotation at `position`.
    pub fn at(position: [f32; 3]) -> Self {
        Self { position, ..Self::IDENTITY }
    }

    /// Whether every component is a finite number.
    pub fn is_finite(&self) -> bool {
        self.position.iter().chain(&self.rotation).all(|component| component.is_finite())
    }
}

/// Key of a persistent field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Field {
    /// Whether someone is holding the object.
    Grabbed,
    /// Whether the object is switched on.
    Active,
    /// Position and orientation.
    Transform,
}

/// A persistent field together with its value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    /// Value of [`Field::Grabbed`].
    Grabbed(bool),
    /// Value of [`Field::Active`].
    Active(bool),
    /// Value of [`Field::Transform`].
    Transform(Transform),
}

impl FieldValue {
    /// The field this value belongs to.
    pub fn field(&self) -> Field {
        match self {
            Self::Grabbed(_) => Field::Grabbed,
            Self::Active(_) => Field::Active,
            Self::Transform(_) => Field::Transform,
        }
    }

    /// False for transforms carrying NaN or infinity. Such values never
    /// compare equal to themselves, so they are refused before replication.
    pub fn is_finite(&self) -> bool {
        match self {
            Self::Grabbed(_) | Self::Active(_) => true,
            Self::Transform(transform) => transform.is_finite(),
        }
    }
}

/// What a shared object represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectKind {
    /// Scene prop anyone may grab.
    Prop,
    /// A participant's avatar, spawned with that participant as holder.
    Avatar {
        /// Participant the avatar represents.
        owner: ParticipantId,
        /// Device of the owner, selects the avatar rig.
        capability: Capability,
    },
}

/// Full state of one shared object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectSnapshot {
    /// Object identity.
    pub object: ObjectId,
    /// What the object represents.
    pub kind: ObjectKind,
    /// Current authority holder, `None` when held by the coordinator.
    pub holder: Option<ParticipantId>,
    /// Revision this snapshot was taken at.
    pub revision: Revision,
    /// Every persistent field.
    pub fields: Vec<FieldValue>,
}

impl ObjectSnapshot {
    /// Look up a field value.
    pub fn get(&self, field: Field) -> Option<&FieldValue> {
        self.fields.iter().find(|value| value.field() == field)
    }
}
