//! Capability strategies.
//!
//! A participant is a single type carrying a [`Capability`] tag. Behaviour
//! that differs between VR and desktop participants is looked up through
//! [`profile_for`] instead of living in subclasses.

use tandem_proto::{Capability, FieldValue, HandChannel, Transform};

/// Behaviour that depends on the participant's device.
pub trait CapabilityProfile: Send + Sync {
    /// Capability this profile describes.
    fn capability(&self) -> Capability;

    /// Avatar rig spawned for the participant.
    fn avatar_template(&self) -> &'static str;

    /// Whether the device animates `channel`.
    fn drives_channel(&self, channel: HandChannel) -> bool;

    /// Persistent fields a freshly spawned avatar starts with.
    fn initial_avatar_fields(&self) -> Vec<FieldValue> {
        vec![
            FieldValue::Grabbed(false),
            FieldValue::Active(true),
            FieldValue::Transform(Transform::IDENTITY),
        ]
    }
}

/// Head-mounted display with two tracked hands.
#[derive(Debug, Clone, Copy, Default)]
pub struct VrCapable;

impl CapabilityProfile for VrCapable {
    fn capability(&self) -> Capability {
        Capability::Vr
    }

    fn avatar_template(&self) -> &'static str {
        "vr-rig"
    }

    fn drives_channel(&self, _channel: HandChannel) -> bool {
        true
    }
}

/// Desktop participant without tracked hands.
#[derive(Debug, Clone, Copy, Default)]
pub struct DesktopOnly;

impl CapabilityProfile for DesktopOnly {
    fn capability(&self) -> Capability {
        Capability::Desktop
    }

    fn avatar_template(&self) -> &'static str {
        "desktop-player"
    }

    fn drives_channel(&self, _channel: HandChannel) -> bool {
        false
    }

    fn initial_avatar_fields(&self) -> Vec<FieldValue> {
        // Desktop players stand at eye height without a head tracker
        vec![
            FieldValue::Grabbed(false),
            FieldValue::Active(true),
            FieldValue::Transform(Transform::at([0.0, 1.7, 0.0])),
        ]
    }
}

/// Strategy for `capability`.
pub fn profile_for(capability: Capability) -> &'static dyn CapabilityProfile {
    match capability {
        Capability::Vr => &VrCapable,
        Capability::Desktop => &DesktopOnly,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profiles_match_capability() {
        assert_eq!(profile_for(Capability::Vr).capability(), Capability::Vr);
        assert_eq!(profile_for(Capability::Desktop).capability(), Capability::Desktop);
    }

    #[test]
    fn only_vr_drives_hands() {
        assert!(profile_for(Capability::Vr).drives_channel(HandChannel::LeftHand));
        assert!(!profile_for(Capability::Desktop).drives_channel(HandChannel::RightHand));
    }

    #[test]
    fn desktop_avatar_starts_at_eye_height() {
        let fields = profile_for(Capability::Desktop).initial_avatar_fields();
        assert!(fields.contains(&FieldValue::Transform(Transform::at([0.0, 1.7, 0.0]))));
    }
}
