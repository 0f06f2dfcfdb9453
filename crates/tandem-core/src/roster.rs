//! Session roster.
//!
//! Tracks connected participants in join order. Slot `0..N-1` of the roster
//! maps onto fixed-size lobby panels, so insertion order is preserved and
//! leaving participants close the gap.
//!
//! ## Responsibilities
//!
//! - Leader election: the first participant in roster order is the leader
//! - Readiness: `all_ready` once every participant is ready and the minimum
//!   head count is reached
//! - Notification: every mutation returns the [`RosterEvent`]s the
//!   coordinator must publish
//!
//! Authority cleanup on leave is not handled here; the coordinator releases
//! the leaving participant's objects in the ledger.

use tandem_proto::{
    Capability, DEFAULT_DISPLAY_NAME, ParticipantId, ParticipantInfo, Profile,
};
use thiserror::Error;

/// Longest accepted display name, in bytes. Keeps a full roster broadcast
/// well inside one frame.
pub const MAX_DISPLAY_NAME_LEN: usize = 64;

/// Roster limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RosterConfig {
    /// Joins beyond this are refused.
    pub max_participants: usize,
    /// Readiness requires at least this many participants.
    pub min_participants: usize,
}

impl Default for RosterConfig {
    fn default() -> Self {
        Self { max_participants: 8, min_participants: 1 }
    }
}

/// A connected participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    /// Connection identity.
    pub id: ParticipantId,
    /// Display name.
    pub display_name: String,
    /// Device capability.
    pub capability: Capability,
    /// Lobby ready flag.
    pub ready: bool,
    /// First participant in roster order.
    pub leader: bool,
    profile_set: bool,
}

impl Participant {
    fn new(id: ParticipantId, leader: bool) -> Self {
        Self {
            id,
            display_name: DEFAULT_DISPLAY_NAME.to_string(),
            capability: Capability::default(),
            ready: false,
            leader,
            profile_set: false,
        }
    }

    /// Whether the participant already sent its profile.
    pub fn has_profile(&self) -> bool {
        self.profile_set
    }

    /// Wire representation.
    pub fn info(&self) -> ParticipantInfo {
        ParticipantInfo {
            id: self.id,
            display_name: self.display_name.clone(),
            capability: self.capability,
            ready: self.ready,
            leader: self.leader,
        }
    }
}

/// Notifications produced by roster mutations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RosterEvent {
    /// Membership or a participant's fields changed.
    Changed(Vec<ParticipantInfo>),
    /// Aggregate readiness, addressed to the leader.
    ReadinessChanged {
        /// Current leader.
        leader: ParticipantId,
        /// Whether the session may start.
        all_ready: bool,
    },
}

/// Errors from roster operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RosterError {
    /// Roster is at capacity.
    #[error("session full ({max} participants)")]
    Full {
        /// Configured capacity.
        max: usize,
    },

    /// Participant already joined.
    #[error("participant {0} already joined")]
    AlreadyJoined(ParticipantId),

    /// Participant is not (or no longer) in the roster.
    #[error("unknown participant {0}")]
    UnknownParticipant(ParticipantId),

    /// Profile was already set.
    #[error("participant {0} already set a profile")]
    ProfileAlreadySet(ParticipantId),

    /// Display name longer than [`MAX_DISPLAY_NAME_LEN`] bytes.
    #[error("display name is {len} bytes, at most {max} allowed")]
    DisplayNameTooLong {
        /// Length of the refused name in bytes.
        len: usize,
        /// Allowed length in bytes.
        max: usize,
    },
}

/// Ordered set of connected participants.
#[derive(Debug, Clone, Default)]
pub struct Roster {
    participants: Vec<Participant>,
    config: RosterConfig,
}

impl Roster {
    /// Create an empty roster.
    pub fn new(config: RosterConfig) -> Self {
        Self { participants: Vec::new(), config }
    }

    /// Number of participants.
    pub fn len(&self) -> usize {
        self.participants.len()
    }

    /// Whether nobody is connected.
    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    /// Whether `id` is in the roster.
    pub fn contains(&self, id: ParticipantId) -> bool {
        self.position(id).is_some()
    }

    /// Look up a participant.
    pub fn get(&self, id: ParticipantId) -> Option<&Participant> {
        self.participants.iter().find(|p| p.id == id)
    }

    /// Current leader.
    pub fn leader(&self) -> Option<&Participant> {
        self.participants.iter().find(|p| p.leader)
    }

    /// Participants in join order.
    pub fn iter(&self) -> impl Iterator<Item = &Participant> {
        self.participants.iter()
    }

    /// Wire representation in join order.
    pub fn infos(&self) -> Vec<ParticipantInfo> {
        self.participants.iter().map(Participant::info).collect()
    }

    /// Fixed-size panel view: slot `i` holds the `i`-th participant or `None`.
    pub fn slots(&self, count: usize) -> Vec<Option<&Participant>> {
        (0..count).map(|i| self.participants.get(i)).collect()
    }

    /// Every participant ready and the minimum head count reached.
    pub fn is_ready_to_start(&self) -> bool {
        self.participants.len() >= self.config.min_participants
            && self.participants.iter().all(|p| p.ready)
    }

    /// Register a participant. The first one becomes leader.
    pub fn join(&mut self, id: ParticipantId) -> Result<Vec<RosterEvent>, RosterError> {
        if self.contains(id) {
            return Err(RosterError::AlreadyJoined(id));
        }
        if self.participants.len() >= self.config.max_participants {
            return Err(RosterError::Full { max: self.config.max_participants });
        }

        let leader = self.participants.is_empty();
        self.participants.push(Participant::new(id, leader));
        tracing::debug!(participant = %id, leader, "participant joined roster");

        Ok(self.changed())
    }

    /// Remove a participant.
    ///
    /// Returns `None` for unknown participants (removals race with other
    /// traffic, so this is not an error). When the leader leaves, the next
    /// participant in roster order takes over.
    pub fn leave(&mut self, id: ParticipantId) -> Option<(Participant, Vec<RosterEvent>)> {
        let index = self.position(id)?;
        let removed = self.participants.remove(index);

        if removed.leader {
            if let Some(next) = self.participants.first_mut() {
                next.leader = true;
                tracing::info!(participant = %next.id, "leadership passed on");
            }
        }

        tracing::debug!(participant = %id, "participant left roster");
        Some((removed, self.changed()))
    }

    /// Set display name and capability. Accepted once per participant.
    pub fn set_profile(
        &mut self,
        id: ParticipantId,
        profile: Profile,
    ) -> Result<Vec<RosterEvent>, RosterError> {
        let participant = self.get_mut(id)?;
        if participant.profile_set {
            return Err(RosterError::ProfileAlreadySet(id));
        }
        let len = profile.display_name.len();
        if len > MAX_DISPLAY_NAME_LEN {
            return Err(RosterError::DisplayNameTooLong { len, max: MAX_DISPLAY_NAME_LEN });
        }

        participant.display_name = profile.display_name;
        participant.capability = profile.capability;
        participant.profile_set = true;

        Ok(self.changed())
    }

    /// Set the ready flag and re-evaluate readiness.
    pub fn set_ready(
        &mut self,
        id: ParticipantId,
        ready: bool,
    ) -> Result<Vec<RosterEvent>, RosterError> {
        self.get_mut(id)?.ready = ready;
        Ok(self.changed())
    }

    /// Flip the ready flag and re-evaluate readiness.
    pub fn toggle_ready(&mut self, id: ParticipantId) -> Result<Vec<RosterEvent>, RosterError> {
        let participant = self.get_mut(id)?;
        participant.ready = !participant.ready;
        Ok(self.changed())
    }

    fn position(&self, id: ParticipantId) -> Option<usize> {
        self.participants.iter().position(|p| p.id == id)
    }

    fn get_mut(&mut self, id: ParticipantId) -> Result<&mut Participant, RosterError> {
        self.participants
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or(RosterError::UnknownParticipant(id))
    }

    fn changed(&self) -> Vec<RosterEvent> {
        let mut events = vec![RosterEvent::Changed(self.infos())];
        if let Some(leader) = self.leader() {
            events.push(RosterEvent::ReadinessChanged {
                leader: leader.id,
                all_ready: self.is_ready_to_start(),
            });
        }
        events
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const A: ParticipantId = ParticipantId(1);
    const B: ParticipantId = ParticipantId(2);
    const C: ParticipantId = ParticipantId(3);

    fn roster() -> Roster {
        Roster::new(RosterConfig { max_participants: 4, min_participants: 2 })
    }

    fn readiness(events: &[RosterEvent]) -> Option<bool> {
        events.iter().find_map(|e| match e {
            RosterEvent::ReadinessChanged { all_ready, .. } => Some(*all_ready),
            RosterEvent::Changed(_) => None,
        })
    }

    #[test]
    fn first_participant_leads() {
        let mut roster = roster();
        roster.join(A).unwrap();
        roster.join(B).unwrap();

        assert!(roster.get(A).unwrap().leader);
        assert!(!roster.get(B).unwrap().leader);
        assert_eq!(roster.leader().map(|p| p.id), Some(A));
    }

    #[test]
    fn join_broadcasts_roster() {
        let mut roster = roster();
        let events = roster.join(A).unwrap();

        match &events[0] {
            RosterEvent::Changed(infos) => {
                assert_eq!(infos.len(), 1);
                assert_eq!(infos[0].display_name, DEFAULT_DISPLAY_NAME);
            },
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn duplicate_join_rejected() {
        let mut roster = roster();
        roster.join(A).unwrap();
        assert_eq!(roster.join(A), Err(RosterError::AlreadyJoined(A)));
    }

    #[test]
    fn full_roster_rejects() {
        let mut roster = Roster::new(RosterConfig { max_participants: 1, min_participants: 1 });
        roster.join(A).unwrap();
        assert_eq!(roster.join(B), Err(RosterError::Full { max: 1 }));
    }

    #[test]
    fn insertion_order_preserved_across_leave() {
        let mut roster = roster();
        roster.join(A).unwrap();
        roster.join(B).unwrap();
        roster.join(C).unwrap();

        roster.leave(B).unwrap();

        let slots: Vec<_> = roster.slots(4).into_iter().map(|s| s.map(|p| p.id)).collect();
        assert_eq!(slots, vec![Some(A), Some(C), None, None]);
    }

    #[test]
    fn leader_leaving_promotes_next() {
        let mut roster = roster();
        roster.join(A).unwrap();
        roster.join(B).unwrap();

        let (removed, _) = roster.leave(A).unwrap();
        assert!(removed.leader);
        assert!(roster.get(B).unwrap().leader);
    }

    #[test]
    fn leave_unknown_is_noop() {
        let mut roster = roster();
        assert!(roster.leave(A).is_none());
    }

    #[test]
    fn readiness_requires_minimum_and_everyone() {
        let mut roster = roster();
        roster.join(A).unwrap();

        let events = roster.set_ready(A, true).unwrap();
        assert_eq!(readiness(&events), Some(false), "below minimum head count");

        roster.join(B).unwrap();
        let events = roster.toggle_ready(B).unwrap();
        assert_eq!(readiness(&events), Some(true));

        let events = roster.toggle_ready(A).unwrap();
        assert_eq!(readiness(&events), Some(false));
    }

    #[test]
    fn readiness_addressed_to_leader() {
        let mut roster = roster();
        roster.join(A).unwrap();
        let events = roster.join(B).unwrap();

        assert!(events.iter().any(|e| matches!(
            e,
            RosterEvent::ReadinessChanged { leader, .. } if *leader == A
        )));
    }

    #[test]
    fn profile_set_once() {
        let mut roster = roster();
        roster.join(A).unwrap();

        roster.set_profile(A, Profile::new("ada", Capability::Vr)).unwrap();
        let second = roster.set_profile(A, Profile::new("eve", Capability::Desktop));

        assert_eq!(second, Err(RosterError::ProfileAlreadySet(A)));
        let participant = roster.get(A).unwrap();
        assert_eq!(participant.display_name, "ada");
        assert_eq!(participant.capability, Capability::Vr);
        assert!(participant.has_profile());
    }

    #[test]
    fn oversized_display_name_is_refused() {
        let mut roster = roster();
        roster.join(A).unwrap();

        let name = "x".repeat(MAX_DISPLAY_NAME_LEN + 1);
        assert_eq!(
            roster.set_profile(A, Profile::new(name, Capability::Vr)),
            Err(RosterError::DisplayNameTooLong { len: MAX_DISPLAY_NAME_LEN + 1, max: MAX_DISPLAY_NAME_LEN })
        );
        assert!(!roster.get(A).unwrap().has_profile());

        let name = "x".repeat(MAX_DISPLAY_NAME_LEN);
        assert!(roster.set_profile(A, Profile::new(name, Capability::Vr)).is_ok());
    }

    #[test]
    fn ready_for_unknown_participant_fails() {
        let mut roster = roster();
        assert_eq!(roster.set_ready(A, true), Err(RosterError::UnknownParticipant(A)));
    }
}
