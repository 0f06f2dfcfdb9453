//! Connection registry.
//!
//! Tracks every open connection from accept to close, independent of whether
//! the participant has completed the `Hello` handshake. The driver uses it
//! for handshake gating and idle detection.

use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use tandem_proto::ParticipantId;

/// Bookkeeping for one open connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// When the connection was accepted.
    pub connected_at: Instant,
    /// Last time anything arrived on it.
    pub last_seen: Instant,
    /// Whether the handshake completed and the participant is in the roster.
    pub joined: bool,
}

/// Open connections keyed by participant.
#[derive(Debug, Clone, Default)]
pub struct ConnectionRegistry {
    connections: HashMap<ParticipantId, ConnectionInfo>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of open connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Whether there are no open connections.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Whether `participant` has an open connection.
    pub fn contains(&self, participant: ParticipantId) -> bool {
        self.connections.contains_key(&participant)
    }

    /// Connection details.
    pub fn get(&self, participant: ParticipantId) -> Option<&ConnectionInfo> {
        self.connections.get(&participant)
    }

    /// Record a new connection. Returns `false` if the id is already in use.
    pub fn insert(&mut self, participant: ParticipantId, now: Instant) -> bool {
        if self.connections.contains_key(&participant) {
            return false;
        }
        self.connections
            .insert(participant, ConnectionInfo { connected_at: now, last_seen: now, joined: false });
        true
    }

    /// Forget a connection, returning its last state.
    pub fn remove(&mut self, participant: ParticipantId) -> Option<ConnectionInfo> {
        self.connections.remove(&participant)
    }

    /// Record activity. Unknown participants are ignored.
    pub fn touch(&mut self, participant: ParticipantId, now: Instant) {
        if let Some(info) = self.connections.get_mut(&participant) {
            info.last_seen = info.last_seen.max(now);
        }
    }

    /// Mark the handshake complete.
    pub fn mark_joined(&mut self, participant: ParticipantId) {
        if let Some(info) = self.connections.get_mut(&participant) {
            info.joined = true;
        }
    }

    /// Whether `participant` completed the handshake.
    pub fn is_joined(&self, participant: ParticipantId) -> bool {
        self.connections.get(&participant).is_some_and(|info| info.joined)
    }

    /// Connections silent for at least `timeout`, sorted for deterministic
    /// processing.
    pub fn idle(&self, now: Instant, timeout: Duration) -> Vec<ParticipantId> {
        let mut idle: Vec<ParticipantId> = self
            .connections
            .iter()
            .filter(|(_, info)| now.saturating_duration_since(info.last_seen) >= timeout)
            .map(|(participant, _)| *participant)
            .collect();
        idle.sort_unstable();
        idle
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const A: ParticipantId = ParticipantId(1);
    const B: ParticipantId = ParticipantId(2);

    #[test]
    fn insert_rejects_duplicate() {
        let now = Instant::now();
        let mut registry = ConnectionRegistry::new();

        assert!(registry.insert(A, now));
        assert!(!registry.insert(A, now));
        assert_eq!(registry.len(), 1);
        assert!(!registry.is_joined(A));
    }

    #[test]
    fn idle_respects_touch() {
        let start = Instant::now();
        let timeout = Duration::from_secs(30);
        let mut registry = ConnectionRegistry::new();
        registry.insert(A, start);
        registry.insert(B, start);

        registry.touch(B, start + Duration::from_secs(20));

        let later = start + Duration::from_secs(31);
        assert_eq!(registry.idle(later, timeout), vec![A]);
        assert!(registry.idle(start + Duration::from_secs(10), timeout).is_empty());
    }

    #[test]
    fn remove_returns_state() {
        let now = Instant::now();
        let mut registry = ConnectionRegistry::new();
        registry.insert(A, now);
        registry.mark_joined(A);

        let info = registry.remove(A).unwrap();
        assert!(info.joined);
        assert_eq!(info.connected_at, now);
        assert!(registry.is_empty());
    }
}
