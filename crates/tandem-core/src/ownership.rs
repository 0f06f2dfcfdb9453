//! Ownership transfer protocol, participant side.
//!
//! Each participant runs one small state machine per object it cares about:
//!
//! ```text
//!            begin_acquire            granted
//! Unowned ─────────────────▶ AcquirePending ───────▶ Owned
//!    ▲                         │  denied / timeout      │
//!    └─────────────────────────┘                        │ begin_release
//!    ▲                                                  ▼
//!    └──────────────────────────────────────────── ReleasePending
//!                 confirmed / timeout
//! ```
//!
//! The tracker is pure: it never sends anything. The caller sends the
//! request messages and feeds grants, denials, confirmations and clock
//! readings back in.
//!
//! # Invariants
//!
//! - Replicated fields may only be written in `Owned`
//! - Every pending state carries the `RequestId` it waits for; replies with
//!   any other id are stale and never cause a transition
//! - A pending state always resolves, at the latest when its deadline passes

use std::{
    collections::BTreeMap,
    time::{Duration, Instant},
};

use tandem_proto::{ObjectId, RequestId};
use thiserror::Error;

/// Per-object ownership state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OwnershipState {
    /// No authority and no request in flight.
    #[default]
    Unowned,
    /// Acquire sent, waiting for grant or denial.
    AcquirePending {
        /// Request awaiting a reply.
        request_id: RequestId,
        /// When the request times out.
        deadline: Instant,
    },
    /// Authority held; writes are allowed.
    Owned,
    /// Final state and release sent, waiting for confirmation.
    ReleasePending {
        /// Request awaiting a reply.
        request_id: RequestId,
        /// When the request times out.
        deadline: Instant,
    },
}

/// Invalid transition requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum OwnershipError {
    /// A request for this object is already in flight.
    #[error("request for {0} already pending")]
    Pending(ObjectId),

    /// Authority is already held.
    #[error("{0} is already owned")]
    AlreadyOwned(ObjectId),

    /// Authority is not held.
    #[error("{0} is not owned")]
    NotOwned(ObjectId),
}

/// Result of feeding a grant into the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantOutcome {
    /// The pending acquire completed; the object is now owned.
    Accepted,
    /// Nothing is pending for the object (the request timed out). The
    /// caller holds authority it no longer wants: [`OwnershipTracker::adopt`]
    /// it and release it again.
    Unsolicited,
    /// A newer request is in flight, or the object is already owned or being
    /// released. The grant carries no new information.
    Stale,
}

/// Which kind of request expired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingKind {
    /// An acquire.
    Acquire,
    /// A release.
    Release,
}

/// A request whose deadline passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Expired {
    /// Target object.
    pub object: ObjectId,
    /// The request that expired.
    pub request_id: RequestId,
    /// Acquire or release.
    pub kind: PendingKind,
}

/// Ownership state machines for every object a participant touched.
#[derive(Debug, Clone)]
pub struct OwnershipTracker {
    states: BTreeMap<ObjectId, OwnershipState>,
    next_request: u64,
}

impl Default for OwnershipTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl OwnershipTracker {
    /// Create a tracker with everything unowned.
    pub fn new() -> Self {
        Self { states: BTreeMap::new(), next_request: 1 }
    }

    /// State of `object`.
    pub fn state(&self, object: ObjectId) -> OwnershipState {
        self.states.get(&object).copied().unwrap_or_default()
    }

    /// Whether writes to `object` are allowed.
    pub fn is_owned(&self, object: ObjectId) -> bool {
        self.state(object) == OwnershipState::Owned
    }

    /// Objects currently owned.
    pub fn owned(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.states
            .iter()
            .filter(|(_, state)| **state == OwnershipState::Owned)
            .map(|(object, _)| *object)
    }

    /// `Unowned -> AcquirePending`. Returns the id to put on the request.
    pub fn begin_acquire(
        &mut self,
        object: ObjectId,
        now: Instant,
        timeout: Duration,
    ) -> Result<RequestId, OwnershipError> {
        match self.state(object) {
            OwnershipState::Unowned => {
                let request_id = self.allocate();
                self.states.insert(
                    object,
                    OwnershipState::AcquirePending { request_id, deadline: now + timeout },
                );
                Ok(request_id)
            },
            OwnershipState::Owned => Err(OwnershipError::AlreadyOwned(object)),
            OwnershipState::AcquirePending { .. } | OwnershipState::ReleasePending { .. } => {
                Err(OwnershipError::Pending(object))
            },
        }
    }

    /// `AcquirePending --granted--> Owned`.
    pub fn on_granted(&mut self, object: ObjectId, request_id: RequestId) -> GrantOutcome {
        match self.state(object) {
            OwnershipState::AcquirePending { request_id: pending, .. } if pending == request_id => {
                self.states.insert(object, OwnershipState::Owned);
                GrantOutcome::Accepted
            },
            OwnershipState::Unowned => GrantOutcome::Unsolicited,
            _ => GrantOutcome::Stale,
        }
    }

    /// `Unowned -> Owned` without a request.
    ///
    /// Used when the coordinator assigns authority on its own (avatar spawn)
    /// or when an unsolicited grant must be handed back. Returns `false` if
    /// the object was not unowned.
    pub fn adopt(&mut self, object: ObjectId) -> bool {
        if self.state(object) != OwnershipState::Unowned {
            return false;
        }
        self.states.insert(object, OwnershipState::Owned);
        true
    }

    /// `AcquirePending --denied--> Unowned`. Returns whether it matched.
    pub fn on_denied(&mut self, object: ObjectId, request_id: RequestId) -> bool {
        match self.state(object) {
            OwnershipState::AcquirePending { request_id: pending, .. } if pending == request_id => {
                self.states.remove(&object);
                true
            },
            _ => false,
        }
    }

    /// `Owned -> ReleasePending`. The caller must send the final state in the
    /// same message as the release.
    pub fn begin_release(
        &mut self,
        object: ObjectId,
        now: Instant,
        timeout: Duration,
    ) -> Result<RequestId, OwnershipError> {
        match self.state(object) {
            OwnershipState::Owned => {
                let request_id = self.allocate();
                self.states.insert(
                    object,
                    OwnershipState::ReleasePending { request_id, deadline: now + timeout },
                );
                Ok(request_id)
            },
            OwnershipState::Unowned => Err(OwnershipError::NotOwned(object)),
            OwnershipState::AcquirePending { .. } | OwnershipState::ReleasePending { .. } => {
                Err(OwnershipError::Pending(object))
            },
        }
    }

    /// `ReleasePending --confirmed--> Unowned`. Returns whether it matched.
    pub fn on_release_confirmed(&mut self, object: ObjectId, request_id: RequestId) -> bool {
        match self.state(object) {
            OwnershipState::ReleasePending { request_id: pending, .. } if pending == request_id => {
                self.states.remove(&object);
                true
            },
            _ => false,
        }
    }

    /// Drop all state for `object` (despawned or authority revoked).
    pub fn forget(&mut self, object: ObjectId) -> OwnershipState {
        self.states.remove(&object).unwrap_or_default()
    }

    /// Resolve every request whose deadline is at or before `now`.
    pub fn expire(&mut self, now: Instant) -> Vec<Expired> {
        let mut expired = Vec::new();
        self.states.retain(|object, state| match *state {
            OwnershipState::AcquirePending { request_id, deadline } if deadline <= now => {
                expired.push(Expired { object: *object, request_id, kind: PendingKind::Acquire });
                false
            },
            OwnershipState::ReleasePending { request_id, deadline } if deadline <= now => {
                expired.push(Expired { object: *object, request_id, kind: PendingKind::Release });
                false
            },
            _ => true,
        });
        expired
    }

    /// Forget everything (connection lost). Returns the prior states.
    pub fn reset(&mut self) -> Vec<(ObjectId, OwnershipState)> {
        std::mem::take(&mut self.states).into_iter().collect()
    }

    fn allocate(&mut self) -> RequestId {
        let id = RequestId(self.next_request);
        self.next_request += 1;
        id
    }
}
