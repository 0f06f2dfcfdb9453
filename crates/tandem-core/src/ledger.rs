//! Authority ledger.
//!
//! Records, per shared object, which participant may currently write it.
//! Owned exclusively by the session coordinator: every acquire and release
//! for an object goes through the single `&mut` borrow of the ledger, which
//! linearizes them. Two concurrent acquires for the same object can never
//! both succeed.
//!
//! # Invariants
//!
//! - At most one holder per object at any instant
//! - Only the holder may release; releases by anyone else are no-ops
//! - Objects not registered in the ledger have no holder and cannot be
//!   acquired

use std::collections::BTreeMap;

use tandem_proto::{ObjectId, ParticipantId};
use thiserror::Error;

/// Outcome of [`AuthorityLedger::try_acquire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquire {
    /// Authority moved from the coordinator to the requester.
    Granted,
    /// The requester already held it (idempotent re-acquire).
    AlreadyHeld,
    /// Someone else holds it.
    Denied {
        /// Current holder.
        holder: ParticipantId,
    },
}

impl Acquire {
    /// Whether the requester holds authority afterwards.
    pub fn is_granted(&self) -> bool {
        matches!(self, Self::Granted | Self::AlreadyHeld)
    }
}

/// Outcome of [`AuthorityLedger::release`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    /// Authority returned to the coordinator.
    Released,
    /// The caller was not the holder; nothing changed.
    NotHolder,
}

/// Errors from ledger operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// Object was never registered or was despawned.
    #[error("unknown object {0}")]
    UnknownObject(ObjectId),

    /// Object id is already in use.
    #[error("object {0} already registered")]
    AlreadyRegistered(ObjectId),
}

/// Per-object authority holders.
#[derive(Debug, Clone, Default)]
pub struct AuthorityLedger {
    holders: BTreeMap<ObjectId, Option<ParticipantId>>,
}

impl AuthorityLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered objects.
    pub fn len(&self) -> usize {
        self.holders.len()
    }

    /// Whether no objects are registered.
    pub fn is_empty(&self) -> bool {
        self.holders.is_empty()
    }

    /// Whether `object` is registered.
    pub fn contains(&self, object: ObjectId) -> bool {
        self.holders.contains_key(&object)
    }

    /// Register a spawned object with its initial holder.
    pub fn register(
        &mut self,
        object: ObjectId,
        holder: Option<ParticipantId>,
    ) -> Result<(), LedgerError> {
        if self.holders.contains_key(&object) {
            return Err(LedgerError::AlreadyRegistered(object));
        }
        self.holders.insert(object, holder);
        Ok(())
    }

    /// Forget a despawned object, returning its last holder.
    pub fn unregister(&mut self, object: ObjectId) -> Result<Option<ParticipantId>, LedgerError> {
        self.holders.remove(&object).ok_or(LedgerError::UnknownObject(object))
    }

    /// Current holder; `None` for coordinator-held or unknown objects.
    pub fn current_holder(&self, object: ObjectId) -> Option<ParticipantId> {
        self.holders.get(&object).copied().flatten()
    }

    /// Whether `participant` holds `object`.
    pub fn is_holder(&self, object: ObjectId, participant: ParticipantId) -> bool {
        self.current_holder(object) == Some(participant)
    }

    /// Try to take authority over `object`.
    ///
    /// Succeeds when the object is coordinator-held or already held by
    /// `participant`.
    pub fn try_acquire(
        &mut self,
        object: ObjectId,
        participant: ParticipantId,
    ) -> Result<Acquire, LedgerError> {
        let slot = self.holders.get_mut(&object).ok_or(LedgerError::UnknownObject(object))?;

        match *slot {
            None => {
                *slot = Some(participant);
                Ok(Acquire::Granted)
            },
            Some(holder) if holder == participant => Ok(Acquire::AlreadyHeld),
            Some(holder) => Ok(Acquire::Denied { holder }),
        }
    }

    /// Return authority over `object` to the coordinator.
    ///
    /// A release from anyone but the holder is a no-op so duplicate release
    /// retries are harmless.
    pub fn release(
        &mut self,
        object: ObjectId,
        participant: ParticipantId,
    ) -> Result<Release, LedgerError> {
        let slot = self.holders.get_mut(&object).ok_or(LedgerError::UnknownObject(object))?;

        if *slot == Some(participant) {
            *slot = None;
            Ok(Release::Released)
        } else {
            Ok(Release::NotHolder)
        }
    }

    /// Release everything `participant` holds, returning the affected objects.
    ///
    /// Used when a participant disconnects so it cannot block others.
    pub fn release_all(&mut self, participant: ParticipantId) -> Vec<ObjectId> {
        let mut released = Vec::new();
        for (object, slot) in &mut self.holders {
            if *slot == Some(participant) {
                *slot = None;
                released.push(*object);
            }
        }
        released
    }

    /// Objects currently held by `participant`.
    pub fn held_by(&self, participant: ParticipantId) -> impl Iterator<Item = ObjectId> + '_ {
        self.holders
            .iter()
            .filter(move |(_, holder)| **holder == Some(participant))
            .map(|(object, _)| *object)
    }

    /// Every registered object with its holder.
    pub fn iter(&self) -> impl Iterator<Item = (ObjectId, Option<ParticipantId>)> + '_ {
        self.holders.iter().map(|(object, holder)| (*object, *holder))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    const BALL: ObjectId = ObjectId(1);
    const A: ParticipantId = ParticipantId(10);
    const B: ParticipantId = ParticipantId(20);

    fn ledger() -> AuthorityLedger {
        let mut ledger = AuthorityLedger::new();
        ledger.register(BALL, None).unwrap();
        ledger
    }

    #[test]
    fn acquire_unowned_succeeds() {
        let mut ledger = ledger();
        assert_eq!(ledger.try_acquire(BALL, A), Ok(Acquire::Granted));
        assert_eq!(ledger.current_holder(BALL), Some(A));
    }

    #[test]
    fn acquire_is_idempotent_for_holder() {
        let mut ledger = ledger();
        ledger.try_acquire(BALL, A).unwrap();
        assert_eq!(ledger.try_acquire(BALL, A), Ok(Acquire::AlreadyHeld));
        assert!(ledger.try_acquire(BALL, A).unwrap().is_granted());
    }

    #[test]
    fn acquire_held_object_denied() {
        let mut ledger = ledger();
        ledger.try_acquire(BALL, A).unwrap();
        assert_eq!(ledger.try_acquire(BALL, B), Ok(Acquire::Denied { holder: A }));
        assert_eq!(ledger.current_holder(BALL), Some(A));
    }

    #[test]
    fn release_by_non_holder_is_noop() {
        let mut ledger = ledger();
        ledger.try_acquire(BALL, A).unwrap();

        assert_eq!(ledger.release(BALL, B), Ok(Release::NotHolder));
        assert_eq!(ledger.current_holder(BALL), Some(A));

        assert_eq!(ledger.release(BALL, A), Ok(Release::Released));
        assert_eq!(ledger.release(BALL, A), Ok(Release::NotHolder), "duplicate release");
        assert_eq!(ledger.current_holder(BALL), None);
    }

    #[test]
    fn unknown_object_is_stale() {
        let mut ledger = AuthorityLedger::new();
        assert_eq!(ledger.try_acquire(BALL, A), Err(LedgerError::UnknownObject(BALL)));
        assert_eq!(ledger.current_holder(BALL), None);
    }

    #[test]
    fn release_all_clears_only_that_participant() {
        let mut ledger = AuthorityLedger::new();
        for id in 1..=4 {
            ledger.register(ObjectId(id), None).unwrap();
        }
        ledger.try_acquire(ObjectId(1), A).unwrap();
        ledger.try_acquire(ObjectId(2), B).unwrap();
        ledger.try_acquire(ObjectId(3), A).unwrap();

        let released = ledger.release_all(A);

        assert_eq!(released, vec![ObjectId(1), ObjectId(3)]);
        assert_eq!(ledger.current_holder(ObjectId(2)), Some(B));
        assert_eq!(ledger.held_by(A).count(), 0);
    }

    #[test]
    fn orphaned_object_becomes_grantable() {
        let mut ledger = ledger();
        ledger.try_acquire(BALL, A).unwrap();
        assert!(!ledger.try_acquire(BALL, B).unwrap().is_granted());

        ledger.release_all(A);

        assert_eq!(ledger.try_acquire(BALL, B), Ok(Acquire::Granted));
    }

    #[test]
    fn register_twice_fails() {
        let mut ledger = ledger();
        assert_eq!(ledger.register(BALL, None), Err(LedgerError::AlreadyRegistered(BALL)));
    }

    #[derive(Debug, Clone)]
    enum Op {
        Acquire(u8, u8),
        Release(u8, u8),
        Leave(u8),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            4 => (0..6u8, 0..3u8).prop_map(|(p, o)| Op::Acquire(p, o)),
            3 => (0..6u8, 0..3u8).prop_map(|(p, o)| Op::Release(p, o)),
            1 => (0..6u8).prop_map(Op::Leave),
        ]
    }

    proptest! {
        /// A grant only ever goes to the recorded holder, and a second
        /// participant is never granted while the first still holds.
        #[test]
        fn prop_single_holder(ops in prop::collection::vec(op_strategy(), 0..200)) {
            let mut ledger = AuthorityLedger::new();
            let mut model: [Option<u8>; 3] = [None; 3];
            for object in 0..3 {
                ledger.register(ObjectId(object), None).unwrap();
            }

            for op in ops {
                match op {
                    Op::Acquire(p, o) => {
                        let outcome =
                            ledger.try_acquire(ObjectId(u64::from(o)), ParticipantId(u64::from(p))).unwrap();
                        let expected = model[o as usize].is_none_or(|holder| holder == p);
                        prop_assert_eq!(outcome.is_granted(), expected);
                        if expected {
                            model[o as usize] = Some(p);
                        }
                    },
                    Op::Release(p, o) => {
                        ledger.release(ObjectId(u64::from(o)), ParticipantId(u64::from(p))).unwrap();
                        if model[o as usize] == Some(p) {
                            model[o as usize] = None;
                        }
                    },
                    Op::Leave(p) => {
                        ledger.release_all(ParticipantId(u64::from(p)));
                        for slot in &mut model {
                            if *slot == Some(p) {
                                *slot = None;
                            }
                        }
                    },
                }

                for object in 0..3u8 {
                    prop_assert_eq!(
                        ledger.current_holder(ObjectId(u64::from(object))),
                        model[object as usize].map(|p| ParticipantId(u64::from(p)))
                    );
                }
            }
        }
    }
}
