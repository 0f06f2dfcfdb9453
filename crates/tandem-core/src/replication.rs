//! Replicated state channel.
//!
//! Two halves:
//!
//! - [`PendingWrites`]: the writer's outbound buffer. Writes are coalesced
//!   per field until the next tick, so only the latest value of a field is
//!   ever sent (last-write-wins).
//! - [`ReplicaStore`]: the receiver's applied state. Applying a value only
//!   reports a [`FieldChange`] when it differs from what was applied before,
//!   so redelivery of the same value never re-fires a change hook.
//!
//! Participants use both. The coordinator keeps a `ReplicaStore` as the
//! authoritative copy and replicates whole objects, so a receiver that
//! skips a stale revision never misses a field.

use std::collections::{BTreeMap, HashMap};

use tandem_proto::{Field, FieldValue, ObjectId, ObjectSnapshot, Revision};

/// Outbound writes awaiting the next replication tick.
#[derive(Debug, Clone, Default)]
pub struct PendingWrites {
    objects: BTreeMap<ObjectId, BTreeMap<Field, FieldValue>>,
}

impl PendingWrites {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a write, replacing any earlier write of the same field.
    pub fn publish(&mut self, object: ObjectId, value: FieldValue) {
        self.objects.entry(object).or_default().insert(value.field(), value);
    }

    /// Whether nothing is waiting.
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Remove and return the writes for one object.
    pub fn take(&mut self, object: ObjectId) -> Vec<FieldValue> {
        self.objects.remove(&object).map(|fields| fields.into_values().collect()).unwrap_or_default()
    }

    /// Remove and return everything, grouped by object.
    pub fn drain(&mut self) -> Vec<(ObjectId, Vec<FieldValue>)> {
        std::mem::take(&mut self.objects)
            .into_iter()
            .map(|(object, fields)| (object, fields.into_values().collect()))
            .collect()
    }

    /// Drop the writes for one object without sending them.
    pub fn discard(&mut self, object: ObjectId) {
        self.objects.remove(&object);
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        self.objects.clear();
    }
}

/// A value that differs from the previously applied one.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldChange {
    /// Object the field belongs to.
    pub object: ObjectId,
    /// Newly applied value.
    pub value: FieldValue,
    /// Value it replaced, `None` on first application.
    pub previous: Option<FieldValue>,
}

#[derive(Debug, Clone, Default)]
struct Replica {
    fields: BTreeMap<Field, FieldValue>,
    revision: Revision,
}

impl Replica {
    fn apply(&mut self, object: ObjectId, value: FieldValue) -> Option<FieldChange> {
        let previous = self.fields.insert(value.field(), value);
        if previous == Some(value) {
            return None;
        }
        Some(FieldChange { object, value, previous })
    }
}

/// Applied state of every known object.
#[derive(Debug, Clone, Default)]
pub struct ReplicaStore {
    objects: HashMap<ObjectId, Replica>,
}

impl ReplicaStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `object` is known.
    pub fn contains(&self, object: ObjectId) -> bool {
        self.objects.contains_key(&object)
    }

    /// Number of known objects.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether no objects are known.
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Start tracking `object` at `revision` with no field values.
    pub fn insert(&mut self, object: ObjectId, revision: Revision) {
        self.objects.entry(object).or_insert_with(|| Replica { fields: BTreeMap::new(), revision });
    }

    /// Stop tracking `object`.
    pub fn remove(&mut self, object: ObjectId) -> bool {
        self.objects.remove(&object).is_some()
    }

    /// Current value of one field.
    pub fn get(&self, object: ObjectId, field: Field) -> Option<FieldValue> {
        self.objects.get(&object).and_then(|r| r.fields.get(&field).copied())
    }

    /// Every field value of `object`, ordered by field.
    pub fn fields(&self, object: ObjectId) -> Vec<FieldValue> {
        self.objects.get(&object).map(|r| r.fields.values().copied().collect()).unwrap_or_default()
    }

    /// Last revision applied for `object`.
    pub fn revision(&self, object: ObjectId) -> Option<Revision> {
        self.objects.get(&object).map(|r| r.revision)
    }

    /// Increment and return the revision of `object`.
    pub fn bump_revision(&mut self, object: ObjectId) -> Option<Revision> {
        let replica = self.objects.get_mut(&object)?;
        replica.revision += 1;
        Some(replica.revision)
    }

    /// Record `revision` if it is newer than the one applied.
    ///
    /// Returns `false` (and changes nothing) for stale or unknown objects.
    pub fn observe_revision(&mut self, object: ObjectId, revision: Revision) -> bool {
        match self.objects.get_mut(&object) {
            Some(replica) if revision > replica.revision => {
                replica.revision = revision;
                true
            },
            _ => false,
        }
    }

    /// Apply one value without a revision check (local writes, authoritative
    /// store). Unknown objects are ignored.
    pub fn apply(&mut self, object: ObjectId, value: FieldValue) -> Option<FieldChange> {
        self.objects.get_mut(&object)?.apply(object, value)
    }

    /// Apply several values without a revision check.
    pub fn apply_all(
        &mut self,
        object: ObjectId,
        values: impl IntoIterator<Item = FieldValue>,
    ) -> Vec<FieldChange> {
        let Some(replica) = self.objects.get_mut(&object) else {
            return Vec::new();
        };
        values.into_iter().filter_map(|value| replica.apply(object, value)).collect()
    }

    /// Apply values carried at `revision`, ignoring stale deliveries.
    ///
    /// Returns `None` when the delivery is not newer than the applied
    /// revision (or the object is unknown), otherwise the changes it caused.
    pub fn apply_remote(
        &mut self,
        object: ObjectId,
        revision: Revision,
        values: impl IntoIterator<Item = FieldValue>,
    ) -> Option<Vec<FieldChange>> {
        if !self.observe_revision(object, revision) {
            return None;
        }
        Some(self.apply_all(object, values))
    }

    /// Load a snapshot: track the object if needed and apply its fields at
    /// the snapshot revision. Returns `None` if the snapshot is stale.
    pub fn load(&mut self, snapshot: &ObjectSnapshot) -> Option<Vec<FieldChange>> {
        match self.objects.get(&snapshot.object) {
            Some(replica) if snapshot.revision < replica.revision => return None,
            Some(_) => {},
            None => self.insert(snapshot.object, snapshot.revision),
        }

        if let Some(replica) = self.objects.get_mut(&snapshot.object) {
            replica.revision = snapshot.revision;
        }
        Some(self.apply_all(snapshot.object, snapshot.fields.iter().copied()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use proptest::prelude::*;
    use tandem_proto::{ObjectKind, Transform};

    use super::*;

    const BALL: ObjectId = ObjectId(1);

    #[test]
    fn pending_writes_coalesce() {
        let mut writes = PendingWrites::new();
        writes.publish(BALL, FieldValue::Grabbed(true));
        writes.publish(BALL, FieldValue::Grabbed(false));
        writes.publish(BALL, FieldValue::Grabbed(true));
        writes.publish(BALL, FieldValue::Active(false));

        let drained = writes.drain();
        assert_eq!(
            drained,
            vec![(BALL, vec![FieldValue::Grabbed(true), FieldValue::Active(false)])]
        );
        assert!(writes.is_empty());
    }

    #[test]
    fn take_only_removes_one_object() {
        let mut writes = PendingWrites::new();
        writes.publish(BALL, FieldValue::Grabbed(true));
        writes.publish(ObjectId(2), FieldValue::Active(true));

        assert_eq!(writes.take(BALL), vec![FieldValue::Grabbed(true)]);
        assert!(writes.take(BALL).is_empty());
        assert_eq!(writes.drain(), vec![(ObjectId(2), vec![FieldValue::Active(true)])]);
    }

    #[test]
    fn apply_is_equality_gated() {
        let mut store = ReplicaStore::new();
        store.insert(BALL, 0);

        let first = store.apply(BALL, FieldValue::Grabbed(true)).unwrap();
        assert_eq!(first.previous, None);

        assert!(store.apply(BALL, FieldValue::Grabbed(true)).is_none(), "redundant value");

        let change = store.apply(BALL, FieldValue::Grabbed(false)).unwrap();
        assert_eq!(change.previous, Some(FieldValue::Grabbed(true)));
    }

    #[test]
    fn unknown_object_is_ignored() {
        let mut store = ReplicaStore::new();
        assert!(store.apply(BALL, FieldValue::Active(true)).is_none());
        assert!(store.apply_remote(BALL, 5, [FieldValue::Active(true)]).is_none());
    }

    #[test]
    fn stale_revision_rejected() {
        let mut store = ReplicaStore::new();
        store.insert(BALL, 0);

        let changes = store.apply_remote(BALL, 3, [FieldValue::Grabbed(true)]).unwrap();
        assert_eq!(changes.len(), 1);

        assert!(store.apply_remote(BALL, 2, [FieldValue::Grabbed(false)]).is_none());
        assert!(store.apply_remote(BALL, 3, [FieldValue::Grabbed(false)]).is_none());
        assert_eq!(store.get(BALL, Field::Grabbed), Some(FieldValue::Grabbed(true)));
    }

    #[test]
    fn load_snapshot_fires_changes_once() {
        let mut store = ReplicaStore::new();
        let snapshot = ObjectSnapshot {
            object: BALL,
            kind: ObjectKind::Prop,
            holder: None,
            revision: 4,
            fields: vec![
                FieldValue::Grabbed(false),
                FieldValue::Active(true),
                FieldValue::Transform(Transform::IDENTITY),
            ],
        };

        assert_eq!(store.load(&snapshot).unwrap().len(), 3);
        assert_eq!(store.load(&snapshot).unwrap().len(), 0, "same snapshot again");
        assert_eq!(store.revision(BALL), Some(4));
    }

    #[test]
    fn bump_revision_counts_up() {
        let mut store = ReplicaStore::new();
        store.insert(BALL, 0);
        assert_eq!(store.bump_revision(BALL), Some(1));
        assert_eq!(store.bump_revision(BALL), Some(2));
        assert_eq!(store.bump_revision(ObjectId(99)), None);
    }

    proptest! {
        /// Applying the same value twice in a row reports at most one change.
        #[test]
        fn prop_reapplication_is_idempotent(values in prop::collection::vec(any::<(bool, bool)>(), 1..50)) {
            let mut store = ReplicaStore::new();
            store.insert(BALL, 0);

            for (grab, active) in values {
                let value = if active { FieldValue::Active(grab) } else { FieldValue::Grabbed(grab) };
                let _ = store.apply(BALL, value);
                prop_assert!(store.apply(BALL, value).is_none());
            }
        }
    }
}
