//! Model world - the reference implementation.

use std::collections::BTreeMap;

use tandem_proto::{Field, FieldValue, Transform};

use super::operation::{
    ClientId, ModelObjectId, Operation, OperationError, OperationResult, trigger_event,
};

/// Observable state for oracle comparison.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservableState {
    /// Holder of each object, by object index.
    pub holders: Vec<Option<ClientId>>,
    /// Authoritative fields of each object, in field order.
    pub fields: Vec<Vec<FieldValue>>,
    /// Triggers each client received, as `(object, transition)`.
    pub triggers: Vec<Vec<(ModelObjectId, String)>>,
    /// Which clients are still connected.
    pub connected: Vec<bool>,
}

#[derive(Debug, Clone)]
struct ModelObject {
    holder: Option<ClientId>,
    fields: BTreeMap<Field, FieldValue>,
}

impl ModelObject {
    fn new() -> Self {
        let fields = [
            FieldValue::Grabbed(false),
            FieldValue::Active(true),
            FieldValue::Transform(Transform::IDENTITY),
        ];
        Self { holder: None, fields: fields.into_iter().map(|v| (v.field(), v)).collect() }
    }
}

/// Reference model of a session with instant delivery.
#[derive(Debug, Clone)]
pub struct ModelWorld {
    objects: Vec<ModelObject>,
    connected: Vec<bool>,
    triggers: Vec<Vec<(ModelObjectId, String)>>,
}

impl ModelWorld {
    /// Create a world with `num_clients` connected clients and `num_objects`
    /// coordinator-held props.
    pub fn new(num_clients: usize, num_objects: usize) -> Self {
        Self {
            objects: (0..num_objects).map(|_| ModelObject::new()).collect(),
            connected: vec![true; num_clients],
            triggers: vec![Vec::new(); num_clients],
        }
    }

    /// Number of clients in the world.
    pub fn num_clients(&self) -> usize {
        self.connected.len()
    }

    /// Number of objects in the world.
    pub fn num_objects(&self) -> usize {
        self.objects.len()
    }

    /// Holder of an object.
    pub fn holder(&self, object: ModelObjectId) -> Option<ClientId> {
        self.objects.get(usize::from(object)).and_then(|o| o.holder)
    }

    /// Apply an operation and return the result.
    pub fn apply(&mut self, op: &Operation) -> OperationResult {
        if let Some(client_id) = op.client_id() {
            match self.connected.get(usize::from(client_id)) {
                None => return OperationResult::Error(OperationError::InvalidClient),
                Some(false) => return OperationResult::Error(OperationError::NotConnected),
                Some(true) => {},
            }
        }

        match op {
            Operation::Acquire { client_id, object } => self.apply_acquire(*client_id, *object),
            Operation::Publish { client_id, object, value } => {
                self.apply_write(*client_id, *object, value.to_field_value(), false)
            },
            Operation::Release { client_id, object } => {
                match self.held_by(*client_id, *object) {
                    Some(target) => {
                        target.holder = None;
                        OperationResult::Ok
                    },
                    None => OperationResult::Error(OperationError::NotAuthority),
                }
            },
            Operation::PublishThenRelease { client_id, object, value } => {
                self.apply_write(*client_id, *object, value.to_field_value(), true)
            },
            Operation::Trigger { client_id, object, seed } => {
                self.apply_trigger(*client_id, *object, *seed)
            },
            Operation::Disconnect { client_id } => {
                self.connected[usize::from(*client_id)] = false;
                for target in &mut self.objects {
                    if target.holder == Some(*client_id) {
                        target.holder = None;
                    }
                }
                OperationResult::Ok
            },
            Operation::AdvanceTime { .. } | Operation::DeliverPending => OperationResult::Ok,
        }
    }

    /// Extract observable state for comparison.
    pub fn observable_state(&self) -> ObservableState {
        ObservableState {
            holders: self.objects.iter().map(|o| o.holder).collect(),
            fields: self.objects.iter().map(|o| o.fields.values().copied().collect()).collect(),
            triggers: self.triggers.clone(),
            connected: self.connected.clone(),
        }
    }

    fn held_by(&mut self, client_id: ClientId, object: ModelObjectId) -> Option<&mut ModelObject> {
        self.objects.get_mut(usize::from(object)).filter(|o| o.holder == Some(client_id))
    }

    fn apply_acquire(&mut self, client_id: ClientId, object: ModelObjectId) -> OperationResult {
        let Some(target) = self.objects.get_mut(usize::from(object)) else {
            return OperationResult::Error(OperationError::UnknownObject);
        };
        match target.holder {
            None => {
                target.holder = Some(client_id);
                OperationResult::Ok
            },
            Some(holder) if holder == client_id => OperationResult::Ok,
            Some(_) => OperationResult::Error(OperationError::Denied),
        }
    }

    fn apply_write(
        &mut self,
        client_id: ClientId,
        object: ModelObjectId,
        value: FieldValue,
        release: bool,
    ) -> OperationResult {
        let Some(target) = self.held_by(client_id, object) else {
            return OperationResult::Error(OperationError::NotAuthority);
        };
        target.fields.insert(value.field(), value);
        if release {
            target.holder = None;
        }
        OperationResult::Ok
    }

    fn apply_trigger(&mut self, client_id: ClientId, object: ModelObjectId, seed: u8) -> OperationResult {
        if self.held_by(client_id, object).is_none() {
            return OperationResult::Error(OperationError::NotAuthority);
        }

        let transition = trigger_event(seed).transition;
        for (index, log) in self.triggers.iter_mut().enumerate() {
            if index != usize::from(client_id) && self.connected[index] {
                log.push((object, transition.clone()));
            }
        }
        OperationResult::Ok
    }
}
