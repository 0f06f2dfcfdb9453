//! Explicit hook registration.
//!
//! Applications that prefer callbacks over matching on [`ClientAction`]s
//! register closures here and pass every batch of actions to
//! [`Hooks::dispatch`]. Hooks run in action order; `Send` actions are left
//! to the caller.

use tandem_proto::{FieldValue, HandChannel, ObjectId, ParticipantId, ParticipantInfo};

use crate::event::ClientAction;

type RosterHook = Box<dyn FnMut(&[ParticipantInfo]) + Send>;
type ReadyHook = Box<dyn FnMut(bool) + Send>;
type AuthorityHook = Box<dyn FnMut(ObjectId, Option<ParticipantId>) + Send>;
type FieldHook = Box<dyn FnMut(ObjectId, FieldValue) + Send>;
type TriggerHook = Box<dyn FnMut(HandChannel, &str, bool) + Send>;

/// Registered callbacks, one list per hook kind.
#[derive(Default)]
pub struct Hooks {
    roster_changed: Vec<RosterHook>,
    ready_state_changed: Vec<ReadyHook>,
    authority_changed: Vec<AuthorityHook>,
    field_changed: Vec<FieldHook>,
    trigger_event: Vec<TriggerHook>,
}

impl Hooks {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Called with the full roster, in roster order.
    pub fn on_roster_changed(&mut self, hook: impl FnMut(&[ParticipantInfo]) + Send + 'static) {
        self.roster_changed.push(Box::new(hook));
    }

    /// Called with the aggregate readiness (leader only).
    pub fn on_ready_state_changed(&mut self, hook: impl FnMut(bool) + Send + 'static) {
        self.ready_state_changed.push(Box::new(hook));
    }

    /// Called when an object's holder changes.
    pub fn on_authority_changed(
        &mut self,
        hook: impl FnMut(ObjectId, Option<ParticipantId>) + Send + 'static,
    ) {
        self.authority_changed.push(Box::new(hook));
    }

    /// Called when a persistent field actually changes value, locally or
    /// remotely.
    pub fn on_field_changed(&mut self, hook: impl FnMut(ObjectId, FieldValue) + Send + 'static) {
        self.field_changed.push(Box::new(hook));
    }

    /// Called with `(channel, transition, reset)` for every relayed trigger.
    pub fn on_trigger_event(&mut self, hook: impl FnMut(HandChannel, &str, bool) + Send + 'static) {
        self.trigger_event.push(Box::new(hook));
    }

    /// Run the hooks matching `actions`.
    pub fn dispatch(&mut self, actions: &[ClientAction]) {
        for action in actions {
            match action {
                ClientAction::RosterChanged { participants } => {
                    self.roster_changed.iter_mut().for_each(|hook| hook(participants.as_slice()));
                },
                ClientAction::ReadyStateChanged { all_ready } => {
                    self.ready_state_changed.iter_mut().for_each(|hook| hook(*all_ready));
                },
                ClientAction::AuthorityChanged { object, holder } => {
                    self.authority_changed.iter_mut().for_each(|hook| hook(*object, *holder));
                },
                ClientAction::FieldChanged { object, value, .. } => {
                    self.field_changed.iter_mut().for_each(|hook| hook(*object, *value));
                },
                ClientAction::TriggerFired { event, .. } => {
                    self.trigger_event
                        .iter_mut()
                        .for_each(|hook| hook(event.channel, event.transition.as_str(), event.reset));
                },
                _ => {},
            }
        }
    }
}

impl std::fmt::Debug for Hooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hooks")
            .field("roster_changed", &self.roster_changed.len())
            .field("ready_state_changed", &self.ready_state_changed.len())
            .field("authority_changed", &self.authority_changed.len())
            .field("field_changed", &self.field_changed.len())
            .field("trigger_event", &self.trigger_event.len())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::{Arc, Mutex};

    use tandem_proto::TriggerEvent;

    use super::*;

    #[test]
    fn dispatch_runs_matching_hooks_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut hooks = Hooks::new();

        let sink = Arc::clone(&log);
        hooks.on_field_changed(move |object, value| {
            sink.lock().unwrap().push(format!("{object} {value:?}"));
        });
        let sink = Arc::clone(&log);
        hooks.on_trigger_event(move |channel, transition, reset| {
            sink.lock().unwrap().push(format!("{channel:?} {transition} {reset}"));
        });

        hooks.dispatch(&[
            ClientAction::FieldChanged {
                object: ObjectId(1),
                value: FieldValue::Grabbed(true),
                previous: None,
                local: false,
            },
            ClientAction::SessionStarted,
            ClientAction::TriggerFired {
                object: ObjectId(1),
                event: TriggerEvent::fire(HandChannel::LeftHand, "Point"),
            },
        ]);

        assert_eq!(*log.lock().unwrap(), vec!["obj-1 Grabbed(true)", "LeftHand Point false"]);
    }

    #[test]
    fn ready_hook_sees_aggregate() {
        let seen = Arc::new(Mutex::new(None));
        let mut hooks = Hooks::new();

        let sink = Arc::clone(&seen);
        hooks.on_ready_state_changed(move |all_ready| *sink.lock().unwrap() = Some(all_ready));
        hooks.dispatch(&[ClientAction::ReadyStateChanged { all_ready: true }]);

        assert_eq!(*seen.lock().unwrap(), Some(true));
    }
}
