//! Per-operation audit state.
//!
//! An [`AuditContext`] is created by the host for one logical operation (a
//! request, a job, a management command) and handed to every probe that fires
//! during it. It carries the actor, the state captured by before-save probes,
//! and the mutation events built so far. The terminal probe drains it.

use std::{collections::HashMap, time::Instant};

use crate::models::{EntityEntry, Instance, MutationEvent, Operation, ValueModification};

/// Key of an instance inside a context: type identity plus primary key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct InstanceKey {
    entity: String,
    primary_key: Option<String>,
}

impl InstanceKey {
    fn of(instance: &Instance) -> Self {
        Self {
            entity: instance.entity.qualified_name(),
            primary_key: instance.primary_key.clone(),
        }
    }

    fn unsaved(&self) -> Self {
        Self {
            entity: self.entity.clone(),
            primary_key: None,
        }
    }
}

/// What a before-save probe hands over to the matching after-save probe.
#[derive(Debug, Clone)]
pub(crate) struct PendingSave {
    pub(crate) modifications: Vec<ValueModification>,
    pub(crate) started: Option<Instant>,
}

#[derive(Debug)]
pub struct AuditContext {
    actor: Option<String>,
    events: Vec<MutationEvent>,
    memo: HashMap<InstanceKey, usize>,
    pending: HashMap<InstanceKey, PendingSave>,
}

impl AuditContext {
    pub fn new(actor: Option<String>) -> Self {
        Self {
            actor,
            events: Vec::new(),
            memo: HashMap::new(),
            pending: HashMap::new(),
        }
    }

    pub fn anonymous() -> Self {
        Self::new(None)
    }

    pub fn actor(&self) -> Option<&str> {
        self.actor.as_deref()
    }

    /// Set the actor once it becomes known (e.g. after authentication).
    pub fn set_actor(&mut self, actor: Option<String>) {
        self.actor = actor;
    }

    /// Events built so far and not yet handed to the handler.
    pub fn events(&self) -> &[MutationEvent] {
        &self.events
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Return the in-flight event for `instance`, creating one if needed.
    ///
    /// With `force` a fresh event is always created and becomes the instance's
    /// in-flight event. Returns the event and whether it was created.
    pub fn get_or_create_entity_event(
        &mut self,
        instance: &Instance,
        operation: Operation,
        force: bool,
    ) -> (&mut MutationEvent, bool) {
        let key = InstanceKey::of(instance);

        if !force && let Some(&index) = self.memo.get(&key) {
            return (&mut self.events[index], false);
        }

        let event = MutationEvent::new(operation, self.actor.clone(), EntityEntry::of(instance));
        self.events.push(event);
        let index = self.events.len() - 1;
        self.memo.insert(key, index);
        (&mut self.events[index], true)
    }

    /// Drain the built events, forgetting the memo.
    pub fn take_events(&mut self) -> Vec<MutationEvent> {
        self.memo.clear();
        std::mem::take(&mut self.events)
    }

    pub(crate) fn stash_before_save(&mut self, instance: &Instance, pending: PendingSave) {
        self.pending.insert(InstanceKey::of(instance), pending);
    }

    /// The before-save state for `instance`. Falls back to the state stashed
    /// before the instance had a primary key.
    pub(crate) fn take_before_save(&mut self, instance: &Instance) -> Option<PendingSave> {
        let key = InstanceKey::of(instance);
        if let Some(pending) = self.pending.remove(&key) {
            return Some(pending);
        }
        self.pending.remove(&key.unsaved())
    }

    pub(crate) fn discard_before_save(&mut self, instance: &Instance) {
        self.pending.remove(&InstanceKey::of(instance));
    }
}

impl Drop for AuditContext {
    fn drop(&mut self) {
        if !self.events.is_empty() {
            tracing::warn!(
                events = self.events.len(),
                "Audit context dropped with unrecorded events"
            );
        }
    }
}

/// `"{actor} {created|modified|deleted} {application}.{Type} | Instance: {value}"`,
/// followed by the short modification list for detailed MODIFY messages.
pub fn mutation_message(event: &MutationEvent, type_label: &str, detailed: bool) -> String {
    let mut message = format!(
        "{} {} {} | Instance: {}",
        event.actor.as_deref().unwrap_or("Anonymous"),
        event.operation.past_tense(),
        type_label,
        event.entry.value
    );
    if detailed && event.operation == Operation::Modify && !event.modifications.is_empty() {
        let short: Vec<String> = event.modifications.iter().map(|m| m.short()).collect();
        message.push_str(" | Modifications: ");
        message.push_str(&short.join(", "));
    }
    message
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::models::{EntityMirror, EntityType, FieldMirror};

    fn order(pk: Option<&str>) -> Instance {
        let entity = Arc::new(EntityType::new("Order").application("shop"));
        let instance = Instance::new(entity);
        match pk {
            Some(pk) => instance.with_primary_key(pk),
            None => instance,
        }
    }

    #[test]
    fn test_event_is_reused_until_forced() {
        let mut ctx = AuditContext::new(Some("alice".into()));
        let instance = order(Some("1"));

        let (first, created) = ctx.get_or_create_entity_event(&instance, Operation::Modify, false);
        assert!(created);
        let first_id = first.id;
        assert_eq!(first.actor.as_deref(), Some("alice"));

        let (again, created) = ctx.get_or_create_entity_event(&instance, Operation::Modify, false);
        assert!(!created);
        assert_eq!(again.id, first_id);

        let (fresh, created) = ctx.get_or_create_entity_event(&instance, Operation::Modify, true);
        assert!(created);
        assert_ne!(fresh.id, first_id);

        assert_eq!(ctx.take_events().len(), 2);
        assert!(ctx.is_empty());
    }

    #[test]
    fn test_events_are_per_instance() {
        let mut ctx = AuditContext::anonymous();
        ctx.get_or_create_entity_event(&order(Some("1")), Operation::Modify, false);
        let (_, created) = ctx.get_or_create_entity_event(&order(Some("2")), Operation::Modify, false);
        assert!(created);
        assert_eq!(ctx.take_events().len(), 2);
    }

    #[test]
    fn test_before_save_falls_back_to_unsaved_key() {
        let mut ctx = AuditContext::anonymous();
        ctx.stash_before_save(
            &order(None),
            PendingSave {
                modifications: Vec::new(),
                started: None,
            },
        );

        assert!(ctx.take_before_save(&order(Some("5"))).is_some());
        assert!(ctx.take_before_save(&order(Some("5"))).is_none());
    }

    #[test]
    fn test_mutation_message() {
        let mut ctx = AuditContext::anonymous();
        let instance = order(Some("1")).with_display("Order #1");
        let (event, _) = ctx.get_or_create_entity_event(&instance, Operation::Modify, false);
        event.modifications.push(ValueModification {
            operation: Operation::Modify,
            field: FieldMirror::new(
                "total",
                EntityMirror::of(&instance.entity),
                "IntegerField",
            ),
            previous: Some("1".into()),
            current: Some("2".into()),
        });
        let event = event.clone();

        assert_eq!(
            mutation_message(&event, "shop.Order", true),
            "Anonymous modified shop.Order | Instance: Order #1 | Modifications: ~total"
        );
        assert_eq!(
            mutation_message(&event, "shop.Order", false),
            "Anonymous modified shop.Order | Instance: Order #1"
        );
        ctx.take_events();
    }
}
