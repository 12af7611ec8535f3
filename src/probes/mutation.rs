use std::time::Instant;

use super::{Engine, emit};
use crate::{
    diff::diff,
    events::{AuditContext, PendingSave, mutation_message},
    models::{
        Category, EntityEntry, EntityMirror, EntityType, FieldMirror, Instance, Operation,
        RelationshipModification, ValueModification,
    },
    observability::metrics,
    rules::Candidate,
    settings::ConfigSnapshot,
};

/// What happened to a relationship field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationAction {
    /// Related instances were added.
    Add,
    /// Related instances were removed.
    Remove,
    /// The field was cleared; `related` lists what it held before.
    Clear,
}

impl RelationAction {
    pub fn added(&self) -> bool {
        matches!(self, RelationAction::Add)
    }

    pub fn is_clear(&self) -> bool {
        matches!(self, RelationAction::Clear)
    }

    fn operation(&self) -> Operation {
        if self.added() {
            Operation::Create
        } else {
            Operation::Delete
        }
    }
}

impl Engine {
    fn model_excluded(&self, config: &ConfigSnapshot, instance: &Instance, operation: Operation) -> bool {
        let excluded = self.rules.should_exclude(
            config,
            Candidate::Model {
                entity: &instance.entity,
                operation,
            },
        );
        if excluded {
            metrics::record_exclusion(Category::Model);
        }
        excluded
    }

    /// Capture the field-level diff before `instance` is written.
    ///
    /// `prior` is the stored state, or `None` when the instance is being created.
    pub fn on_before_save(&self, ctx: &mut AuditContext, instance: &Instance, prior: Option<&Instance>) {
        let config = self.settings.snapshot();
        if !config.is_enabled(Category::Model) {
            return;
        }

        let operation = match prior {
            Some(_) => Operation::Modify,
            None => Operation::Create,
        };
        if self.model_excluded(&config, instance, operation) {
            ctx.discard_before_save(instance);
            return;
        }

        let entity: &EntityType = &instance.entity;
        let before = prior.map(Instance::declared_values).unwrap_or_default();
        let after = instance.declared_values();
        let mirror = EntityMirror::of(entity);

        let modifications = diff(&before, &after)
            .into_iter()
            .filter(|change| {
                !self.rules.should_exclude(
                    &config,
                    Candidate::Field {
                        entity,
                        field: &change.key,
                    },
                )
            })
            .filter_map(|change| {
                let field = entity.field_def(&change.key)?;
                Some(ValueModification {
                    operation: change.operation,
                    field: FieldMirror::new(
                        &field.name,
                        mirror.clone(),
                        &field.type_label,
                    ),
                    previous: change.previous,
                    current: change.current,
                })
            })
            .collect();

        ctx.stash_before_save(
            instance,
            PendingSave {
                modifications,
                started: config.model.performance.then(Instant::now),
            },
        );
    }

    /// Build the save event. `touched_fields`, when given, restricts the
    /// modifications to the fields the host explicitly wrote.
    pub fn on_after_save(
        &self,
        ctx: &mut AuditContext,
        instance: &Instance,
        created: bool,
        touched_fields: Option<&[&str]>,
    ) {
        let config = self.settings.snapshot();
        if !config.is_enabled(Category::Model) {
            return;
        }

        let operation = if created {
            Operation::Create
        } else {
            Operation::Modify
        };
        if self.model_excluded(&config, instance, operation) {
            ctx.discard_before_save(instance);
            return;
        }

        let pending = ctx.take_before_save(instance);
        let started = pending.as_ref().and_then(|p| p.started);
        let mut modifications = pending.map(|p| p.modifications).unwrap_or_default();
        if let Some(touched) = touched_fields {
            modifications.retain(|m| touched.contains(&m.field.name.as_str()));
        }

        let (event, _) = ctx.get_or_create_entity_event(instance, operation, true);
        event.modifications = modifications;
        if config.model.snapshot {
            event.snapshot = Some(snapshot_of(instance));
        }
        if let Some(started) = started {
            event.duration = Some(started.elapsed());
        }

        if event.is_empty_modification() {
            return;
        }
        emit(
            config.model.loglevel,
            &mutation_message(event, &instance.entity.label(), config.model.detailed_message),
        );
    }

    pub fn on_after_delete(&self, ctx: &mut AuditContext, instance: &Instance) {
        let config = self.settings.snapshot();
        if !config.is_enabled(Category::Model) {
            return;
        }
        ctx.discard_before_save(instance);
        if self.model_excluded(&config, instance, Operation::Delete) {
            return;
        }

        let (event, _) = ctx.get_or_create_entity_event(instance, Operation::Delete, true);
        if config.model.snapshot {
            event.snapshot = Some(snapshot_of(instance));
        }
        emit(
            config.model.loglevel,
            &mutation_message(event, &instance.entity.label(), config.model.detailed_message),
        );
    }

    /// Record added or removed related instances on `owner.field`.
    ///
    /// The changes are attached to the owner's in-flight event, which is
    /// created as a MODIFY event when the owner has none yet.
    pub fn on_relationship_changed(
        &self,
        ctx: &mut AuditContext,
        owner: &Instance,
        field: &str,
        related: &[Instance],
        action: RelationAction,
    ) {
        let config = self.settings.snapshot();
        if !config.is_enabled(Category::Model) || related.is_empty() {
            return;
        }

        let operation = action.operation();
        if self.model_excluded(&config, owner, operation) {
            return;
        }

        let entity: &EntityType = &owner.entity;
        let Some(definition) = entity.field_def(field) else {
            tracing::warn!(
                entity = %entity.qualified_name(),
                field,
                "Relationship change on an undeclared field, not recorded"
            );
            return;
        };
        if self
            .rules
            .should_exclude(&config, Candidate::Field { entity, field })
        {
            return;
        }

        let mirror = FieldMirror::new(
            &definition.name,
            EntityMirror::of(entity),
            &definition.type_label,
        );
        let relationships: Vec<RelationshipModification> = related
            .iter()
            .map(|target| RelationshipModification {
                operation,
                field: mirror.clone(),
                entry: EntityEntry::of(target),
            })
            .collect();

        let short: Vec<String> = relationships.iter().map(|r| r.short()).collect();
        let (event, _) = ctx.get_or_create_entity_event(owner, Operation::Modify, false);
        event.relationships.extend(relationships);

        emit(
            config.model.loglevel,
            &format!(
                "{} modified field {} | Model: {} | Modifications: {}",
                event.actor.as_deref().unwrap_or("Anonymous"),
                field,
                entity.label(),
                short.join(", ")
            ),
        );
    }
}

fn snapshot_of(instance: &Instance) -> serde_json::Value {
    serde_json::Value::Object(instance.values.iter().cloned().collect())
}
