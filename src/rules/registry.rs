//! Per-function include/exclude overrides.
//!
//! Hosts register overrides against an identity: the qualified name of an entity
//! type (`shop.models.Order`) or the dotted path of a request handler
//! (`shop.views.checkout`). Registering twice for the same identity merges the
//! two overrides by union.
//!
//! The default shapes mirror how the overrides read at the call site:
//!
//! | constructor                       | operations/methods | fields  |
//! |-----------------------------------|--------------------|---------|
//! | `ModelOverride::exclude_all()`    | all                | all     |
//! | `ModelOverride::include_all()`    | all                | all     |
//! | `RequestOverride::all_methods()`  | all                | n/a     |

use std::{collections::HashSet, hash::Hash};

use dashmap::{DashMap, mapref::entry::Entry};

use crate::models::Operation;

/// A set that can also mean "everything" or "nothing".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection<T: Eq + Hash> {
    All,
    Only(HashSet<T>),
    Nothing,
}

impl<T: Eq + Hash + Clone> Selection<T> {
    pub fn only(items: impl IntoIterator<Item = T>) -> Self {
        Selection::Only(items.into_iter().collect())
    }

    pub fn contains(&self, item: &T) -> bool {
        match self {
            Selection::All => true,
            Selection::Only(items) => items.contains(item),
            Selection::Nothing => false,
        }
    }

    /// Union: `All` absorbs everything, `Nothing` is the identity.
    pub fn union(&self, other: &Self) -> Self {
        match (self, other) {
            (Selection::All, _) | (_, Selection::All) => Selection::All,
            (Selection::Nothing, other) | (other, Selection::Nothing) => other.clone(),
            (Selection::Only(a), Selection::Only(b)) => {
                Selection::Only(a.union(b).cloned().collect())
            }
        }
    }
}

impl Selection<String> {
    /// Case-insensitive membership for method names.
    fn contains_ignore_case(&self, item: &str) -> bool {
        match self {
            Selection::All => true,
            Selection::Only(items) => items.iter().any(|i| i.eq_ignore_ascii_case(item)),
            Selection::Nothing => false,
        }
    }
}

/// Override for an entity type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelOverride {
    pub operations: Selection<Operation>,
    pub fields: Selection<String>,
}

impl ModelOverride {
    /// Exclude every operation and every field. Narrow with the builder methods.
    pub fn exclude_all() -> Self {
        Self {
            operations: Selection::All,
            fields: Selection::All,
        }
    }

    /// Include every operation and every field.
    pub fn include_all() -> Self {
        Self {
            operations: Selection::All,
            fields: Selection::All,
        }
    }

    pub fn operations(mut self, operations: impl IntoIterator<Item = Operation>) -> Self {
        self.operations = Selection::only(operations);
        self
    }

    pub fn no_operations(mut self) -> Self {
        self.operations = Selection::Nothing;
        self
    }

    pub fn fields<S: Into<String>>(mut self, fields: impl IntoIterator<Item = S>) -> Self {
        self.fields = Selection::only(fields.into_iter().map(Into::into));
        self
    }

    pub fn no_fields(mut self) -> Self {
        self.fields = Selection::Nothing;
        self
    }

    fn merge(&self, other: &Self) -> Self {
        Self {
            operations: self.operations.union(&other.operations),
            fields: self.fields.union(&other.fields),
        }
    }
}

/// Override for a request handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestOverride {
    pub methods: Selection<String>,
}

impl RequestOverride {
    pub fn all_methods() -> Self {
        Self {
            methods: Selection::All,
        }
    }

    /// Restrict to the given methods. An empty list means all methods.
    pub fn methods<S: Into<String>>(methods: impl IntoIterator<Item = S>) -> Self {
        let methods: HashSet<String> = methods
            .into_iter()
            .map(|m| m.into().to_ascii_lowercase())
            .collect();
        if methods.is_empty() {
            Self::all_methods()
        } else {
            Self {
                methods: Selection::Only(methods),
            }
        }
    }

    pub fn covers(&self, method: &str) -> bool {
        self.methods.contains_ignore_case(method)
    }

    fn merge(&self, other: &Self) -> Self {
        Self {
            methods: self.methods.union(&other.methods),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Override {
    Model(ModelOverride),
    Request(RequestOverride),
}

impl From<ModelOverride> for Override {
    fn from(value: ModelOverride) -> Self {
        Override::Model(value)
    }
}

impl From<RequestOverride> for Override {
    fn from(value: RequestOverride) -> Self {
        Override::Request(value)
    }
}

#[derive(Debug, Default)]
pub struct OverrideRegistry {
    model_exclusions: DashMap<String, ModelOverride>,
    model_inclusions: DashMap<String, ModelOverride>,
    request_exclusions: DashMap<String, RequestOverride>,
    request_inclusions: DashMap<String, RequestOverride>,
}

impl OverrideRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_exclusion(&self, identity: impl Into<String>, value: impl Into<Override>) {
        let identity = identity.into();
        match value.into() {
            Override::Model(value) => {
                merge_into(&self.model_exclusions, identity, value, ModelOverride::merge)
            }
            Override::Request(value) => {
                merge_into(&self.request_exclusions, identity, value, RequestOverride::merge)
            }
        }
    }

    pub fn register_inclusion(&self, identity: impl Into<String>, value: impl Into<Override>) {
        let identity = identity.into();
        match value.into() {
            Override::Model(value) => {
                merge_into(&self.model_inclusions, identity, value, ModelOverride::merge)
            }
            Override::Request(value) => {
                merge_into(&self.request_inclusions, identity, value, RequestOverride::merge)
            }
        }
    }

    /// Drop every override registered for `identity`.
    pub fn unregister(&self, identity: &str) {
        self.model_exclusions.remove(identity);
        self.model_inclusions.remove(identity);
        self.request_exclusions.remove(identity);
        self.request_inclusions.remove(identity);
    }

    pub fn model_exclusion(&self, identity: &str) -> Option<ModelOverride> {
        self.model_exclusions.get(identity).map(|e| e.value().clone())
    }

    pub fn model_inclusion(&self, identity: &str) -> Option<ModelOverride> {
        self.model_inclusions.get(identity).map(|e| e.value().clone())
    }

    pub fn request_exclusion(&self, identity: &str) -> Option<RequestOverride> {
        self.request_exclusions.get(identity).map(|e| e.value().clone())
    }

    pub fn request_inclusion(&self, identity: &str) -> Option<RequestOverride> {
        self.request_inclusions.get(identity).map(|e| e.value().clone())
    }
}

fn merge_into<T>(map: &DashMap<String, T>, identity: String, value: T, merge: fn(&T, &T) -> T) {
    match map.entry(identity) {
        Entry::Occupied(mut existing) => {
            let merged = merge(existing.get(), &value);
            existing.insert(merged);
        }
        Entry::Vacant(slot) => {
            slot.insert(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selection_union() {
        let a = Selection::only([1, 2]);
        let b = Selection::only([2, 3]);
        assert_eq!(a.union(&b), Selection::only([1, 2, 3]));
        assert_eq!(a.union(&Selection::All), Selection::All);
        assert_eq!(Selection::Nothing.union(&b), b);
        assert_eq!(
            Selection::<i32>::Nothing.union(&Selection::Nothing),
            Selection::Nothing
        );
    }

    #[test]
    fn test_registrations_merge_by_union() {
        let registry = OverrideRegistry::new();
        registry.register_exclusion(
            "shop.models.Order",
            ModelOverride::exclude_all().operations([Operation::Create]),
        );
        registry.register_exclusion(
            "shop.models.Order",
            ModelOverride::exclude_all()
                .operations([Operation::Delete])
                .fields(["note"]),
        );

        let merged = registry.model_exclusion("shop.models.Order").unwrap();
        assert!(merged.operations.contains(&Operation::Create));
        assert!(merged.operations.contains(&Operation::Delete));
        assert!(!merged.operations.contains(&Operation::Modify));
        assert!(merged.fields.contains(&"note".to_string()));
    }

    #[test]
    fn test_request_override_empty_means_all() {
        let all = RequestOverride::methods(Vec::<String>::new());
        assert!(all.covers("PATCH"));

        let post = RequestOverride::methods(["POST"]);
        assert!(post.covers("post"));
        assert!(!post.covers("GET"));
    }

    #[test]
    fn test_unregister_removes_everything() {
        let registry = OverrideRegistry::new();
        registry.register_exclusion("shop.views.list", RequestOverride::all_methods());
        registry.register_inclusion("shop.views.list", RequestOverride::methods(["get"]));
        registry.unregister("shop.views.list");
        assert!(registry.request_exclusion("shop.views.list").is_none());
        assert!(registry.request_inclusion("shop.views.list").is_none());
    }
}
