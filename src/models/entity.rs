//! Host-facing description of entity types and instances.

use std::{collections::HashSet, fmt, sync::Arc};

use serde::{Deserialize, Serialize};

use super::Operation;

/// A declared field of an entity type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    /// Free-form type label recorded on the field mirror (e.g. `"CharField"`).
    pub type_label: String,
}

/// Per-type audit metadata declared alongside the entity type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingIgnore {
    /// Never record anything for this type.
    #[serde(default)]
    pub complete: bool,
    #[serde(default)]
    pub operations: HashSet<Operation>,
    #[serde(default)]
    pub fields: HashSet<String>,
}

impl LoggingIgnore {
    pub fn complete() -> Self {
        Self {
            complete: true,
            ..Self::default()
        }
    }

    pub fn operations(operations: impl IntoIterator<Item = Operation>) -> Self {
        Self {
            operations: operations.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn fields<S: Into<String>>(fields: impl IntoIterator<Item = S>) -> Self {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }
}

/// An entity type as declared by the host.
///
/// ```
/// use autolog::models::{EntityType, LoggingIgnore};
///
/// let order = EntityType::new("Order")
///     .module("shop.models")
///     .application("shop")
///     .field("total", "DecimalField")
///     .field("note", "TextField")
///     .ignore(LoggingIgnore::fields(["note"]));
/// assert_eq!(order.qualified_name(), "shop.models.Order");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityType {
    pub name: String,
    /// Dotted module path the type is declared in.
    pub module: Option<String>,
    /// Owning application. `None` means unknown origin.
    pub application: Option<String>,
    pub fields: Vec<FieldDef>,
    #[serde(default)]
    pub ignore: LoggingIgnore,
}

impl EntityType {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            module: None,
            application: None,
            fields: Vec::new(),
            ignore: LoggingIgnore::default(),
        }
    }

    pub fn module(mut self, module: impl Into<String>) -> Self {
        self.module = Some(module.into());
        self
    }

    pub fn application(mut self, application: impl Into<String>) -> Self {
        self.application = Some(application.into());
        self
    }

    pub fn field(mut self, name: impl Into<String>, type_label: impl Into<String>) -> Self {
        self.fields.push(FieldDef {
            name: name.into(),
            type_label: type_label.into(),
        });
        self
    }

    pub fn ignore(mut self, ignore: LoggingIgnore) -> Self {
        self.ignore = ignore;
        self
    }

    /// `module.Name`, or just `Name` without a module. Used as the type identity.
    pub fn qualified_name(&self) -> String {
        match &self.module {
            Some(module) => format!("{module}.{}", self.name),
            None => self.name.clone(),
        }
    }

    pub fn declares(&self, field: &str) -> bool {
        self.fields.iter().any(|f| f.name == field)
    }

    pub fn field_def(&self, field: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == field)
    }

    /// Label used in messages: `application.Name`.
    pub fn label(&self) -> String {
        format!(
            "{}.{}",
            self.application.as_deref().unwrap_or("unknown"),
            self.name
        )
    }
}

/// A single entity instance as observed by a probe.
#[derive(Debug, Clone, PartialEq)]
pub struct Instance {
    pub entity: Arc<EntityType>,
    /// Primary key; `None` for an instance that has not been stored yet.
    pub primary_key: Option<String>,
    /// Field values in declaration order.
    pub values: Vec<(String, serde_json::Value)>,
    display: Option<String>,
}

impl Instance {
    /// An instance without a primary key yet.
    pub fn new(entity: Arc<EntityType>) -> Self {
        Self {
            entity,
            primary_key: None,
            values: Vec::new(),
            display: None,
        }
    }

    pub fn with_primary_key(mut self, primary_key: impl Into<String>) -> Self {
        self.primary_key = Some(primary_key.into());
        self
    }

    pub fn with_value(
        mut self,
        field: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.set(field, value);
        self
    }

    /// Override the rendered representation.
    pub fn with_display(mut self, display: impl Into<String>) -> Self {
        self.display = Some(display.into());
        self
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<serde_json::Value>) {
        let field = field.into();
        let value = value.into();
        match self.values.iter_mut().find(|(name, _)| *name == field) {
            Some((_, slot)) => *slot = value,
            None => self.values.push((field, value)),
        }
    }

    pub fn get(&self, field: &str) -> Option<&serde_json::Value> {
        self.values
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, value)| value)
    }

    /// Values restricted to the fields the entity type declares.
    pub fn declared_values(&self) -> Vec<(String, serde_json::Value)> {
        self.values
            .iter()
            .filter(|(name, _)| self.entity.declares(name))
            .cloned()
            .collect()
    }

    pub fn primary_key_or_empty(&self) -> String {
        self.primary_key.clone().unwrap_or_default()
    }
}

impl fmt::Display for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.display, &self.primary_key) {
            (Some(display), _) => f.write_str(display),
            (None, Some(pk)) => write!(f, "{} object ({pk})", self.entity.name),
            (None, None) => write!(f, "{} object (None)", self.entity.name),
        }
    }
}
