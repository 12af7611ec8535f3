//! Event graphs and the mirrors they reference.
//!
//! Mirrors ([`Application`], [`EntityMirror`], [`FieldMirror`]) are reference
//! data: their ids are v5 UUIDs derived from their identity, so building the same
//! mirror twice yields the same id and stores can get-or-create by id. Events get
//! v4 ids and a UTC creation timestamp.

mod entity;
mod request;

use std::time::Duration;

use chrono::{DateTime, Utc};
pub use entity::{EntityType, FieldDef, Instance, LoggingIgnore};
pub use request::{Body, LogRecord, RequestInfo};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use crate::config::{Category, LogLevel};

const MIRROR_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_2d7e_9a34_4b8e_a1f0_5c3d_8e2b_7a90);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    Create,
    Modify,
    Delete,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "CREATE",
            Operation::Modify => "MODIFY",
            Operation::Delete => "DELETE",
        }
    }

    pub fn past_tense(&self) -> &'static str {
        match self {
            Operation::Create => "created",
            Operation::Modify => "modified",
            Operation::Delete => "deleted",
        }
    }

    /// One-character marker used in short renderings.
    pub fn symbol(&self) -> char {
        match self {
            Operation::Create => '+',
            Operation::Modify => '~',
            Operation::Delete => '-',
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "CREATE" => Some(Operation::Create),
            "MODIFY" => Some(Operation::Modify),
            "DELETE" => Some(Operation::Delete),
            _ => None,
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An application; `name = None` is the unknown origin.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Application {
    pub id: Uuid,
    pub name: Option<String>,
}

impl Application {
    pub fn new(name: Option<&str>) -> Self {
        let key = match name {
            Some(name) => format!("application:name:{name}"),
            None => "application:unknown".to_string(),
        };
        Self {
            id: Uuid::new_v5(&MIRROR_NAMESPACE, key.as_bytes()),
            name: name.map(str::to_string),
        }
    }

    pub fn unknown() -> Self {
        Self::new(None)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityMirror {
    pub id: Uuid,
    pub name: String,
    pub application: Application,
}

impl EntityMirror {
    pub fn new(name: &str, application: Application) -> Self {
        let key = format!("entity:{}:{name}", application.id);
        Self {
            id: Uuid::new_v5(&MIRROR_NAMESPACE, key.as_bytes()),
            name: name.to_string(),
            application,
        }
    }

    pub fn of(entity: &EntityType) -> Self {
        Self::new(&entity.name, Application::new(entity.application.as_deref()))
    }
}

/// Identity is (name, mirror); the type label is updated in place by stores.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldMirror {
    pub id: Uuid,
    pub name: String,
    pub mirror: EntityMirror,
    pub type_label: String,
}

impl FieldMirror {
    pub fn new(name: &str, mirror: EntityMirror, type_label: &str) -> Self {
        let key = format!("field:{}:{name}", mirror.id);
        Self {
            id: Uuid::new_v5(&MIRROR_NAMESPACE, key.as_bytes()),
            name: name.to_string(),
            mirror,
            type_label: type_label.to_string(),
        }
    }
}

/// One observed instance inside an event. Never deduplicated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityEntry {
    pub id: Uuid,
    pub mirror: EntityMirror,
    pub primary_key: String,
    pub value: String,
}

impl EntityEntry {
    pub fn of(instance: &Instance) -> Self {
        Self {
            id: Uuid::new_v4(),
            mirror: EntityMirror::of(&instance.entity),
            primary_key: instance.primary_key_or_empty(),
            value: instance.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueModification {
    pub operation: Operation,
    pub field: FieldMirror,
    pub previous: Option<String>,
    pub current: Option<String>,
}

impl ValueModification {
    /// `+total`, `~total`, `-total`.
    pub fn short(&self) -> String {
        format!("{}{}", self.operation.symbol(), self.field.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipModification {
    pub operation: Operation,
    pub field: FieldMirror,
    pub entry: EntityEntry,
}

impl RelationshipModification {
    /// `+Line(3)`: operation marker, related type and primary key.
    pub fn short(&self) -> String {
        format!(
            "{}{}({})",
            self.operation.symbol(),
            self.entry.mirror.name,
            self.entry.primary_key
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationEvent {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub operation: Operation,
    pub actor: Option<String>,
    pub entry: EntityEntry,
    /// Post-save field mapping, when snapshots are enabled.
    pub snapshot: Option<serde_json::Value>,
    /// Time between the before- and after-save probes, when enabled.
    pub duration: Option<Duration>,
    pub modifications: Vec<ValueModification>,
    pub relationships: Vec<RelationshipModification>,
}

impl MutationEvent {
    pub fn new(operation: Operation, actor: Option<String>, entry: EntityEntry) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            operation,
            actor,
            entry,
            snapshot: None,
            duration: None,
            modifications: Vec::new(),
            relationships: Vec::new(),
        }
    }

    /// A MODIFY that ended up with nothing to say is never persisted.
    pub fn is_empty_modification(&self) -> bool {
        self.operation == Operation::Modify
            && self.modifications.is_empty()
            && self.relationships.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    pub content: String,
    pub content_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestEvent {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub actor: Option<String>,
    pub uri: String,
    pub status: u16,
    pub method: String,
    pub application: Application,
    pub client_ip: Option<String>,
    pub request: Option<RequestContext>,
    pub response: Option<RequestContext>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnspecifiedEvent {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub message: String,
    pub level: LogLevel,
    pub line: Option<u32>,
    pub file: Option<String>,
    pub application: Application,
}

/// Anything the handler can persist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "category", rename_all = "lowercase")]
pub enum EventRecord {
    Model(MutationEvent),
    Request(RequestEvent),
    Unspecified(UnspecifiedEvent),
}

impl EventRecord {
    pub fn category(&self) -> Category {
        match self {
            EventRecord::Model(_) => Category::Model,
            EventRecord::Request(_) => Category::Request,
            EventRecord::Unspecified(_) => Category::Unspecified,
        }
    }

    pub fn id(&self) -> Uuid {
        match self {
            EventRecord::Model(event) => event.id,
            EventRecord::Request(event) => event.id,
            EventRecord::Unspecified(event) => event.id,
        }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        match self {
            EventRecord::Model(event) => event.created_at,
            EventRecord::Request(event) => event.created_at,
            EventRecord::Unspecified(event) => event.created_at,
        }
    }

    pub fn as_mutation(&self) -> Option<&MutationEvent> {
        match self {
            EventRecord::Model(event) => Some(event),
            _ => None,
        }
    }
}

impl From<MutationEvent> for EventRecord {
    fn from(event: MutationEvent) -> Self {
        EventRecord::Model(event)
    }
}

impl From<RequestEvent> for EventRecord {
    fn from(event: RequestEvent) -> Self {
        EventRecord::Request(event)
    }
}

impl From<UnspecifiedEvent> for EventRecord {
    fn from(event: UnspecifiedEvent) -> Self {
        EventRecord::Unspecified(event)
    }
}
