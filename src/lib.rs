//! Change tracking and audit logging.
//!
//! The host reports entity mutations, finished requests and log records to an
//! [`Engine`]. The engine filters them through the configured exclusion rules,
//! builds normalized event graphs, and hands them to a batching handler that
//! persists each batch in one store transaction followed by a retention sweep.

pub mod config;
pub mod diff;
pub mod events;
pub mod handler;
pub mod models;
pub mod observability;
pub mod probes;
pub mod rules;
pub mod settings;
pub mod store;

#[cfg(test)]
mod tests;

pub use config::{AutologConfig, ConfigError};
pub use events::AuditContext;
pub use probes::{Engine, RelationAction};
pub use settings::Settings;
