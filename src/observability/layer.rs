//! A `tracing` layer that offers host events to the unspecified-log probe.
//!
//! The layer never blocks: records go over an unbounded channel to a task
//! started with [`Engine::spawn_log_forwarder`](crate::probes::Engine::spawn_log_forwarder).
//! Events emitted by this crate are skipped so audit messages never loop back.

use std::fmt::Write as _;

use tokio::sync::mpsc;
use tracing::{
    Event, Subscriber,
    field::{Field, Visit},
};
use tracing_subscriber::{Layer, layer::Context};

use crate::{config::LogLevel, models::LogRecord, probes::is_own_module};

pub struct AuditLayer {
    sender: mpsc::UnboundedSender<LogRecord>,
}

impl AuditLayer {
    /// Create the layer and the receiving end to hand to the forwarder.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<LogRecord>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl<S> Layer<S> for AuditLayer
where
    S: Subscriber,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if is_own_module(metadata.target()) {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        let mut record = LogRecord::new(
            LogLevel::from_tracing_level(metadata.level()),
            visitor.finish(),
        )
        .module(metadata.target());
        if let Some(file) = metadata.file() {
            record = record.file(file);
        }
        if let Some(line) = metadata.line() {
            record = record.line(line);
        }

        // Receiver gone means the forwarder stopped; drop silently.
        let _ = self.sender.send(record);
    }
}

/// Collects the `message` field and appends the other fields as `key=value`.
#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: String,
}

impl MessageVisitor {
    fn push_field(&mut self, name: &str, value: impl std::fmt::Display) {
        if !self.fields.is_empty() {
            self.fields.push(' ');
        }
        let _ = write!(self.fields, "{name}={value}");
    }

    fn finish(self) -> String {
        match (self.message.is_empty(), self.fields.is_empty()) {
            (_, true) => self.message,
            (true, false) => self.fields,
            (false, false) => format!("{} {}", self.message, self.fields),
        }
    }
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            self.push_field(field.name(), format_args!("{value:?}"));
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.push_field(field.name(), value);
        }
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.push_field(field.name(), value);
    }
}
