//! The host-facing engine.
//!
//! [`Engine`] wires the configuration, the rule engine and the batching handler
//! together and exposes the probe callbacks the host calls. Mutation probes only
//! touch the [`AuditContext`]; the terminal probes ([`Engine::complete`],
//! [`Engine::on_request_finished`]) hand the built events to the handler.
//!
//! Probes never fail the host's operation. Persistence errors are logged and
//! counted, and the affected events stay buffered for the next flush.

mod log;
mod mutation;
mod request;

use std::{collections::HashSet, sync::Arc};

#[cfg(feature = "subscriber")]
pub(crate) use log::is_own_module;
pub use mutation::RelationAction;
use parking_lot::RwLock;
use tokio::{sync::mpsc, task::JoinHandle};

use crate::{
    config::{AutologConfig, ConfigError, LogLevel},
    events::AuditContext,
    handler::{BatchingHandler, FlushReport, HandlerError},
    models::{EventRecord, LogRecord},
    observability::metrics,
    rules::{Override, RuleEngine},
    settings::Settings,
    store::EventStore,
};

/// Target of the messages the engine itself emits.
pub const AUDIT_TARGET: &str = "autolog::audit";

pub struct Engine {
    settings: Arc<Settings>,
    rules: RuleEngine,
    handler: BatchingHandler,
    applications: RwLock<HashSet<String>>,
}

impl Engine {
    pub fn new(config: AutologConfig, store: Arc<dyn EventStore>) -> Result<Self, ConfigError> {
        Ok(Self::with_settings(Arc::new(Settings::new(config)?), store))
    }

    pub fn with_settings(settings: Arc<Settings>, store: Arc<dyn EventStore>) -> Self {
        Self {
            handler: BatchingHandler::new(store, settings.clone()),
            settings,
            rules: RuleEngine::new(),
            applications: RwLock::new(HashSet::new()),
        }
    }

    pub fn settings(&self) -> &Arc<Settings> {
        &self.settings
    }

    pub fn rules(&self) -> &RuleEngine {
        &self.rules
    }

    pub fn handler(&self) -> &BatchingHandler {
        &self.handler
    }

    /// Start a context for one logical operation.
    pub fn context(&self, actor: Option<String>) -> AuditContext {
        AuditContext::new(actor)
    }

    /// Make an application name known to the log probe's origin resolution.
    pub fn register_application(&self, name: impl Into<String>) {
        self.applications.write().insert(name.into());
    }

    pub fn register_exclusion(&self, identity: impl Into<String>, value: impl Into<Override>) {
        self.rules.registry().register_exclusion(identity, value);
    }

    pub fn register_inclusion(&self, identity: impl Into<String>, value: impl Into<Override>) {
        self.rules.registry().register_inclusion(identity, value);
    }

    pub fn unregister(&self, identity: &str) {
        self.rules.registry().unregister(identity);
    }

    /// Re-resolve the configuration and drop memoized rule decisions.
    pub fn invalidate_config(&self) -> Result<(), ConfigError> {
        self.settings.invalidate()?;
        self.rules.invalidate();
        Ok(())
    }

    /// Terminal probe for contexts that are not tied to a request: hands every
    /// built mutation event to the handler.
    pub async fn complete(&self, ctx: &mut AuditContext) {
        for event in ctx.take_events() {
            if event.is_empty_modification() {
                continue;
            }
            self.record(EventRecord::Model(event), "complete").await;
        }
    }

    pub async fn flush(&self) -> Result<FlushReport, HandlerError> {
        self.handler.flush().await
    }

    /// Wait for background flushes and drain the buffer.
    pub async fn shutdown(&self) -> Result<FlushReport, HandlerError> {
        tracing::info!("Audit engine shutting down");
        self.handler.shutdown().await
    }

    /// Feed records from a log sink (e.g. [`AuditLayer`](crate::observability::AuditLayer))
    /// into [`on_log_record`](Self::on_log_record) until the sender side closes.
    pub fn spawn_log_forwarder(
        self: &Arc<Self>,
        mut receiver: mpsc::UnboundedReceiver<LogRecord>,
    ) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(record) = receiver.recv().await {
                engine.on_log_record(record).await;
            }
            tracing::debug!("Log forwarder stopped");
        })
    }

    async fn record(&self, event: EventRecord, probe: &'static str) {
        if let Err(e) = self.handler.record(event).await {
            metrics::record_probe_failure(probe);
            tracing::error!(probe, error = %e, "Audit event not persisted yet");
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("settings", &self.settings)
            .field("handler", &self.handler)
            .finish_non_exhaustive()
    }
}

/// Emit an audit message at a configured level.
fn emit(level: LogLevel, message: &str) {
    let level = level.to_tracing_level();
    if level == tracing::Level::ERROR {
        tracing::error!(target: AUDIT_TARGET, "{message}");
    } else if level == tracing::Level::WARN {
        tracing::warn!(target: AUDIT_TARGET, "{message}");
    } else if level == tracing::Level::INFO {
        tracing::info!(target: AUDIT_TARGET, "{message}");
    } else if level == tracing::Level::DEBUG {
        tracing::debug!(target: AUDIT_TARGET, "{message}");
    } else {
        tracing::trace!(target: AUDIT_TARGET, "{message}");
    }
}
