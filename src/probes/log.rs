use chrono::Utc;
use uuid::Uuid;

use super::Engine;
use crate::{
    models::{Application, Category, EventRecord, LogRecord, UnspecifiedEvent},
    observability::metrics,
    rules::Candidate,
};

/// Whether a module path belongs to this crate.
pub(crate) fn is_own_module(module: &str) -> bool {
    module == "autolog" || module.starts_with("autolog::") || module.starts_with("autolog.")
}

impl Engine {
    /// Offer a host log record to the unspecified-log category.
    pub async fn on_log_record(&self, record: LogRecord) {
        let config = self.settings.snapshot();
        if !config.is_enabled(Category::Unspecified) {
            return;
        }
        if record.level < config.unspecified.loglevel {
            return;
        }
        if record.module.as_deref().is_some_and(is_own_module) {
            return;
        }

        let application = self.resolve_application(&record);
        let excluded = self.rules.should_exclude(
            &config,
            Candidate::Log {
                application: application.as_deref(),
                file: record.file.as_deref(),
            },
        );
        if excluded {
            metrics::record_exclusion(Category::Unspecified);
            return;
        }

        let event = UnspecifiedEvent {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            message: record.message,
            level: record.level,
            line: record.line,
            file: record.file,
            application: Application::new(application.as_deref()),
        };
        self.record(EventRecord::Unspecified(event), "log_record").await;
    }

    /// Known application closest to the emitting file, else the module's
    /// first segment when it names a known application.
    fn resolve_application(&self, record: &LogRecord) -> Option<String> {
        let known = self.applications.read();

        if let Some(file) = &record.file
            && let Some(part) = file
                .split(['/', '\\'])
                .filter(|part| known.contains(*part))
                .next_back()
        {
            return Some(part.to_string());
        }

        record
            .module
            .as_deref()
            .and_then(|module| module.split([':', '.']).next())
            .filter(|first| known.contains(*first))
            .map(str::to_string)
    }
}
