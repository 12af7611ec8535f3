use chrono::Utc;
use uuid::Uuid;

use super::{Engine, emit};
use crate::{
    config::{DataDirection, LogLevel, MASKED_VALUE, RequestDataConfig},
    events::AuditContext,
    models::{
        Application, Body, Category, EventRecord, LogRecord, RequestContext, RequestEvent,
        RequestInfo,
    },
    observability::metrics,
    rules::Candidate,
};

impl Engine {
    /// Terminal probe of a request: records the context's mutation events, then
    /// the request itself unless it is excluded.
    pub async fn on_request_finished(&self, ctx: &mut AuditContext, info: &RequestInfo) {
        self.complete(ctx).await;

        let config = self.settings.snapshot();
        if !config.is_enabled(Category::Request) {
            return;
        }

        let application = info.application();
        let excluded = self.rules.should_exclude(
            &config,
            Candidate::Request {
                handler: info.handler.as_deref(),
                method: &info.method,
                application,
                status: info.status,
            },
        );
        if excluded {
            metrics::record_exclusion(Category::Request);
            if config.request.log_request_was_not_recorded {
                tracing::info!(
                    method = %info.method,
                    status = info.status,
                    "Request was excluded and not recorded"
                );
            }
            return;
        }

        let data = &config.request.data;
        let uri = if data.query {
            info.uri.clone()
        } else {
            info.path().to_string()
        };
        let client_ip = if config.request.ip {
            info.client_ip.clone()
        } else {
            None
        };

        let event = RequestEvent {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            actor: ctx.actor().map(str::to_string),
            uri,
            status: info.status,
            method: info.method.to_uppercase(),
            application: Application::new(application),
            client_ip,
            request: capture(data, DataDirection::Request, info.request_body.as_ref()),
            response: capture(data, DataDirection::Response, info.response_body.as_ref()),
        };

        let from = event
            .client_ip
            .as_deref()
            .map(|ip| format!(" from {ip}"))
            .unwrap_or_default();
        emit(
            config.request.loglevel,
            &format!(
                "[{}] [{}] {} at {}{}",
                event.method,
                event.status,
                event.actor.as_deref().unwrap_or("Anonymous"),
                event.uri,
                from
            ),
        );

        self.record(EventRecord::Request(event), "request_finished").await;
    }

    /// A request that ended in an error. The failure itself is recorded as a
    /// log event (CRITICAL up to status 500, WARNING above), then the request
    /// is finished as usual.
    pub async fn on_request_failed(&self, ctx: &mut AuditContext, info: &RequestInfo, error: &str) {
        let level = if info.status <= 500 {
            LogLevel::CRITICAL
        } else {
            LogLevel::WARNING
        };
        let message = format!(
            "[{}] [{}] Exception: {}",
            info.method.to_uppercase(),
            info.status,
            if error.is_empty() { "UNKNOWN" } else { error }
        );
        emit(level, &message);

        let mut record = LogRecord::new(level, message);
        if let Some(handler) = &info.handler {
            record = record.module(handler.as_str());
        }
        self.on_log_record(record).await;

        self.on_request_finished(ctx, info).await;
    }
}

/// Render a captured body, or `None` when the direction is not captured or the
/// body is not an accepted, well-formed JSON document.
fn capture(
    data: &RequestDataConfig,
    direction: DataDirection,
    body: Option<&Body>,
) -> Option<RequestContext> {
    let body = body?;
    if !data.captures(direction) || !data.accepts(&body.content_type) {
        return None;
    }

    let mut value: serde_json::Value = match serde_json::from_slice(&body.content) {
        Ok(value) => value,
        Err(e) => {
            tracing::debug!(error = %e, ?direction, "Body is not valid JSON, not captured");
            return None;
        }
    };
    if let Some(object) = value.as_object_mut() {
        for key in &data.ignore {
            object.remove(key);
        }
        for key in &data.mask {
            if let Some(slot) = object.get_mut(key) {
                *slot = serde_json::Value::String(MASKED_VALUE.to_string());
            }
        }
    }

    Some(RequestContext {
        content: value.to_string(),
        content_type: body.content_type.clone(),
    })
}
