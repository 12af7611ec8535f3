//! Normalized inputs for the request and log probes.

use serde::{Deserialize, Serialize};

use crate::config::LogLevel;

/// A request or response body as seen by the transport layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Body {
    pub content: Vec<u8>,
    pub content_type: String,
}

impl Body {
    pub fn new(content: impl Into<Vec<u8>>, content_type: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            content_type: content_type.into(),
        }
    }

    pub fn json(value: &serde_json::Value) -> Self {
        Self::new(value.to_string(), "application/json")
    }
}

/// A finished request, normalized by the host's transport layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestInfo {
    pub method: String,
    /// Full URI including any query string.
    pub uri: String,
    pub status: u16,
    /// Dotted path of the handler that served the request (e.g. `shop.views.checkout`).
    /// The first segment is the owning application.
    pub handler: Option<String>,
    pub client_ip: Option<String>,
    pub request_body: Option<Body>,
    pub response_body: Option<Body>,
}

impl RequestInfo {
    pub fn new(method: impl Into<String>, uri: impl Into<String>, status: u16) -> Self {
        Self {
            method: method.into(),
            uri: uri.into(),
            status,
            handler: None,
            client_ip: None,
            request_body: None,
            response_body: None,
        }
    }

    pub fn handler(mut self, handler: impl Into<String>) -> Self {
        self.handler = Some(handler.into());
        self
    }

    pub fn client_ip(mut self, ip: impl Into<String>) -> Self {
        self.client_ip = Some(ip.into());
        self
    }

    pub fn request_body(mut self, body: Body) -> Self {
        self.request_body = Some(body);
        self
    }

    pub fn response_body(mut self, body: Body) -> Self {
        self.response_body = Some(body);
        self
    }

    pub fn application(&self) -> Option<&str> {
        self.handler
            .as_deref()
            .and_then(|handler| handler.split('.').next())
            .filter(|app| !app.is_empty())
    }

    /// The URI without its query string.
    pub fn path(&self) -> &str {
        self.uri.split_once('?').map_or(&self.uri, |(path, _)| path)
    }
}

/// A host log record offered to the unspecified-log probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    pub level: LogLevel,
    pub message: String,
    /// Source file path, as reported by the logger.
    pub file: Option<String>,
    pub line: Option<u32>,
    /// Dotted (or `::`-separated) module path of the emitter.
    pub module: Option<String>,
}

impl LogRecord {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            file: None,
            line: None,
            module: None,
        }
    }

    pub fn file(mut self, file: impl Into<String>) -> Self {
        self.file = Some(file.into());
        self
    }

    pub fn line(mut self, line: u32) -> Self {
        self.line = Some(line);
        self
    }

    pub fn module(mut self, module: impl Into<String>) -> Self {
        self.module = Some(module.into());
        self
    }
}
