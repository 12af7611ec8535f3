use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};

use super::{ExcludeSet, LogLevel, SearchPattern, duration};

/// Request capture configuration (`[request]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestConfig {
    #[serde(default)]
    pub loglevel: LogLevel,

    #[serde(default)]
    pub exclude: RequestExclude,

    #[serde(default)]
    pub data: RequestDataConfig,

    /// Record the client address.
    #[serde(default = "default_true")]
    pub ip: bool,

    /// Log at info level when a finished request is excluded by the rules and
    /// therefore not recorded.
    #[serde(default = "default_true")]
    pub log_request_was_not_recorded: bool,

    #[serde(
        default,
        deserialize_with = "duration::deserialize",
        serialize_with = "duration::serialize"
    )]
    pub max_age: Option<Duration>,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            loglevel: LogLevel::default(),
            exclude: RequestExclude::default(),
            data: RequestDataConfig::default(),
            ip: true,
            log_request_was_not_recorded: true,
            max_age: None,
        }
    }
}

/// Which requests are never recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestExclude {
    /// Skip requests whose handler application cannot be determined.
    #[serde(default)]
    pub unknown: bool,

    #[serde(default)]
    pub applications: Vec<SearchPattern>,

    /// HTTP methods, compared case-insensitively.
    #[serde(default = "default_methods", deserialize_with = "lowercase_strings")]
    pub methods: Vec<String>,

    #[serde(default = "default_status")]
    pub status: Vec<u16>,
}

impl Default for RequestExclude {
    fn default() -> Self {
        Self {
            unknown: false,
            applications: Vec::new(),
            methods: default_methods(),
            status: default_status(),
        }
    }
}

impl ExcludeSet for RequestExclude {
    fn applications(&self) -> &[SearchPattern] {
        &self.applications
    }

    fn applications_mut(&mut self) -> &mut Vec<SearchPattern> {
        &mut self.applications
    }
}

/// Request/response body capture.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestDataConfig {
    /// Which bodies are captured. Empty disables capture.
    #[serde(default)]
    pub enabled: Vec<DataDirection>,

    /// Keep the query string in the recorded URI.
    #[serde(default)]
    pub query: bool,

    /// Top-level JSON keys removed from captured bodies.
    #[serde(default)]
    pub ignore: Vec<String>,

    /// Top-level JSON keys whose value is replaced by [`MASKED_VALUE`].
    #[serde(default = "default_mask")]
    pub mask: Vec<String>,

    /// Only bodies with one of these content types are captured.
    #[serde(default = "default_content_types")]
    pub content_types: Vec<ContentType>,
}

impl Default for RequestDataConfig {
    fn default() -> Self {
        Self {
            enabled: Vec::new(),
            query: false,
            ignore: Vec::new(),
            mask: default_mask(),
            content_types: default_content_types(),
        }
    }
}

impl RequestDataConfig {
    pub fn captures(&self, direction: DataDirection) -> bool {
        self.enabled.contains(&direction)
    }

    pub fn accepts(&self, content_type: &str) -> bool {
        // Ignore parameters such as `; charset=utf-8`.
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        self.content_types.iter().any(|ct| ct.as_str() == essence)
    }
}

/// Replacement text for masked body values.
pub const MASKED_VALUE: &str = "<REDACTED>";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataDirection {
    Request,
    Response,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContentType {
    #[serde(rename = "application/json")]
    Json,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Json => "application/json",
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_methods() -> Vec<String> {
    vec!["get".to_string()]
}

fn default_status() -> Vec<u16> {
    vec![200]
}

fn default_mask() -> Vec<String> {
    vec!["password".to_string()]
}

fn default_content_types() -> Vec<ContentType> {
    vec![ContentType::Json]
}

fn lowercase_strings<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    let values = Vec::<String>::deserialize(deserializer)?;
    Ok(values.into_iter().map(|v| v.to_lowercase()).collect())
}
