//! Typed configuration for the audit engine.
//!
//! The engine never reads files or the environment: the host hands over a TOML
//! string ([`AutologConfig::from_str`]) or a JSON value ([`AutologConfig::from_value`]).
//! Every section is optional and falls back to the defaults below.
//!
//! ```toml
//! modules = ["request", "model", "unspecified"]
//!
//! [globals.exclude]
//! applications = ["gl:session*", "pl:admin"]
//!
//! [model]
//! loglevel = "info"
//! max_age = "P90D"
//!
//! [model.exclude]
//! fields = ["password"]
//!
//! [handler]
//! batch = 50
//! background = true
//! ```
//!
//! Search patterns and durations are checked before typed deserialization so a bad
//! value is reported as [`ConfigError::InvalidPattern`] / [`ConfigError::InvalidDuration`]
//! naming the offending key.

mod duration;
mod handler;
mod level;
mod model;
mod observability;
mod request;
mod search;
mod unspecified;

use std::time::Duration;

pub use duration::{DurationError, format_iso8601, parse_iso8601};
pub use handler::HandlerConfig;
pub use level::LogLevel;
pub use model::{ModelConfig, ModelExclude};
pub use observability::{FilterLevel, LogFormat, LoggingConfig};
pub use request::{
    ContentType, DataDirection, MASKED_VALUE, RequestConfig, RequestDataConfig, RequestExclude,
};
pub use search::{PatternError, PatternKind, SearchPattern, candidate_in_scope, union_patterns};
use serde::{Deserialize, Serialize};
pub use unspecified::{UnspecifiedConfig, UnspecifiedExclude};

/// The three event categories. Each can be switched off through `modules`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Request,
    Model,
    Unspecified,
}

impl Category {
    pub const ALL: [Category; 3] = [Category::Request, Category::Model, Category::Unspecified];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Request => "request",
            Category::Model => "model",
            Category::Unspecified => "unspecified",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutologConfig {
    /// Enabled categories. Probes for a disabled category do nothing.
    #[serde(default = "default_modules")]
    pub modules: Vec<Category>,

    #[serde(default)]
    pub globals: GlobalsConfig,

    #[serde(default)]
    pub request: RequestConfig,

    #[serde(default)]
    pub model: ModelConfig,

    #[serde(default)]
    pub unspecified: UnspecifiedConfig,

    #[serde(default)]
    pub handler: HandlerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for AutologConfig {
    fn default() -> Self {
        Self {
            modules: default_modules(),
            globals: GlobalsConfig::default(),
            request: RequestConfig::default(),
            model: ModelConfig::default(),
            unspecified: UnspecifiedConfig::default(),
            handler: HandlerConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Settings applied to every category.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GlobalsConfig {
    #[serde(default)]
    pub exclude: GlobalsExclude,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalsExclude {
    /// Merged into each category's `exclude.applications` at resolution.
    #[serde(default = "default_global_applications")]
    pub applications: Vec<SearchPattern>,
}

impl Default for GlobalsExclude {
    fn default() -> Self {
        Self {
            applications: default_global_applications(),
        }
    }
}

/// Category exclude tables that carry an `applications` list.
pub trait ExcludeSet: Clone {
    fn applications(&self) -> &[SearchPattern];
    fn applications_mut(&mut self) -> &mut Vec<SearchPattern>;
}

/// Union the global application excludes into a category's excludes.
///
/// Idempotent: merging an already merged set changes nothing.
pub fn merge_excludes<E: ExcludeSet>(global: &GlobalsExclude, category: &E) -> E {
    let mut merged = category.clone();
    *merged.applications_mut() = union_patterns(category.applications(), &global.applications);
    merged
}

impl AutologConfig {
    /// Parse configuration from a TOML string.
    pub fn from_str(contents: &str) -> Result<Self, ConfigError> {
        let raw: toml::Value = toml::from_str(contents)?;
        check_values(&serde_json::to_value(&raw)?)?;

        let config: AutologConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Build configuration from an already parsed JSON value.
    pub fn from_value(value: serde_json::Value) -> Result<Self, ConfigError> {
        check_values(&value)?;

        let config: AutologConfig = serde_json::from_value(value)?;
        config.validate()?;
        Ok(config)
    }

    /// Cross-field checks that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.handler.batch == 0 {
            return Err(ConfigError::Validation(
                "handler.batch must be at least 1".into(),
            ));
        }

        let data = &self.request.data;
        let overlap: Vec<&str> = data
            .mask
            .iter()
            .filter(|key| data.ignore.contains(key))
            .map(String::as_str)
            .collect();
        if !overlap.is_empty() {
            return Err(ConfigError::Validation(format!(
                "request.data.mask and request.data.ignore share keys: {}",
                overlap.join(", ")
            )));
        }

        Ok(())
    }

    /// A copy with `globals.exclude` merged into every category.
    pub fn resolved(&self) -> Self {
        let mut resolved = self.clone();
        resolved.request.exclude = merge_excludes(&self.globals.exclude, &self.request.exclude);
        resolved.model.exclude = merge_excludes(&self.globals.exclude, &self.model.exclude);
        resolved.unspecified.exclude =
            merge_excludes(&self.globals.exclude, &self.unspecified.exclude);
        resolved
    }

    pub fn is_enabled(&self, category: Category) -> bool {
        self.modules.contains(&category)
    }

    pub fn max_age(&self, category: Category) -> Option<Duration> {
        match category {
            Category::Request => self.request.max_age,
            Category::Model => self.model.max_age,
            Category::Unspecified => self.unspecified.max_age,
        }
    }

    pub fn loglevel(&self, category: Category) -> LogLevel {
        match category {
            Category::Request => self.request.loglevel,
            Category::Model => self.model.loglevel,
            Category::Unspecified => self.unspecified.loglevel,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to read config value: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid duration for {field}: {source}")]
    InvalidDuration {
        field: String,
        #[source]
        source: DurationError,
    },

    #[error("Invalid search pattern in {field}: {source}")]
    InvalidPattern {
        field: String,
        #[source]
        source: PatternError,
    },

    #[error("Configuration validation error: {0}")]
    Validation(String),
}

const PATTERN_LISTS: &[&[&str]] = &[
    &["globals", "exclude", "applications"],
    &["request", "exclude", "applications"],
    &["model", "exclude", "applications"],
    &["model", "exclude", "models"],
    &["model", "exclude", "fields"],
    &["unspecified", "exclude", "applications"],
    &["unspecified", "exclude", "files"],
];

/// Check pattern and duration values before typed deserialization, so the
/// error names the key instead of surfacing as a generic serde message.
fn check_values(raw: &serde_json::Value) -> Result<(), ConfigError> {
    for path in PATTERN_LISTS {
        let Some(items) = lookup(raw, path).and_then(|v| v.as_array()) else {
            continue;
        };
        for item in items {
            let text = match item {
                serde_json::Value::String(text) => text.clone(),
                serde_json::Value::Object(table) => match (table.get("type"), table.get("value")) {
                    (Some(serde_json::Value::String(kind)), Some(serde_json::Value::String(value))) => {
                        format!("{kind}:{value}")
                    }
                    _ => continue,
                },
                _ => continue,
            };
            SearchPattern::parse(&text).map_err(|source| ConfigError::InvalidPattern {
                field: path.join("."),
                source,
            })?;
        }
    }

    for category in Category::ALL {
        let path = [category.as_str(), "max_age"];
        let invalid = |source| ConfigError::InvalidDuration {
            field: path.join("."),
            source,
        };
        match lookup(raw, &path) {
            Some(serde_json::Value::String(text)) => {
                parse_iso8601(text).map_err(invalid)?;
            }
            Some(serde_json::Value::Number(n)) if n.as_f64().is_some_and(|v| v < 0.0) => {
                return Err(invalid(DurationError::Negative));
            }
            _ => {}
        }
    }

    Ok(())
}

fn lookup<'a>(value: &'a serde_json::Value, path: &[&str]) -> Option<&'a serde_json::Value> {
    path.iter().try_fold(value, |current, key| current.get(key))
}

fn default_modules() -> Vec<Category> {
    Category::ALL.to_vec()
}

fn default_global_applications() -> Vec<SearchPattern> {
    let mut patterns = Vec::with_capacity(5);
    patterns.extend(SearchPattern::glob("session*"));
    for name in ["admin", "basehttp", "migrations", "contenttypes"] {
        patterns.extend(SearchPattern::plain(name));
    }
    patterns
}
