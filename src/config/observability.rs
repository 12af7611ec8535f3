use serde::{Deserialize, Serialize};

/// Process-level log output for hosts that let the crate install the subscriber.
///
/// Not used by the engine itself; see [`crate::observability::init_tracing`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: FilterLevel,

    #[serde(default)]
    pub format: LogFormat,

    /// Include timestamps.
    #[serde(default = "default_true")]
    pub timestamps: bool,

    /// Include file/line information.
    #[serde(default)]
    pub file_line: bool,

    /// Extra filter directives (e.g., "sqlx=warn,autolog::handler=debug").
    #[serde(default)]
    pub filter: Option<String>,

    /// Forward host `tracing` events into the unspecified-log probe. When off,
    /// `init_tracing` does not install the audit layer it is given.
    #[serde(default)]
    pub capture_events: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: FilterLevel::default(),
            format: LogFormat::default(),
            timestamps: true,
            file_line: false,
            filter: None,
            capture_events: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl FilterLevel {
    pub fn as_directive(&self) -> &'static str {
        match self {
            FilterLevel::Trace => "trace",
            FilterLevel::Debug => "debug",
            FilterLevel::Info => "info",
            FilterLevel::Warn => "warn",
            FilterLevel::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable multi-line format.
    Pretty,
    /// Compact single-line format.
    #[default]
    Compact,
    /// One JSON object per line.
    Json,
}

fn default_true() -> bool {
    true
}
