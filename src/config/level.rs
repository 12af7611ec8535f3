use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

/// Numeric severity level, 0 (`notset`) through 50 (`critical`).
///
/// Accepts either the number or one of the level names in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LogLevel(u8);

impl LogLevel {
    pub const NOTSET: LogLevel = LogLevel(0);
    pub const DEBUG: LogLevel = LogLevel(10);
    pub const INFO: LogLevel = LogLevel(20);
    pub const WARNING: LogLevel = LogLevel(30);
    pub const ERROR: LogLevel = LogLevel(40);
    pub const CRITICAL: LogLevel = LogLevel(50);

    pub const MAX: u8 = 50;

    pub fn new(value: u8) -> Option<Self> {
        (value <= Self::MAX).then_some(Self(value))
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "notset" => Some(Self::NOTSET),
            "debug" => Some(Self::DEBUG),
            "info" => Some(Self::INFO),
            "warning" | "warn" => Some(Self::WARNING),
            "error" => Some(Self::ERROR),
            "critical" | "fatal" => Some(Self::CRITICAL),
            _ => None,
        }
    }

    pub fn value(self) -> u8 {
        self.0
    }

    pub fn name(self) -> &'static str {
        match self.0 {
            0..=9 => "notset",
            10..=19 => "debug",
            20..=29 => "info",
            30..=39 => "warning",
            40..=49 => "error",
            _ => "critical",
        }
    }

    /// Closest `tracing` level. `notset` maps to TRACE.
    pub fn to_tracing_level(self) -> tracing::Level {
        match self.0 {
            0..=9 => tracing::Level::TRACE,
            10..=19 => tracing::Level::DEBUG,
            20..=29 => tracing::Level::INFO,
            30..=39 => tracing::Level::WARN,
            _ => tracing::Level::ERROR,
        }
    }

    pub fn from_tracing_level(level: &tracing::Level) -> Self {
        match *level {
            tracing::Level::TRACE => Self::NOTSET,
            tracing::Level::DEBUG => Self::DEBUG,
            tracing::Level::INFO => Self::INFO,
            tracing::Level::WARN => Self::WARNING,
            tracing::Level::ERROR => Self::ERROR,
        }
    }
}

impl Default for LogLevel {
    fn default() -> Self {
        Self::INFO
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl Serialize for LogLevel {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.0)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawLevel {
    Number(i64),
    Name(String),
}

impl<'de> Deserialize<'de> for LogLevel {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match RawLevel::deserialize(deserializer)? {
            RawLevel::Number(n) => u8::try_from(n)
                .ok()
                .and_then(LogLevel::new)
                .ok_or_else(|| de::Error::custom(format!("loglevel {n} is outside 0..=50"))),
            RawLevel::Name(name) => LogLevel::from_name(&name)
                .ok_or_else(|| de::Error::custom(format!("unknown loglevel '{name}'"))),
        }
    }
}
