use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{ExcludeSet, LogLevel, SearchPattern, duration};

/// Capture of host log records (`[unspecified]`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnspecifiedConfig {
    /// Records below this level are dropped.
    #[serde(default)]
    pub loglevel: LogLevel,

    #[serde(default)]
    pub exclude: UnspecifiedExclude,

    #[serde(
        default,
        deserialize_with = "duration::deserialize",
        serialize_with = "duration::serialize"
    )]
    pub max_age: Option<Duration>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnspecifiedExclude {
    #[serde(default)]
    pub unknown: bool,

    /// Source file paths. Non-regex patterns also match trailing sub-paths,
    /// directory prefixes and single directory segments.
    #[serde(default)]
    pub files: Vec<SearchPattern>,

    #[serde(default)]
    pub applications: Vec<SearchPattern>,
}

impl ExcludeSet for UnspecifiedExclude {
    fn applications(&self) -> &[SearchPattern] {
        &self.applications
    }

    fn applications_mut(&mut self) -> &mut Vec<SearchPattern> {
        &mut self.applications
    }
}
