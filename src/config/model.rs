use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{ExcludeSet, LogLevel, SearchPattern, duration};

/// Entity mutation tracking (`[model]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default)]
    pub loglevel: LogLevel,

    #[serde(default)]
    pub exclude: ModelExclude,

    /// Append the list of modifications to the emitted log message.
    #[serde(default = "default_true")]
    pub detailed_message: bool,

    /// Measure the time between the before- and after-save probes.
    #[serde(default)]
    pub performance: bool,

    /// Attach the full post-save field mapping to each event.
    #[serde(default)]
    pub snapshot: bool,

    #[serde(
        default,
        deserialize_with = "duration::deserialize",
        serialize_with = "duration::serialize"
    )]
    pub max_age: Option<Duration>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            loglevel: LogLevel::default(),
            exclude: ModelExclude::default(),
            detailed_message: true,
            performance: false,
            snapshot: false,
            max_age: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelExclude {
    /// Skip entity types that do not belong to a named application.
    #[serde(default)]
    pub unknown: bool,

    /// Matched against `field`, `Type.field` and `application.Type.field`.
    #[serde(default)]
    pub fields: Vec<SearchPattern>,

    /// Matched against `Type`, `module.Type`, `application.Type` and the bare module.
    #[serde(default)]
    pub models: Vec<SearchPattern>,

    #[serde(default)]
    pub applications: Vec<SearchPattern>,
}

impl ExcludeSet for ModelExclude {
    fn applications(&self) -> &[SearchPattern] {
        &self.applications
    }

    fn applications_mut(&mut self) -> &mut Vec<SearchPattern> {
        &mut self.applications
    }
}

fn default_true() -> bool {
    true
}
