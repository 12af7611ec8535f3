//! Versioned configuration snapshots.
//!
//! [`Settings`] keeps the configuration as the host handed it over (the *source*)
//! and a resolved [`ConfigSnapshot`] derived from it. Resolution validates the
//! source and merges the global excludes into every category. Readers take an
//! `Arc` to the current snapshot and keep using it for the whole operation; edits
//! to the source only become visible after [`Settings::invalidate`].
//!
//! Versions come from a process-wide counter, so two snapshots never share a
//! version even when they belong to different `Settings`.

use std::{
    ops::Deref,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use parking_lot::RwLock;

use crate::config::{AutologConfig, ConfigError};

static NEXT_VERSION: AtomicU64 = AtomicU64::new(1);

fn next_version() -> u64 {
    NEXT_VERSION.fetch_add(1, Ordering::Relaxed)
}

/// A resolved, immutable configuration tagged with the version it was built as.
#[derive(Debug)]
pub struct ConfigSnapshot {
    version: u64,
    config: AutologConfig,
}

impl ConfigSnapshot {
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn config(&self) -> &AutologConfig {
        &self.config
    }
}

impl Deref for ConfigSnapshot {
    type Target = AutologConfig;

    fn deref(&self) -> &Self::Target {
        &self.config
    }
}

pub struct Settings {
    source: RwLock<AutologConfig>,
    current: RwLock<Arc<ConfigSnapshot>>,
}

impl Settings {
    pub fn new(config: AutologConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let snapshot = ConfigSnapshot {
            version: next_version(),
            config: config.resolved(),
        };
        Ok(Self {
            source: RwLock::new(config),
            current: RwLock::new(Arc::new(snapshot)),
        })
    }

    pub fn from_str(contents: &str) -> Result<Self, ConfigError> {
        Self::new(AutologConfig::from_str(contents)?)
    }

    /// The snapshot currently in effect.
    pub fn snapshot(&self) -> Arc<ConfigSnapshot> {
        self.current.read().clone()
    }

    pub fn version(&self) -> u64 {
        self.current.read().version
    }

    /// Edit the source configuration. Takes effect on the next [`invalidate`](Self::invalidate).
    pub fn update<F>(&self, edit: F)
    where
        F: FnOnce(&mut AutologConfig),
    {
        edit(&mut self.source.write());
    }

    /// Swap the source configuration. Takes effect on the next [`invalidate`](Self::invalidate).
    pub fn replace(&self, config: AutologConfig) {
        *self.source.write() = config;
    }

    /// Re-resolve the source into a new snapshot.
    ///
    /// On error the previous snapshot stays in effect and the version is unchanged.
    pub fn invalidate(&self) -> Result<Arc<ConfigSnapshot>, ConfigError> {
        let source = self.source.read().clone();
        source.validate()?;

        let version = next_version();
        let snapshot = Arc::new(ConfigSnapshot {
            version,
            config: source.resolved(),
        });
        *self.current.write() = snapshot.clone();

        tracing::debug!(version, "Configuration re-resolved");
        Ok(snapshot)
    }
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("version", &self.version())
            .finish_non_exhaustive()
    }
}
