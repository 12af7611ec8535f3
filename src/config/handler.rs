use serde::{Deserialize, Serialize};

/// Batching persistence settings (`[handler]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandlerConfig {
    /// Number of buffered events that triggers a flush. Must be at least 1.
    #[serde(default = "default_batch")]
    pub batch: usize,

    /// Flush on a spawned tokio task instead of the recording caller.
    #[serde(default, alias = "threading")]
    pub background: bool,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            batch: default_batch(),
            background: false,
        }
    }
}

fn default_batch() -> usize {
    1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config: HandlerConfig = toml::from_str("").unwrap();
        assert_eq!(config.batch, 1);
        assert!(!config.background);
    }

    #[test]
    fn test_threading_alias() {
        let config: HandlerConfig = toml::from_str("batch = 10\nthreading = true").unwrap();
        assert_eq!(config.batch, 10);
        assert!(config.background);
    }
}
