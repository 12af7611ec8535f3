//! Metric recording functions.
//!
//! Counters and gauges are emitted through the `metrics` facade when the `prometheus`
//! feature is enabled; installing a recorder is left to the host. Without the
//! feature every function compiles to a no-op.

#[cfg(feature = "prometheus")]
use metrics::{counter, gauge};

use crate::models::Category;

/// Record a flush attempt of `events` buffered events.
pub fn record_flush(store: &str, events: usize, success: bool) {
    #[cfg(feature = "prometheus")]
    {
        let outcome = if success { "success" } else { "failure" };
        counter!("autolog_flushes_total", "store" => store.to_string(), "outcome" => outcome)
            .increment(1);
        if success {
            counter!("autolog_events_persisted_total", "store" => store.to_string())
                .increment(events as u64);
        }
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (store, events, success);
    }
}

/// Record rows removed by a retention sweep.
pub fn record_retention_deletion(category: Category, deleted: u64) {
    #[cfg(feature = "prometheus")]
    {
        if deleted > 0 {
            counter!("autolog_retention_deleted_total", "category" => category.as_str())
                .increment(deleted);
        }
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (category, deleted);
    }
}

/// Record an event that was dropped or skipped because the engine failed internally.
pub fn record_probe_failure(probe: &'static str) {
    #[cfg(feature = "prometheus")]
    {
        counter!("autolog_probe_failures_total", "probe" => probe).increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = probe;
    }
}

/// Record a candidate the rule engine excluded.
pub fn record_exclusion(category: Category) {
    #[cfg(feature = "prometheus")]
    {
        counter!("autolog_events_excluded_total", "category" => category.as_str()).increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = category;
    }
}

/// Update the number of events waiting in the handler buffer, including
/// generations kept after a failed flush.
pub fn set_backlog(store: &str, pending: usize) {
    #[cfg(feature = "prometheus")]
    gauge!("autolog_buffered_events", "store" => store.to_string()).set(pending as f64);
    #[cfg(not(feature = "prometheus"))]
    let _ = (store, pending);
}
