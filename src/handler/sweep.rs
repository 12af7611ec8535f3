use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

use crate::{
    models::Category,
    observability::metrics,
    settings::ConfigSnapshot,
    store::{StoreResult, StoreTransaction},
};

/// Rows removed by one retention sweep, per category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepResult {
    pub model_deleted: u64,
    pub request_deleted: u64,
    pub unspecified_deleted: u64,
}

impl SweepResult {
    pub fn deleted(&self, category: Category) -> u64 {
        match category {
            Category::Model => self.model_deleted,
            Category::Request => self.request_deleted,
            Category::Unspecified => self.unspecified_deleted,
        }
    }

    fn set(&mut self, category: Category, deleted: u64) {
        match category {
            Category::Model => self.model_deleted = deleted,
            Category::Request => self.request_deleted = deleted,
            Category::Unspecified => self.unspecified_deleted = deleted,
        }
    }

    /// Total number of events deleted across all categories.
    pub fn total(&self) -> u64 {
        self.model_deleted + self.request_deleted + self.unspecified_deleted
    }

    pub fn has_deletions(&self) -> bool {
        self.total() > 0
    }
}

/// Oldest timestamp kept for a category with the given max age.
///
/// Returns `None` when the age is too large to represent, which keeps everything.
pub fn cutoff(now: DateTime<Utc>, max_age: Duration) -> Option<DateTime<Utc>> {
    let age = TimeDelta::from_std(max_age).ok()?;
    now.checked_sub_signed(age)
}

/// Delete expired events of every category that has a `max_age`, inside `tx`.
pub(crate) async fn sweep(
    tx: &mut dyn StoreTransaction,
    config: &ConfigSnapshot,
    now: DateTime<Utc>,
) -> StoreResult<SweepResult> {
    let mut result = SweepResult::default();

    for category in Category::ALL {
        let Some(max_age) = config.max_age(category) else {
            continue;
        };
        let Some(cutoff) = cutoff(now, max_age) else {
            continue;
        };

        let deleted = tx.delete_older_than(category, cutoff).await?;
        if deleted > 0 {
            tracing::debug!(
                category = category.as_str(),
                deleted,
                cutoff = %cutoff,
                "Deleted expired events"
            );
        }
        metrics::record_retention_deletion(category, deleted);
        result.set(category, deleted);
    }

    Ok(result)
}
