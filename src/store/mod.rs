//! Persistence boundary for event graphs.
//!
//! The handler only needs three things from a store: open a transaction,
//! insert a batch of event graphs (getting-or-creating the mirrors they
//! reference), and delete a category's events older than a cutoff. Everything
//! written inside one transaction becomes visible together on commit.

mod error;
mod memory;
#[cfg(feature = "database-sqlite")]
mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
#[cfg(feature = "database-sqlite")]
pub use sqlite::SqliteStore;

use crate::models::{Category, EventRecord};

#[async_trait]
pub trait EventStore: Send + Sync {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTransaction>>;

    /// Short name used in logs and metrics.
    fn name(&self) -> &'static str;
}

#[async_trait]
pub trait StoreTransaction: Send {
    /// Insert events and get-or-create their mirrors. Returns the number of events written.
    async fn bulk_insert(&mut self, events: &[EventRecord]) -> StoreResult<usize>;

    /// Delete events of `category` created before `cutoff`. Returns the number deleted.
    async fn delete_older_than(
        &mut self,
        category: Category,
        cutoff: DateTime<Utc>,
    ) -> StoreResult<u64>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;

    async fn rollback(self: Box<Self>) -> StoreResult<()>;
}
