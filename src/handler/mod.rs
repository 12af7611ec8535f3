//! Batching persistence handler.
//!
//! Events are appended to a single in-memory buffer. Once the buffer reaches
//! the configured batch threshold the whole buffer is swapped out as one
//! *generation* and written in a single store transaction, together with the
//! retention sweep of every category that has a `max_age`.
//!
//! In background mode the generation is handed to a spawned tokio task and
//! [`BatchingHandler::record`] returns immediately. Order within a generation is
//! preserved; the order in which concurrent generations commit is not.
//!
//! A failed flush rolls back and puts the generation back at the front of the
//! buffer, so the next flush retries it.

mod sweep;

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
pub use sweep::{SweepResult, cutoff};
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::{
    models::EventRecord,
    observability::metrics,
    settings::{ConfigSnapshot, Settings},
    store::{EventStore, StoreError, StoreResult, StoreTransaction},
};

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("Failed to persist {events} buffered events: {source}")]
    Persistence {
        events: usize,
        #[source]
        source: StoreError,
    },
}

/// Outcome of one flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub events: usize,
    pub swept: SweepResult,
}

#[derive(Debug, Default)]
struct HandlerStats {
    flushes: AtomicU64,
    failures: AtomicU64,
    persisted: AtomicU64,
}

pub struct BatchingHandler {
    store: Arc<dyn EventStore>,
    settings: Arc<Settings>,
    buffer: Arc<Mutex<Vec<EventRecord>>>,
    in_flight: Mutex<Vec<JoinHandle<()>>>,
    stats: Arc<HandlerStats>,
}

impl BatchingHandler {
    pub fn new(store: Arc<dyn EventStore>, settings: Arc<Settings>) -> Self {
        Self {
            store,
            settings,
            buffer: Arc::new(Mutex::new(Vec::new())),
            in_flight: Mutex::new(Vec::new()),
            stats: Arc::new(HandlerStats::default()),
        }
    }

    /// Number of events waiting in the buffer.
    pub fn pending(&self) -> usize {
        self.buffer.lock().len()
    }

    /// Successful flushes so far.
    pub fn flushes(&self) -> u64 {
        self.stats.flushes.load(Ordering::Relaxed)
    }

    /// Failed flushes so far.
    pub fn failures(&self) -> u64 {
        self.stats.failures.load(Ordering::Relaxed)
    }

    /// Events committed so far.
    pub fn persisted(&self) -> u64 {
        self.stats.persisted.load(Ordering::Relaxed)
    }

    /// Buffer an event and flush if the batch threshold is reached.
    pub async fn record(&self, event: EventRecord) -> Result<(), HandlerError> {
        self.buffer.lock().push(event);
        self.flush_if_due().await.map(|_| ())
    }

    /// Flush when the buffer holds at least the batch threshold.
    ///
    /// Returns the report of a synchronous flush. Background flushes and
    /// below-threshold calls return `None`.
    pub async fn flush_if_due(&self) -> Result<Option<FlushReport>, HandlerError> {
        let snapshot = self.settings.snapshot();
        let threshold = snapshot.handler.batch.max(1);

        let generation = {
            let mut buffer = self.buffer.lock();
            if buffer.len() < threshold {
                return Ok(None);
            }
            std::mem::take(&mut *buffer)
        };

        if snapshot.handler.background {
            self.spawn_flush(generation, snapshot);
            return Ok(None);
        }

        self.flush_generation(generation, &snapshot).await.map(Some)
    }

    /// Flush everything buffered now, regardless of the threshold.
    pub async fn flush(&self) -> Result<FlushReport, HandlerError> {
        let generation = std::mem::take(&mut *self.buffer.lock());
        if generation.is_empty() {
            return Ok(FlushReport::default());
        }
        let snapshot = self.settings.snapshot();
        self.flush_generation(generation, &snapshot).await
    }

    /// Delete expired events of every category with a `max_age`, in its own transaction.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<SweepResult, HandlerError> {
        let snapshot = self.settings.snapshot();
        sweep_in_transaction(&*self.store, &snapshot, now)
            .await
            .map_err(|source| {
                tracing::error!(store = self.store.name(), error = %source, "Retention sweep failed");
                HandlerError::Persistence { events: 0, source }
            })
    }

    /// Wait for background flushes, then drain the buffer synchronously.
    pub async fn shutdown(&self) -> Result<FlushReport, HandlerError> {
        let handles = std::mem::take(&mut *self.in_flight.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Background flush task panicked");
            }
        }
        self.flush().await
    }

    fn spawn_flush(&self, generation: Vec<EventRecord>, snapshot: Arc<ConfigSnapshot>) {
        let store = self.store.clone();
        let buffer = self.buffer.clone();
        let stats = self.stats.clone();

        let handle = tokio::spawn(async move {
            // Errors are already logged and counted; the generation is back in the buffer.
            let _ = persist(&*store, &buffer, &stats, generation, &snapshot).await;
        });

        let mut in_flight = self.in_flight.lock();
        in_flight.retain(|handle| !handle.is_finished());
        in_flight.push(handle);
    }

    async fn flush_generation(
        &self,
        generation: Vec<EventRecord>,
        snapshot: &ConfigSnapshot,
    ) -> Result<FlushReport, HandlerError> {
        persist(&*self.store, &self.buffer, &self.stats, generation, snapshot).await
    }
}

impl std::fmt::Debug for BatchingHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchingHandler")
            .field("store", &self.store.name())
            .field("pending", &self.pending())
            .finish_non_exhaustive()
    }
}

/// Write one generation plus the retention sweep in a single transaction.
async fn persist(
    store: &dyn EventStore,
    buffer: &Mutex<Vec<EventRecord>>,
    stats: &HandlerStats,
    generation: Vec<EventRecord>,
    snapshot: &ConfigSnapshot,
) -> Result<FlushReport, HandlerError> {
    let events = generation.len();
    tracing::debug!(store = store.name(), events, "Flushing audit events");

    match write_generation(store, &generation, snapshot).await {
        Ok(swept) => {
            stats.flushes.fetch_add(1, Ordering::Relaxed);
            stats.persisted.fetch_add(events as u64, Ordering::Relaxed);
            metrics::record_flush(store.name(), events, true);
            metrics::set_backlog(store.name(), buffer.lock().len());
            Ok(FlushReport { events, swept })
        }
        Err(source) => {
            stats.failures.fetch_add(1, Ordering::Relaxed);
            metrics::record_flush(store.name(), events, false);
            let backlog = requeue(buffer, generation);
            metrics::set_backlog(store.name(), backlog);
            tracing::error!(
                store = store.name(),
                events,
                backlog,
                error = %source,
                "Failed to flush audit events, keeping them buffered"
            );
            Err(HandlerError::Persistence { events, source })
        }
    }
}

async fn write_generation(
    store: &dyn EventStore,
    generation: &[EventRecord],
    snapshot: &ConfigSnapshot,
) -> StoreResult<SweepResult> {
    let mut tx = store.begin().await?;

    let written = match tx.bulk_insert(generation).await {
        Ok(_) => sweep::sweep(tx.as_mut(), snapshot, Utc::now()).await,
        Err(e) => Err(e),
    };

    match written {
        Ok(swept) => {
            tx.commit().await?;
            Ok(swept)
        }
        Err(e) => {
            rollback_quietly(tx).await;
            Err(e)
        }
    }
}

async fn sweep_in_transaction(
    store: &dyn EventStore,
    snapshot: &ConfigSnapshot,
    now: DateTime<Utc>,
) -> StoreResult<SweepResult> {
    let mut tx = store.begin().await?;
    match sweep::sweep(tx.as_mut(), snapshot, now).await {
        Ok(result) => {
            tx.commit().await?;
            Ok(result)
        }
        Err(e) => {
            rollback_quietly(tx).await;
            Err(e)
        }
    }
}

async fn rollback_quietly(tx: Box<dyn StoreTransaction>) {
    if let Err(e) = tx.rollback().await {
        tracing::warn!(error = %e, "Rollback failed");
    }
}

/// Put a failed generation back in front of anything buffered since.
/// Returns the buffer length afterwards.
fn requeue(buffer: &Mutex<Vec<EventRecord>>, mut generation: Vec<EventRecord>) -> usize {
    let mut buffer = buffer.lock();
    generation.append(&mut buffer);
    *buffer = generation;
    buffer.len()
}

#[cfg(test)]
mod tests {
    use std::{collections::HashSet, time::Duration};

    use chrono::TimeDelta;
    use rstest::rstest;

    use super::*;
    use crate::{
        config::AutologConfig,
        models::{Application, Category, LogLevel, UnspecifiedEvent},
        store::MemoryStore,
    };

    fn log_event(message: &str) -> EventRecord {
        UnspecifiedEvent {
            id: uuid::Uuid::new_v4(),
            created_at: Utc::now(),
            message: message.to_string(),
            level: LogLevel::INFO,
            line: None,
            file: None,
            application: Application::unknown(),
        }
        .into()
    }

    fn handler_with(
        edit: impl FnOnce(&mut AutologConfig),
    ) -> (BatchingHandler, MemoryStore) {
        let mut config = AutologConfig::default();
        edit(&mut config);
        let store = MemoryStore::new();
        let settings = Arc::new(Settings::new(config).unwrap());
        (
            BatchingHandler::new(Arc::new(store.clone()), settings),
            store,
        )
    }

    fn messages(store: &MemoryStore) -> Vec<String> {
        store
            .events()
            .into_iter()
            .filter_map(|event| match event {
                EventRecord::Unspecified(event) => Some(event.message),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_threshold_triggers_single_transaction() {
        let (handler, store) = handler_with(|c| c.handler.batch = 10);

        for i in 0..9 {
            handler.record(log_event(&i.to_string())).await.unwrap();
        }
        assert_eq!(store.transactions(), 0);
        assert_eq!(handler.pending(), 9);

        handler.record(log_event("9")).await.unwrap();
        assert_eq!(store.transactions(), 1);
        assert_eq!(store.count(Category::Unspecified), 10);
        assert_eq!(handler.pending(), 0);

        // Order within a generation is preserved.
        let expected: Vec<String> = (0..10).map(|i| i.to_string()).collect();
        assert_eq!(messages(&store), expected);
    }

    #[tokio::test]
    async fn test_failed_flush_requeues_at_front() {
        let (handler, store) = handler_with(|c| c.handler.batch = 2);
        store.fail_next_commits(1);

        handler.record(log_event("a")).await.unwrap();
        let err = handler.record(log_event("b")).await.unwrap_err();
        assert!(matches!(err, HandlerError::Persistence { events: 2, .. }));
        assert_eq!(handler.pending(), 2);
        assert_eq!(handler.failures(), 1);

        handler.record(log_event("c")).await.unwrap();
        assert_eq!(messages(&store), vec!["a", "b", "c"]);
        assert_eq!(handler.persisted(), 3);
    }

    #[tokio::test]
    async fn test_flush_forces_below_threshold() {
        let (handler, store) = handler_with(|c| c.handler.batch = 100);
        handler.record(log_event("a")).await.unwrap();

        let report = handler.flush().await.unwrap();
        assert_eq!(report.events, 1);
        assert_eq!(store.count(Category::Unspecified), 1);

        // Nothing buffered: no transaction.
        handler.flush().await.unwrap();
        assert_eq!(store.transactions(), 1);
    }

    #[tokio::test]
    async fn test_flush_sweeps_expired_in_same_transaction() {
        let (handler, store) = handler_with(|c| {
            c.unspecified.max_age = Some(Duration::from_secs(86_400));
        });
        let mut old = log_event("old");
        if let EventRecord::Unspecified(event) = &mut old {
            event.created_at = Utc::now() - TimeDelta::days(2);
        }
        store.seed([old]);

        handler.record(log_event("new")).await.unwrap();

        assert_eq!(store.transactions(), 1);
        assert_eq!(messages(&store), vec!["new"]);
    }

    #[tokio::test]
    async fn test_sweep_expired() {
        let (handler, store) = handler_with(|c| {
            c.request.max_age = Some(Duration::from_secs(86_400));
            c.unspecified.max_age = Some(Duration::from_secs(86_400));
        });
        let now = Utc::now();
        let mut expired = log_event("expired");
        let mut recent = log_event("recent");
        if let EventRecord::Unspecified(event) = &mut expired {
            event.created_at = now - TimeDelta::days(2);
        }
        if let EventRecord::Unspecified(event) = &mut recent {
            event.created_at = now - TimeDelta::hours(1);
        }
        store.seed([expired, recent]);

        let result = handler.sweep_expired(now).await.unwrap();
        assert_eq!(result.unspecified_deleted, 1);
        assert_eq!(result.total(), 1);
        assert_eq!(messages(&store), vec!["recent"]);
    }

    #[tokio::test]
    async fn test_background_generations_may_commit_out_of_order() {
        let (handler, store) = handler_with(|c| c.handler.background = true);
        let gate = store.hold_next_commit();

        handler.record(log_event("first")).await.unwrap();
        handler.record(log_event("second")).await.unwrap();
        assert_eq!(handler.pending(), 0);

        // The first generation's commit is held; the second one lands first.
        while store.commits() < 1 {
            tokio::task::yield_now().await;
        }
        assert_eq!(messages(&store), vec!["second"]);

        gate.notify_one();
        handler.shutdown().await.unwrap();
        assert_eq!(messages(&store), vec!["second", "first"]);
    }

    #[tokio::test]
    async fn test_background_failure_is_logged_and_requeued() {
        let (handler, store) = handler_with(|c| c.handler.background = true);
        store.fail_next_commits(1);

        handler.record(log_event("a")).await.unwrap();
        let report = handler.shutdown().await.unwrap();

        assert_eq!(handler.failures(), 1);
        assert_eq!(report.events, 1);
        assert_eq!(messages(&store), vec!["a"]);
    }

    #[tokio::test]
    async fn test_backlog_grows_until_flush_succeeds() {
        let (handler, store) = handler_with(|c| c.handler.batch = 1);
        store.fail_next_commits(3);

        for (n, message) in ["a", "b", "c"].into_iter().enumerate() {
            let err = handler.record(log_event(message)).await.unwrap_err();
            let HandlerError::Persistence { events, .. } = err;
            assert_eq!(events, n + 1);
            assert_eq!(handler.pending(), n + 1);
        }

        handler.record(log_event("d")).await.unwrap();
        assert_eq!(handler.pending(), 0);
        assert_eq!(handler.failures(), 3);
        assert_eq!(messages(&store), vec!["a", "b", "c", "d"]);
    }

    #[rstest]
    #[case::sync(false)]
    #[case::background(true)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_records_are_each_stored_once(#[case] background: bool) {
        let (handler, store) = handler_with(|c| {
            c.handler.batch = 7;
            c.handler.background = background;
        });
        let handler = Arc::new(handler);

        let tasks: Vec<_> = (0..8)
            .map(|task| {
                let handler = handler.clone();
                tokio::spawn(async move {
                    for n in 0..100 {
                        handler
                            .record(log_event(&format!("{task}-{n}")))
                            .await
                            .unwrap();
                    }
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }
        handler.shutdown().await.unwrap();

        let events = store.events();
        assert_eq!(events.len(), 800);
        let ids: HashSet<_> = events
            .iter()
            .filter_map(|event| match event {
                EventRecord::Unspecified(event) => Some(event.id),
                _ => None,
            })
            .collect();
        assert_eq!(ids.len(), 800);
        assert_eq!(handler.pending(), 0);
    }
}
