//! In-process store.
//!
//! Keeps committed events and mirrors behind a mutex. Staged writes are applied
//! atomically on commit and discarded on rollback. Test builds also get two
//! knobs for the handler's failure and ordering paths: failing the next N
//! commits, and holding the next transaction's commit until released.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::Notify;
use uuid::Uuid;

use super::{EventStore, StoreError, StoreResult, StoreTransaction};
use crate::models::{Application, Category, EntityMirror, EventRecord, FieldMirror};

#[derive(Debug, Default)]
struct MemoryState {
    applications: HashMap<Uuid, Application>,
    entity_mirrors: HashMap<Uuid, EntityMirror>,
    field_mirrors: HashMap<Uuid, FieldMirror>,
    events: Vec<EventRecord>,
}

impl MemoryState {
    fn upsert_application(&mut self, application: &Application) {
        self.applications
            .entry(application.id)
            .or_insert_with(|| application.clone());
    }

    fn upsert_entity(&mut self, mirror: &EntityMirror) {
        self.upsert_application(&mirror.application);
        self.entity_mirrors
            .entry(mirror.id)
            .or_insert_with(|| mirror.clone());
    }

    fn upsert_field(&mut self, field: &FieldMirror) {
        self.upsert_entity(&field.mirror);
        self.field_mirrors
            .entry(field.id)
            .and_modify(|stored| {
                if stored.type_label != field.type_label {
                    stored.type_label = field.type_label.clone();
                }
            })
            .or_insert_with(|| field.clone());
    }

    fn upsert_mirrors(&mut self, event: &EventRecord) {
        match event {
            EventRecord::Model(event) => {
                self.upsert_entity(&event.entry.mirror);
                for modification in &event.modifications {
                    self.upsert_field(&modification.field);
                }
                for relationship in &event.relationships {
                    self.upsert_field(&relationship.field);
                    self.upsert_entity(&relationship.entry.mirror);
                }
            }
            EventRecord::Request(event) => self.upsert_application(&event.application),
            EventRecord::Unspecified(event) => self.upsert_application(&event.application),
        }
    }
}

#[derive(Debug, Default)]
struct MemoryInner {
    state: Mutex<MemoryState>,
    begun: AtomicUsize,
    commits: AtomicUsize,
    rollbacks: AtomicUsize,
    failing_commits: AtomicUsize,
    commit_gate: Mutex<Option<Arc<Notify>>>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` commits fail with [`StoreError::Unavailable`].
    #[cfg(test)]
    pub fn fail_next_commits(&self, count: usize) {
        self.inner.failing_commits.store(count, Ordering::SeqCst);
    }

    /// Hold the commit of the next transaction until the returned handle is notified.
    #[cfg(test)]
    pub fn hold_next_commit(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.inner.commit_gate.lock() = Some(gate.clone());
        gate
    }

    pub fn events(&self) -> Vec<EventRecord> {
        self.inner.state.lock().events.clone()
    }

    pub fn events_of(&self, category: Category) -> Vec<EventRecord> {
        self.inner
            .state
            .lock()
            .events
            .iter()
            .filter(|event| event.category() == category)
            .cloned()
            .collect()
    }

    pub fn count(&self, category: Category) -> usize {
        self.events_of(category).len()
    }

    pub fn field_mirror(&self, id: Uuid) -> Option<FieldMirror> {
        self.inner.state.lock().field_mirrors.get(&id).cloned()
    }

    pub fn entity_mirror_count(&self) -> usize {
        self.inner.state.lock().entity_mirrors.len()
    }

    pub fn application_count(&self) -> usize {
        self.inner.state.lock().applications.len()
    }

    /// Transactions opened so far.
    pub fn transactions(&self) -> usize {
        self.inner.begun.load(Ordering::SeqCst)
    }

    pub fn commits(&self) -> usize {
        self.inner.commits.load(Ordering::SeqCst)
    }

    pub fn rollbacks(&self) -> usize {
        self.inner.rollbacks.load(Ordering::SeqCst)
    }

    /// Insert events directly, bypassing transactions. For seeding old rows.
    pub fn seed(&self, events: impl IntoIterator<Item = EventRecord>) {
        let mut state = self.inner.state.lock();
        for event in events {
            state.upsert_mirrors(&event);
            state.events.push(event);
        }
    }
}

#[async_trait]
impl EventStore for MemoryStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTransaction>> {
        self.inner.begun.fetch_add(1, Ordering::SeqCst);
        let gate = self.inner.commit_gate.lock().take();
        Ok(Box::new(MemoryTransaction {
            inner: self.inner.clone(),
            staged: Vec::new(),
            gate,
        }))
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[derive(Debug)]
enum StagedOp {
    Insert(Vec<EventRecord>),
    Delete(Category, DateTime<Utc>),
}

struct MemoryTransaction {
    inner: Arc<MemoryInner>,
    staged: Vec<StagedOp>,
    gate: Option<Arc<Notify>>,
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn bulk_insert(&mut self, events: &[EventRecord]) -> StoreResult<usize> {
        self.staged.push(StagedOp::Insert(events.to_vec()));
        Ok(events.len())
    }

    async fn delete_older_than(
        &mut self,
        category: Category,
        cutoff: DateTime<Utc>,
    ) -> StoreResult<u64> {
        // Count what would go: committed rows plus rows staged earlier in this transaction.
        let committed = self
            .inner
            .state
            .lock()
            .events
            .iter()
            .filter(|e| e.category() == category && e.created_at() < cutoff)
            .count();
        let staged = self
            .staged
            .iter()
            .filter_map(|op| match op {
                StagedOp::Insert(events) => Some(events),
                StagedOp::Delete(..) => None,
            })
            .flatten()
            .filter(|e| e.category() == category && e.created_at() < cutoff)
            .count();
        self.staged.push(StagedOp::Delete(category, cutoff));
        Ok((committed + staged) as u64)
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let MemoryTransaction {
            inner,
            staged,
            gate,
        } = *self;

        if let Some(gate) = gate {
            gate.notified().await;
        }

        let failing = inner
            .failing_commits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            inner.rollbacks.fetch_add(1, Ordering::SeqCst);
            return Err(StoreError::Unavailable("injected commit failure".into()));
        }

        {
            let mut state = inner.state.lock();
            for op in staged {
                match op {
                    StagedOp::Insert(events) => {
                        for event in events {
                            state.upsert_mirrors(&event);
                            state.events.push(event);
                        }
                    }
                    StagedOp::Delete(category, cutoff) => {
                        state
                            .events
                            .retain(|e| e.category() != category || e.created_at() >= cutoff);
                    }
                }
            }
        }
        inner.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        self.inner.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
