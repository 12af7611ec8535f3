use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Sqlite, SqlitePool, Transaction};

use super::{EventStore, StoreResult, StoreTransaction};
use crate::models::{
    Application, Category, EntityEntry, EntityMirror, EventRecord, FieldMirror, MutationEvent,
    RequestEvent, UnspecifiedEvent,
};

/// Rows removed per statement when sweeping expired events.
const DELETE_BATCH_SIZE: i64 = 1000;

fn table_for(category: Category) -> &'static str {
    match category {
        Category::Model => "model_events",
        Category::Request => "request_events",
        Category::Unspecified => "unspecified_events",
    }
}

#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open a pool for `url` (e.g. `sqlite://audit.db?mode=rwc` or `sqlite::memory:`).
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect(url)
            .await?;
        Ok(Self::new(pool))
    }

    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations_sqlx/sqlite")
            .run(&self.pool)
            .await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Number of committed events in `category`.
    pub async fn count(&self, category: Category) -> StoreResult<i64> {
        let query = format!("SELECT COUNT(*) FROM {}", table_for(category));
        let count: i64 = sqlx::query_scalar(&query).fetch_one(&self.pool).await?;
        Ok(count)
    }
}

#[async_trait]
impl EventStore for SqliteStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTransaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(SqliteTransaction { tx }))
    }

    fn name(&self) -> &'static str {
        "sqlite"
    }
}

struct SqliteTransaction {
    tx: Transaction<'static, Sqlite>,
}

impl SqliteTransaction {
    async fn upsert_application(&mut self, application: &Application) -> StoreResult<()> {
        sqlx::query("INSERT OR IGNORE INTO applications (id, name) VALUES (?, ?)")
            .bind(application.id.to_string())
            .bind(&application.name)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn upsert_entity(&mut self, mirror: &EntityMirror) -> StoreResult<()> {
        self.upsert_application(&mirror.application).await?;
        sqlx::query("INSERT OR IGNORE INTO entity_mirrors (id, name, application_id) VALUES (?, ?, ?)")
            .bind(mirror.id.to_string())
            .bind(&mirror.name)
            .bind(mirror.application.id.to_string())
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn upsert_field(&mut self, field: &FieldMirror) -> StoreResult<()> {
        self.upsert_entity(&field.mirror).await?;
        sqlx::query(
            r#"
            INSERT INTO field_mirrors (id, name, entity_mirror_id, type_label)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET type_label = excluded.type_label
            "#,
        )
        .bind(field.id.to_string())
        .bind(&field.name)
        .bind(field.mirror.id.to_string())
        .bind(&field.type_label)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn insert_entry(
        &mut self,
        event_id: &str,
        entry: &EntityEntry,
        is_subject: bool,
    ) -> StoreResult<()> {
        self.upsert_entity(&entry.mirror).await?;
        sqlx::query(
            r#"
            INSERT INTO entity_entries (id, event_id, mirror_id, primary_key, value, is_subject)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(entry.id.to_string())
        .bind(event_id)
        .bind(entry.mirror.id.to_string())
        .bind(&entry.primary_key)
        .bind(&entry.value)
        .bind(is_subject)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn insert_mutation(&mut self, event: &MutationEvent) -> StoreResult<()> {
        let id = event.id.to_string();
        let snapshot = event
            .snapshot
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let duration_us = event
            .duration
            .map(|d| i64::try_from(d.as_micros()).unwrap_or(i64::MAX));

        sqlx::query(
            r#"
            INSERT INTO model_events (id, created_at, operation, actor, snapshot, duration_us)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(event.created_at.timestamp_micros())
        .bind(event.operation.as_str())
        .bind(&event.actor)
        .bind(snapshot)
        .bind(duration_us)
        .execute(&mut *self.tx)
        .await?;

        self.insert_entry(&id, &event.entry, true).await?;

        for (position, modification) in event.modifications.iter().enumerate() {
            self.upsert_field(&modification.field).await?;
            sqlx::query(
                r#"
                INSERT INTO value_modifications (event_id, position, operation, field_id, previous, current)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&id)
            .bind(position as i64)
            .bind(modification.operation.as_str())
            .bind(modification.field.id.to_string())
            .bind(&modification.previous)
            .bind(&modification.current)
            .execute(&mut *self.tx)
            .await?;
        }

        for (position, relationship) in event.relationships.iter().enumerate() {
            self.upsert_field(&relationship.field).await?;
            self.insert_entry(&id, &relationship.entry, false).await?;
            sqlx::query(
                r#"
                INSERT INTO relationship_modifications (event_id, position, operation, field_id, entry_id)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(&id)
            .bind(position as i64)
            .bind(relationship.operation.as_str())
            .bind(relationship.field.id.to_string())
            .bind(relationship.entry.id.to_string())
            .execute(&mut *self.tx)
            .await?;
        }

        Ok(())
    }

    async fn insert_request(&mut self, event: &RequestEvent) -> StoreResult<()> {
        self.upsert_application(&event.application).await?;
        sqlx::query(
            r#"
            INSERT INTO request_events (
                id, created_at, actor, uri, status, method, application_id, client_ip,
                request_content, request_content_type, response_content, response_content_type
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(event.id.to_string())
        .bind(event.created_at.timestamp_micros())
        .bind(&event.actor)
        .bind(&event.uri)
        .bind(i64::from(event.status))
        .bind(&event.method)
        .bind(event.application.id.to_string())
        .bind(&event.client_ip)
        .bind(event.request.as_ref().map(|c| c.content.as_str()))
        .bind(event.request.as_ref().map(|c| c.content_type.as_str()))
        .bind(event.response.as_ref().map(|c| c.content.as_str()))
        .bind(event.response.as_ref().map(|c| c.content_type.as_str()))
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn insert_unspecified(&mut self, event: &UnspecifiedEvent) -> StoreResult<()> {
        self.upsert_application(&event.application).await?;
        sqlx::query(
            r#"
            INSERT INTO unspecified_events (id, created_at, message, level, line, file, application_id)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(event.id.to_string())
        .bind(event.created_at.timestamp_micros())
        .bind(&event.message)
        .bind(i64::from(event.level.value()))
        .bind(event.line.map(i64::from))
        .bind(&event.file)
        .bind(event.application.id.to_string())
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl StoreTransaction for SqliteTransaction {
    async fn bulk_insert(&mut self, events: &[EventRecord]) -> StoreResult<usize> {
        for event in events {
            match event {
                EventRecord::Model(event) => self.insert_mutation(event).await?,
                EventRecord::Request(event) => self.insert_request(event).await?,
                EventRecord::Unspecified(event) => self.insert_unspecified(event).await?,
            }
        }
        Ok(events.len())
    }

    async fn delete_older_than(
        &mut self,
        category: Category,
        cutoff: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let table = table_for(category);
        let query = format!(
            "DELETE FROM {table} WHERE id IN (SELECT id FROM {table} WHERE created_at < ? LIMIT ?)"
        );
        let cutoff = cutoff.timestamp_micros();
        let mut total_deleted: u64 = 0;

        loop {
            let result = sqlx::query(&query)
                .bind(cutoff)
                .bind(DELETE_BATCH_SIZE)
                .execute(&mut *self.tx)
                .await?;

            let rows_deleted = result.rows_affected();
            total_deleted += rows_deleted;

            if rows_deleted < DELETE_BATCH_SIZE as u64 {
                break;
            }
        }

        Ok(total_deleted)
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
