//! End-to-end scenarios driving the engine through its probes into a store.

use std::{sync::Arc, time::Duration};

use chrono::{TimeDelta, Utc};
use rstest::rstest;
use uuid::Uuid;

use crate::{
    AutologConfig, Engine,
    config::SearchPattern,
    models::{
        Application, Category, EntityType, EventRecord, Instance, LogLevel, LogRecord,
        MutationEvent, Operation, UnspecifiedEvent,
    },
    store::MemoryStore,
};

fn engine_with(toml: &str) -> (Engine, MemoryStore) {
    let config = AutologConfig::from_str(toml).unwrap();
    let store = MemoryStore::new();
    let engine = Engine::new(config, Arc::new(store.clone())).unwrap();
    (engine, store)
}

fn sample_type() -> Arc<EntityType> {
    Arc::new(
        EntityType::new("Sample")
            .module("lab.models")
            .application("lab")
            .field("random", "CharField")
            .field("other", "IntegerField"),
    )
}

fn mutations(store: &MemoryStore) -> Vec<MutationEvent> {
    store
        .events_of(Category::Model)
        .into_iter()
        .filter_map(|event| match event {
            EventRecord::Model(event) => Some(event),
            _ => None,
        })
        .collect()
}

fn log_event(message: &str, age: TimeDelta) -> EventRecord {
    EventRecord::Unspecified(UnspecifiedEvent {
        id: Uuid::new_v4(),
        created_at: Utc::now() - age,
        message: message.into(),
        level: LogLevel::ERROR,
        line: None,
        file: None,
        application: Application::unknown(),
    })
}

#[tokio::test]
async fn test_create_records_one_event() {
    let (engine, store) = engine_with("");
    let mut ctx = engine.context(Some("alice".into()));

    let sample = Instance::new(sample_type()).with_value("random", "abc");
    engine.on_before_save(&mut ctx, &sample, None);
    let sample = sample.with_primary_key("1");
    engine.on_after_save(&mut ctx, &sample, true, None);
    engine.complete(&mut ctx).await;

    let events = mutations(&store);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].operation, Operation::Create);
    assert_eq!(events[0].actor.as_deref(), Some("alice"));
    assert_eq!(events[0].entry.primary_key, "1");
    assert_eq!(events[0].modifications.len(), 1);
    let modification = &events[0].modifications[0];
    assert_eq!(modification.field.name, "random");
    assert_eq!(modification.previous, None);
    assert_eq!(modification.current.as_deref(), Some("abc"));
}

#[rstest]
#[case::recorded("", 1)]
#[case::field_excluded("[model.exclude]\nfields = [\"random\"]", 0)]
#[case::qualified_field_excluded("[model.exclude]\nfields = [\"plain:Sample.random\"]", 0)]
#[case::model_excluded("[model.exclude]\nmodels = [\"lab.Sample\"]", 0)]
#[tokio::test]
async fn test_modify_single_field(#[case] toml: &str, #[case] expected: usize) {
    let (engine, store) = engine_with(toml);
    let mut ctx = engine.context(None);

    let prior = Instance::new(sample_type())
        .with_primary_key("1")
        .with_value("random", "abc")
        .with_value("other", 5);
    let post = prior.clone().with_value("random", "def");
    engine.on_before_save(&mut ctx, &post, Some(&prior));
    engine.on_after_save(&mut ctx, &post, false, None);
    engine.complete(&mut ctx).await;

    let events = mutations(&store);
    assert_eq!(events.len(), expected);
    if let Some(event) = events.first() {
        assert_eq!(event.operation, Operation::Modify);
        assert_eq!(event.modifications.len(), 1);
        assert_eq!(event.modifications[0].field.name, "random");
        assert_eq!(event.modifications[0].previous.as_deref(), Some("abc"));
        assert_eq!(event.modifications[0].current.as_deref(), Some("def"));
    }
}

#[tokio::test]
async fn test_delete_records_event_without_modifications() {
    let (engine, store) = engine_with("");
    let mut ctx = engine.context(None);
    let sample = Instance::new(sample_type())
        .with_primary_key("9")
        .with_value("random", "abc");

    engine.on_after_delete(&mut ctx, &sample);
    engine.complete(&mut ctx).await;

    let events = mutations(&store);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].operation, Operation::Delete);
    assert!(events[0].modifications.is_empty());
    assert_eq!(events[0].entry.value, "Sample object (9)");
}

#[tokio::test]
async fn test_contexts_do_not_share_events() {
    let (engine, store) = engine_with("");
    let mut first = engine.context(Some("alice".into()));
    let mut second = engine.context(Some("bob".into()));

    let prior = Instance::new(sample_type())
        .with_primary_key("1")
        .with_value("random", "a");
    let post = prior.clone().with_value("random", "b");
    engine.on_before_save(&mut first, &post, Some(&prior));
    engine.on_before_save(&mut second, &post, Some(&prior));
    engine.on_after_save(&mut first, &post, false, None);

    // `second` never reached its after-save probe.
    assert_eq!(first.events().len(), 1);
    assert!(second.events().is_empty());

    engine.complete(&mut first).await;
    engine.complete(&mut second).await;
    let actors: Vec<_> = mutations(&store)
        .into_iter()
        .map(|event| event.actor)
        .collect();
    assert_eq!(actors, vec![Some("alice".to_string())]);
}

#[tokio::test]
async fn test_batch_threshold_through_engine() {
    let (engine, store) = engine_with("[handler]\nbatch = 10");

    for n in 0..9 {
        engine
            .on_log_record(LogRecord::new(LogLevel::ERROR, format!("record {n}")))
            .await;
    }
    assert_eq!(store.transactions(), 0);
    assert_eq!(engine.handler().pending(), 9);

    engine
        .on_log_record(LogRecord::new(LogLevel::ERROR, "record 9"))
        .await;
    assert_eq!(store.transactions(), 1);
    assert_eq!(store.count(Category::Unspecified), 10);
    assert_eq!(engine.handler().pending(), 0);
}

#[tokio::test]
async fn test_retention_keeps_recent_events() {
    let (engine, store) = engine_with("[unspecified]\nmax_age = \"P1D\"");
    store.seed([
        log_event("old", TimeDelta::days(2)),
        log_event("recent", TimeDelta::hours(1)),
    ]);

    let result = engine.handler().sweep_expired(Utc::now()).await.unwrap();
    assert_eq!(result.deleted(Category::Unspecified), 1);

    let remaining: Vec<_> = store
        .events_of(Category::Unspecified)
        .into_iter()
        .filter_map(|event| match event {
            EventRecord::Unspecified(event) => Some(event.message),
            _ => None,
        })
        .collect();
    assert_eq!(remaining, vec!["recent".to_string()]);
}

#[tokio::test]
async fn test_unspecified_max_age_expires_between_records() {
    let (engine, store) = engine_with("[unspecified]\nmax_age = \"PT1S\"");

    engine
        .on_log_record(LogRecord::new(LogLevel::ERROR, "first"))
        .await;
    assert_eq!(store.count(Category::Unspecified), 1);

    tokio::time::sleep(Duration::from_secs(2)).await;
    engine
        .on_log_record(LogRecord::new(LogLevel::ERROR, "second"))
        .await;

    let messages: Vec<_> = store
        .events_of(Category::Unspecified)
        .into_iter()
        .filter_map(|event| match event {
            EventRecord::Unspecified(event) => Some(event.message),
            _ => None,
        })
        .collect();
    assert_eq!(messages, vec!["second".to_string()]);
}

#[tokio::test]
async fn test_config_invalidation_changes_decisions() {
    let (engine, store) = engine_with("");
    let sample = Instance::new(sample_type()).with_value("random", "abc");

    let mut ctx = engine.context(None);
    engine.on_before_save(&mut ctx, &sample, None);
    engine.on_after_save(&mut ctx, &sample, true, None);
    engine.complete(&mut ctx).await;
    assert_eq!(mutations(&store).len(), 1);

    engine.settings().update(|config| {
        config.model.exclude.applications = vec![SearchPattern::plain("lab").unwrap()];
    });
    engine.invalidate_config().unwrap();

    let mut ctx = engine.context(None);
    engine.on_before_save(&mut ctx, &sample, None);
    engine.on_after_save(&mut ctx, &sample, true, None);
    engine.complete(&mut ctx).await;
    assert_eq!(mutations(&store).len(), 1);
}

#[cfg(feature = "database-sqlite")]
mod sqlite {
    use super::*;
    use crate::{RelationAction, store::SqliteStore};

    async fn engine_with(toml: &str) -> (Engine, SqliteStore) {
        let store = SqliteStore::connect("sqlite::memory:").await.unwrap();
        store.migrate().await.unwrap();
        let config = AutologConfig::from_str(toml).unwrap();
        let engine = Engine::new(config, Arc::new(store.clone())).unwrap();
        (engine, store)
    }

    #[tokio::test]
    async fn test_mutation_graph_persisted() {
        let (engine, store) = engine_with("").await;
        let mut ctx = engine.context(Some("alice".into()));

        let owner_type = Arc::new(
            EntityType::new("Order")
                .application("shop")
                .field("total", "IntegerField")
                .field("lines", "ManyToManyField"),
        );
        let line = Instance::new(Arc::new(EntityType::new("Line").application("shop")))
            .with_primary_key("3");
        let order = Instance::new(owner_type).with_value("total", 10);

        engine.on_before_save(&mut ctx, &order, None);
        let order = order.with_primary_key("1");
        engine.on_after_save(&mut ctx, &order, true, None);
        engine.on_relationship_changed(&mut ctx, &order, "lines", &[line], RelationAction::Add);
        engine.complete(&mut ctx).await;

        assert_eq!(store.count(Category::Model).await.unwrap(), 1);
        let modifications: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM value_modifications")
            .fetch_one(store.pool())
            .await
            .unwrap();
        let relationships: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM relationship_modifications")
                .fetch_one(store.pool())
                .await
                .unwrap();
        assert_eq!((modifications, relationships), (1, 1));
    }

    #[tokio::test]
    async fn test_unspecified_max_age_expires_between_records() {
        let (engine, store) = engine_with("[unspecified]\nmax_age = \"PT1S\"").await;

        engine
            .on_log_record(LogRecord::new(LogLevel::ERROR, "first"))
            .await;
        tokio::time::sleep(Duration::from_secs(2)).await;
        engine
            .on_log_record(LogRecord::new(LogLevel::ERROR, "second"))
            .await;

        assert_eq!(store.count(Category::Unspecified).await.unwrap(), 1);
        let message: String = sqlx::query_scalar("SELECT message FROM unspecified_events")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(message, "second");
    }
}
