//! End-to-end: an Informer driving a Store from a tiny in-memory client, with a Notifier
//! listener observing the resulting mutations (SPEC_FULL §8 scenario 6).

use async_trait::async_trait;
use cache_core::notifier::NotifyFilter;
use cache_core::{EncryptionManager, Informer, Notifier};
use clock::SystemProvider;
use futures::stream::{self, BoxStream, StreamExt};
use resource_model::{
    Document, FieldExtractor, FieldType, Item, KindId, Page, ResourceClient, Result, Schema, WatchEvent,
};
use std::collections::BTreeMap;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

fn widget(name: &str, color: &str) -> Document {
    let mut spec = BTreeMap::new();
    spec.insert("color".to_string(), Document::String(color.to_string()));
    let mut metadata = BTreeMap::new();
    metadata.insert("name".to_string(), Document::String(name.to_string()));
    let mut root = BTreeMap::new();
    root.insert("metadata".to_string(), Document::Map(metadata));
    root.insert("spec".to_string(), Document::Map(spec));
    Document::Map(root)
}

/// Lists one fixed page, then blocks its watch stream forever so the Informer sits in
/// *watching* until explicitly stopped instead of busy-looping through relist/rewatch.
#[derive(Debug)]
struct OneShotClient {
    revision: i64,
    items: Vec<Item>,
}

#[async_trait]
impl ResourceClient for OneShotClient {
    async fn list(&self, _limit: u32, _resume_token: Option<String>) -> Result<Page> {
        Ok(Page {
            items: self.items.clone(),
            revision: self.revision,
            next_resume_token: None,
        })
    }

    async fn watch(&self, _since_revision: i64) -> Result<BoxStream<'static, WatchEvent>> {
        Ok(stream::pending().boxed())
    }
}

fn schema() -> Arc<Schema> {
    Arc::new(
        Schema::new(KindId::new("", "v1", "Widget"), true)
            .with_field(FieldExtractor::new("spec.color", FieldType::String)),
    )
}

#[tokio::test]
async fn list_then_watch_populates_store_and_notifies_listener() {
    let schema = schema();
    let registry = metric::Registry::new();
    let encryption = Arc::new(EncryptionManager::new(150_000));
    let db = test_support::ScratchDb::new("widget_informer_test");
    let store = Arc::new(
        cache_core::Store::open(db.path(), Arc::clone(&schema), encryption, false, &registry)
            .await
            .expect("store opens"),
    );

    let client = OneShotClient {
        revision: 1,
        items: vec![
            Item {
                key: "default/red-widget".to_string(),
                revision: 1,
                document: widget("red-widget", "red"),
            },
            Item {
                key: "default/blue-widget".to_string(),
                revision: 1,
                document: widget("blue-widget", "blue"),
            },
        ],
    };

    let notifier = Arc::new(Notifier::new());
    let (tx, rx) = mpsc::channel();
    let _handle = notifier.register(
        NotifyFilter {
            name: Some("red-widget".into()),
            ..Default::default()
        },
        Duration::from_millis(20),
        move |event| {
            tx.send(event).expect("receiver gone");
        },
    );

    let informer = Arc::new(Informer::new(&registry));

    let task = {
        let informer = Arc::clone(&informer);
        let store = Arc::clone(&store);
        let notifier = Arc::clone(&notifier);
        tokio::spawn(async move {
            let clock = SystemProvider::new();
            informer.run("v1/Widget", &client, &store, 10, &clock, &notifier).await;
        })
    };

    for _ in 0..200 {
        if informer.has_synced() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(informer.has_synced(), "informer must reach synced within the test's budget");

    let stored = store.get("default/red-widget").await.expect("query succeeds");
    assert!(stored.is_some(), "listed item must be upserted into the store");

    tokio::time::sleep(Duration::from_millis(100)).await;
    let event = rx.try_recv().expect("listener should have been notified");
    assert!(event.keys.contains("default/red-widget"));
    assert!(!event.keys.contains("default/blue-widget"), "filter excludes non-matching keys");

    informer.stop();
    task.await.expect("informer task must not panic");
}

#[tokio::test]
async fn store_write_total_metric_increments_on_upsert() {
    let schema = schema();
    let registry = metric::Registry::new();
    let encryption = Arc::new(EncryptionManager::new(150_000));
    let db = test_support::ScratchDb::new("widget_metric_test");
    let store = cache_core::Store::open(db.path(), schema, encryption, false, &registry)
        .await
        .expect("store opens");

    store
        .upsert("default/red-widget", &widget("red-widget", "red"), 1)
        .await
        .expect("upsert succeeds");

    let metric: metric::Metric<metric::U64Counter> =
        registry.register_metric("store_write_total", "store mutations applied, by kind");
    assert_eq!(metric.recorder([("kind", "v1/Widget")]).fetch(), 1);
}
