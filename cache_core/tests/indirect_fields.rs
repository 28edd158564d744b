//! An indirect (foreign-key-joined) field resolves through a real `ATTACH`+`JOIN` against the
//! foreign kind's own database file (SPEC_FULL §4.2).

use cache_core::{EncryptionManager, Store};
use resource_model::field::IndirectField;
use resource_model::{Document, Filter, FieldExtractor, FieldType, KindId, ListOptions, OrFilter, Partition, Schema};
use std::collections::BTreeMap;
use std::sync::Arc;

fn widget_schema() -> Arc<Schema> {
    Arc::new(
        Schema::new(KindId::new("", "v1", "Widget"), true)
            .with_field(FieldExtractor::new("spec.color", FieldType::String)),
    )
}

fn part_schema(widget_kind: &str) -> Arc<Schema> {
    Arc::new(
        Schema::new(KindId::new("", "v1", "Part"), false)
            .with_field(FieldExtractor::new("spec.widgetRef", FieldType::String))
            .with_indirect_field(IndirectField {
                name: "widgetColor".to_string(),
                foreign_kind: widget_kind.to_string(),
                local_field: "spec.widgetRef".to_string(),
                local_field_is_label: false,
                foreign_match_field: "key".to_string(),
                foreign_projected_field: "spec.color".to_string(),
            }),
    )
}

fn widget_doc(color: &str) -> Document {
    let mut spec = BTreeMap::new();
    spec.insert("color".to_string(), Document::String(color.to_string()));
    let mut root = BTreeMap::new();
    root.insert("spec".to_string(), Document::Map(spec));
    Document::Map(root)
}

fn part_doc(widget_ref: &str) -> Document {
    let mut spec = BTreeMap::new();
    spec.insert("widgetRef".to_string(), Document::String(widget_ref.to_string()));
    let mut root = BTreeMap::new();
    root.insert("spec".to_string(), Document::Map(spec));
    Document::Map(root)
}

/// Both Stores must share one directory: `Store::sibling_db_path` assumes the same
/// sibling-file-per-kind layout `CacheFactory` uses, deriving the foreign file from the local
/// Store's own parent directory.
async fn open_stores() -> (Arc<Store>, Arc<Store>) {
    let dir = tempfile::tempdir().expect("tempdir");
    let registry = metric::Registry::new();
    let encryption = Arc::new(EncryptionManager::new(150_000));

    let widget_schema = widget_schema();
    let widget_path = dir.path().join(format!("{}.db", widget_schema.kind.sanitized()));
    let widget_store = Arc::new(
        Store::open(&widget_path, Arc::clone(&widget_schema), Arc::clone(&encryption), false, &registry)
            .await
            .expect("widget store opens"),
    );

    let part_schema = part_schema(&widget_schema.kind.sanitized());
    let part_path = dir.path().join(format!("{}.db", part_schema.kind.sanitized()));
    let part_store = Arc::new(
        Store::open(&part_path, part_schema, encryption, false, &registry)
            .await
            .expect("part store opens"),
    );

    (widget_store, part_store)
}

#[tokio::test]
async fn indirect_filter_joins_across_attached_kind() {
    let (widgets, parts) = open_stores().await;

    widgets.upsert("default/red-widget", &widget_doc("red"), 1).await.expect("upsert widget");
    widgets.upsert("default/blue-widget", &widget_doc("blue"), 1).await.expect("upsert widget");

    parts.upsert("part-a", &part_doc("default/red-widget"), 1).await.expect("upsert part");
    parts.upsert("part-b", &part_doc("default/blue-widget"), 1).await.expect("upsert part");

    let mut options = ListOptions::all();
    options.filters.push(OrFilter {
        filters: vec![Filter::eq("widgetColor", "red").indirect()],
    });

    let result = parts.list_by_options(&options).await.expect("indirect-field query succeeds");

    assert_eq!(result.items.len(), 1, "only the part referencing the red widget should match");
    assert_eq!(result.items[0].key, "part-a");
    assert_eq!(result.total, 1);
}

#[tokio::test]
async fn indirect_filter_with_no_match_returns_empty() {
    let (widgets, parts) = open_stores().await;

    widgets.upsert("default/red-widget", &widget_doc("red"), 1).await.expect("upsert widget");
    parts.upsert("part-a", &part_doc("default/red-widget"), 1).await.expect("upsert part");

    let mut options = ListOptions::all();
    options.filters.push(OrFilter {
        filters: vec![Filter::eq("widgetColor", "green").indirect()],
    });

    let result = parts.list_by_options(&options).await.expect("indirect-field query succeeds");
    assert!(result.items.is_empty());
    assert_eq!(result.total, 0);
}

#[tokio::test]
async fn resume_token_with_stale_revision_is_rejected() {
    let (_widgets, parts) = open_stores().await;
    parts.upsert("part-a", &part_doc("default/red-widget"), 5).await.expect("upsert part");

    let mut options = ListOptions::all();
    options.partitions = vec![Partition { passthrough: true, ..Default::default() }];
    options.resume_token = Some(resource_model::ResumeToken { revision: 0, offset: 0 }.encode());

    let err = parts.list_by_options(&options).await.expect_err("stale resume revision must be rejected");
    assert!(matches!(err, resource_model::Error::BadRequest { .. }));
}
