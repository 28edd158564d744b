//! Debug CLI for exercising the cache core against an in-memory resource fixture.
//!
//! Not a REST server: there is no HTTP surface here, only a `clap::Parser` front end over
//! [`cache_core::CacheFactory`] for interactively watching the Informer list→watch loop and the
//! query compiler run against a small seeded dataset.

#![deny(rust_2018_idioms)]

mod fixture;

use cache_core::{CacheFactory, Config, EncryptionManager};
use clap::Parser;
use clock::SystemProvider;
use fixture::FixtureClient;
use observability_deps::tracing::info;
use resource_model::{Document, FieldExtractor, FieldType, KindId, ListOptions, Schema};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Parser)]
#[clap(name = "cache_cli", about = "Debug harness for the cache core")]
struct Cli {
    #[clap(subcommand)]
    command: Command,

    /// `RUST_LOG`-style filter for tracing output.
    #[clap(long, env = "LOG_FILTER", default_value = "info")]
    log_filter: String,
}

#[derive(Debug, Parser)]
enum Command {
    /// List the seeded widgets kind through the query compiler.
    List,
    /// Open the cache and report Informer state transitions until synced.
    Watch,
    /// Open the cache, list, and print a per-label summary.
    Stats,
}

fn widgets_schema() -> Arc<Schema> {
    let schema = Schema::new(KindId::new("", "v1", "Widget"), true)
        .with_field(FieldExtractor::new("spec.color", FieldType::String))
        .with_field(FieldExtractor::new("spec.weight", FieldType::Integer));
    Arc::new(schema)
}

fn widget(name: &str, color: &str, weight: i64) -> Document {
    let mut spec = BTreeMap::new();
    spec.insert("color".to_string(), Document::String(color.to_string()));
    spec.insert("weight".to_string(), Document::Int(weight));

    let mut metadata = BTreeMap::new();
    metadata.insert("name".to_string(), Document::String(name.to_string()));

    let mut root = BTreeMap::new();
    root.insert("metadata".to_string(), Document::Map(metadata));
    root.insert("spec".to_string(), Document::Map(spec));
    Document::Map(root)
}

#[derive(Debug)]
struct FixtureClientSource {
    client: Arc<FixtureClient>,
}

impl cache_core::ClientSource for FixtureClientSource {
    fn client_for(&self, _schema: &Schema) -> Arc<dyn resource_model::ResourceClient> {
        Arc::clone(&self.client) as Arc<dyn resource_model::ResourceClient>
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&cli.log_filter))
        .init();

    let config = Config {
        chunk_size: 10,
        idle_ttl: Duration::from_secs(5),
        ..Config::default()
    }
    .validate()?;

    let registry = Arc::new(metric::Registry::new());
    let encryption = Arc::new(EncryptionManager::new(config.dek_rotate_writes));
    let fixture = Arc::new(FixtureClient::seeded(vec![
        ("default/red-widget".to_string(), widget("red-widget", "red", 10)),
        ("default/blue-widget".to_string(), widget("blue-widget", "blue", 20)),
        ("default/second-red".to_string(), widget("second-red", "red", 5)),
    ]));
    let clients = Arc::new(FixtureClientSource { client: fixture });
    let clock = Arc::new(SystemProvider::new());

    let factory = CacheFactory::new(config, registry, encryption, clients, clock);
    let schema = widgets_schema();
    let handle = factory.cache_for(schema).await?;

    wait_for_sync(handle.informer()).await;

    match cli.command {
        Command::List => {
            let result = handle.list_by_options(&ListOptions::all()).await?;
            for item in &result.items {
                println!("{}: {:?}", item.key, item.document);
            }
            println!("total: {}", result.total);
        }
        Command::Watch => {
            info!(state = ?handle.informer().state(), "informer synced");
        }
        Command::Stats => {
            let mut options = ListOptions::all();
            options.summary.push(resource_model::Summary {
                field_path: "spec.color".to_string(),
            });
            let result = handle.list_by_options(&options).await?;
            for (field, counts) in &result.summary {
                for (value, count) in counts {
                    println!("{field}={value}: {count}");
                }
            }
        }
    }

    Ok(())
}

async fn wait_for_sync(informer: &cache_core::Informer) {
    while !informer.has_synced() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
