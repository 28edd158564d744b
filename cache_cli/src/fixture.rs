//! An in-memory [`ResourceClient`] fixture, for exercising the cache core without a real
//! upstream. Not shipped as a reusable test double outside this binary.

use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use resource_model::{Document, Item, Page, Result, WatchEvent};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Default)]
struct State {
    items: BTreeMap<String, (i64, Document)>,
    revision: i64,
}

/// A fixed, pre-seeded in-memory upstream. `list` returns everything in one page; `watch`
/// returns a closed stream immediately (there is nothing left to observe once listed).
#[derive(Debug, Clone)]
pub struct FixtureClient {
    state: Arc<Mutex<State>>,
}

impl FixtureClient {
    /// Build a fixture seeded with `(key, document)` pairs, all observed at revision 1.
    pub fn seeded(seed: Vec<(String, Document)>) -> Self {
        let mut items = BTreeMap::new();
        for (key, doc) in seed {
            items.insert(key, (1, doc));
        }
        Self {
            state: Arc::new(Mutex::new(State { items, revision: 1 })),
        }
    }
}

#[async_trait::async_trait]
impl resource_model::ResourceClient for FixtureClient {
    async fn list(&self, limit: u32, resume_token: Option<String>) -> Result<Page> {
        let state = self.state.lock();
        let offset: usize = resume_token.and_then(|t| t.parse().ok()).unwrap_or(0);
        let all: Vec<(&String, &(i64, Document))> = state.items.iter().collect();
        let page: Vec<Item> = all
            .iter()
            .skip(offset)
            .take(limit as usize)
            .map(|(key, (revision, doc))| Item {
                key: (*key).clone(),
                revision: *revision,
                document: doc.clone(),
            })
            .collect();
        let next_offset = offset + page.len();
        let next_resume_token = if next_offset < all.len() {
            Some(next_offset.to_string())
        } else {
            None
        };
        Ok(Page {
            items: page,
            revision: state.revision,
            next_resume_token,
        })
    }

    async fn watch(&self, _since_revision: i64) -> Result<BoxStream<'static, WatchEvent>> {
        Ok(stream::empty().boxed())
    }
}
