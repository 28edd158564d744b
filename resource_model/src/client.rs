//! The minimal upstream interface the Informer consumes (SPEC_FULL §6). The list/watch protocol
//! client itself is out of scope; this crate only describes the contract.

use crate::document::Document;
use crate::error::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;

/// One resource's key, revision, and payload as observed by `list`/`watch`.
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    /// Stable string key (`namespace/name` or `name`).
    pub key: String,
    /// Revision this observation was made at.
    pub revision: i64,
    /// The resource payload.
    pub document: Document,
}

/// A page of results from `ResourceClient::list`.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    /// Items in this page.
    pub items: Vec<Item>,
    /// The revision the upstream considered current when this page was produced.
    pub revision: i64,
    /// Opaque continuation for the next page, `None` on the final page.
    pub next_resume_token: Option<String>,
}

/// One event delivered by `ResourceClient::watch`.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent {
    /// A new key appeared.
    Added(Item),
    /// An existing key's payload changed.
    Modified(Item),
    /// A key was removed, at the given revision.
    Deleted {
        /// The removed key.
        key: String,
        /// The revision the deletion was observed at.
        revision: i64,
    },
    /// The watch's revision horizon expired upstream; the Informer must relist.
    Expired,
    /// The upstream's own record of this key/kind is gone; the Informer must relist.
    Gone,
    /// A transient error occurred; the underlying cause is preserved in [`crate::Error`].
    Error(crate::Error),
}

/// The per-kind contract the Informer drives (SPEC_FULL §6). `get`/`update`/`delete` passthroughs
/// for non-list operations are not part of the cache core and are not modeled here.
#[async_trait]
pub trait ResourceClient: std::fmt::Debug + Send + Sync + 'static {
    /// Fetch one page, starting from `resume_token` if given.
    async fn list(&self, limit: u32, resume_token: Option<String>) -> Result<Page>;

    /// Open a watch stream starting just after `since_revision`.
    async fn watch(&self, since_revision: i64) -> Result<BoxStream<'static, WatchEvent>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_next_resume_token_is_none_on_final_page() {
        let page = Page {
            items: vec![],
            revision: 1,
            next_resume_token: None,
        };
        assert!(page.next_resume_token.is_none());
    }
}
