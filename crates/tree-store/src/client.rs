//! Store client traits and change-subscription types.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use sync_common::SyncResult;

use crate::tree::Tree;

/// Opaque cursor marking the last acknowledged position in a change feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResumeToken(pub String);

impl std::fmt::Display for ResumeToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A key newly added under a watched collection.
#[derive(Debug, Clone)]
pub struct ListChange {
    pub key: String,
    /// Token covering this change. Persist it after handling to resume past
    /// the change on restart.
    pub token: ResumeToken,
}

/// An open change subscription on a collection path.
#[async_trait]
pub trait ChangeFeed: Send {
    /// The next added key, in feed order. `None` once the feed has ended.
    async fn next(&mut self) -> SyncResult<Option<ListChange>>;

    /// Release the subscription; subsequent `next` calls return `None`.
    async fn stop(&mut self) -> SyncResult<()>;
}

/// The request/response and change-notification operations the sync pipeline
/// needs from the document store.
#[async_trait]
pub trait StoreClient: Send + Sync {
    /// Read the document at `path`.
    ///
    /// Fails with `SyncError::NotFound` when the path does not exist; the
    /// orchestrator relies on that status for its root existence check.
    async fn get(&self, path: &str) -> SyncResult<Value>;

    /// Merge `body` into the document at `path`.
    ///
    /// `tree` declares the expected structure along the path so intermediate
    /// collections are auto-vivified with the correct content-type metadata;
    /// a path outside the declared tree fails with
    /// `SyncError::SchemaViolation`.
    async fn put(&self, path: &str, body: Value, tree: &Tree) -> SyncResult<()>;

    /// Subscribe to keys added under the collection at `path`.
    ///
    /// With a resume token the feed continues past the last acknowledged
    /// position; without one it begins at the current tail (keys already
    /// present are not replayed).
    async fn watch(
        &self,
        path: &str,
        resume: Option<ResumeToken>,
    ) -> SyncResult<Box<dyn ChangeFeed>>;
}
