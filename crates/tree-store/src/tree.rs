//! Tree shape declarations for tree-conformant writes.
//!
//! A tree mirrors the store layout as nested objects: a `_type` entry gives
//! the content type of a node, and a `*` key matches any key at that level.
//! Writes declare their tree so the store can auto-vivify intermediate
//! collections with the correct content-type metadata.

use serde_json::Value;

use sync_common::{SyncError, SyncResult};

/// A declared document tree shape.
#[derive(Debug, Clone)]
pub struct Tree(Value);

/// The declared shape of one prefix of a write path.
#[derive(Debug, Clone)]
pub struct PathNode {
    /// Normalized prefix path (`/bookmarks/...`).
    pub path: String,
    /// Content type declared for this node, if any.
    pub content_type: Option<String>,
}

impl Tree {
    pub fn new(shape: Value) -> Self {
        Tree(shape)
    }

    /// The declared node for a path, following `*` wildcards.
    pub fn node_at(&self, path: &str) -> Option<&Value> {
        let mut node = &self.0;
        for segment in segments(path) {
            let map = node.as_object()?;
            node = map.get(segment).or_else(|| map.get("*"))?;
        }
        Some(node)
    }

    /// Content type declared at `path`, if any.
    pub fn content_type_at(&self, path: &str) -> Option<&str> {
        self.node_at(path)?.get("_type")?.as_str()
    }

    /// The declared shape of every prefix along `path`, in order.
    ///
    /// Fails with [`SyncError::SchemaViolation`] when the path leaves the
    /// declared tree, so a malformed write is rejected before any node is
    /// touched.
    pub fn shape_along(&self, path: &str) -> SyncResult<Vec<PathNode>> {
        let mut node = &self.0;
        let mut nodes = Vec::new();
        let mut prefix = String::new();

        for segment in segments(path) {
            prefix.push('/');
            prefix.push_str(segment);

            let map = node
                .as_object()
                .ok_or_else(|| SyncError::schema(&prefix, "path descends below a leaf"))?;
            node = map
                .get(segment)
                .or_else(|| map.get("*"))
                .ok_or_else(|| SyncError::schema(&prefix, "path not declared in tree"))?;

            nodes.push(PathNode {
                path: prefix.clone(),
                content_type: node
                    .get("_type")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            });
        }

        Ok(nodes)
    }
}

/// Non-empty segments of a slash-separated store path.
pub(crate) fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

/// Normalize a store path to `/a/b/c` form.
pub(crate) fn normalize(path: &str) -> String {
    let mut out = String::new();
    for segment in segments(path) {
        out.push('/');
        out.push_str(segment);
    }
    out
}
