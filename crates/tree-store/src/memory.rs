//! In-process store with the same contract as the HTTP binding.
//!
//! Holds a JSON document tree plus, per collection path, an ordered log of
//! newly created child keys with monotonic sequence numbers. Watches replay
//! the log past a resume token, so restart/resume behavior can be exercised
//! without a real store.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::watch;

use sync_common::{SyncError, SyncResult};

use crate::client::{ChangeFeed, ListChange, ResumeToken, StoreClient};
use crate::tree::{normalize, segments, Tree};

struct Inner {
    root: Value,
    /// Collection path -> ordered (seq, key) creation events.
    logs: HashMap<String, Vec<(u64, String)>>,
    seq: u64,
}

/// In-memory document store.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
    seq_tx: Arc<watch::Sender<u64>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (seq_tx, _) = watch::channel(0);
        Self {
            inner: Arc::new(Mutex::new(Inner {
                root: Value::Object(Map::new()),
                logs: HashMap::new(),
                seq: 0,
            })),
            seq_tx: Arc::new(seq_tx),
        }
    }
}

fn lock(inner: &Mutex<Inner>) -> SyncResult<MutexGuard<'_, Inner>> {
    inner
        .lock()
        .map_err(|_| SyncError::StoreRequest("store lock poisoned".to_string()))
}

/// Deep-merge `incoming` into `existing`, recording `(parent, key)` for
/// every newly created object entry.
fn merge_value(
    existing: &mut Value,
    incoming: Value,
    at_path: &str,
    created: &mut Vec<(String, String)>,
) {
    let incoming_map = match incoming {
        Value::Object(map) => map,
        other => {
            *existing = other;
            return;
        }
    };

    if !existing.is_object() {
        *existing = Value::Object(Map::new());
    }
    let Some(node) = existing.as_object_mut() else {
        return;
    };

    for (key, value) in incoming_map {
        if !node.contains_key(&key) {
            created.push((at_path.to_string(), key.clone()));
        }
        let child_path = format!("{}/{}", at_path, key);
        merge_value(
            node.entry(key).or_insert(Value::Null),
            value,
            &child_path,
            created,
        );
    }
}

#[async_trait]
impl StoreClient for MemoryStore {
    async fn get(&self, path: &str) -> SyncResult<Value> {
        let inner = lock(&self.inner)?;
        let mut node = &inner.root;
        for segment in segments(path) {
            node = node
                .as_object()
                .and_then(|map| map.get(segment))
                .ok_or_else(|| SyncError::NotFound(normalize(path)))?;
        }
        Ok(node.clone())
    }

    async fn put(&self, path: &str, body: Value, tree: &Tree) -> SyncResult<()> {
        tree.shape_along(path)?;

        let path = normalize(path);
        let mut inner = lock(&self.inner)?;
        let mut created = Vec::new();

        {
            let mut node = &mut inner.root;
            let mut prefix = String::new();
            for segment in segments(&path) {
                if !node.is_object() {
                    *node = Value::Object(Map::new());
                }
                let map = node
                    .as_object_mut()
                    .ok_or_else(|| SyncError::StoreRequest("corrupt document".to_string()))?;
                if !map.contains_key(segment) {
                    created.push((prefix.clone(), segment.to_string()));
                }
                prefix.push('/');
                prefix.push_str(segment);
                node = map
                    .entry(segment.to_string())
                    .or_insert_with(|| Value::Object(Map::new()));
            }
            merge_value(node, body, &path, &mut created);
        }

        for (parent, key) in created {
            inner.seq += 1;
            let seq = inner.seq;
            inner.logs.entry(parent).or_default().push((seq, key));
        }
        let seq = inner.seq;
        drop(inner);

        self.seq_tx.send_replace(seq);
        Ok(())
    }

    async fn watch(
        &self,
        path: &str,
        resume: Option<ResumeToken>,
    ) -> SyncResult<Box<dyn ChangeFeed>> {
        let cursor = match resume {
            Some(token) => token.0.parse::<u64>().map_err(|_| {
                SyncError::StoreRequest(format!("invalid resume token: {}", token.0))
            })?,
            // No token: start at the current tail, never replaying
            // pre-existing keys.
            None => lock(&self.inner)?.seq,
        };

        Ok(Box::new(MemoryFeed {
            inner: self.inner.clone(),
            seq_rx: self.seq_tx.subscribe(),
            path: normalize(path),
            cursor,
            stopped: false,
        }))
    }
}

struct MemoryFeed {
    inner: Arc<Mutex<Inner>>,
    seq_rx: watch::Receiver<u64>,
    path: String,
    cursor: u64,
    stopped: bool,
}

#[async_trait]
impl ChangeFeed for MemoryFeed {
    async fn next(&mut self) -> SyncResult<Option<ListChange>> {
        loop {
            if self.stopped {
                return Ok(None);
            }

            {
                let inner = lock(&self.inner)?;
                let next = inner
                    .logs
                    .get(&self.path)
                    .and_then(|log| log.iter().find(|(seq, _)| *seq > self.cursor));
                if let Some((seq, key)) = next {
                    self.cursor = *seq;
                    return Ok(Some(ListChange {
                        key: key.clone(),
                        token: ResumeToken(seq.to_string()),
                    }));
                }
            }

            // Wakes on any put since the last observed sequence number, so a
            // write landing between the check above and this await is not
            // missed.
            if self.seq_rx.changed().await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn stop(&mut self) -> SyncResult<()> {
        self.stopped = true;
        Ok(())
    }
}
