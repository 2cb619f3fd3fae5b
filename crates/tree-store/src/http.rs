//! HTTP binding of the store client.
//!
//! Request/response operations map onto bearer-authenticated GET/PUT. The
//! change subscription is a long-poll on `<path>/_changes`: each page carries
//! the added keys since the given token plus the next token. Data requests
//! carry no client-side timeout; an unresponsive store stalls only the
//! handler awaiting it.

use std::collections::VecDeque;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use sync_common::{SyncError, SyncResult};

use crate::client::{ChangeFeed, ListChange, ResumeToken, StoreClient};
use crate::tree::{normalize, Tree};

/// HTTP client for the document store.
#[derive(Clone)]
pub struct HttpStore {
    client: reqwest::Client,
    base: String,
    token: String,
}

impl HttpStore {
    /// Build a client for `domain` (scheme + host) using a bearer token.
    pub fn connect(domain: &str, token: &str) -> SyncResult<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| SyncError::StoreRequest(format!("HTTP client init failed: {}", e)))?;

        Ok(Self {
            client,
            base: domain.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, normalize(path))
    }

    async fn put_node(
        &self,
        path: &str,
        body: &Value,
        content_type: Option<&str>,
    ) -> SyncResult<()> {
        let response = self
            .client
            .put(self.url(path))
            .bearer_auth(&self.token)
            .header(
                reqwest::header::CONTENT_TYPE,
                content_type.unwrap_or("application/json"),
            )
            .json(body)
            .send()
            .await
            .map_err(|e| SyncError::StoreRequest(format!("PUT {} failed: {}", path, e)))?;

        map_status(path, response.status())
    }
}

fn map_status(path: &str, status: reqwest::StatusCode) -> SyncResult<()> {
    if status.is_success() {
        return Ok(());
    }
    match status.as_u16() {
        404 => Err(SyncError::NotFound(normalize(path))),
        422 => Err(SyncError::schema(normalize(path), "rejected by store schema")),
        code => Err(SyncError::StoreRequest(format!(
            "{} returned status {}",
            path, code
        ))),
    }
}

#[async_trait]
impl StoreClient for HttpStore {
    async fn get(&self, path: &str) -> SyncResult<Value> {
        let response = self
            .client
            .get(self.url(path))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| SyncError::StoreRequest(format!("GET {} failed: {}", path, e)))?;

        map_status(path, response.status())?;
        response
            .json()
            .await
            .map_err(|e| SyncError::StoreRequest(format!("GET {} bad body: {}", path, e)))
    }

    async fn put(&self, path: &str, body: Value, tree: &Tree) -> SyncResult<()> {
        let shapes = tree.shape_along(path)?;

        // Auto-vivify: create each missing ancestor with its declared
        // content type before writing the leaf. Check-then-create is not
        // atomic; a concurrent initializer racing us is benign
        // (last-writer-wins on an empty body).
        if let Some((leaf, ancestors)) = shapes.split_last() {
            for node in ancestors {
                match self.get(&node.path).await {
                    Ok(_) => {}
                    Err(err) if err.is_not_found() => {
                        debug!(path = %node.path, "Creating intermediate node");
                        self.put_node(
                            &node.path,
                            &Value::Object(Default::default()),
                            node.content_type.as_deref(),
                        )
                        .await?;
                    }
                    Err(err) => return Err(err),
                }
            }
            self.put_node(&leaf.path, &body, leaf.content_type.as_deref())
                .await
        } else {
            Err(SyncError::schema(normalize(path), "empty write path"))
        }
    }

    async fn watch(
        &self,
        path: &str,
        resume: Option<ResumeToken>,
    ) -> SyncResult<Box<dyn ChangeFeed>> {
        Ok(Box::new(HttpFeed {
            store: self.clone(),
            path: normalize(path),
            cursor: resume,
            pending: VecDeque::new(),
            stopped: false,
        }))
    }
}

/// One page of the change feed.
#[derive(Debug, Deserialize)]
struct ChangesPage {
    #[serde(default)]
    changes: Vec<ChangeEntry>,
}

#[derive(Debug, Deserialize)]
struct ChangeEntry {
    key: String,
    seq: String,
}

struct HttpFeed {
    store: HttpStore,
    path: String,
    cursor: Option<ResumeToken>,
    pending: VecDeque<ListChange>,
    stopped: bool,
}

#[async_trait]
impl ChangeFeed for HttpFeed {
    async fn next(&mut self) -> SyncResult<Option<ListChange>> {
        loop {
            if self.stopped {
                return Ok(None);
            }

            if let Some(change) = self.pending.pop_front() {
                self.cursor = Some(change.token.clone());
                return Ok(Some(change));
            }

            // Long-poll one page. Without a cursor the server starts at the
            // current tail, so pre-existing keys are not replayed.
            let mut request = self
                .store
                .client
                .get(format!("{}/_changes", self.store.url(&self.path)))
                .bearer_auth(&self.store.token)
                .query(&[("timeout", "30")]);
            if let Some(cursor) = &self.cursor {
                request = request.query(&[("since", cursor.0.as_str())]);
            }

            let response = request.send().await.map_err(|e| {
                SyncError::StoreRequest(format!("watch {} failed: {}", self.path, e))
            })?;
            map_status(&self.path, response.status())?;

            let page: ChangesPage = response.json().await.map_err(|e| {
                SyncError::StoreRequest(format!("watch {} bad body: {}", self.path, e))
            })?;

            self.pending.extend(page.changes.into_iter().map(|entry| {
                ListChange {
                    key: entry.key,
                    token: ResumeToken(entry.seq),
                }
            }));
        }
    }

    async fn stop(&mut self) -> SyncResult<()> {
        self.stopped = true;
        Ok(())
    }
}
