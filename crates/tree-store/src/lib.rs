//! Client for the hypermedia tree store.
//!
//! The sync pipeline needs three operations from the store: `get(path)`,
//! `put(path, body, tree)` with auto-vivification of intermediate nodes, and
//! a resumable change subscription on collection paths. This crate declares
//! those as traits and provides two bindings: an HTTP one for the real store
//! and an in-process one for tests.

pub mod client;
pub mod http;
pub mod memory;
pub mod tree;

pub use client::{ChangeFeed, ListChange, ResumeToken, StoreClient};
pub use http::HttpStore;
pub use memory::MemoryStore;
pub use tree::Tree;
