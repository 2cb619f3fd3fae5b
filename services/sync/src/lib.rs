//! Core components of the weather-grid sync service.
//!
//! Two list watches react to newly registered grid cells (weather and
//! solar) by backfilling their history; an incremental poller refreshes
//! registered locations on a timer. Both paths share the same year-bucketed,
//! tree-conformant write discipline.

pub mod config;
pub mod ingest;
pub mod orchestrator;
pub mod paths;
pub mod poll;
pub mod server;
pub mod tree;
pub mod watch;
