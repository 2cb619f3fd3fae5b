//! Common types and utilities shared across the weather-grid sync services.

pub mod cursor;
pub mod error;
pub mod geohash;
pub mod series;

pub use cursor::{epoch_start, DateCursor};
pub use error::{SyncError, SyncResult};
pub use series::{year_buckets, DailySeries, SampledSeries, YearBuckets};
