//! Upstream time-series providers.
//!
//! One trait, two bindings: ACIS gridded weather history and NSRDB PSM v3
//! solar irradiance. Both return daily granularity; the solar binding
//! aggregates its sub-daily samples before returning, so the ingestion path
//! sees a single uniform contract.

pub mod acis;
pub mod nsrdb;
pub mod provider;

pub use acis::AcisClient;
pub use nsrdb::NsrdbClient;
pub use provider::{DataProvider, FetchedSeries};
