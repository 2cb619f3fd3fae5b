//! Data provider contract.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::Value;

use sync_common::{DailySeries, SyncResult};

/// Daily series plus metadata fetched for one grid location.
#[derive(Debug, Clone)]
pub struct FetchedSeries {
    pub series: DailySeries,
    /// Provider metadata (units/schema), written once per grid cell
    /// alongside the data.
    pub template: Value,
}

/// An upstream time-series source.
///
/// Implementations return daily granularity for the inclusive range
/// `[start, end]`; sources that sample within a day aggregate down to one
/// record per day before returning (the aggregation rule is the
/// provider's own).
#[async_trait]
pub trait DataProvider: Send + Sync {
    /// Short name used in logs and error context.
    fn name(&self) -> &'static str;

    /// Fetch the daily series for a coordinate over `[start, end]`.
    async fn fetch_daily(
        &self,
        lat: f64,
        lon: f64,
        start: NaiveDate,
        end: NaiveDate,
    ) -> SyncResult<FetchedSeries>;
}
