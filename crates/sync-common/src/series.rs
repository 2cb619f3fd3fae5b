//! Daily time series and year bucketing.

use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use serde_json::Value;

/// A daily series: one provider-specific record per calendar day, ordered by
/// date. Date keys are unique; inserting a duplicate date overwrites
/// (last-write-wins), matching upstream provider guarantees of unique dates.
pub type DailySeries = BTreeMap<NaiveDate, Value>;

/// A raw sub-daily series from providers that sample within a day, keyed by
/// sample timestamp. Aggregated to a [`DailySeries`] before bucketing.
pub type SampledSeries = BTreeMap<NaiveDateTime, Value>;

/// A daily series partitioned by calendar year.
pub type YearBuckets = BTreeMap<i32, BTreeMap<NaiveDate, Value>>;

/// Partition a daily series by calendar year.
///
/// Every date lands in exactly one bucket, the one matching its year; the
/// buckets are pairwise disjoint and their union is the input series.
pub fn year_buckets(series: &DailySeries) -> YearBuckets {
    let mut buckets = YearBuckets::new();
    for (date, value) in series {
        buckets
            .entry(date.year())
            .or_default()
            .insert(*date, value.clone());
    }
    buckets
}
