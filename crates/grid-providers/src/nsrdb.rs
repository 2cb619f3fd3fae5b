//! NSRDB PSM v3 solar-irradiance client.
//!
//! The NSRDB serves sub-daily irradiance samples one calendar year at a
//! time, keyed by API key and registered email. `fetch_daily` pulls every
//! year touching the requested range, aggregates the samples to one record
//! per day (arithmetic mean of each numeric field), and trims to the range.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, NaiveDateTime};
use serde_json::{json, Map, Value};
use tracing::debug;

use sync_common::{DailySeries, SampledSeries, SyncError, SyncResult};

use crate::provider::{DataProvider, FetchedSeries};

const DEFAULT_BASE: &str = "https://developer.nrel.gov";

const ATTRIBUTES: &str = "ghi,dni,dhi,air_temperature";

/// Client for the NSRDB PSM v3 point download API.
pub struct NsrdbClient {
    client: reqwest::Client,
    base: String,
    api_key: String,
    email: String,
}

impl NsrdbClient {
    pub fn new(api_key: &str, email: &str) -> SyncResult<Self> {
        Self::with_base(DEFAULT_BASE, api_key, email)
    }

    pub fn with_base(base: &str, api_key: &str, email: &str) -> SyncResult<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| SyncError::provider_fetch("nsrdb", e))?;

        Ok(Self {
            client,
            base: base.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            email: email.to_string(),
        })
    }

    async fn fetch_year(&self, lat: f64, lon: f64, year: i32) -> SyncResult<SampledSeries> {
        debug!(lat, lon, year, "Requesting NSRDB PSM v3 year");

        let response = self
            .client
            .get(format!("{}/api/nsrdb/v2/solar/psm3.json", self.base))
            .query(&[
                ("api_key", self.api_key.as_str()),
                ("email", self.email.as_str()),
                ("wkt", &format!("POINT({} {})", lon, lat)),
                ("names", &year.to_string()),
                ("attributes", ATTRIBUTES),
            ])
            .send()
            .await
            .map_err(|e| SyncError::provider_fetch("nsrdb", e))?;

        if !response.status().is_success() {
            return Err(SyncError::provider_fetch(
                "nsrdb",
                format!("psm3 returned status {} for year {}", response.status(), year),
            ));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| SyncError::provider_fetch("nsrdb", e))?;

        let data = body
            .get("outputs")
            .and_then(|outputs| outputs.get("data"))
            .and_then(Value::as_object)
            .ok_or_else(|| SyncError::provider_fetch("nsrdb", "response missing outputs.data"))?;

        samples_from_output(data)
    }
}

/// Parse the `outputs.data` map of timestamped sample records.
fn samples_from_output(data: &Map<String, Value>) -> SyncResult<SampledSeries> {
    let mut samples = SampledSeries::new();

    for (stamp, record) in data {
        let at = parse_stamp(stamp)
            .ok_or_else(|| SyncError::provider_fetch("nsrdb", format!("bad timestamp {}", stamp)))?;
        samples.insert(at, record.clone());
    }

    Ok(samples)
}

fn parse_stamp(stamp: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(stamp, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(stamp, "%Y-%m-%d %H:%M"))
        .ok()
}

/// Collapse sub-daily samples into one record per day, averaging each
/// numeric field over the day's samples. Non-numeric fields are dropped.
pub fn aggregate_daily(samples: &SampledSeries) -> DailySeries {
    let mut sums: BTreeMap<NaiveDate, BTreeMap<String, (f64, u32)>> = BTreeMap::new();

    for (at, record) in samples {
        let day = sums.entry(at.date()).or_default();
        if let Some(fields) = record.as_object() {
            for (name, value) in fields {
                if let Some(n) = value.as_f64() {
                    let entry = day.entry(name.clone()).or_insert((0.0, 0));
                    entry.0 += n;
                    entry.1 += 1;
                }
            }
        }
    }

    sums.into_iter()
        .map(|(date, fields)| {
            let record: Map<String, Value> = fields
                .into_iter()
                .map(|(name, (sum, count))| (name, json!(sum / count as f64)))
                .collect();
            (date, Value::Object(record))
        })
        .collect()
}

#[async_trait]
impl DataProvider for NsrdbClient {
    fn name(&self) -> &'static str {
        "nsrdb"
    }

    async fn fetch_daily(
        &self,
        lat: f64,
        lon: f64,
        start: NaiveDate,
        end: NaiveDate,
    ) -> SyncResult<FetchedSeries> {
        let mut samples = SampledSeries::new();
        for year in start.year()..=end.year() {
            samples.append(&mut self.fetch_year(lat, lon, year).await?);
        }

        let mut series = aggregate_daily(&samples);
        series.retain(|date, _| *date >= start && *date <= end);

        Ok(FetchedSeries {
            series,
            template: json!({
                "source": "nsrdb-psmv3",
                "granularity": "daily-mean",
                "attributes": ATTRIBUTES,
                "units": {
                    "ghi": "W/m2",
                    "dni": "W/m2",
                    "dhi": "W/m2",
                    "air_temperature": "C",
                },
            }),
        })
    }
}
