//! ACIS gridded weather-history client.
//!
//! Queries the RCC ACIS `GridData` endpoint for daily max/min temperature
//! and precipitation at a point, over an inclusive date range.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::{json, Map, Value};
use tracing::debug;

use sync_common::{DailySeries, SyncError, SyncResult};

use crate::provider::{DataProvider, FetchedSeries};

const DEFAULT_BASE: &str = "https://data.rcc-acis.org";

/// Daily elements requested from the grid, in row order.
const ELEMS: [&str; 3] = ["maxt", "mint", "pcpn"];

/// ACIS missing-value sentinel.
const MISSING: f64 = -999.0;

/// Client for the ACIS GridData web service.
pub struct AcisClient {
    client: reqwest::Client,
    base: String,
}

impl AcisClient {
    pub fn new() -> SyncResult<Self> {
        Self::with_base(DEFAULT_BASE)
    }

    pub fn with_base(base: &str) -> SyncResult<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| SyncError::provider_fetch("acis", e))?;

        Ok(Self {
            client,
            base: base.trim_end_matches('/').to_string(),
        })
    }
}

/// Convert GridData rows (`[date, maxt, mint, pcpn]`) into a daily series.
fn series_from_rows(rows: Vec<Value>) -> SyncResult<DailySeries> {
    let mut series = DailySeries::new();

    for row in rows {
        let cells = row
            .as_array()
            .ok_or_else(|| SyncError::provider_fetch("acis", "row is not an array"))?;
        let date: NaiveDate = cells
            .first()
            .and_then(Value::as_str)
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| SyncError::provider_fetch("acis", "row missing date"))?;

        let mut record = Map::new();
        for (name, cell) in ELEMS.iter().zip(cells.iter().skip(1)) {
            let value = match cell.as_f64() {
                Some(n) if n != MISSING => json!(n),
                _ => Value::Null,
            };
            record.insert((*name).to_string(), value);
        }

        series.insert(date, Value::Object(record));
    }

    Ok(series)
}

#[async_trait]
impl DataProvider for AcisClient {
    fn name(&self) -> &'static str {
        "acis"
    }

    async fn fetch_daily(
        &self,
        lat: f64,
        lon: f64,
        start: NaiveDate,
        end: NaiveDate,
    ) -> SyncResult<FetchedSeries> {
        let params = json!({
            "loc": format!("{},{}", lon, lat),
            "sdate": start.to_string(),
            "edate": end.to_string(),
            "grid": 21,
            "elems": ELEMS.iter().map(|name| json!({"name": name})).collect::<Vec<_>>(),
        });

        debug!(lat, lon, start = %start, end = %end, "Requesting ACIS GridData");

        let response = self
            .client
            .post(format!("{}/GridData", self.base))
            .json(&params)
            .send()
            .await
            .map_err(|e| SyncError::provider_fetch("acis", e))?;

        if !response.status().is_success() {
            return Err(SyncError::provider_fetch(
                "acis",
                format!("GridData returned status {}", response.status()),
            ));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| SyncError::provider_fetch("acis", e))?;

        if let Some(error) = body.get("error").and_then(Value::as_str) {
            return Err(SyncError::provider_fetch("acis", error));
        }

        let rows = match body.get("data") {
            Some(Value::Array(rows)) => rows.clone(),
            _ => return Err(SyncError::provider_fetch("acis", "response missing data rows")),
        };

        Ok(FetchedSeries {
            series: series_from_rows(rows)?,
            template: json!({
                "source": "acis-griddata",
                "grid": "NRCC interpolated (21)",
                "elems": ELEMS,
                "units": { "maxt": "degF", "mint": "degF", "pcpn": "inch" },
            }),
        })
    }
}
