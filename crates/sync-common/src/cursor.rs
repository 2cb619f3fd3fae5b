//! The service's "current date" cursor.

use chrono::{NaiveDate, Utc};

/// End-date cursor used by the watches and the poller.
///
/// A fixed cursor makes fetch ranges and poll windows deterministic for
/// testing and simulated time; the wall-clock variant tracks today in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateCursor {
    /// A configured fixed date.
    Fixed(NaiveDate),
    /// Today, read from the wall clock at each use.
    Today,
}

impl DateCursor {
    /// The current end date.
    pub fn current(&self) -> NaiveDate {
        match self {
            DateCursor::Fixed(date) => *date,
            DateCursor::Today => Utc::now().date_naive(),
        }
    }
}

/// Default start of history for grids and locations never fetched before.
pub fn epoch_start() -> NaiveDate {
    NaiveDate::from_ymd_opt(2000, 1, 1).expect("valid epoch date")
}
