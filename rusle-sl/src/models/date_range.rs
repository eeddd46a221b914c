//! Half-open analysis window `[date_from, date_to)`

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{RusleError, RusleResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawDateRange")]
pub struct DateRange {
    date_from: NaiveDate,
    date_to: NaiveDate,
}

#[derive(Deserialize)]
struct RawDateRange {
    date_from: NaiveDate,
    date_to: NaiveDate,
}

impl TryFrom<RawDateRange> for DateRange {
    type Error = RusleError;

    fn try_from(raw: RawDateRange) -> Result<Self, Self::Error> {
        DateRange::new(raw.date_from, raw.date_to)
    }
}

impl DateRange {
    /// Rejects `date_from >= date_to`
    pub fn new(date_from: NaiveDate, date_to: NaiveDate) -> RusleResult<Self> {
        if date_from >= date_to {
            return Err(RusleError::Validation(format!(
                "date_from {} must be before date_to {}",
                date_from, date_to
            )));
        }
        Ok(Self { date_from, date_to })
    }

    /// Parse two `YYYY-MM-DD` strings
    pub fn parse(date_from: &str, date_to: &str) -> RusleResult<Self> {
        let parse = |s: &str| {
            NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
                .map_err(|e| RusleError::Validation(format!("invalid date '{}': {}", s, e)))
        };
        DateRange::new(parse(date_from)?, parse(date_to)?)
    }

    pub fn date_from(&self) -> NaiveDate {
        self.date_from
    }

    pub fn date_to(&self) -> NaiveDate {
        self.date_to
    }

    pub fn days(&self) -> i64 {
        (self.date_to - self.date_from).num_days()
    }
}
