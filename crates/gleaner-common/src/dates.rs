//! Date Ranges and Symbolic Range Words
//!
//! Every pipeline run operates over a closed, inclusive range of logical
//! dates. Operators either give the range explicitly or use one of the
//! symbolic words (`today`, `yesterday`, `last-week`, `last-month`,
//! `last-year`) which resolve against the current date.

use chrono::{Datelike, Days, Months, NaiveDate};
use serde::{Deserialize, Serialize};

/// Errors from range construction or word resolution
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DateRangeError {
    #[error("end date {end} precedes start date {start}")]
    Backwards { start: NaiveDate, end: NaiveDate },

    #[error("unknown date word '{0}' (expected today, yesterday, last-week, last-month or last-year)")]
    UnknownWord(String),

    #[error("date arithmetic out of range while resolving '{0}'")]
    OutOfRange(RangeWord),
}

/// An inclusive range of logical dates
///
/// Both endpoints are part of the range; a single-day range has
/// `start == end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    /// Create a range, rejecting `end < start`.
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, DateRangeError> {
        if end < start {
            return Err(DateRangeError::Backwards { start, end });
        }
        Ok(Self { start, end })
    }

    /// A range covering exactly one day.
    pub fn single(day: NaiveDate) -> Self {
        Self { start: day, end: day }
    }

    /// Iterate every date in the range, in order, endpoints included.
    pub fn days(&self) -> impl Iterator<Item = NaiveDate> {
        let end = self.end;
        self.start.iter_days().take_while(move |d| *d <= end)
    }

    /// Number of days covered (at least 1).
    pub fn num_days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    pub fn contains(&self, day: NaiveDate) -> bool {
        self.start <= day && day <= self.end
    }
}

impl std::fmt::Display for DateRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..={}", self.start, self.end)
    }
}

/// Symbolic date words accepted on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeWord {
    Today,
    Yesterday,
    /// The previous ISO week: its Monday through the Monday that follows it.
    LastWeek,
    /// The previous calendar month, first through last day.
    LastMonth,
    /// The previous calendar year, January 1 through December 31.
    LastYear,
}

impl RangeWord {
    /// Resolve the word into a concrete range relative to `pivot`
    /// (normally today's local date; injected so resolution is testable).
    pub fn resolve(self, pivot: NaiveDate) -> Result<DateRange, DateRangeError> {
        let oor = || DateRangeError::OutOfRange(self);
        match self {
            RangeWord::Today => Ok(DateRange::single(pivot)),
            RangeWord::Yesterday => {
                let day = pivot.pred_opt().ok_or_else(oor)?;
                Ok(DateRange::single(day))
            },
            RangeWord::LastWeek => {
                // Monday of the week before the pivot's week, through the
                // Monday that ends it (both endpoints included).
                let back = u64::from(pivot.weekday().num_days_from_monday()) + 7;
                let start = pivot.checked_sub_days(Days::new(back)).ok_or_else(oor)?;
                let end = start.checked_add_days(Days::new(7)).ok_or_else(oor)?;
                Ok(DateRange { start, end })
            },
            RangeWord::LastMonth => {
                let (year, month) = if pivot.month() == 1 {
                    (pivot.year() - 1, 12)
                } else {
                    (pivot.year(), pivot.month() - 1)
                };
                let start = NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(oor)?;
                let end = start
                    .checked_add_months(Months::new(1))
                    .and_then(|d| d.pred_opt())
                    .ok_or_else(oor)?;
                Ok(DateRange { start, end })
            },
            RangeWord::LastYear => {
                let year = pivot.year() - 1;
                let start = NaiveDate::from_ymd_opt(year, 1, 1).ok_or_else(oor)?;
                let end = NaiveDate::from_ymd_opt(year, 12, 31).ok_or_else(oor)?;
                Ok(DateRange { start, end })
            },
        }
    }
}

impl std::str::FromStr for RangeWord {
    type Err = DateRangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "today" => Ok(RangeWord::Today),
            "yesterday" => Ok(RangeWord::Yesterday),
            "last-week" => Ok(RangeWord::LastWeek),
            "last-month" => Ok(RangeWord::LastMonth),
            "last-year" => Ok(RangeWord::LastYear),
            _ => Err(DateRangeError::UnknownWord(s.to_string())),
        }
    }
}

impl std::fmt::Display for RangeWord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let word = match self {
            RangeWord::Today => "today",
            RangeWord::Yesterday => "yesterday",
            RangeWord::LastWeek => "last-week",
            RangeWord::LastMonth => "last-month",
            RangeWord::LastYear => "last-year",
        };
        write!(f, "{}", word)
    }
}
