//! Calendar-aligned date windows.
//!
//! Harvests are cut into windows so each one can be cached independently.
//! [`split`] partitions a closed date range into windows aligned to a
//! [`WindowUnit`]; the first window starts at the requested date and the last
//! one is clipped to the end of the requested range.
//!
//! ```
//! use chrono::NaiveDate;
//! use oai_mirror::window::{WindowUnit, split};
//!
//! let from = NaiveDate::from_ymd_opt(2010, 1, 10).unwrap();
//! let until = NaiveDate::from_ymd_opt(2010, 3, 2).unwrap();
//! let windows = split(from, until, WindowUnit::Month).unwrap();
//! let bounds: Vec<String> = windows.iter().map(ToString::to_string).collect();
//! assert_eq!(
//!     bounds,
//!     ["2010-01-10..2010-01-31", "2010-02-01..2010-02-28", "2010-03-01..2010-03-02"]
//! );
//! ```

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, Months, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::protocol::DATE_FORMAT;

/// Invalid input to [`split`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WindowError {
    /// The start of the range lies after its end.
    #[error("invalid date range: {from} is after {until}")]
    InvalidRange {
        /// Requested start.
        from: NaiveDate,
        /// Requested end.
        until: NaiveDate,
    },
}

/// Calendar unit windows are aligned to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowUnit {
    Day,
    /// ISO week, starting on Monday.
    #[default]
    Week,
    Month,
    Year,
}

impl WindowUnit {
    /// First day of the unit containing `date`.
    #[must_use]
    pub fn floor(self, date: NaiveDate) -> NaiveDate {
        match self {
            WindowUnit::Day => date,
            WindowUnit::Week => date
                .checked_sub_signed(TimeDelta::days(i64::from(
                    date.weekday().num_days_from_monday(),
                )))
                .unwrap_or(date),
            WindowUnit::Month => date.with_day(1).unwrap_or(date),
            WindowUnit::Year => NaiveDate::from_ymd_opt(date.year(), 1, 1).unwrap_or(date),
        }
    }

    /// Last day of the unit containing `date`.
    #[must_use]
    pub fn last_day(self, date: NaiveDate) -> NaiveDate {
        match self {
            WindowUnit::Day => date,
            WindowUnit::Week => self
                .floor(date)
                .checked_add_signed(TimeDelta::days(6))
                .unwrap_or(NaiveDate::MAX),
            WindowUnit::Month => self
                .floor(date)
                .checked_add_months(Months::new(1))
                .and_then(|next| next.pred_opt())
                .unwrap_or(NaiveDate::MAX),
            WindowUnit::Year => {
                NaiveDate::from_ymd_opt(date.year(), 12, 31).unwrap_or(NaiveDate::MAX)
            }
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            WindowUnit::Day => "day",
            WindowUnit::Week => "week",
            WindowUnit::Month => "month",
            WindowUnit::Year => "year",
        }
    }
}

impl fmt::Display for WindowUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WindowUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "day" | "daily" => Ok(WindowUnit::Day),
            "week" | "weekly" => Ok(WindowUnit::Week),
            "month" | "monthly" => Ok(WindowUnit::Month),
            "year" | "yearly" => Ok(WindowUnit::Year),
            other => Err(format!(
                "unknown window unit '{other}' (expected day, week, month or year)"
            )),
        }
    }
}

/// A closed interval of time from the start of one day to the end of
/// another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Window {
    pub from: NaiveDateTime,
    pub until: NaiveDateTime,
}

impl Window {
    /// Creates the window from the start of `from` to the end of `until`.
    #[must_use]
    pub fn new(from: NaiveDate, until: NaiveDate) -> Self {
        Self {
            from: from.and_time(NaiveTime::MIN),
            until: until.and_time(end_of_day()),
        }
    }

    #[must_use]
    pub fn from_date(&self) -> NaiveDate {
        self.from.date()
    }

    #[must_use]
    pub fn until_date(&self) -> NaiveDate {
        self.until.date()
    }

    /// Returns true if `date` falls inside the window.
    #[must_use]
    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.from_date() && date <= self.until_date()
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}..{}",
            self.from.format(DATE_FORMAT),
            self.until.format(DATE_FORMAT)
        )
    }
}

fn end_of_day() -> NaiveTime {
    NaiveTime::from_hms_nano_opt(23, 59, 59, 999_999_999).map_or(NaiveTime::MIN, |t| t)
}

/// Splits `[from, until]` into contiguous windows aligned to `unit`.
///
/// # Errors
///
/// Returns [`WindowError::InvalidRange`] if `from` is after `until`.
pub fn split(
    from: NaiveDate,
    until: NaiveDate,
    unit: WindowUnit,
) -> Result<Vec<Window>, WindowError> {
    if from > until {
        return Err(WindowError::InvalidRange { from, until });
    }

    let mut windows = Vec::new();
    let mut cursor = from;
    loop {
        let start = if windows.is_empty() {
            from
        } else {
            unit.floor(cursor)
        };
        let end = unit.last_day(cursor);
        if end >= until {
            windows.push(Window::new(start, until));
            break;
        }
        windows.push(Window::new(start, end));
        match end.succ_opt() {
            Some(next) => cursor = next,
            None => break,
        }
    }
    Ok(windows)
}
