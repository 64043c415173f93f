// src/calendar.rs
use chrono::{Datelike, NaiveDate, Weekday};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::fmt;
use tracing::debug;

use crate::error::ReportError;

pub const HOURS_PER_WORKING_DAY: Decimal = dec!(8);

/// A validated (month, year) pair. Constructing one is the only place an
/// invalid target month can be rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MonthPeriod {
    year: i32,
    month: u32,
    first_day: NaiveDate,
}

impl MonthPeriod {
    pub fn new(month: u32, year: i32) -> Result<Self, ReportError> {
        let first_day = NaiveDate::from_ymd_opt(year, month, 1)
            .ok_or(ReportError::InvalidPeriod { month, year })?;
        // The whole month must be representable, including the following first day.
        Self::first_of_next_month(first_day).ok_or(ReportError::InvalidPeriod { month, year })?;
        Ok(Self {
            year,
            month,
            first_day,
        })
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn first_day(&self) -> NaiveDate {
        self.first_day
    }

    /// Worksheet tab naming convention: `{month}_{yy}`, e.g. `3_18` for March 2018.
    pub fn sheet_name(&self) -> String {
        format!("{}_{:02}", self.month, self.year.rem_euclid(100))
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date.year() == self.year && date.month() == self.month
    }

    /// Every calendar day of the month, in order.
    pub fn days(&self) -> impl Iterator<Item = NaiveDate> {
        let period = *self;
        self.first_day
            .iter_days()
            .take_while(move |day| period.contains(*day))
    }

    fn first_of_next_month(first_day: NaiveDate) -> Option<NaiveDate> {
        let (year, month) = if first_day.month() == 12 {
            (first_day.year().checked_add(1)?, 1)
        } else {
            (first_day.year(), first_day.month() + 1)
        };
        NaiveDate::from_ymd_opt(year, month, 1)
    }
}

impl fmt::Display for MonthPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

pub fn is_working_day(date: NaiveDate) -> bool {
    !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// The working days of a month (weekends excluded) and the hours they imply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkingCalendar {
    period: MonthPeriod,
    working_days: Vec<NaiveDate>,
}

impl WorkingCalendar {
    pub fn for_month(period: MonthPeriod) -> Self {
        let working_days: Vec<NaiveDate> = period.days().filter(|d| is_working_day(*d)).collect();
        debug!(
            "Computed {} working days for {}",
            working_days.len(),
            period
        );
        Self {
            period,
            working_days,
        }
    }

    pub fn period(&self) -> MonthPeriod {
        self.period
    }

    pub fn expected_working_days(&self) -> &[NaiveDate] {
        &self.working_days
    }

    pub fn expected_hours(&self) -> Decimal {
        Decimal::from(self.working_days.len()) * HOURS_PER_WORKING_DAY
    }
}

/// Working days of the given month, in calendar order.
pub fn expected_working_days(period: MonthPeriod) -> Vec<NaiveDate> {
    WorkingCalendar::for_month(period).working_days
}

/// `expected_working_days(period).len() * 8`.
pub fn expected_hours(period: MonthPeriod) -> Decimal {
    WorkingCalendar::for_month(period).expected_hours()
}
