//! Report periods and the per-period read model handed to report renderers.

use crate::registry::SubjectId;
use crate::store::container::{RecordContainer, month_key, score};
use chrono::{Datelike, Days, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};

/// Last calendar day of `year`-`month`.
#[must_use]
pub fn last_day_of_month(year: i32, month: u32) -> Option<NaiveDate> {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)?.pred_opt()
}

/// Period a report covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReportPeriod {
    /// A calendar month.
    Month { year: i32, month: u32 },
    /// A Sunday-to-Saturday week starting at `start`.
    Week { start: NaiveDate },
}

impl ReportPeriod {
    /// Calendar month containing `date`.
    #[must_use]
    pub fn month_of(date: NaiveDate) -> Self {
        Self::Month {
            year: date.year(),
            month: date.month(),
        }
    }

    /// Sunday-to-Saturday week containing `date`.
    #[must_use]
    pub fn week_of(date: NaiveDate) -> Self {
        let back = u64::from(date.weekday().num_days_from_sunday());
        let start = date.checked_sub_days(Days::new(back)).unwrap_or(date);
        Self::Week { start }
    }

    /// Latest Sunday-to-Saturday week whose Saturday is on or before `date`.
    #[must_use]
    pub fn last_completed_week(date: NaiveDate) -> Self {
        let back = u64::from((date.weekday().num_days_from_sunday() + 1) % 7);
        let saturday = date.checked_sub_days(Days::new(back)).unwrap_or(date);
        Self::week_of(saturday)
    }

    /// First day of the period.
    #[must_use]
    pub fn first_day(&self) -> NaiveDate {
        match *self {
            Self::Month { year, month } => {
                NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(NaiveDate::MIN)
            }
            Self::Week { start } => start,
        }
    }

    /// Last day of the period, inclusive.
    #[must_use]
    pub fn last_day(&self) -> NaiveDate {
        match *self {
            Self::Month { year, month } => {
                last_day_of_month(year, month).unwrap_or_else(|| self.first_day())
            }
            Self::Week { start } => start.checked_add_days(Days::new(6)).unwrap_or(start),
        }
    }

    /// Number of calendar days covered.
    #[must_use]
    pub fn days(&self) -> u32 {
        let span = self.last_day().signed_duration_since(self.first_day()).num_days() + 1;
        u32::try_from(span).unwrap_or(0)
    }

    /// Stable label used in file names and dispatch keys
    /// (`2026-10`, `week-2026-10-18`).
    #[must_use]
    pub fn label(&self) -> String {
        match *self {
            Self::Month { year, month } => month_key(year, month),
            Self::Week { start } => format!("week-{}", start.format("%Y-%m-%d")),
        }
    }

    /// Whether the period is a week that starts on a Sunday.
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        match *self {
            Self::Month { year, month } => NaiveDate::from_ymd_opt(year, month, 1).is_some(),
            Self::Week { start } => start.weekday() == Weekday::Sun,
        }
    }
}

/// One report row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AreaSummary {
    pub area: String,
    /// `round(mean × 10)` over the period's records.
    pub score: u32,
    pub answered_days: u32,
}

/// Per-subject summary of one period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodSummary {
    pub subject: SubjectId,
    pub period: ReportPeriod,
    pub first_day: NaiveDate,
    pub last_day: NaiveDate,
    pub days_in_period: u32,
    pub areas: Vec<AreaSummary>,
}

impl PeriodSummary {
    /// Summarize `container` over `period`, one row per entry of `areas`.
    #[must_use]
    pub fn from_container(
        container: &RecordContainer,
        period: ReportPeriod,
        areas: &[String],
    ) -> Self {
        let first_day = period.first_day();
        let last_day = period.last_day();
        let rows = areas
            .iter()
            .map(|area| {
                let values = container.range_values(first_day, last_day, area);
                AreaSummary {
                    area: area.clone(),
                    score: score(&values),
                    answered_days: u32::try_from(values.len()).unwrap_or(u32::MAX),
                }
            })
            .collect();
        Self {
            subject: container.subject.clone(),
            period,
            first_day,
            last_day,
            days_in_period: period.days(),
            areas: rows,
        }
    }

    /// Row for `area`.
    #[must_use]
    pub fn area(&self, area: &str) -> Option<&AreaSummary> {
        self.areas.iter().find(|row| row.area == area)
    }
}
