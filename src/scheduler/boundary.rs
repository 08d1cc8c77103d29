//! Period-boundary detection for report dispatch.

use crate::schedule::TimeOfDay;
use crate::store::ReportPeriod;
use crate::store::summary::last_day_of_month;
use chrono::{Datelike, NaiveDateTime, Weekday};

/// When monthly and weekly reports fall due.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportSchedule {
    /// Minute on the last day of the month the monthly report is sent.
    pub monthly_time: TimeOfDay,
    /// Day and minute of the weekly report, when enabled.
    pub weekly: Option<(Weekday, TimeOfDay)>,
}

impl ReportSchedule {
    /// Periods whose report is due at minute `now`.
    #[must_use]
    pub fn due(&self, now: NaiveDateTime) -> Vec<ReportPeriod> {
        let date = now.date();
        let minute = TimeOfDay::truncate(now.time());
        let mut due = Vec::new();

        if minute == self.monthly_time
            && last_day_of_month(date.year(), date.month()) == Some(date)
        {
            due.push(ReportPeriod::month_of(date));
        }
        if let Some((day, time)) = self.weekly
            && date.weekday() == day
            && minute == time
        {
            due.push(ReportPeriod::last_completed_week(date));
        }
        due
    }
}
