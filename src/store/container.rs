//! Per-subject record container.
//!
//! One container holds every `(date, area) -> value` fact for a subject plus
//! the cached monthly aggregates derived from them. Only the subject's store
//! actor ever mutates a container.

use crate::error::{HabitError, Result};
use crate::registry::SubjectId;
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Largest value a record may hold.
pub const MAX_RECORD_VALUE: u8 = 10;

const CONTAINER_VERSION: u8 = 1;

/// `YYYY-MM-DD` key used for a record day.
#[must_use]
pub fn date_key(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// `YYYY-MM` key used for an aggregate bucket.
#[must_use]
pub fn month_key(year: i32, month: u32) -> String {
    format!("{year:04}-{month:02}")
}

fn month_key_of(date: NaiveDate) -> String {
    month_key(date.year(), date.month())
}

/// `round(mean × 10)` over `values`; an empty bucket scores 0.
#[must_use]
pub fn score(values: &[u8]) -> u32 {
    if values.is_empty() {
        return 0;
    }
    let sum: u32 = values.iter().map(|v| u32::from(*v)).sum();
    let mean = f64::from(sum) / values.len() as f64;
    (mean * 10.0).round() as u32
}

/// Serialized state of one subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordContainer {
    #[serde(default = "default_version")]
    pub version: u8,
    pub subject: SubjectId,
    /// `YYYY-MM-DD` → area → value.
    #[serde(default)]
    pub records: BTreeMap<String, BTreeMap<String, u8>>,
    /// `YYYY-MM` → area → `round(mean × 10)`.
    #[serde(default)]
    pub aggregates: BTreeMap<String, BTreeMap<String, u32>>,
}

fn default_version() -> u8 {
    CONTAINER_VERSION
}

impl RecordContainer {
    /// Empty container for `subject`.
    #[must_use]
    pub fn new(subject: SubjectId) -> Self {
        Self {
            version: CONTAINER_VERSION,
            subject,
            records: BTreeMap::new(),
            aggregates: BTreeMap::new(),
        }
    }

    /// Stored value for `(date, area)`.
    #[must_use]
    pub fn get(&self, date: NaiveDate, area: &str) -> Option<u8> {
        self.records
            .get(&date_key(date))
            .and_then(|day| day.get(area))
            .copied()
    }

    /// Returns `true` when a record exists for `(date, area)`.
    #[must_use]
    pub fn contains(&self, date: NaiveDate, area: &str) -> bool {
        self.get(date, area).is_some()
    }

    /// Insert or overwrite a record and refresh its month's aggregate.
    ///
    /// Returns the value that was replaced, if any.
    ///
    /// # Errors
    ///
    /// Returns [`HabitError::InvalidValue`] for values above
    /// [`MAX_RECORD_VALUE`].
    pub fn upsert(&mut self, date: NaiveDate, area: &str, value: u8) -> Result<Option<u8>> {
        if value > MAX_RECORD_VALUE {
            return Err(HabitError::InvalidValue {
                area: area.to_owned(),
                value,
            });
        }
        let previous = self
            .records
            .entry(date_key(date))
            .or_default()
            .insert(area.to_owned(), value);
        self.refresh_aggregate(date.year(), date.month(), area);
        Ok(previous)
    }

    /// Values recorded for `area` during the given month.
    #[must_use]
    pub fn month_values(&self, year: i32, month: u32, area: &str) -> Vec<u8> {
        let prefix = format!("{}-", month_key(year, month));
        self.records
            .range(prefix.clone()..)
            .take_while(|(day, _)| day.starts_with(&prefix))
            .filter_map(|(_, areas)| areas.get(area).copied())
            .collect()
    }

    /// Values recorded for `area` between `start` and `end`, inclusive.
    #[must_use]
    pub fn range_values(&self, start: NaiveDate, end: NaiveDate, area: &str) -> Vec<u8> {
        self.records
            .range(date_key(start)..=date_key(end))
            .filter_map(|(_, areas)| areas.get(area).copied())
            .collect()
    }

    /// Cached aggregate for `(month, area)`.
    #[must_use]
    pub fn aggregate(&self, year: i32, month: u32, area: &str) -> Option<u32> {
        self.aggregates
            .get(&month_key(year, month))
            .and_then(|areas| areas.get(area))
            .copied()
    }

    /// Recompute every aggregate from the records alone.
    #[must_use]
    pub fn recompute_all(&self) -> BTreeMap<String, BTreeMap<String, u32>> {
        let mut buckets: BTreeMap<String, BTreeMap<String, Vec<u8>>> = BTreeMap::new();
        for (day, areas) in &self.records {
            let Ok(date) = NaiveDate::parse_from_str(day, "%Y-%m-%d") else {
                continue;
            };
            let bucket = buckets.entry(month_key_of(date)).or_default();
            for (area, value) in areas {
                bucket.entry(area.clone()).or_default().push(*value);
            }
        }
        buckets
            .into_iter()
            .map(|(month, areas)| {
                let scores = areas
                    .into_iter()
                    .map(|(area, values)| (area, score(&values)))
                    .collect();
                (month, scores)
            })
            .collect()
    }

    fn refresh_aggregate(&mut self, year: i32, month: u32, area: &str) {
        let value = score(&self.month_values(year, month, area));
        self.aggregates
            .entry(month_key(year, month))
            .or_default()
            .insert(area.to_owned(), value);
    }
}
