//! Static schedule table.
//!
//! The table is loaded once at startup from configuration and shared
//! read-only (`Arc<ScheduleTable>`) between the dispatcher, the pending
//! tracker and the inbound handler. Entries are kept ordered by time of day;
//! that order drives the backfill rule.

use crate::error::{HabitError, Result};
use crate::gateway::{Choice, Prompt, answer_payload};
use chrono::{NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// Minute-resolution time of day, written as `HH:MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeOfDay(NaiveTime);

impl TimeOfDay {
    /// Build from hour and minute. Returns `None` when out of range.
    #[must_use]
    pub fn from_hm(hour: u32, minute: u32) -> Option<Self> {
        NaiveTime::from_hms_opt(hour, minute, 0).map(Self)
    }

    /// Truncate any time to its minute.
    #[must_use]
    pub fn truncate(time: NaiveTime) -> Self {
        Self(NaiveTime::from_hms_opt(time.hour(), time.minute(), 0).unwrap_or(NaiveTime::MIN))
    }

    /// Underlying chrono time.
    #[must_use]
    pub fn as_naive(&self) -> NaiveTime {
        self.0
    }
}

impl Default for TimeOfDay {
    fn default() -> Self {
        Self(NaiveTime::MIN)
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.0.hour(), self.0.minute())
    }
}

impl FromStr for TimeOfDay {
    type Err = HabitError;

    fn from_str(s: &str) -> Result<Self> {
        NaiveTime::parse_from_str(s.trim(), "%H:%M")
            .map(Self)
            .map_err(|e| HabitError::Config(format!("invalid time of day `{s}`: {e}")))
    }
}

impl TryFrom<String> for TimeOfDay {
    type Error = HabitError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<TimeOfDay> for String {
    fn from(value: TimeOfDay) -> Self {
        value.to_string()
    }
}

/// Answer shape offered by a prompt.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptKind {
    /// Yes (1) / No (0).
    #[default]
    Binary,
    /// Integer score from 0 to 10.
    Scale,
}

impl PromptKind {
    /// Highest value accepted for this kind.
    #[must_use]
    pub fn max_value(self) -> u8 {
        match self {
            Self::Binary => 1,
            Self::Scale => 10,
        }
    }

    /// Returns `true` if `value` is a legal answer for this kind.
    #[must_use]
    pub fn accepts(self, value: u8) -> bool {
        value <= self.max_value()
    }
}

/// One scheduled question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    /// Local time of day the prompt is sent.
    pub time: TimeOfDay,
    /// Tracked area (e.g. `"Body"`).
    pub area: String,
    /// Answer shape.
    #[serde(default)]
    pub kind: PromptKind,
    /// Question shown to the subject.
    pub question: String,
    /// Optional hint shown under the question.
    #[serde(default)]
    pub description: String,
}

impl ScheduleEntry {
    /// Create a binary entry.
    pub fn binary(
        time: TimeOfDay,
        area: impl Into<String>,
        question: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            time,
            area: area.into(),
            kind: PromptKind::Binary,
            question: question.into(),
            description: description.into(),
        }
    }

    /// Create a 0-10 scale entry.
    pub fn scale(time: TimeOfDay, area: impl Into<String>, question: impl Into<String>) -> Self {
        Self {
            time,
            area: area.into(),
            kind: PromptKind::Scale,
            question: question.into(),
            description: String::new(),
        }
    }

    /// Render the kind-specific prompt sent to a subject.
    #[must_use]
    pub fn prompt(&self) -> Prompt {
        let mut text = format!("Daily check-in: {}\n{}", self.area, self.question);
        if !self.description.trim().is_empty() {
            text.push('\n');
            text.push_str(self.description.trim());
        }

        let choice = |label: String, value: u8| Choice {
            label,
            payload: answer_payload(self.kind, &self.area, value),
        };
        let choices = match self.kind {
            PromptKind::Binary => vec![vec![
                choice("Yes".to_owned(), 1),
                choice("No".to_owned(), 0),
            ]],
            PromptKind::Scale => vec![
                (0..=4).map(|n| choice(n.to_string(), n)).collect(),
                (5..=10).map(|n| choice(n.to_string(), n)).collect(),
            ],
        };

        Prompt {
            area: self.area.clone(),
            text,
            choices,
        }
    }
}

/// Ordered, validated schedule.
#[derive(Debug, Clone)]
pub struct ScheduleTable {
    entries: Vec<ScheduleEntry>,
}

impl ScheduleTable {
    /// Validate and order entries by time (stable for equal times).
    ///
    /// # Errors
    ///
    /// Returns [`HabitError::Config`] for empty areas or questions and for
    /// duplicate `(time, area)` pairs.
    pub fn new(mut entries: Vec<ScheduleEntry>) -> Result<Self> {
        let mut seen = HashSet::new();
        for entry in &entries {
            if entry.area.trim().is_empty() {
                return Err(HabitError::Config(format!(
                    "schedule entry at {} has an empty area",
                    entry.time
                )));
            }
            if entry.question.trim().is_empty() {
                return Err(HabitError::Config(format!(
                    "schedule entry {} at {} has an empty question",
                    entry.area, entry.time
                )));
            }
            if !seen.insert((entry.time, entry.area.clone())) {
                return Err(HabitError::Config(format!(
                    "duplicate schedule entry {} at {}",
                    entry.area, entry.time
                )));
            }
        }
        entries.sort_by_key(|e| e.time);
        Ok(Self { entries })
    }

    /// All entries in time order.
    #[must_use]
    pub fn entries(&self) -> &[ScheduleEntry] {
        &self.entries
    }

    /// Entries scheduled exactly at `time`.
    #[must_use]
    pub fn match_minute(&self, time: TimeOfDay) -> Vec<&ScheduleEntry> {
        self.entries.iter().filter(|e| e.time == time).collect()
    }

    /// Distinct areas of entries strictly earlier than `time`, in schedule order.
    #[must_use]
    pub fn areas_before(&self, time: TimeOfDay) -> Vec<&str> {
        let mut areas: Vec<&str> = Vec::new();
        for entry in self.entries.iter().take_while(|e| e.time < time) {
            if !areas.contains(&entry.area.as_str()) {
                areas.push(&entry.area);
            }
        }
        areas
    }

    /// Distinct areas in schedule order.
    #[must_use]
    pub fn areas(&self) -> Vec<&str> {
        let mut areas: Vec<&str> = Vec::new();
        for entry in &self.entries {
            if !areas.contains(&entry.area.as_str()) {
                areas.push(&entry.area);
            }
        }
        areas
    }

    /// Widest answer kind configured for `area`.
    #[must_use]
    pub fn kind_for(&self, area: &str) -> Option<PromptKind> {
        self.entries
            .iter()
            .filter(|e| e.area == area)
            .map(|e| e.kind)
            .max_by_key(|k| k.max_value())
    }

    /// Earliest entry time strictly after `time` on the same day.
    #[must_use]
    pub fn next_after(&self, time: TimeOfDay) -> Option<TimeOfDay> {
        self.entries.iter().map(|e| e.time).find(|t| *t > time)
    }
}

/// The schedule used when configuration does not provide one.
#[must_use]
pub fn default_entries() -> Vec<ScheduleEntry> {
    let at = |h: u32, m: u32| TimeOfDay::from_hm(h, m).unwrap_or(TimeOfDay(NaiveTime::MIN));
    let body = (
        "Did you take care of your body today?",
        "E.g. exercise, food, hydration, sleep or stretching.",
    );
    let mind = (
        "Did you stimulate your mind today?",
        "E.g. reading, studying, solving problems or planning.",
    );
    vec![
        ScheduleEntry::binary(at(7, 0), "Body", body.0, body.1),
        ScheduleEntry::binary(at(8, 50), "Mind", mind.0, mind.1),
        ScheduleEntry::binary(
            at(19, 0),
            "Work/Resources",
            "Did you move your goals forward today?",
            "E.g. focused work, organising tasks or learning.",
        ),
        ScheduleEntry::binary(at(20, 25), "Body", body.0, body.1),
        ScheduleEntry::binary(
            at(20, 30),
            "Spirit",
            "Did you nourish your spirit today?",
            "E.g. prayer, meditation or gratitude.",
        ),
        ScheduleEntry::binary(
            at(21, 0),
            "Soul",
            "Did you look after your soul today?",
            "E.g. pausing, creating, listening to music or enjoying art.",
        ),
        ScheduleEntry::binary(at(21, 5), "Mind", mind.0, mind.1),
        ScheduleEntry::binary(
            at(21, 10),
            "Relationships",
            "Did you connect with someone today?",
            "E.g. talking, supporting or showing affection.",
        ),
        ScheduleEntry::binary(
            at(21, 15),
            "Leisure",
            "Did you enjoy your free time?",
            "E.g. resting, having fun, hobbies or time in nature.",
        ),
    ]
}
