//! Core domain types for challenges and step logs

use crate::error::{ChallengeError, ChallengeResult};
use chrono::NaiveDate;
use persistence::repository::DailyStepRecord;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

// ---------------------------------------------------------------------------
// Challenge enums
// ---------------------------------------------------------------------------

/// Length class of a challenge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChallengePeriod {
    Week,
    Month,
}

impl ChallengePeriod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Week => "week",
            Self::Month => "month",
        }
    }
}

impl FromStr for ChallengePeriod {
    type Err = ChallengeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "week" => Ok(Self::Week),
            "month" => Ok(Self::Month),
            other => Err(ChallengeError::invalid(format!("Unknown period '{other}'"))),
        }
    }
}

/// Who competes in a challenge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeScope {
    Individual,
    Team,
    Department,
}

impl ChallengeScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Individual => "individual",
            Self::Team => "team",
            Self::Department => "department",
        }
    }
}

impl FromStr for ChallengeScope {
    type Err = ChallengeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "individual" => Ok(Self::Individual),
            "team" => Ok(Self::Team),
            "department" => Ok(Self::Department),
            other => Err(ChallengeError::invalid(format!("Unknown scope '{other}'"))),
        }
    }
}

/// Lifecycle state. Transitions only move forward:
/// draft -> active -> completed -> archived
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeStatus {
    Draft,
    Active,
    Completed,
    Archived,
}

impl ChallengeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Archived => "archived",
        }
    }

    /// Staying put is allowed, skipping ahead is allowed, going back is not
    pub fn can_transition_to(&self, next: ChallengeStatus) -> bool {
        next >= *self
    }
}

impl FromStr for ChallengeStatus {
    type Err = ChallengeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(Self::Draft),
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            "archived" => Ok(Self::Archived),
            other => Err(ChallengeError::invalid(format!("Unknown status '{other}'"))),
        }
    }
}

/// How a metric goal is evaluated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricRuleType {
    #[default]
    Daily,
    Weekly,
}

impl MetricRuleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
        }
    }
}

impl FromStr for MetricRuleType {
    type Err = ChallengeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            other => Err(ChallengeError::invalid(format!("Unknown rule type '{other}'"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Daily target
// ---------------------------------------------------------------------------

/// One of the fixed per-day step goals a participant may pick
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "u32", try_from = "u32")]
pub enum DailyTarget {
    Steps3000,
    Steps5000,
    Steps7500,
    Steps10000,
}

impl DailyTarget {
    pub const ALL: [DailyTarget; 4] = [
        Self::Steps3000,
        Self::Steps5000,
        Self::Steps7500,
        Self::Steps10000,
    ];

    pub fn steps(&self) -> u32 {
        match self {
            Self::Steps3000 => 3000,
            Self::Steps5000 => 5000,
            Self::Steps7500 => 7500,
            Self::Steps10000 => 10000,
        }
    }
}

impl TryFrom<u32> for DailyTarget {
    type Error = ChallengeError;

    fn try_from(steps: u32) -> Result<Self, Self::Error> {
        Self::ALL
            .into_iter()
            .find(|t| t.steps() == steps)
            .ok_or(ChallengeError::InvalidTarget(steps))
    }
}

impl From<DailyTarget> for u32 {
    fn from(target: DailyTarget) -> u32 {
        target.steps()
    }
}

// ---------------------------------------------------------------------------
// Step history
// ---------------------------------------------------------------------------

/// One day of a user's step history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepEntry {
    pub day: NaiveDate,
    pub steps: u32,
}

impl StepEntry {
    pub fn new(day: NaiveDate, steps: u32) -> Self {
        Self { day, steps }
    }
}

impl From<&DailyStepRecord> for StepEntry {
    fn from(record: &DailyStepRecord) -> Self {
        Self {
            day: record.day,
            steps: u32::try_from(record.steps).unwrap_or(0),
        }
    }
}

/// Inclusive calendar range `[start, end]`, never inverted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DateWindow {
    start: NaiveDate,
    end: NaiveDate,
}

impl DateWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> ChallengeResult<Self> {
        if end < start {
            return Err(ChallengeError::invalid(format!(
                "Window end {end} is before start {start}"
            )));
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    /// Number of calendar days, both ends included
    pub fn days(&self) -> u32 {
        crate::calendar::days_inclusive(self.start, self.end)
    }

    pub fn contains(&self, day: NaiveDate) -> bool {
        self.start <= day && day <= self.end
    }

    /// The part of the window up to and including `as_of`; `None` before it starts
    pub fn clip_end(&self, as_of: NaiveDate) -> Option<DateWindow> {
        if as_of < self.start {
            return None;
        }
        Some(Self {
            start: self.start,
            end: self.end.min(as_of),
        })
    }

    /// Every day of the window in order
    pub fn iter_days(&self) -> impl Iterator<Item = NaiveDate> {
        let end = self.end;
        self.start.iter_days().take_while(move |d| *d <= end)
    }
}
