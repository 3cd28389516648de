//! Step logging — writes a day's total and fans the write out to challenges

use crate::calendar::week_window_monday;
use crate::error::{ChallengeError, ChallengeResult};
use crate::participation::ParticipationManager;
use crate::registry::require_user;
use crate::types::{DateWindow, StepEntry};
use chrono::{Duration, NaiveDate};
use persistence::repository::{ParticipantRepository, StepLogRecord, StepsRepository};
use persistence::SqlitePool;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{info, warn};

/// Upper bound for the weekly percentage
const WEEK_PCT_CAP: u32 = 999;
/// Length of the series behind the current streak, today included
const RECENT_DAYS: i64 = 14;
const DEFAULT_SOURCE: &str = "manual";
const SOURCE_MAX: usize = 32;
const NOTE_MAX: usize = 500;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogStepsRequest {
    pub steps: u32,
    /// Defaults to today
    pub day: Option<NaiveDate>,
    /// Where the number came from, `manual` when absent
    pub source: Option<String>,
    pub note: Option<String>,
}

impl LogStepsRequest {
    /// Returns the trimmed source and note
    pub fn validate(&self) -> ChallengeResult<(&str, Option<&str>)> {
        let source = self
            .source
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_SOURCE);
        if source.chars().count() > SOURCE_MAX {
            return Err(ChallengeError::invalid(format!(
                "source must be at most {SOURCE_MAX} characters"
            )));
        }

        let note = self.note.as_deref().map(str::trim).filter(|n| !n.is_empty());
        if note.is_some_and(|n| n.chars().count() > NOTE_MAX) {
            return Err(ChallengeError::invalid(format!(
                "note must be at most {NOTE_MAX} characters"
            )));
        }

        Ok((source, note))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LoggedSteps {
    pub log_id: String,
    pub day: NaiveDate,
    pub steps: u32,
    /// Participations refreshed by the write, `None` if the refresh failed
    pub refreshed: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DayTotal {
    pub day: NaiveDate,
    pub steps: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct WeekSummary {
    pub week_start: NaiveDate,
    pub week_end: NaiveDate,
    pub days: Vec<StepEntry>,
    pub total_steps: u64,
    pub target: Option<u32>,
    pub weekly_target: Option<u64>,
    pub remaining_steps: Option<u64>,
    pub target_met: bool,
    pub percentage: Decimal,
}

/// One day of the recent series
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreakDay {
    pub day: NaiveDate,
    pub total_steps: u32,
    /// Any steps logged
    pub habit_done: bool,
    /// Daily target reached
    pub goal_done: bool,
}

/// Habit and goal streaks ending today
#[derive(Debug, Clone, Serialize)]
pub struct CurrentStreak {
    pub today: NaiveDate,
    pub daily_target: Option<u32>,
    pub today_total: u32,
    pub habit_today_done: bool,
    pub goal_today_done: bool,
    pub habit_streak: u32,
    pub goal_streak: u32,
    pub last_14_days: Vec<StreakDay>,
}

pub struct StepService {
    pool: SqlitePool,
    participation: ParticipationManager,
}

impl StepService {
    pub fn new(pool: SqlitePool) -> Self {
        let participation = ParticipationManager::new(pool.clone());
        Self { pool, participation }
    }

    /// Record a raw log row and upsert the day's total, then refresh affected
    /// challenge snapshots. The write is committed even if the refresh fails.
    pub async fn log_steps(
        &self,
        user_id: &str,
        request: &LogStepsRequest,
        today: NaiveDate,
    ) -> ChallengeResult<LoggedSteps> {
        let (source, note) = request.validate()?;
        let day = request.day.unwrap_or(today);
        if day > today {
            return Err(ChallengeError::invalid(format!(
                "Cannot log steps for a future day ({day})"
            )));
        }
        require_user(&self.pool, user_id).await?;

        let (log, record) = StepsRepository::new(&self.pool)
            .record_steps(user_id, day, i64::from(request.steps), source, note)
            .await?;
        let entry = StepEntry::from(&record);
        info!(user_id, %day, steps = entry.steps, source, "Steps logged");

        let refreshed = match self.participation.on_step_write(user_id, day, entry.steps).await {
            Ok(n) => Some(n),
            Err(e) => {
                warn!(user_id, %day, error = %e, "Challenge refresh after step write failed");
                None
            }
        };

        Ok(LoggedSteps {
            log_id: log.id,
            day,
            steps: entry.steps,
            refreshed,
        })
    }

    /// Total for one day, 0 when nothing was logged
    pub async fn day_total(&self, user_id: &str, day: NaiveDate) -> ChallengeResult<DayTotal> {
        let steps = StepsRepository::new(&self.pool)
            .get_day(user_id, day)
            .await?
            .map(|r| StepEntry::from(&r).steps)
            .unwrap_or(0);
        Ok(DayTotal { day, steps })
    }

    /// Logged days in the window, oldest first
    pub async fn history(&self, user_id: &str, window: &DateWindow) -> ChallengeResult<Vec<StepEntry>> {
        let records = StepsRepository::new(&self.pool)
            .get_history(user_id, window.start(), window.end())
            .await?;
        Ok(records.iter().map(StepEntry::from).collect())
    }

    /// Raw writes for days in the window, newest first
    pub async fn logs(&self, user_id: &str, window: &DateWindow) -> ChallengeResult<Vec<StepLogRecord>> {
        let logs = StepsRepository::new(&self.pool)
            .get_logs(user_id, window.start(), window.end())
            .await?;
        Ok(logs)
    }

    /// Monday-to-Sunday summary for the week containing `day`, zero-filled
    pub async fn week_summary(&self, user_id: &str, day: NaiveDate) -> ChallengeResult<WeekSummary> {
        let (week_start, week_end) = week_window_monday(day);
        let window = DateWindow::new(week_start, week_end)?;

        let days = self.zero_filled(user_id, &window).await?;
        let total_steps: u64 = days.iter().map(|e| u64::from(e.steps)).sum();
        let target = self.daily_target(user_id).await?;

        Ok(summarize_week(week_start, week_end, days, total_steps, target))
    }

    /// Habit streak (any steps) and goal streak (target met), both ending today.
    /// A day not yet logged today breaks both.
    pub async fn current_streak(&self, user_id: &str, today: NaiveDate) -> ChallengeResult<CurrentStreak> {
        let window = DateWindow::new(today - Duration::days(RECENT_DAYS - 1), today)?;
        let days = self.zero_filled(user_id, &window).await?;
        let target = self.daily_target(user_id).await?;
        Ok(summarize_recent(today, &days, target))
    }

    async fn zero_filled(&self, user_id: &str, window: &DateWindow) -> ChallengeResult<Vec<StepEntry>> {
        let logged: HashMap<NaiveDate, u32> = self
            .history(user_id, window)
            .await?
            .into_iter()
            .map(|e| (e.day, e.steps))
            .collect();
        Ok(window
            .iter_days()
            .map(|d| StepEntry::new(d, logged.get(&d).copied().unwrap_or(0)))
            .collect())
    }

    /// Highest locked target across the user's active challenges
    async fn daily_target(&self, user_id: &str) -> ChallengeResult<Option<u32>> {
        let target = ParticipantRepository::new(&self.pool)
            .max_active_target(user_id)
            .await?
            .and_then(|t| u32::try_from(t).ok());
        Ok(target)
    }
}

fn summarize_week(
    week_start: NaiveDate,
    week_end: NaiveDate,
    days: Vec<StepEntry>,
    total_steps: u64,
    target: Option<u32>,
) -> WeekSummary {
    let weekly_target = target.map(|t| u64::from(t) * 7);
    let (target_met, percentage) = match weekly_target {
        Some(goal) if goal > 0 => {
            let pct = (Decimal::from(total_steps) * Decimal::ONE_HUNDRED / Decimal::from(goal))
                .round_dp(1)
                .min(Decimal::from(WEEK_PCT_CAP));
            (total_steps >= goal, pct)
        }
        _ => (false, Decimal::ZERO),
    };

    WeekSummary {
        week_start,
        week_end,
        days,
        total_steps,
        target,
        remaining_steps: weekly_target.map(|goal| goal.saturating_sub(total_steps)),
        weekly_target,
        target_met,
        percentage,
    }
}

/// `days` is zero-filled and ends on `today`
fn summarize_recent(today: NaiveDate, days: &[StepEntry], target: Option<u32>) -> CurrentStreak {
    let series: Vec<StreakDay> = days
        .iter()
        .map(|e| StreakDay {
            day: e.day,
            total_steps: e.steps,
            habit_done: e.steps > 0,
            goal_done: target.is_some_and(|t| e.steps >= t),
        })
        .collect();

    let habit_streak = trailing_run(&series, |d| d.habit_done);
    let goal_streak = trailing_run(&series, |d| d.goal_done);

    let today_entry = series.iter().find(|d| d.day == today);
    CurrentStreak {
        today,
        daily_target: target,
        today_total: today_entry.map(|d| d.total_steps).unwrap_or(0),
        habit_today_done: today_entry.is_some_and(|d| d.habit_done),
        goal_today_done: today_entry.is_some_and(|d| d.goal_done),
        habit_streak,
        goal_streak,
        last_14_days: series,
    }
}

/// Consecutive days from the end of `series` satisfying `done`
fn trailing_run(series: &[StreakDay], done: impl Fn(&StreakDay) -> bool) -> u32 {
    series.iter().rev().take_while(|d| done(d)).count() as u32
}
