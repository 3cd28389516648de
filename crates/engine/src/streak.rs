//! Streak Calculator — rolling streaks and completion counts over a date window
//!
//! Pure function of (history, target, window). Days without a record count
//! as zero steps. The current streak is anchored to the last *logged* day in
//! the window, not to the wall clock, so a streak stays displayed until a
//! later write moves the anchor.

use crate::types::{DateWindow, StepEntry};
use chrono::{Duration, NaiveDate};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;

/// Output of [`compute_streak`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreakSummary {
    pub current_streak: u32,
    pub longest_streak: u32,
    /// Days with a record inside the window (a logged zero still counts)
    pub days_logged: u32,
    pub days_met_goal: u32,
    pub total_days: u32,
    /// Percent of days from window start to the last logged day that met the goal
    pub completion_rate: Decimal,
    pub last_logged_date: Option<NaiveDate>,
    /// Sum of steps inside the window
    pub total_steps: u64,
}

impl StreakSummary {
    fn empty(total_days: u32) -> Self {
        Self {
            current_streak: 0,
            longest_streak: 0,
            days_logged: 0,
            days_met_goal: 0,
            total_days,
            completion_rate: Decimal::ZERO,
            last_logged_date: None,
            total_steps: 0,
        }
    }
}

/// Compute streak figures for one participant.
///
/// `history` need not be sorted; entries outside `window` are ignored and a
/// repeated day keeps the last value seen.
pub fn compute_streak(history: &[StepEntry], daily_target: u32, window: &DateWindow) -> StreakSummary {
    let total_days = window.days();

    let lookup: BTreeMap<NaiveDate, u32> = history
        .iter()
        .filter(|e| window.contains(e.day))
        .map(|e| (e.day, e.steps))
        .collect();

    let Some(&last_logged) = lookup.keys().next_back() else {
        return StreakSummary::empty(total_days);
    };

    let steps_on = |day: NaiveDate| lookup.get(&day).copied().unwrap_or(0);
    let meets = |day: NaiveDate| steps_on(day) >= daily_target;

    // Walk backward from the anchor
    let mut current = 0u32;
    let mut day = last_logged;
    while day >= window.start() && meets(day) {
        current += 1;
        day -= Duration::days(1);
    }

    // Forward scan start..=anchor
    let mut longest = 0u32;
    let mut run = 0u32;
    let mut days_met = 0u32;
    let mut day = window.start();
    while day <= last_logged {
        if meets(day) {
            run += 1;
            days_met += 1;
            longest = longest.max(run);
        } else {
            run = 0;
        }
        day += Duration::days(1);
    }

    let elapsed = crate::calendar::days_inclusive(window.start(), last_logged);
    let completion_rate = percentage(days_met, elapsed);

    StreakSummary {
        current_streak: current,
        longest_streak: longest.max(current),
        days_logged: lookup.len() as u32,
        days_met_goal: days_met,
        total_days,
        completion_rate,
        last_logged_date: Some(last_logged),
        total_steps: lookup.values().map(|s| u64::from(*s)).sum(),
    }
}

/// `part / whole * 100` rounded to one decimal, 0 when `whole` is 0
pub fn percentage(part: u32, whole: u32) -> Decimal {
    if whole == 0 {
        return Decimal::ZERO;
    }
    (Decimal::from(part) * Decimal::ONE_HUNDRED / Decimal::from(whole)).round_dp(1)
}
