//! Participation State Manager — join/leave rules, the write-once daily target
//! and the cached streak snapshot on each participation row.
//!
//! The snapshot is a rebuildable cache of the daily step log. It only changes
//! through [`ParticipationManager::on_step_write`] (or a full rebuild), and it
//! is always recomputed over the whole challenge window, so a backdated
//! correction heals it on the next write.

use crate::error::{ChallengeError, ChallengeResult};
use crate::ranking::LeaderboardRanker;
use crate::registry::{load_challenge, require_user};
use crate::streak::{compute_streak, percentage};
use crate::types::{DailyTarget, DateWindow, StepEntry};
use chrono::NaiveDate;
use persistence::repository::{
    ChallengeRepository, DirectoryRepository, ParticipantRecord, ParticipantRepository,
    ParticipationWindowRecord, SnapshotUpdate, StepsRepository,
};
use persistence::SqlitePool;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Cached progress fields of a participation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StreakSnapshot {
    pub current_streak: u32,
    pub longest_streak: u32,
    pub perfect_days: u32,
    pub total_score: u64,
    pub last_activity_date: Option<NaiveDate>,
}

impl StreakSnapshot {
    fn from_record(record: &ParticipantRecord) -> Self {
        Self {
            current_streak: count(record.current_streak),
            longest_streak: count(record.longest_streak),
            perfect_days: count(record.perfect_days),
            total_score: u64::try_from(record.total_score).unwrap_or(0),
            last_activity_date: record.last_activity_date,
        }
    }

    fn to_update(&self) -> SnapshotUpdate {
        SnapshotUpdate {
            current_streak: i64::from(self.current_streak),
            longest_streak: i64::from(self.longest_streak),
            perfect_days: i64::from(self.perfect_days),
            total_score: i64::try_from(self.total_score).unwrap_or(i64::MAX),
            last_activity_date: self.last_activity_date,
        }
    }
}

fn count(v: i64) -> u32 {
    u32::try_from(v).unwrap_or(0)
}

/// Recompute a snapshot from authoritative history.
/// Without a target the streak fields stay zero; score and last activity still count.
pub fn derive_snapshot(history: &[StepEntry], target: Option<u32>, window: &DateWindow) -> StreakSnapshot {
    let summary = compute_streak(history, target.unwrap_or(0), window);
    match target {
        Some(_) => StreakSnapshot {
            current_streak: summary.current_streak,
            longest_streak: summary.longest_streak,
            perfect_days: summary.days_met_goal,
            total_score: summary.total_steps,
            last_activity_date: summary.last_logged_date,
        },
        None => StreakSnapshot {
            total_score: summary.total_steps,
            last_activity_date: summary.last_logged_date,
            ..Default::default()
        },
    }
}

/// A participation row as seen by callers
#[derive(Debug, Clone, Serialize)]
pub struct Participant {
    pub id: String,
    pub challenge_id: String,
    pub user_id: String,
    pub user_name: Option<String>,
    pub team_id: Option<String>,
    pub team_name: Option<String>,
    pub joined_at: i64,
    pub left_at: Option<i64>,
    pub selected_daily_target: Option<u32>,
    #[serde(flatten)]
    pub snapshot: StreakSnapshot,
}

impl From<ParticipantRecord> for Participant {
    fn from(record: ParticipantRecord) -> Self {
        let snapshot = StreakSnapshot::from_record(&record);
        Self {
            selected_daily_target: record.selected_daily_target.and_then(|t| u32::try_from(t).ok()),
            id: record.id,
            challenge_id: record.challenge_id,
            user_id: record.user_id,
            user_name: record.user_name,
            team_id: record.team_id,
            team_name: record.team_name,
            joined_at: record.joined_at,
            left_at: record.left_at,
            snapshot,
        }
    }
}

/// Whether a snapshot came from the cache or from the raw log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    Derived,
    Authoritative,
}

#[derive(Debug, Clone, Serialize)]
pub struct SnapshotView {
    pub provenance: Provenance,
    #[serde(flatten)]
    pub snapshot: StreakSnapshot,
}

/// Totals from the start of the challenge up to a reference day
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressToDate {
    pub as_of: NaiveDate,
    pub elapsed_days: u32,
    pub total_steps: u64,
    pub days_met_goal: u32,
    pub completion_pct: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct ParticipantProgress {
    pub participant: Participant,
    pub cached: SnapshotView,
    pub live: SnapshotView,
    /// Cached snapshot differs from a fresh recompute
    pub stale: bool,
    pub to_date: ProgressToDate,
}

/// One row of "my challenges"
#[derive(Debug, Clone, Serialize)]
pub struct MyChallenge {
    pub challenge_id: String,
    pub challenge_title: String,
    pub challenge_status: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub joined_at: i64,
    pub selected_daily_target: Option<u32>,
    #[serde(flatten)]
    pub snapshot: StreakSnapshot,
    pub total_days: u32,
    pub elapsed_days: u32,
    pub completion_percentage: Decimal,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RebuildReport {
    pub participations: usize,
    pub challenges: usize,
}

/// Body of a join request
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JoinChallengeRequest {
    pub team_id: Option<String>,
    pub selected_daily_target: Option<u32>,
}

impl JoinChallengeRequest {
    /// Returns the parsed target, if any
    pub fn validate(&self) -> ChallengeResult<Option<DailyTarget>> {
        if let Some(team) = &self.team_id {
            if team.trim().is_empty() {
                return Err(ChallengeError::invalid("team_id must not be blank"));
            }
        }
        self.selected_daily_target.map(DailyTarget::try_from).transpose()
    }
}

/// Body of a set-target request
#[derive(Debug, Clone, Deserialize)]
pub struct SetTargetRequest {
    pub daily_target: u32,
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

pub struct ParticipationManager {
    pool: SqlitePool,
    ranker: LeaderboardRanker,
}

impl ParticipationManager {
    pub fn new(pool: SqlitePool) -> Self {
        let ranker = LeaderboardRanker::new(pool.clone());
        Self { pool, ranker }
    }

    /// Join a challenge with a fresh, zeroed snapshot
    pub async fn join(
        &self,
        challenge_id: &str,
        user_id: &str,
        request: &JoinChallengeRequest,
    ) -> ChallengeResult<Participant> {
        let target = request.validate()?;
        let (challenge, _) = load_challenge(&self.pool, challenge_id).await?;
        if challenge.status == "archived" {
            return Err(ChallengeError::invalid("Cannot join an archived challenge"));
        }
        require_user(&self.pool, user_id).await?;

        let participants = ParticipantRepository::new(&self.pool);
        if participants.find_active(challenge_id, user_id).await?.is_some() {
            return Err(ChallengeError::AlreadyJoined);
        }

        if let Some(team_id) = &request.team_id {
            let team = DirectoryRepository::new(&self.pool).get_team(team_id).await?;
            if team.is_none() {
                return Err(ChallengeError::InvalidTeam(team_id.clone()));
            }
        }

        let record = participants
            .insert(
                challenge_id,
                user_id,
                request.team_id.as_deref(),
                target.map(|t| i64::from(t.steps())),
            )
            .await
            .map_err(|e| {
                // lost a race with a concurrent join
                if e.is_unique_violation() {
                    ChallengeError::AlreadyJoined
                } else {
                    ChallengeError::Storage(e)
                }
            })?;

        info!(
            challenge_id,
            user_id,
            team_id = ?request.team_id,
            target = ?target.map(|t| t.steps()),
            "Joined challenge"
        );
        self.refresh_rollups_logged(challenge_id).await;

        Ok(record.into())
    }

    /// Set the daily target once. Any later call fails with `TargetLocked`.
    pub async fn set_target(
        &self,
        challenge_id: &str,
        user_id: &str,
        daily_target: u32,
    ) -> ChallengeResult<Participant> {
        let target = DailyTarget::try_from(daily_target)?;
        let participants = ParticipantRepository::new(&self.pool);

        let affected = participants
            .set_target_if_unset(challenge_id, user_id, i64::from(target.steps()))
            .await?;

        let current = participants
            .find_active(challenge_id, user_id)
            .await?
            .ok_or(ChallengeError::NotAParticipant)?;

        if affected == 0 {
            return Err(ChallengeError::TargetLocked);
        }

        info!(challenge_id, user_id, target = target.steps(), "Daily target locked");
        Ok(current.into())
    }

    /// Soft-delete the active participation, freezing its snapshot
    pub async fn leave(&self, challenge_id: &str, user_id: &str) -> ChallengeResult<()> {
        let affected = ParticipantRepository::new(&self.pool)
            .mark_left(challenge_id, user_id)
            .await?;
        if affected == 0 {
            return Err(ChallengeError::NotAParticipant);
        }

        info!(challenge_id, user_id, "Left challenge");
        self.refresh_rollups_logged(challenge_id).await;
        Ok(())
    }

    /// Hook run after a step write: refresh every active participation whose
    /// challenge window contains `day`. Returns how many were refreshed.
    /// Rollup failures are logged and do not fail the hook.
    pub async fn on_step_write(&self, user_id: &str, day: NaiveDate, steps: u32) -> ChallengeResult<usize> {
        let windows = ParticipantRepository::new(&self.pool)
            .active_windows_on_day(user_id, day)
            .await?;

        let mut touched = BTreeSet::new();
        for window in &windows {
            self.refresh_participation(window).await?;
            touched.insert(window.challenge_id.clone());
        }

        for challenge_id in &touched {
            self.refresh_rollups_logged(challenge_id).await;
        }

        debug!(user_id, %day, steps, refreshed = windows.len(), "Step write applied to challenges");
        Ok(windows.len())
    }

    /// Cached vs freshly computed progress for one participant
    pub async fn progress(
        &self,
        challenge_id: &str,
        user_id: &str,
        as_of: NaiveDate,
    ) -> ChallengeResult<ParticipantProgress> {
        let (_, window) = load_challenge(&self.pool, challenge_id).await?;
        let record = ParticipantRepository::new(&self.pool)
            .find_active(challenge_id, user_id)
            .await?
            .ok_or(ChallengeError::NotAParticipant)?;

        let history = self.history_in(user_id, &window).await?;
        let participant = Participant::from(record);
        let target = participant.selected_daily_target;

        let live = derive_snapshot(&history, target, &window);
        let cached = participant.snapshot.clone();
        let stale = cached != live;

        let to_date = match window.clip_end(as_of) {
            Some(elapsed) => {
                let in_range = history.iter().filter(|e| elapsed.contains(e.day));
                let mut total_steps = 0u64;
                let mut days_met = 0u32;
                for entry in in_range {
                    total_steps += u64::from(entry.steps);
                    if target.is_some_and(|t| entry.steps >= t) {
                        days_met += 1;
                    }
                }
                ProgressToDate {
                    as_of,
                    elapsed_days: elapsed.days(),
                    total_steps,
                    days_met_goal: days_met,
                    completion_pct: percentage(days_met, elapsed.days()),
                }
            }
            None => ProgressToDate {
                as_of,
                elapsed_days: 0,
                total_steps: 0,
                days_met_goal: 0,
                completion_pct: Decimal::ZERO,
            },
        };

        Ok(ParticipantProgress {
            participant,
            cached: SnapshotView {
                provenance: Provenance::Derived,
                snapshot: cached,
            },
            live: SnapshotView {
                provenance: Provenance::Authoritative,
                snapshot: live,
            },
            stale,
            to_date,
        })
    }

    /// Active participations of a user with completion over elapsed days
    pub async fn my_challenges(&self, user_id: &str, as_of: NaiveDate) -> ChallengeResult<Vec<MyChallenge>> {
        let records = ParticipantRepository::new(&self.pool)
            .active_for_user(user_id)
            .await?;
        let challenges = ChallengeRepository::new(&self.pool);

        let mut out = Vec::with_capacity(records.len());
        for record in records {
            let Some(challenge) = challenges.get(&record.challenge_id).await? else {
                continue;
            };
            let window = DateWindow::new(challenge.start_date, challenge.end_date)?;
            let elapsed_days = window.clip_end(as_of).map(|w| w.days()).unwrap_or(0);
            let participant = Participant::from(record);

            out.push(MyChallenge {
                completion_percentage: percentage(participant.snapshot.perfect_days, elapsed_days),
                challenge_id: challenge.id,
                challenge_title: challenge.title,
                challenge_status: challenge.status,
                start_date: challenge.start_date,
                end_date: challenge.end_date,
                joined_at: participant.joined_at,
                selected_daily_target: participant.selected_daily_target,
                snapshot: participant.snapshot,
                total_days: window.days(),
                elapsed_days,
            });
        }

        Ok(out)
    }

    /// Recompute every active snapshot and every team rollup from raw logs
    pub async fn rebuild_all(&self) -> ChallengeResult<RebuildReport> {
        let windows = ParticipantRepository::new(&self.pool)
            .all_active_windows()
            .await?;
        for window in &windows {
            self.refresh_participation(window).await?;
        }

        let challenges = ChallengeRepository::new(&self.pool)
            .list_rebuildable()
            .await?;
        for challenge in &challenges {
            self.ranker.refresh_team_rollups(&challenge.id).await?;
        }

        let report = RebuildReport {
            participations: windows.len(),
            challenges: challenges.len(),
        };
        info!(
            participations = report.participations,
            challenges = report.challenges,
            "Rebuilt challenge caches"
        );
        Ok(report)
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    async fn history_in(&self, user_id: &str, window: &DateWindow) -> ChallengeResult<Vec<StepEntry>> {
        let records = StepsRepository::new(&self.pool)
            .get_history(user_id, window.start(), window.end())
            .await?;
        Ok(records.iter().map(StepEntry::from).collect())
    }

    /// Full-window recompute persisted with one UPDATE
    async fn refresh_participation(&self, row: &ParticipationWindowRecord) -> ChallengeResult<StreakSnapshot> {
        let window = DateWindow::new(row.start_date, row.end_date)?;
        let history = self.history_in(&row.user_id, &window).await?;
        let target = row.selected_daily_target.and_then(|t| u32::try_from(t).ok());
        let snapshot = derive_snapshot(&history, target, &window);

        ParticipantRepository::new(&self.pool)
            .update_snapshot(&row.participant_id, &snapshot.to_update())
            .await?;

        debug!(
            participant_id = %row.participant_id,
            challenge_id = %row.challenge_id,
            current = snapshot.current_streak,
            longest = snapshot.longest_streak,
            "Snapshot refreshed"
        );
        Ok(snapshot)
    }

    async fn refresh_rollups_logged(&self, challenge_id: &str) {
        if let Err(e) = self.ranker.refresh_team_rollups(challenge_id).await {
            warn!(challenge_id, error = %e, "Team rollup refresh failed");
        }
    }
}
