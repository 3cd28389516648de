//! Leaderboard Ranker — ranks active participants of a challenge by total steps
//! and maintains the per-team rollup cache.
//!
//! Rankings are read-only views computed at request time from the daily step
//! log. Ties share a rank (standard competition ranking) and badges are a
//! pure function of rank.

use crate::calendar::days_inclusive;
use crate::error::ChallengeResult;
use crate::registry::load_challenge;
use crate::streak::percentage;
use crate::types::{DateWindow, StepEntry};
use chrono::NaiveDate;
use persistence::repository::{
    DailyStepRecord, ParticipantRepository, RollupRepository, StepsRepository, TeamRollupRow,
};
use persistence::SqlitePool;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::debug;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Presentational tier derived from rank
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BadgeTier {
    Elite,
    Pro,
    Rising,
}

impl BadgeTier {
    pub fn for_rank(rank: u32) -> Option<BadgeTier> {
        match rank {
            1..=3 => Some(Self::Elite),
            4..=10 => Some(Self::Pro),
            11..=25 => Some(Self::Rising),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Elite => "Elite",
            Self::Pro => "Pro",
            Self::Rising => "Rising",
        }
    }
}

/// Everything the ranker needs about one participant
#[derive(Debug, Clone)]
pub struct RankInput {
    pub user_id: String,
    pub user_name: Option<String>,
    pub team_id: Option<String>,
    pub daily_target: Option<u32>,
    pub history: Vec<StepEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeaderboardEntry {
    pub rank: u32,
    pub user_id: String,
    pub user_name: Option<String>,
    pub team_id: Option<String>,
    pub total_steps: u64,
    pub avg_steps: Decimal,
    pub days_met_goal: u32,
    pub days_logged: u32,
    pub completion_pct: Decimal,
    pub badge: Option<BadgeTier>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Leaderboard {
    pub challenge_id: String,
    pub challenge_title: String,
    pub as_of: NaiveDate,
    pub window_start: NaiveDate,
    pub window_end: NaiveDate,
    pub elapsed_days: u32,
    pub entries: Vec<LeaderboardEntry>,
}

/// Member of a team inside one challenge
#[derive(Debug, Clone)]
pub struct TeamMember {
    pub user_id: String,
    pub team_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TeamStanding {
    pub rank: u32,
    pub team_id: String,
    pub team_name: Option<String>,
    pub member_count: u32,
    pub total_steps: u64,
    pub avg_steps_per_member: Decimal,
    pub active_days: u32,
}

// ---------------------------------------------------------------------------
// Pure ranking
// ---------------------------------------------------------------------------

/// `1 + number of strictly higher totals`, given totals sorted descending
fn competition_ranks(sorted_totals: &[u64]) -> Vec<u32> {
    let mut ranks = Vec::with_capacity(sorted_totals.len());
    for (i, total) in sorted_totals.iter().enumerate() {
        let rank = match i {
            0 => 1,
            _ if sorted_totals[i - 1] == *total => ranks[i - 1],
            _ => i as u32 + 1,
        };
        ranks.push(rank);
    }
    ranks
}

/// Rank participants over `window` (`None` when the challenge has not started yet).
/// Output is sorted by total descending, ties ordered by user id.
pub fn build_leaderboard(inputs: Vec<RankInput>, window: Option<&DateWindow>) -> Vec<LeaderboardEntry> {
    let elapsed = window.map(|w| w.days()).unwrap_or(0);

    let mut entries: Vec<LeaderboardEntry> = inputs
        .into_iter()
        .map(|input| {
            let mut total_steps = 0u64;
            let mut days_logged = 0u32;
            let mut days_met_goal = 0u32;

            if let Some(w) = window {
                let by_day: BTreeMap<NaiveDate, u32> = input
                    .history
                    .iter()
                    .filter(|e| w.contains(e.day))
                    .map(|e| (e.day, e.steps))
                    .collect();
                for steps in by_day.values() {
                    total_steps += u64::from(*steps);
                    if *steps > 0 {
                        days_logged += 1;
                    }
                    if input.daily_target.is_some_and(|t| *steps >= t) {
                        days_met_goal += 1;
                    }
                }
            }

            let avg_steps = if days_logged > 0 {
                (Decimal::from(total_steps) / Decimal::from(days_logged)).round_dp(1)
            } else {
                Decimal::ZERO
            };
            let completion_pct = match input.daily_target {
                Some(_) => percentage(days_met_goal, elapsed),
                None => Decimal::ZERO,
            };

            LeaderboardEntry {
                rank: 0,
                user_id: input.user_id,
                user_name: input.user_name,
                team_id: input.team_id,
                total_steps,
                avg_steps,
                days_met_goal,
                days_logged,
                completion_pct,
                badge: None,
            }
        })
        .collect();

    entries.sort_by(|a, b| {
        b.total_steps
            .cmp(&a.total_steps)
            .then_with(|| a.user_id.cmp(&b.user_id))
    });

    let totals: Vec<u64> = entries.iter().map(|e| e.total_steps).collect();
    for (entry, rank) in entries.iter_mut().zip(competition_ranks(&totals)) {
        entry.rank = rank;
        entry.badge = BadgeTier::for_rank(rank);
    }

    entries
}

/// Aggregate per-team totals over `window` from raw step rows.
/// Teams with members but no steps still get a zero row.
pub fn compute_team_rollups(
    members: &[TeamMember],
    rows: &[DailyStepRecord],
    window: &DateWindow,
) -> Vec<TeamRollupRow> {
    let team_of: HashMap<&str, &str> = members
        .iter()
        .map(|m| (m.user_id.as_str(), m.team_id.as_str()))
        .collect();

    #[derive(Default)]
    struct Acc {
        members: u32,
        total: u64,
        active_days: BTreeSet<NaiveDate>,
    }

    let mut teams: BTreeMap<&str, Acc> = BTreeMap::new();
    for member in members {
        teams.entry(member.team_id.as_str()).or_default().members += 1;
    }

    for row in rows.iter().filter(|r| window.contains(r.day)) {
        let Some(team) = team_of.get(row.user_id.as_str()) else {
            continue;
        };
        let acc = teams.entry(*team).or_default();
        let steps = u64::try_from(row.steps).unwrap_or(0);
        acc.total += steps;
        if steps > 0 {
            acc.active_days.insert(row.day);
        }
    }

    teams
        .into_iter()
        .map(|(team_id, acc)| TeamRollupRow {
            team_id: team_id.to_string(),
            member_count: i64::from(acc.members),
            total_steps: i64::try_from(acc.total).unwrap_or(i64::MAX),
            avg_steps_per_member: if acc.members > 0 {
                acc.total as f64 / f64::from(acc.members)
            } else {
                0.0
            },
            active_days: acc.active_days.len() as i64,
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Ranker service
// ---------------------------------------------------------------------------

pub struct LeaderboardRanker {
    pool: SqlitePool,
}

impl LeaderboardRanker {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Rank active participants over `[start, min(end, as_of)]`
    pub async fn rank(&self, challenge_id: &str, as_of: NaiveDate) -> ChallengeResult<Leaderboard> {
        let (challenge, full) = load_challenge(&self.pool, challenge_id).await?;
        let window = full.clip_end(as_of);

        let roster = ParticipantRepository::new(&self.pool)
            .roster(challenge_id)
            .await?;

        let mut histories: HashMap<String, Vec<StepEntry>> = HashMap::new();
        if let Some(w) = &window {
            let rows = StepsRepository::new(&self.pool)
                .get_challenge_rows(challenge_id, w.start(), w.end())
                .await?;
            for row in &rows {
                histories
                    .entry(row.user_id.clone())
                    .or_default()
                    .push(StepEntry::from(row));
            }
        }

        let inputs = roster
            .into_iter()
            .map(|r| RankInput {
                history: histories.remove(&r.user_id).unwrap_or_default(),
                user_id: r.user_id,
                user_name: r.user_name,
                team_id: r.team_id,
                daily_target: r.selected_daily_target.and_then(|t| u32::try_from(t).ok()),
            })
            .collect();

        let entries = build_leaderboard(inputs, window.as_ref());
        let window_end = challenge.end_date.min(as_of);

        Ok(Leaderboard {
            elapsed_days: days_inclusive(challenge.start_date, window_end),
            challenge_id: challenge.id,
            challenge_title: challenge.title,
            as_of,
            window_start: challenge.start_date,
            window_end,
            entries,
        })
    }

    /// Recompute the team rollups of a challenge over its full window.
    /// Returns the number of teams written.
    pub async fn refresh_team_rollups(&self, challenge_id: &str) -> ChallengeResult<usize> {
        let (_, window) = load_challenge(&self.pool, challenge_id).await?;

        let members: Vec<TeamMember> = ParticipantRepository::new(&self.pool)
            .roster(challenge_id)
            .await?
            .into_iter()
            .filter_map(|r| {
                r.team_id.map(|team_id| TeamMember {
                    user_id: r.user_id,
                    team_id,
                })
            })
            .collect();

        let rows = StepsRepository::new(&self.pool)
            .get_challenge_rows(challenge_id, window.start(), window.end())
            .await?;
        let rollups = compute_team_rollups(&members, &rows, &window);

        RollupRepository::new(&self.pool)
            .replace_for_challenge(challenge_id, &rollups)
            .await?;

        debug!(challenge_id, teams = rollups.len(), "Team rollups refreshed");
        Ok(rollups.len())
    }

    /// Cached team rollups with competition ranks
    pub async fn team_standings(&self, challenge_id: &str) -> ChallengeResult<Vec<TeamStanding>> {
        load_challenge(&self.pool, challenge_id).await?;
        let records = RollupRepository::new(&self.pool)
            .list_for_challenge(challenge_id)
            .await?;

        let totals: Vec<u64> = records
            .iter()
            .map(|r| u64::try_from(r.total_steps).unwrap_or(0))
            .collect();
        let ranks = competition_ranks(&totals);

        let standings = records
            .into_iter()
            .zip(ranks)
            .zip(totals)
            .map(|((r, rank), total)| {
                let members = u32::try_from(r.member_count).unwrap_or(0);
                TeamStanding {
                    rank,
                    team_id: r.team_id,
                    team_name: r.team_name,
                    member_count: members,
                    total_steps: total,
                    avg_steps_per_member: if members > 0 {
                        (Decimal::from(total) / Decimal::from(members)).round_dp(1)
                    } else {
                        Decimal::ZERO
                    },
                    active_days: u32::try_from(r.active_days).unwrap_or(0),
                }
            })
            .collect();

        Ok(standings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::participation::{JoinChallengeRequest, ParticipationManager};
    use crate::testutil::Fixture;
    use rust_decimal_macros::dec;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 4, d).unwrap()
    }

    fn input(user: &str, target: Option<u32>, steps: &[(u32, u32)]) -> RankInput {
        RankInput {
            user_id: user.to_string(),
            user_name: None,
            team_id: None,
            daily_target: target,
            history: steps.iter().map(|(d, s)| StepEntry::new(date(*d), *s)).collect(),
        }
    }

    #[test]
    fn test_competition_ranks() {
        assert_eq!(competition_ranks(&[50000, 50000, 40000]), vec![1, 1, 3]);
        assert_eq!(competition_ranks(&[9, 8, 8, 8, 1]), vec![1, 2, 2, 2, 5]);
        assert!(competition_ranks(&[]).is_empty());
    }

    #[test]
    fn test_ties_share_rank_and_next_skips() {
        let window = DateWindow::new(date(1), date(30)).unwrap();
        let entries = build_leaderboard(
            vec![
                input("carol", None, &[(1, 40000)]),
                input("bob", None, &[(1, 25000), (2, 25000)]),
                input("alice", None, &[(2, 50000)]),
            ],
            Some(&window),
        );

        let ranks: Vec<(&str, u32)> = entries.iter().map(|e| (e.user_id.as_str(), e.rank)).collect();
        assert_eq!(ranks, vec![("alice", 1), ("bob", 1), ("carol", 3)]);
        assert_eq!(entries[0].total_steps, 50000);
    }

    #[test]
    fn test_stable_under_reranking() {
        let window = DateWindow::new(date(1), date(30)).unwrap();
        let inputs = vec![
            input("u3", Some(5000), &[(1, 7000)]),
            input("u1", Some(5000), &[(1, 7000)]),
            input("u2", Some(5000), &[(1, 3000)]),
        ];
        let first = build_leaderboard(inputs.clone(), Some(&window));
        let mut shuffled = inputs;
        shuffled.reverse();
        assert_eq!(first, build_leaderboard(shuffled, Some(&window)));
    }

    #[test]
    fn test_entry_figures() {
        let window = DateWindow::new(date(1), date(4)).unwrap();
        let entries = build_leaderboard(
            vec![input("u", Some(5000), &[(1, 6000), (2, 0), (3, 5000), (9, 9999)])],
            Some(&window),
        );
        let e = &entries[0];
        assert_eq!(e.total_steps, 11000);
        assert_eq!(e.days_logged, 2);
        assert_eq!(e.days_met_goal, 2);
        assert_eq!(e.avg_steps, dec!(5500));
        assert_eq!(e.completion_pct, dec!(50.0));
        assert_eq!(e.badge, Some(BadgeTier::Elite));
    }

    #[test]
    fn test_no_target_and_not_started() {
        let window = DateWindow::new(date(1), date(10)).unwrap();
        let with_window = build_leaderboard(vec![input("u", None, &[(1, 8000)])], Some(&window));
        assert_eq!(with_window[0].completion_pct, Decimal::ZERO);
        assert_eq!(with_window[0].days_met_goal, 0);

        let before_start = build_leaderboard(vec![input("u", Some(3000), &[(1, 8000)])], None);
        assert_eq!(before_start[0].total_steps, 0);
        assert_eq!(before_start[0].completion_pct, Decimal::ZERO);
        assert_eq!(before_start[0].rank, 1);
    }

    #[test]
    fn test_badge_tiers() {
        assert_eq!(BadgeTier::for_rank(1), Some(BadgeTier::Elite));
        assert_eq!(BadgeTier::for_rank(3), Some(BadgeTier::Elite));
        assert_eq!(BadgeTier::for_rank(4), Some(BadgeTier::Pro));
        assert_eq!(BadgeTier::for_rank(10), Some(BadgeTier::Pro));
        assert_eq!(BadgeTier::for_rank(25).map(|b| b.label()), Some("Rising"));
        assert_eq!(BadgeTier::for_rank(26), None);
    }

    #[test]
    fn test_team_rollups_match_member_sums() {
        let window = DateWindow::new(date(1), date(7)).unwrap();
        let members = vec![
            TeamMember { user_id: "a".into(), team_id: "red".into() },
            TeamMember { user_id: "b".into(), team_id: "red".into() },
            TeamMember { user_id: "c".into(), team_id: "blue".into() },
        ];
        let row = |user: &str, d: u32, steps: i64| DailyStepRecord {
            user_id: user.to_string(),
            day: date(d),
            steps,
            updated_at: 0,
        };
        let rows = vec![
            row("a", 1, 1000),
            row("b", 1, 3000),
            row("b", 2, 0),
            row("a", 20, 99999),
            row("stranger", 1, 5000),
        ];

        let rollups = compute_team_rollups(&members, &rows, &window);
        assert_eq!(rollups.len(), 2);

        let red = rollups.iter().find(|r| r.team_id == "red").unwrap();
        assert_eq!(red.member_count, 2);
        assert_eq!(red.total_steps, 4000);
        assert_eq!(red.avg_steps_per_member, 2000.0);
        assert_eq!(red.active_days, 1);

        let blue = rollups.iter().find(|r| r.team_id == "blue").unwrap();
        assert_eq!(blue.total_steps, 0);
        assert_eq!(blue.active_days, 0);
    }

    #[tokio::test]
    async fn test_rank_against_storage() {
        let fx = Fixture::new().await;
        let challenge = fx.challenge(date(1), date(30), "active").await;
        let manager = ParticipationManager::new(fx.pool());
        let ranker = LeaderboardRanker::new(fx.pool());

        for user in &fx.users {
            manager
                .join(
                    &challenge,
                    user,
                    &JoinChallengeRequest {
                        team_id: Some(fx.team_id.clone()),
                        selected_daily_target: Some(10000),
                    },
                )
                .await
                .unwrap();
        }

        let totals = [50000u32, 50000, 40000];
        for (user, steps) in fx.users.iter().zip(totals) {
            fx.write_steps(user, date(2), steps).await;
            manager.on_step_write(user, date(2), steps).await.unwrap();
        }
        // Outside the as_of cut-off
        fx.write_steps(&fx.users[2], date(9), 30000).await;
        manager.on_step_write(&fx.users[2], date(9), 30000).await.unwrap();

        let board = ranker.rank(&challenge, date(5)).await.unwrap();
        assert_eq!(board.elapsed_days, 5);
        let ranks: Vec<u32> = board.entries.iter().map(|e| e.rank).collect();
        assert_eq!(ranks, vec![1, 1, 3]);
        assert_eq!(board.entries[2].total_steps, 40000);
        assert_eq!(board.entries[0].completion_pct, dec!(20.0));

        let before = ranker.rank(&challenge, NaiveDate::from_ymd_opt(2026, 3, 1).unwrap()).await.unwrap();
        assert_eq!(before.elapsed_days, 0);
        assert!(before.entries.iter().all(|e| e.total_steps == 0 && e.rank == 1));

        let teams = ranker.team_standings(&challenge).await.unwrap();
        assert_eq!(teams.len(), 1);
        assert_eq!(teams[0].member_count, 3);
        assert_eq!(teams[0].total_steps, 170000);
        assert_eq!(teams[0].active_days, 2);
    }

    #[tokio::test]
    async fn test_leavers_drop_off_the_board() {
        let fx = Fixture::new().await;
        let challenge = fx.challenge(date(1), date(30), "active").await;
        let manager = ParticipationManager::new(fx.pool());
        let ranker = LeaderboardRanker::new(fx.pool());

        for user in &fx.users[..2] {
            manager
                .join(&challenge, user, &JoinChallengeRequest::default())
                .await
                .unwrap();
        }
        manager.leave(&challenge, &fx.users[0]).await.unwrap();

        let board = ranker.rank(&challenge, date(30)).await.unwrap();
        assert_eq!(board.entries.len(), 1);
        assert_eq!(board.entries[0].user_id, fx.users[1]);
    }
}
