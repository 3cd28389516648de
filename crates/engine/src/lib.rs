//! Stride Engine — challenge participation, streaks and leaderboards
//!
//! Provides:
//! - Streak Calculator over a user's daily step series
//! - Participation State Manager (join/leave, locked daily target, snapshot refresh)
//! - Leaderboard Ranker with competition ranking, badges and team rollups
//! - Challenge Registry service and step logging

pub mod calendar;
pub mod error;
pub mod participation;
pub mod ranking;
pub mod registry;
pub mod steps;
pub mod streak;
pub mod types;

#[cfg(test)]
pub(crate) mod testutil;

// Re-exports for convenience
pub use error::{ChallengeError, ChallengeResult, ErrorKind};
pub use participation::{
    derive_snapshot, JoinChallengeRequest, MyChallenge, Participant, ParticipantProgress,
    ParticipationManager, RebuildReport, SetTargetRequest, StreakSnapshot,
};
pub use ranking::{BadgeTier, Leaderboard, LeaderboardEntry, LeaderboardRanker, TeamStanding};
pub use registry::{
    AvailableChallenge, ChallengeDetail, ChallengePage, ChallengeRegistry, CreateChallengeRequest,
    ListChallengesQuery, UpdateChallengeRequest,
};
pub use steps::{CurrentStreak, LogStepsRequest, LoggedSteps, StepService, StreakDay, WeekSummary};
pub use streak::{compute_streak, StreakSummary};
pub use types::*;
