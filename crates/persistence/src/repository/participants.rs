//! Participation rows and their cached streak snapshot

use crate::{new_id, DbError, DbResult};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

const PARTICIPANT_SELECT: &str = "SELECT cp.id, cp.challenge_id, cp.user_id, u.name AS user_name, \
     cp.team_id, t.name AS team_name, cp.joined_at, cp.left_at, cp.selected_daily_target, \
     cp.current_streak, cp.longest_streak, cp.perfect_days, cp.total_score, cp.last_activity_date \
     FROM challenge_participants cp \
     JOIN users u ON u.id = cp.user_id \
     LEFT JOIN teams t ON t.id = cp.team_id";

/// A participation row (active while `left_at` is NULL)
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ParticipantRecord {
    pub id: String,
    pub challenge_id: String,
    pub user_id: String,
    pub user_name: Option<String>,
    pub team_id: Option<String>,
    pub team_name: Option<String>,
    pub joined_at: i64,
    pub left_at: Option<i64>,
    pub selected_daily_target: Option<i64>,
    pub current_streak: i64,
    pub longest_streak: i64,
    pub perfect_days: i64,
    pub total_score: i64,
    pub last_activity_date: Option<NaiveDate>,
}

/// An active participation together with its challenge window
#[derive(Debug, Clone, FromRow)]
pub struct ParticipationWindowRecord {
    pub participant_id: String,
    pub challenge_id: String,
    pub user_id: String,
    pub selected_daily_target: Option<i64>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

/// An active participant of a challenge with display name, for leaderboards
#[derive(Debug, Clone, FromRow)]
pub struct RosterRecord {
    pub participant_id: String,
    pub user_id: String,
    pub user_name: Option<String>,
    pub team_id: Option<String>,
    pub selected_daily_target: Option<i64>,
}

/// Snapshot columns written together by a refresh
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotUpdate {
    pub current_streak: i64,
    pub longest_streak: i64,
    pub perfect_days: i64,
    pub total_score: i64,
    pub last_activity_date: Option<NaiveDate>,
}

/// Repository for challenge participants
pub struct ParticipantRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> ParticipantRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a fresh participation with a zeroed snapshot.
    /// Fails with a unique violation if an active row already exists.
    pub async fn insert(
        &self,
        challenge_id: &str,
        user_id: &str,
        team_id: Option<&str>,
        selected_daily_target: Option<i64>,
    ) -> DbResult<ParticipantRecord> {
        let id = new_id();
        sqlx::query(
            r#"INSERT INTO challenge_participants
                (id, challenge_id, user_id, team_id, selected_daily_target)
               VALUES (?1, ?2, ?3, ?4, ?5)"#,
        )
        .bind(&id)
        .bind(challenge_id)
        .bind(user_id)
        .bind(team_id)
        .bind(selected_daily_target)
        .execute(self.pool)
        .await?;

        self.get(&id)
            .await?
            .ok_or_else(|| DbError::Query(format!("participant {id} missing after insert")))
    }

    pub async fn find_active(
        &self,
        challenge_id: &str,
        user_id: &str,
    ) -> DbResult<Option<ParticipantRecord>> {
        let sql = format!(
            "{PARTICIPANT_SELECT} WHERE cp.challenge_id = ?1 AND cp.user_id = ?2 AND cp.left_at IS NULL"
        );
        let record = sqlx::query_as::<_, ParticipantRecord>(&sql)
            .bind(challenge_id)
            .bind(user_id)
            .fetch_optional(self.pool)
            .await?;

        Ok(record)
    }

    pub async fn get(&self, id: &str) -> DbResult<Option<ParticipantRecord>> {
        let sql = format!("{PARTICIPANT_SELECT} WHERE cp.id = ?1");
        let record = sqlx::query_as::<_, ParticipantRecord>(&sql)
            .bind(id)
            .fetch_optional(self.pool)
            .await?;

        Ok(record)
    }

    /// Every row (active and left) for a user in a challenge, oldest first
    pub async fn history_for(
        &self,
        challenge_id: &str,
        user_id: &str,
    ) -> DbResult<Vec<ParticipantRecord>> {
        let sql = format!(
            r#"{PARTICIPANT_SELECT}
               WHERE cp.challenge_id = ?1 AND cp.user_id = ?2
               ORDER BY cp.joined_at, cp.left_at IS NULL, cp.id"#
        );
        let records = sqlx::query_as::<_, ParticipantRecord>(&sql)
            .bind(challenge_id)
            .bind(user_id)
            .fetch_all(self.pool)
            .await?;

        Ok(records)
    }

    /// Write the target only if none is set yet. Returns rows affected (0 or 1).
    pub async fn set_target_if_unset(
        &self,
        challenge_id: &str,
        user_id: &str,
        target: i64,
    ) -> DbResult<u64> {
        let result = sqlx::query(
            r#"UPDATE challenge_participants SET selected_daily_target = ?3
               WHERE challenge_id = ?1 AND user_id = ?2
                 AND left_at IS NULL AND selected_daily_target IS NULL"#,
        )
        .bind(challenge_id)
        .bind(user_id)
        .bind(target)
        .execute(self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Soft-delete the active row. Returns rows affected (0 or 1).
    pub async fn mark_left(&self, challenge_id: &str, user_id: &str) -> DbResult<u64> {
        let result = sqlx::query(
            r#"UPDATE challenge_participants SET left_at = strftime('%s', 'now')
               WHERE challenge_id = ?1 AND user_id = ?2 AND left_at IS NULL"#,
        )
        .bind(challenge_id)
        .bind(user_id)
        .execute(self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Replace the snapshot of an active row in a single statement.
    /// Left rows are frozen and never touched.
    pub async fn update_snapshot(&self, participant_id: &str, snap: &SnapshotUpdate) -> DbResult<u64> {
        let result = sqlx::query(
            r#"UPDATE challenge_participants SET
                 current_streak = ?2,
                 longest_streak = ?3,
                 perfect_days = ?4,
                 total_score = ?5,
                 last_activity_date = ?6
               WHERE id = ?1 AND left_at IS NULL"#,
        )
        .bind(participant_id)
        .bind(snap.current_streak)
        .bind(snap.longest_streak)
        .bind(snap.perfect_days)
        .bind(snap.total_score)
        .bind(snap.last_activity_date)
        .execute(self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Active participations of a user whose challenge window contains `day`.
    /// Archived challenges are skipped.
    pub async fn active_windows_on_day(
        &self,
        user_id: &str,
        day: NaiveDate,
    ) -> DbResult<Vec<ParticipationWindowRecord>> {
        let records = sqlx::query_as::<_, ParticipationWindowRecord>(
            r#"SELECT cp.id AS participant_id, cp.challenge_id, cp.user_id,
                      cp.selected_daily_target, c.start_date, c.end_date
               FROM challenge_participants cp
               JOIN challenges c ON c.id = cp.challenge_id
               WHERE cp.user_id = ?1
                 AND cp.left_at IS NULL
                 AND c.status != 'archived'
                 AND ?2 BETWEEN c.start_date AND c.end_date
               ORDER BY cp.challenge_id"#,
        )
        .bind(user_id)
        .bind(day)
        .fetch_all(self.pool)
        .await?;

        Ok(records)
    }

    /// Every active participation in a non-archived challenge
    pub async fn all_active_windows(&self) -> DbResult<Vec<ParticipationWindowRecord>> {
        let records = sqlx::query_as::<_, ParticipationWindowRecord>(
            r#"SELECT cp.id AS participant_id, cp.challenge_id, cp.user_id,
                      cp.selected_daily_target, c.start_date, c.end_date
               FROM challenge_participants cp
               JOIN challenges c ON c.id = cp.challenge_id
               WHERE cp.left_at IS NULL AND c.status != 'archived'
               ORDER BY cp.challenge_id, cp.user_id"#,
        )
        .fetch_all(self.pool)
        .await?;

        Ok(records)
    }

    /// Active participants of a challenge with their display names
    pub async fn roster(&self, challenge_id: &str) -> DbResult<Vec<RosterRecord>> {
        let records = sqlx::query_as::<_, RosterRecord>(
            r#"SELECT cp.id AS participant_id, cp.user_id, u.name AS user_name,
                      cp.team_id, cp.selected_daily_target
               FROM challenge_participants cp
               JOIN users u ON u.id = cp.user_id
               WHERE cp.challenge_id = ?1 AND cp.left_at IS NULL
               ORDER BY cp.user_id"#,
        )
        .bind(challenge_id)
        .fetch_all(self.pool)
        .await?;

        Ok(records)
    }

    /// A user's active participations, newest join first
    pub async fn active_for_user(&self, user_id: &str) -> DbResult<Vec<ParticipantRecord>> {
        let sql = format!(
            r#"{PARTICIPANT_SELECT}
               WHERE cp.user_id = ?1 AND cp.left_at IS NULL
               ORDER BY cp.joined_at DESC, cp.challenge_id"#
        );
        let records = sqlx::query_as::<_, ParticipantRecord>(&sql)
            .bind(user_id)
            .fetch_all(self.pool)
            .await?;

        Ok(records)
    }

    /// Highest target the user picked across active participations in active challenges
    pub async fn max_active_target(&self, user_id: &str) -> DbResult<Option<i64>> {
        let target = sqlx::query_scalar::<_, Option<i64>>(
            r#"SELECT MAX(cp.selected_daily_target)
               FROM challenge_participants cp
               JOIN challenges c ON c.id = cp.challenge_id
               WHERE cp.user_id = ?1 AND cp.left_at IS NULL AND c.status = 'active'"#,
        )
        .bind(user_id)
        .fetch_one(self.pool)
        .await?;

        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::challenges::{ChallengeRepository, NewChallenge};
    use crate::repository::directory::DirectoryRepository;
    use crate::Database;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 5, d).unwrap()
    }

    async fn setup() -> (Database, String, String) {
        let db = Database::in_memory().await.unwrap();
        let dir = DirectoryRepository::new(db.pool());
        let dept = dir.create_department("Ops", None).await.unwrap();
        let user = dir
            .create_user(Some("Mei"), "mei@example.com", &dept.id)
            .await
            .unwrap();
        let challenge = ChallengeRepository::new(db.pool())
            .insert(&NewChallenge {
                title: "May Steps".to_string(),
                description: None,
                period: "month".to_string(),
                scope: "individual".to_string(),
                start_date: date(1),
                end_date: date(31),
                status: "active".to_string(),
                min_goals_required: None,
                created_by: None,
                metrics: vec![],
                department_ids: vec![],
            })
            .await
            .unwrap();
        (db, challenge.id, user.id)
    }

    #[tokio::test]
    async fn test_second_active_row_is_unique_violation() {
        let (db, challenge, user) = setup().await;
        let repo = ParticipantRepository::new(db.pool());

        repo.insert(&challenge, &user, None, None).await.unwrap();
        let err = repo.insert(&challenge, &user, None, None).await.unwrap_err();
        assert!(err.is_unique_violation());
    }

    #[tokio::test]
    async fn test_rejoin_after_leave_keeps_old_row() {
        let (db, challenge, user) = setup().await;
        let repo = ParticipantRepository::new(db.pool());

        let first = repo.insert(&challenge, &user, None, Some(5000)).await.unwrap();
        repo.update_snapshot(
            &first.id,
            &SnapshotUpdate {
                current_streak: 2,
                longest_streak: 4,
                perfect_days: 6,
                total_score: 42_000,
                last_activity_date: Some(date(7)),
            },
        )
        .await
        .unwrap();
        assert_eq!(repo.mark_left(&challenge, &user).await.unwrap(), 1);

        let second = repo.insert(&challenge, &user, None, None).await.unwrap();
        assert_ne!(first.id, second.id);
        assert_eq!(second.total_score, 0);
        assert_eq!(second.selected_daily_target, None);

        let old = repo.get(&first.id).await.unwrap().unwrap();
        assert!(old.left_at.is_some());
        assert_eq!(old.longest_streak, 4);
        assert_eq!(repo.history_for(&challenge, &user).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_target_is_write_once() {
        let (db, challenge, user) = setup().await;
        let repo = ParticipantRepository::new(db.pool());
        repo.insert(&challenge, &user, None, None).await.unwrap();

        assert_eq!(repo.set_target_if_unset(&challenge, &user, 7500).await.unwrap(), 1);
        assert_eq!(repo.set_target_if_unset(&challenge, &user, 3000).await.unwrap(), 0);

        let row = repo.find_active(&challenge, &user).await.unwrap().unwrap();
        assert_eq!(row.selected_daily_target, Some(7500));
        assert_eq!(repo.max_active_target(&user).await.unwrap(), Some(7500));
    }

    #[tokio::test]
    async fn test_left_rows_are_frozen() {
        let (db, challenge, user) = setup().await;
        let repo = ParticipantRepository::new(db.pool());
        let row = repo.insert(&challenge, &user, None, None).await.unwrap();
        repo.mark_left(&challenge, &user).await.unwrap();

        let snap = SnapshotUpdate {
            total_score: 10,
            ..Default::default()
        };
        assert_eq!(repo.update_snapshot(&row.id, &snap).await.unwrap(), 0);
        assert!(repo.active_windows_on_day(&user, date(3)).await.unwrap().is_empty());
        assert_eq!(repo.max_active_target(&user).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_windows_match_day() {
        let (db, challenge, user) = setup().await;
        let repo = ParticipantRepository::new(db.pool());
        repo.insert(&challenge, &user, None, Some(3000)).await.unwrap();

        let hits = repo.active_windows_on_day(&user, date(31)).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].challenge_id, challenge);

        let june = NaiveDate::from_ymd_opt(2026, 6, 1).unwrap();
        assert!(repo.active_windows_on_day(&user, june).await.unwrap().is_empty());
        assert_eq!(repo.roster(&challenge).await.unwrap()[0].user_name.as_deref(), Some("Mei"));
    }

    #[tokio::test]
    async fn test_rows_carry_display_names() {
        let (db, challenge, user) = setup().await;
        let dir = DirectoryRepository::new(db.pool());
        let dept = dir.get_user(&user).await.unwrap().unwrap().department_id;
        let team = dir.create_team("Night Owls", &dept).await.unwrap();
        let repo = ParticipantRepository::new(db.pool());

        let row = repo.insert(&challenge, &user, Some(&team.id), None).await.unwrap();
        assert_eq!(row.user_name.as_deref(), Some("Mei"));
        assert_eq!(row.team_name.as_deref(), Some("Night Owls"));

        repo.mark_left(&challenge, &user).await.unwrap();
        let solo = repo.insert(&challenge, &user, None, None).await.unwrap();
        assert_eq!(solo.team_name, None);
        assert_eq!(solo.user_name.as_deref(), Some("Mei"));
    }
}
