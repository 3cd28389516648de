//! Daily step store — one row per (user, calendar day)

use crate::{new_id, DbResult};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

/// A persisted daily step total
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct DailyStepRecord {
    pub user_id: String,
    pub day: NaiveDate,
    pub steps: i64,
    pub updated_at: i64,
}

/// One raw step write, kept for audit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct StepLogRecord {
    pub id: String,
    pub user_id: String,
    pub log_date: NaiveDate,
    pub steps: i64,
    pub source: String,
    pub note: Option<String>,
    pub created_at: i64,
}

/// Repository for the daily step log
pub struct StepsRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> StepsRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Write the total for a day (upsert by user_id + day, the new value replaces the old one).
    /// Concurrent writers for the same row are serialized by SQLite, never merged.
    pub async fn upsert_steps(
        &self,
        user_id: &str,
        day: NaiveDate,
        steps: i64,
    ) -> DbResult<DailyStepRecord> {
        let record = sqlx::query_as::<_, DailyStepRecord>(
            r#"INSERT INTO daily_steps (user_id, day, steps, updated_at)
               VALUES (?1, ?2, ?3, strftime('%s', 'now'))
               ON CONFLICT(user_id, day) DO UPDATE SET
                 steps = excluded.steps,
                 updated_at = strftime('%s', 'now')
               RETURNING user_id, day, steps, updated_at
            "#,
        )
        .bind(user_id)
        .bind(day)
        .bind(steps)
        .fetch_one(self.pool)
        .await?;

        Ok(record)
    }

    /// Append a raw log row and upsert the day's total in one transaction
    pub async fn record_steps(
        &self,
        user_id: &str,
        day: NaiveDate,
        steps: i64,
        source: &str,
        note: Option<&str>,
    ) -> DbResult<(StepLogRecord, DailyStepRecord)> {
        let mut tx = self.pool.begin().await?;

        let log = sqlx::query_as::<_, StepLogRecord>(
            r#"INSERT INTO step_logs (id, user_id, log_date, steps, source, note)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6)
               RETURNING id, user_id, log_date, steps, source, note, created_at
            "#,
        )
        .bind(new_id())
        .bind(user_id)
        .bind(day)
        .bind(steps)
        .bind(source)
        .bind(note)
        .fetch_one(&mut *tx)
        .await?;

        let total = sqlx::query_as::<_, DailyStepRecord>(
            r#"INSERT INTO daily_steps (user_id, day, steps, updated_at)
               VALUES (?1, ?2, ?3, strftime('%s', 'now'))
               ON CONFLICT(user_id, day) DO UPDATE SET
                 steps = excluded.steps,
                 updated_at = strftime('%s', 'now')
               RETURNING user_id, day, steps, updated_at
            "#,
        )
        .bind(user_id)
        .bind(day)
        .bind(steps)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok((log, total))
    }

    /// Raw log rows for days in [from, to], newest write first
    pub async fn get_logs(
        &self,
        user_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> DbResult<Vec<StepLogRecord>> {
        let records = sqlx::query_as::<_, StepLogRecord>(
            r#"SELECT id, user_id, log_date, steps, source, note, created_at
               FROM step_logs
               WHERE user_id = ?1 AND log_date BETWEEN ?2 AND ?3
               ORDER BY created_at DESC, rowid DESC"#,
        )
        .bind(user_id)
        .bind(from)
        .bind(to)
        .fetch_all(self.pool)
        .await?;

        Ok(records)
    }

    /// Get the record for a single day
    pub async fn get_day(&self, user_id: &str, day: NaiveDate) -> DbResult<Option<DailyStepRecord>> {
        let record = sqlx::query_as::<_, DailyStepRecord>(
            "SELECT user_id, day, steps, updated_at FROM daily_steps WHERE user_id = ?1 AND day = ?2",
        )
        .bind(user_id)
        .bind(day)
        .fetch_optional(self.pool)
        .await?;

        Ok(record)
    }

    /// Get a user's records in [from, to], oldest first
    pub async fn get_history(
        &self,
        user_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> DbResult<Vec<DailyStepRecord>> {
        let records = sqlx::query_as::<_, DailyStepRecord>(
            r#"SELECT user_id, day, steps, updated_at FROM daily_steps
               WHERE user_id = ?1 AND day BETWEEN ?2 AND ?3
               ORDER BY day ASC"#,
        )
        .bind(user_id)
        .bind(from)
        .bind(to)
        .fetch_all(self.pool)
        .await?;

        Ok(records)
    }

    /// Get the records in [from, to] of every active participant of a challenge
    pub async fn get_challenge_rows(
        &self,
        challenge_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> DbResult<Vec<DailyStepRecord>> {
        let records = sqlx::query_as::<_, DailyStepRecord>(
            r#"SELECT ds.user_id, ds.day, ds.steps, ds.updated_at
               FROM daily_steps ds
               JOIN challenge_participants cp ON cp.user_id = ds.user_id
               WHERE cp.challenge_id = ?1
                 AND cp.left_at IS NULL
                 AND ds.day BETWEEN ?2 AND ?3
               ORDER BY ds.user_id, ds.day"#,
        )
        .bind(challenge_id)
        .bind(from)
        .bind(to)
        .fetch_all(self.pool)
        .await?;

        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::directory::DirectoryRepository;
    use crate::Database;

    async fn db_with_user() -> (Database, String) {
        let db = Database::in_memory().await.unwrap();
        let dir = DirectoryRepository::new(db.pool());
        let dept = dir.create_department("Ops", None).await.unwrap();
        let user = dir
            .create_user(Some("Asha"), "asha@example.com", &dept.id)
            .await
            .unwrap();
        (db, user.id)
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 2, d).unwrap()
    }

    #[tokio::test]
    async fn test_upsert_replaces_instead_of_adding() {
        let (db, user) = db_with_user().await;
        let repo = StepsRepository::new(db.pool());

        repo.upsert_steps(&user, day(3), 4000).await.unwrap();
        let second = repo.upsert_steps(&user, day(3), 2500).await.unwrap();
        assert_eq!(second.steps, 2500);

        let stored = repo.get_day(&user, day(3)).await.unwrap().unwrap();
        assert_eq!(stored.steps, 2500);
        assert_eq!(repo.get_history(&user, day(1), day(28)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_history_is_bounded_and_ordered() {
        let (db, user) = db_with_user().await;
        let repo = StepsRepository::new(db.pool());

        for d in [9, 2, 5, 20] {
            repo.upsert_steps(&user, day(d), d as i64 * 100).await.unwrap();
        }

        let days: Vec<NaiveDate> = repo
            .get_history(&user, day(2), day(9))
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.day)
            .collect();
        assert_eq!(days, vec![day(2), day(5), day(9)]);
    }

    #[tokio::test]
    async fn test_record_steps_keeps_every_write() {
        let (db, user) = db_with_user().await;
        let repo = StepsRepository::new(db.pool());

        repo.record_steps(&user, day(4), 3000, "manual", None).await.unwrap();
        let (log, total) = repo
            .record_steps(&user, day(4), 4200, "watch", Some("evening walk"))
            .await
            .unwrap();
        assert_eq!(log.source, "watch");
        assert_eq!(log.note.as_deref(), Some("evening walk"));
        assert_eq!(total.steps, 4200);

        let logs = repo.get_logs(&user, day(1), day(28)).await.unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].steps, 4200);
        assert_eq!(logs[1].steps, 3000);
        assert_eq!(repo.get_day(&user, day(4)).await.unwrap().unwrap().steps, 4200);
    }

    #[tokio::test]
    async fn test_record_steps_is_atomic() {
        let (db, user) = db_with_user().await;
        let repo = StepsRepository::new(db.pool());

        assert!(repo.record_steps("ghost", day(6), 100, "manual", None).await.is_err());

        // A failing total upsert rolls back the log row written before it
        sqlx::query("DROP TABLE daily_steps").execute(db.pool()).await.unwrap();
        assert!(repo.record_steps(&user, day(6), 100, "manual", None).await.is_err());
        assert!(repo.get_logs(&user, day(1), day(28)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_negative_steps_rejected_by_schema() {
        let (db, user) = db_with_user().await;
        let repo = StepsRepository::new(db.pool());
        assert!(repo.upsert_steps(&user, day(1), -5).await.is_err());
    }
}
