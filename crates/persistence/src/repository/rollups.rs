//! Per-team rollups — a derived cache rebuilt from the daily step log

use crate::DbResult;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct TeamRollupRecord {
    pub challenge_id: String,
    pub team_id: String,
    pub team_name: Option<String>,
    pub member_count: i64,
    pub total_steps: i64,
    pub avg_steps_per_member: f64,
    pub active_days: i64,
    pub refreshed_at: i64,
}

/// Row to write for one team
#[derive(Debug, Clone, PartialEq)]
pub struct TeamRollupRow {
    pub team_id: String,
    pub member_count: i64,
    pub total_steps: i64,
    pub avg_steps_per_member: f64,
    pub active_days: i64,
}

/// Repository for team rollups
pub struct RollupRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> RollupRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Replace every rollup of a challenge in one transaction
    pub async fn replace_for_challenge(
        &self,
        challenge_id: &str,
        rows: &[TeamRollupRow],
    ) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM challenge_team_rollups WHERE challenge_id = ?1")
            .bind(challenge_id)
            .execute(&mut *tx)
            .await?;

        for row in rows {
            sqlx::query(
                r#"INSERT INTO challenge_team_rollups
                    (challenge_id, team_id, member_count, total_steps,
                     avg_steps_per_member, active_days, refreshed_at)
                   VALUES (?1, ?2, ?3, ?4, ?5, ?6, strftime('%s', 'now'))"#,
            )
            .bind(challenge_id)
            .bind(&row.team_id)
            .bind(row.member_count)
            .bind(row.total_steps)
            .bind(row.avg_steps_per_member)
            .bind(row.active_days)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Cached rollups of a challenge, highest total first
    pub async fn list_for_challenge(&self, challenge_id: &str) -> DbResult<Vec<TeamRollupRecord>> {
        let records = sqlx::query_as::<_, TeamRollupRecord>(
            r#"SELECT r.challenge_id, r.team_id, t.name AS team_name, r.member_count,
                      r.total_steps, r.avg_steps_per_member, r.active_days, r.refreshed_at
               FROM challenge_team_rollups r
               LEFT JOIN teams t ON t.id = r.team_id
               WHERE r.challenge_id = ?1
               ORDER BY r.total_steps DESC, r.team_id"#,
        )
        .bind(challenge_id)
        .fetch_all(self.pool)
        .await?;

        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::challenges::{ChallengeRepository, NewChallenge};
    use crate::repository::directory::DirectoryRepository;
    use crate::Database;
    use chrono::NaiveDate;

    #[tokio::test]
    async fn test_replace_drops_stale_teams() {
        let db = Database::in_memory().await.unwrap();
        let dir = DirectoryRepository::new(db.pool());
        let dept = dir.create_department("Ops", None).await.unwrap();
        let red = dir.create_team("Red", &dept.id).await.unwrap();
        let blue = dir.create_team("Blue", &dept.id).await.unwrap();
        let day = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        let challenge = ChallengeRepository::new(db.pool())
            .insert(&NewChallenge {
                title: "Teams".to_string(),
                description: None,
                period: "week".to_string(),
                scope: "team".to_string(),
                start_date: day,
                end_date: day,
                status: "active".to_string(),
                min_goals_required: None,
                created_by: None,
                metrics: vec![],
                department_ids: vec![],
            })
            .await
            .unwrap();

        let repo = RollupRepository::new(db.pool());
        let row = |team: &str, total: i64| TeamRollupRow {
            team_id: team.to_string(),
            member_count: 2,
            total_steps: total,
            avg_steps_per_member: total as f64 / 2.0,
            active_days: 1,
        };

        repo.replace_for_challenge(&challenge.id, &[row(&red.id, 100), row(&blue.id, 300)])
            .await
            .unwrap();
        let listed = repo.list_for_challenge(&challenge.id).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].team_name.as_deref(), Some("Blue"));

        repo.replace_for_challenge(&challenge.id, &[row(&red.id, 500)])
            .await
            .unwrap();
        let listed = repo.list_for_challenge(&challenge.id).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].total_steps, 500);
    }
}
