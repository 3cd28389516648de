//! Challenge registry — challenge definitions, metrics and department scoping

use crate::{new_id, DbResult};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

const CHALLENGE_COLUMNS: &str = "id, title, description, period, scope, start_date, end_date, \
     status, min_goals_required, created_by, created_at";

/// A persisted challenge definition
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ChallengeRecord {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub period: String,
    pub scope: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub status: String,
    pub min_goals_required: Option<i64>,
    pub created_by: Option<String>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ChallengeMetricRecord {
    pub id: String,
    pub challenge_id: String,
    pub metric_key: String,
    pub target_value: Option<f64>,
    pub rule_type: String,
}

/// Metric row to insert alongside a new challenge
#[derive(Debug, Clone)]
pub struct NewChallengeMetric {
    pub metric_key: String,
    pub target_value: Option<f64>,
    pub rule_type: String,
}

/// Everything needed to insert a challenge in one transaction
#[derive(Debug, Clone)]
pub struct NewChallenge {
    pub title: String,
    pub description: Option<String>,
    pub period: String,
    pub scope: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub status: String,
    pub min_goals_required: Option<i64>,
    pub created_by: Option<String>,
    pub metrics: Vec<NewChallengeMetric>,
    pub department_ids: Vec<String>,
}

/// Partial update; `None` keeps the stored value
#[derive(Debug, Clone, Default)]
pub struct ChallengeChanges {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<String>,
    pub min_goals_required: Option<i64>,
}

/// Repository for challenges and their metric/department rows
pub struct ChallengeRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> ChallengeRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert the challenge, its metrics and department links atomically
    pub async fn insert(&self, new: &NewChallenge) -> DbResult<ChallengeRecord> {
        let mut tx = self.pool.begin().await?;

        let sql = format!(
            r#"INSERT INTO challenges
                (id, title, description, period, scope, start_date, end_date,
                 status, min_goals_required, created_by)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
               RETURNING {CHALLENGE_COLUMNS}"#
        );
        let record = sqlx::query_as::<_, ChallengeRecord>(&sql)
            .bind(new_id())
            .bind(&new.title)
            .bind(&new.description)
            .bind(&new.period)
            .bind(&new.scope)
            .bind(new.start_date)
            .bind(new.end_date)
            .bind(&new.status)
            .bind(new.min_goals_required)
            .bind(&new.created_by)
            .fetch_one(&mut *tx)
            .await?;

        for metric in &new.metrics {
            sqlx::query(
                r#"INSERT INTO challenge_metrics (id, challenge_id, metric_key, target_value, rule_type)
                   VALUES (?1, ?2, ?3, ?4, ?5)"#,
            )
            .bind(new_id())
            .bind(&record.id)
            .bind(&metric.metric_key)
            .bind(metric.target_value)
            .bind(&metric.rule_type)
            .execute(&mut *tx)
            .await?;
        }

        for department_id in &new.department_ids {
            sqlx::query(
                "INSERT INTO challenge_departments (challenge_id, department_id) VALUES (?1, ?2)",
            )
            .bind(&record.id)
            .bind(department_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(record)
    }

    pub async fn get(&self, id: &str) -> DbResult<Option<ChallengeRecord>> {
        let sql = format!("SELECT {CHALLENGE_COLUMNS} FROM challenges WHERE id = ?1");
        let record = sqlx::query_as::<_, ChallengeRecord>(&sql)
            .bind(id)
            .fetch_optional(self.pool)
            .await?;

        Ok(record)
    }

    pub async fn get_metrics(&self, challenge_id: &str) -> DbResult<Vec<ChallengeMetricRecord>> {
        let records = sqlx::query_as::<_, ChallengeMetricRecord>(
            r#"SELECT id, challenge_id, metric_key, target_value, rule_type
               FROM challenge_metrics WHERE challenge_id = ?1 ORDER BY metric_key"#,
        )
        .bind(challenge_id)
        .fetch_all(self.pool)
        .await?;

        Ok(records)
    }

    /// Department ids the challenge is scoped to (empty = company-wide)
    pub async fn get_department_ids(&self, challenge_id: &str) -> DbResult<Vec<String>> {
        let ids = sqlx::query_scalar::<_, String>(
            "SELECT department_id FROM challenge_departments WHERE challenge_id = ?1 ORDER BY department_id",
        )
        .bind(challenge_id)
        .fetch_all(self.pool)
        .await?;

        Ok(ids)
    }

    /// Number of active (not left) participants
    pub async fn participant_count(&self, challenge_id: &str) -> DbResult<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM challenge_participants WHERE challenge_id = ?1 AND left_at IS NULL",
        )
        .bind(challenge_id)
        .fetch_one(self.pool)
        .await?;

        Ok(count)
    }

    /// Page of challenges visible to a department, newest first, plus the total count
    pub async fn list_visible(
        &self,
        department_id: &str,
        status: Option<&str>,
        scope: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> DbResult<(Vec<ChallengeRecord>, i64)> {
        let mut where_clauses = vec![VISIBLE_TO_DEPARTMENT.to_string()];
        let mut binds: Vec<String> = vec![department_id.to_string()];

        if let Some(st) = status {
            where_clauses.push("c.status = ?".to_string());
            binds.push(st.to_string());
        }
        if let Some(sc) = scope {
            where_clauses.push("c.scope = ?".to_string());
            binds.push(sc.to_string());
        }

        let where_sql = where_clauses.join(" AND ");

        // Count total
        let count_sql = format!("SELECT COUNT(*) FROM challenges c WHERE {where_sql}");
        let mut count_query = sqlx::query_as::<_, (i64,)>(&count_sql);
        for b in &binds {
            count_query = count_query.bind(b);
        }
        let (total,) = count_query.fetch_one(self.pool).await?;

        let data_sql = format!(
            r#"SELECT {CHALLENGE_COLUMNS} FROM challenges c
               WHERE {where_sql}
               ORDER BY c.created_at DESC, c.id
               LIMIT ? OFFSET ?"#
        );
        let mut data_query = sqlx::query_as::<_, ChallengeRecord>(&data_sql);
        for b in &binds {
            data_query = data_query.bind(b);
        }
        data_query = data_query.bind(limit).bind(offset);

        let records = data_query.fetch_all(self.pool).await?;
        Ok((records, total))
    }

    /// Active challenges still running on `today` that the department can see
    pub async fn list_available(
        &self,
        department_id: &str,
        today: NaiveDate,
    ) -> DbResult<Vec<ChallengeRecord>> {
        let sql = format!(
            r#"SELECT {CHALLENGE_COLUMNS} FROM challenges c
               WHERE c.status = 'active' AND c.end_date >= ? AND {VISIBLE_TO_DEPARTMENT}
               ORDER BY c.start_date, c.id"#
        );
        let records = sqlx::query_as::<_, ChallengeRecord>(&sql)
            .bind(today)
            .bind(department_id)
            .fetch_all(self.pool)
            .await?;

        Ok(records)
    }

    /// Apply a partial update and return the new row
    pub async fn update(
        &self,
        id: &str,
        changes: &ChallengeChanges,
    ) -> DbResult<Option<ChallengeRecord>> {
        let sql = format!(
            r#"UPDATE challenges SET
                 title = COALESCE(?2, title),
                 description = COALESCE(?3, description),
                 status = COALESCE(?4, status),
                 min_goals_required = COALESCE(?5, min_goals_required)
               WHERE id = ?1
               RETURNING {CHALLENGE_COLUMNS}"#
        );
        let record = sqlx::query_as::<_, ChallengeRecord>(&sql)
            .bind(id)
            .bind(&changes.title)
            .bind(&changes.description)
            .bind(&changes.status)
            .bind(changes.min_goals_required)
            .fetch_optional(self.pool)
            .await?;

        Ok(record)
    }

    /// Flip every active challenge that ended before `today` to completed
    pub async fn complete_expired(&self, today: NaiveDate) -> DbResult<u64> {
        let result = sqlx::query(
            "UPDATE challenges SET status = 'completed' WHERE status = 'active' AND end_date < ?1",
        )
        .bind(today)
        .execute(self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Every non-archived challenge, for cache rebuilds
    pub async fn list_rebuildable(&self) -> DbResult<Vec<ChallengeRecord>> {
        let sql = format!(
            "SELECT {CHALLENGE_COLUMNS} FROM challenges WHERE status != 'archived' ORDER BY id"
        );
        let records = sqlx::query_as::<_, ChallengeRecord>(&sql)
            .fetch_all(self.pool)
            .await?;

        Ok(records)
    }
}

/// Company-wide (no department rows) or linked to the bound department
const VISIBLE_TO_DEPARTMENT: &str = "(NOT EXISTS (SELECT 1 FROM challenge_departments cd \
     WHERE cd.challenge_id = c.id) OR EXISTS (SELECT 1 FROM challenge_departments cd \
     WHERE cd.challenge_id = c.id AND cd.department_id = ?))";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::directory::DirectoryRepository;
    use crate::Database;

    fn date(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, m, d).unwrap()
    }

    fn new_challenge(title: &str, status: &str, departments: Vec<String>) -> NewChallenge {
        NewChallenge {
            title: title.to_string(),
            description: None,
            period: "month".to_string(),
            scope: "individual".to_string(),
            start_date: date(3, 1),
            end_date: date(3, 31),
            status: status.to_string(),
            min_goals_required: Some(1),
            created_by: None,
            metrics: vec![NewChallengeMetric {
                metric_key: "steps".to_string(),
                target_value: Some(5000.0),
                rule_type: "daily".to_string(),
            }],
            department_ids: departments,
        }
    }

    #[tokio::test]
    async fn test_insert_with_metrics_and_departments() {
        let db = Database::in_memory().await.unwrap();
        let dept = DirectoryRepository::new(db.pool())
            .create_department("Ops", None)
            .await
            .unwrap();
        let repo = ChallengeRepository::new(db.pool());

        let created = repo
            .insert(&new_challenge("March Madness", "draft", vec![dept.id.clone()]))
            .await
            .unwrap();

        assert_eq!(created.status, "draft");
        assert_eq!(repo.get_metrics(&created.id).await.unwrap().len(), 1);
        assert_eq!(repo.get_department_ids(&created.id).await.unwrap(), vec![dept.id]);
        assert_eq!(repo.participant_count(&created.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failed_insert_leaves_nothing_behind() {
        let db = Database::in_memory().await.unwrap();
        let repo = ChallengeRepository::new(db.pool());

        // Unknown department trips the foreign key after the challenge row was written
        let result = repo
            .insert(&new_challenge("Broken", "draft", vec!["missing".to_string()]))
            .await;
        assert!(result.is_err());

        let (rows, total) = repo.list_visible("any", None, None, 10, 0).await.unwrap();
        assert!(rows.is_empty());
        assert_eq!(total, 0);
    }

    #[tokio::test]
    async fn test_visibility_and_filters() {
        let db = Database::in_memory().await.unwrap();
        let dir = DirectoryRepository::new(db.pool());
        let ops = dir.create_department("Ops", None).await.unwrap();
        let sales = dir.create_department("Sales", None).await.unwrap();
        let repo = ChallengeRepository::new(db.pool());

        repo.insert(&new_challenge("Everyone", "active", vec![])).await.unwrap();
        repo.insert(&new_challenge("Ops only", "draft", vec![ops.id.clone()]))
            .await
            .unwrap();
        repo.insert(&new_challenge("Sales only", "active", vec![sales.id.clone()]))
            .await
            .unwrap();

        let (_, ops_total) = repo.list_visible(&ops.id, None, None, 10, 0).await.unwrap();
        assert_eq!(ops_total, 2);

        let (active, active_total) = repo
            .list_visible(&ops.id, Some("active"), None, 10, 0)
            .await
            .unwrap();
        assert_eq!(active_total, 1);
        assert_eq!(active[0].title, "Everyone");

        let (page, total) = repo.list_visible(&sales.id, None, None, 1, 1).await.unwrap();
        assert_eq!(total, 2);
        assert_eq!(page.len(), 1);
    }

    #[tokio::test]
    async fn test_complete_expired_only_touches_active() {
        let db = Database::in_memory().await.unwrap();
        let repo = ChallengeRepository::new(db.pool());

        let active = repo.insert(&new_challenge("A", "active", vec![])).await.unwrap();
        let draft = repo.insert(&new_challenge("D", "draft", vec![])).await.unwrap();

        assert_eq!(repo.complete_expired(date(3, 31)).await.unwrap(), 0);
        assert_eq!(repo.complete_expired(date(4, 1)).await.unwrap(), 1);

        assert_eq!(repo.get(&active.id).await.unwrap().unwrap().status, "completed");
        assert_eq!(repo.get(&draft.id).await.unwrap().unwrap().status, "draft");
    }

    #[tokio::test]
    async fn test_update_keeps_unset_fields() {
        let db = Database::in_memory().await.unwrap();
        let repo = ChallengeRepository::new(db.pool());
        let created = repo.insert(&new_challenge("Old", "draft", vec![])).await.unwrap();

        let updated = repo
            .update(
                &created.id,
                &ChallengeChanges {
                    description: Some("Walk more".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .unwrap();

        assert_eq!(updated.title, "Old");
        assert_eq!(updated.description.as_deref(), Some("Walk more"));
        assert!(repo.update("missing", &ChallengeChanges::default()).await.unwrap().is_none());
    }
}
