//! Organisation directory: departments, teams and users

use crate::{new_id, DbResult};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DepartmentRecord {
    pub id: String,
    pub name: String,
    pub parent_id: Option<String>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TeamRecord {
    pub id: String,
    pub name: String,
    pub department_id: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UserRecord {
    pub id: String,
    pub name: Option<String>,
    pub email: String,
    pub department_id: String,
    pub created_at: i64,
}

/// Repository for the directory tables
pub struct DirectoryRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> DirectoryRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create_department(
        &self,
        name: &str,
        parent_id: Option<&str>,
    ) -> DbResult<DepartmentRecord> {
        let record = sqlx::query_as::<_, DepartmentRecord>(
            r#"INSERT INTO departments (id, name, parent_id)
               VALUES (?1, ?2, ?3)
               RETURNING id, name, parent_id, created_at"#,
        )
        .bind(new_id())
        .bind(name)
        .bind(parent_id)
        .fetch_one(self.pool)
        .await?;

        Ok(record)
    }

    pub async fn get_department(&self, id: &str) -> DbResult<Option<DepartmentRecord>> {
        let record = sqlx::query_as::<_, DepartmentRecord>(
            "SELECT id, name, parent_id, created_at FROM departments WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(self.pool)
        .await?;

        Ok(record)
    }

    /// Count how many of the given department ids exist
    pub async fn count_departments(&self, ids: &[String]) -> DbResult<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!("SELECT COUNT(*) FROM departments WHERE id IN ({placeholders})");

        let mut query = sqlx::query_scalar::<_, i64>(&sql);
        for id in ids {
            query = query.bind(id);
        }
        let count = query.fetch_one(self.pool).await?;

        Ok(count as usize)
    }

    pub async fn create_team(&self, name: &str, department_id: &str) -> DbResult<TeamRecord> {
        let record = sqlx::query_as::<_, TeamRecord>(
            r#"INSERT INTO teams (id, name, department_id)
               VALUES (?1, ?2, ?3)
               RETURNING id, name, department_id, created_at"#,
        )
        .bind(new_id())
        .bind(name)
        .bind(department_id)
        .fetch_one(self.pool)
        .await?;

        Ok(record)
    }

    pub async fn get_team(&self, id: &str) -> DbResult<Option<TeamRecord>> {
        let record = sqlx::query_as::<_, TeamRecord>(
            "SELECT id, name, department_id, created_at FROM teams WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(self.pool)
        .await?;

        Ok(record)
    }

    pub async fn create_user(
        &self,
        name: Option<&str>,
        email: &str,
        department_id: &str,
    ) -> DbResult<UserRecord> {
        let record = sqlx::query_as::<_, UserRecord>(
            r#"INSERT INTO users (id, name, email, department_id)
               VALUES (?1, ?2, ?3, ?4)
               RETURNING id, name, email, department_id, created_at"#,
        )
        .bind(new_id())
        .bind(name)
        .bind(email)
        .bind(department_id)
        .fetch_one(self.pool)
        .await?;

        Ok(record)
    }

    pub async fn get_user(&self, id: &str) -> DbResult<Option<UserRecord>> {
        let record = sqlx::query_as::<_, UserRecord>(
            "SELECT id, name, email, department_id, created_at FROM users WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(self.pool)
        .await?;

        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;

    #[tokio::test]
    async fn test_directory_roundtrip() {
        let db = Database::in_memory().await.unwrap();
        let repo = DirectoryRepository::new(db.pool());

        let eng = repo.create_department("Engineering", None).await.unwrap();
        let platform = repo
            .create_department("Platform", Some(&eng.id))
            .await
            .unwrap();
        let team = repo.create_team("Night Owls", &platform.id).await.unwrap();
        let user = repo
            .create_user(Some("Ravi"), "ravi@example.com", &platform.id)
            .await
            .unwrap();

        assert_eq!(
            repo.get_department(&platform.id).await.unwrap().unwrap().parent_id,
            Some(eng.id.clone())
        );
        assert_eq!(repo.get_team(&team.id).await.unwrap().unwrap().name, "Night Owls");
        assert_eq!(
            repo.get_user(&user.id).await.unwrap().unwrap().department_id,
            platform.id
        );
        assert!(repo.get_user("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_count_departments_ignores_unknown_ids() {
        let db = Database::in_memory().await.unwrap();
        let repo = DirectoryRepository::new(db.pool());
        let a = repo.create_department("A", None).await.unwrap();

        let ids = vec![a.id.clone(), "missing".to_string()];
        assert_eq!(repo.count_departments(&ids).await.unwrap(), 1);
        assert_eq!(repo.count_departments(&[]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_email_is_unique_violation() {
        let db = Database::in_memory().await.unwrap();
        let repo = DirectoryRepository::new(db.pool());
        let dept = repo.create_department("A", None).await.unwrap();

        repo.create_user(None, "dup@example.com", &dept.id).await.unwrap();
        let err = repo
            .create_user(None, "dup@example.com", &dept.id)
            .await
            .unwrap_err();
        assert!(err.is_unique_violation());
    }
}
