//! Shared in-memory database fixture for engine tests

use chrono::NaiveDate;
use persistence::repository::{
    ChallengeRepository, DirectoryRepository, NewChallenge, NewChallengeMetric, StepsRepository,
};
use persistence::{Database, SqlitePool};

pub struct Fixture {
    pub db: Database,
    pub department_id: String,
    pub team_id: String,
    /// Three users in the same department
    pub users: Vec<String>,
}

impl Fixture {
    pub async fn new() -> Self {
        let db = Database::in_memory().await.unwrap();
        let dir = DirectoryRepository::new(db.pool());

        let dept = dir.create_department("Engineering", None).await.unwrap();
        let team = dir.create_team("Trailblazers", &dept.id).await.unwrap();

        let mut users = Vec::new();
        for name in ["Anika", "Bruno", "Chen"] {
            let email = format!("{}@example.com", name.to_lowercase());
            let user = dir.create_user(Some(name), &email, &dept.id).await.unwrap();
            users.push(user.id);
        }

        Self {
            department_id: dept.id,
            team_id: team.id,
            users,
            db,
        }
    }

    pub fn pool(&self) -> SqlitePool {
        self.db.pool_clone()
    }

    /// Company-wide step challenge, inserted directly with the given status
    pub async fn challenge(&self, start: NaiveDate, end: NaiveDate, status: &str) -> String {
        ChallengeRepository::new(self.db.pool())
            .insert(&NewChallenge {
                title: format!("Steps {start}"),
                description: None,
                period: "month".to_string(),
                scope: "individual".to_string(),
                start_date: start,
                end_date: end,
                status: status.to_string(),
                min_goals_required: Some(1),
                created_by: Some(self.users[0].clone()),
                metrics: vec![NewChallengeMetric {
                    metric_key: "steps".to_string(),
                    target_value: None,
                    rule_type: "daily".to_string(),
                }],
                department_ids: vec![],
            })
            .await
            .unwrap()
            .id
    }

    /// Raw upsert without running the challenge hook
    pub async fn write_steps(&self, user_id: &str, day: NaiveDate, steps: u32) {
        StepsRepository::new(self.db.pool())
            .upsert_steps(user_id, day, i64::from(steps))
            .await
            .unwrap();
    }

    /// Run raw SQL against the fixture database
    pub async fn execute(&self, sql: &str) {
        sqlx::query(sql).execute(self.db.pool()).await.unwrap();
    }
}
