//! Challenge Registry — definitions, metrics, department scoping and the
//! opportunistic auto-complete of expired challenges.
//!
//! Request structs are validated before anything touches storage. Every write
//! to the challenges table is followed by [`ChallengeRegistry::complete_expired`];
//! there is no timer, so readers may briefly see `active` after the end date.

use crate::error::{ChallengeError, ChallengeResult};
use crate::types::{ChallengePeriod, ChallengeScope, ChallengeStatus, DateWindow, MetricRuleType};
use chrono::NaiveDate;
use persistence::repository::{
    ChallengeChanges, ChallengeMetricRecord, ChallengeRecord, ChallengeRepository,
    DirectoryRepository, NewChallenge, NewChallengeMetric, ParticipantRepository, UserRecord,
};
use persistence::SqlitePool;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, info};

const TITLE_MIN: usize = 3;
const TITLE_MAX: usize = 200;
const PAGE_SIZE_MAX: u32 = 100;

/// Fetch a challenge and its inclusive date window
pub(crate) async fn load_challenge(
    pool: &SqlitePool,
    challenge_id: &str,
) -> ChallengeResult<(ChallengeRecord, DateWindow)> {
    let challenge = ChallengeRepository::new(pool)
        .get(challenge_id)
        .await?
        .ok_or_else(|| ChallengeError::not_found("Challenge"))?;
    let window = DateWindow::new(challenge.start_date, challenge.end_date)?;
    Ok((challenge, window))
}

/// Resolve a caller id to its directory row
pub(crate) async fn require_user(pool: &SqlitePool, user_id: &str) -> ChallengeResult<UserRecord> {
    DirectoryRepository::new(pool)
        .get_user(user_id)
        .await?
        .ok_or_else(|| ChallengeError::not_found("User"))
}

fn validate_title(title: &str) -> ChallengeResult<()> {
    let len = title.trim().chars().count();
    if !(TITLE_MIN..=TITLE_MAX).contains(&len) {
        return Err(ChallengeError::invalid(format!(
            "title must be between {TITLE_MIN} and {TITLE_MAX} characters"
        )));
    }
    Ok(())
}

fn validate_min_goals(min_goals: u32, metric_count: usize) -> ChallengeResult<()> {
    if min_goals == 0 {
        return Err(ChallengeError::invalid("min_goals_required must be at least 1"));
    }
    if min_goals as usize > metric_count {
        return Err(ChallengeError::invalid(
            "min_goals_required cannot exceed total metrics count",
        ));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct MetricRequest {
    pub metric_key: String,
    /// `None` means the participant picks their own target
    pub target_value: Option<f64>,
    #[serde(default)]
    pub rule_type: MetricRuleType,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateChallengeRequest {
    pub title: String,
    pub description: Option<String>,
    pub period: ChallengePeriod,
    pub scope: ChallengeScope,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub min_goals_required: Option<u32>,
    pub metrics: Vec<MetricRequest>,
    /// Empty means company-wide
    #[serde(default)]
    pub department_ids: Vec<String>,
}

impl CreateChallengeRequest {
    pub fn validate(&self) -> ChallengeResult<()> {
        validate_title(&self.title)?;
        DateWindow::new(self.start_date, self.end_date)?;

        if self.metrics.is_empty() {
            return Err(ChallengeError::invalid("At least one metric is required"));
        }
        let mut keys = HashSet::new();
        for metric in &self.metrics {
            if metric.metric_key.trim().is_empty() {
                return Err(ChallengeError::invalid("metric_key must not be blank"));
            }
            if !keys.insert(metric.metric_key.as_str()) {
                return Err(ChallengeError::invalid("Duplicate metrics not allowed"));
            }
        }

        if let Some(min_goals) = self.min_goals_required {
            validate_min_goals(min_goals, self.metrics.len())?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateChallengeRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<ChallengeStatus>,
    pub min_goals_required: Option<u32>,
}

impl UpdateChallengeRequest {
    pub fn validate(&self) -> ChallengeResult<()> {
        if let Some(title) = &self.title {
            validate_title(title)?;
        }
        if self.min_goals_required == Some(0) {
            return Err(ChallengeError::invalid("min_goals_required must be at least 1"));
        }
        Ok(())
    }
}

fn default_page() -> u32 {
    1
}

fn default_page_size() -> u32 {
    20
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListChallengesQuery {
    pub status: Option<ChallengeStatus>,
    pub scope: Option<ChallengeScope>,
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

impl Default for ListChallengesQuery {
    fn default() -> Self {
        Self {
            status: None,
            scope: None,
            page: default_page(),
            page_size: default_page_size(),
        }
    }
}

impl ListChallengesQuery {
    pub fn validate(&self) -> ChallengeResult<()> {
        if self.page < 1 {
            return Err(ChallengeError::invalid("page must be at least 1"));
        }
        if !(1..=PAGE_SIZE_MAX).contains(&self.page_size) {
            return Err(ChallengeError::invalid(format!(
                "page_size must be between 1 and {PAGE_SIZE_MAX}"
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct ChallengeDetail {
    #[serde(flatten)]
    pub challenge: ChallengeRecord,
    pub metrics: Vec<ChallengeMetricRecord>,
    pub department_ids: Vec<String>,
    pub participant_count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChallengePage {
    pub challenges: Vec<ChallengeRecord>,
    pub total: i64,
    pub page: u32,
    pub page_size: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct AvailableChallenge {
    #[serde(flatten)]
    pub detail: ChallengeDetail,
    pub user_joined: bool,
    pub user_daily_target: Option<i64>,
    pub days_remaining: i64,
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

pub struct ChallengeRegistry {
    pool: SqlitePool,
}

impl ChallengeRegistry {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a challenge in `draft` status
    pub async fn create(
        &self,
        creator_id: &str,
        request: &CreateChallengeRequest,
        today: NaiveDate,
    ) -> ChallengeResult<ChallengeDetail> {
        request.validate()?;
        require_user(&self.pool, creator_id).await?;

        let department_ids: Vec<String> = {
            let mut seen = HashSet::new();
            request
                .department_ids
                .iter()
                .filter(|id| seen.insert(id.as_str()))
                .cloned()
                .collect()
        };
        if !department_ids.is_empty() {
            let found = DirectoryRepository::new(&self.pool)
                .count_departments(&department_ids)
                .await?;
            if found != department_ids.len() {
                return Err(ChallengeError::invalid("One or more department IDs are invalid"));
            }
        }

        let new = NewChallenge {
            title: request.title.trim().to_string(),
            description: request.description.clone(),
            period: request.period.as_str().to_string(),
            scope: request.scope.as_str().to_string(),
            start_date: request.start_date,
            end_date: request.end_date,
            status: ChallengeStatus::Draft.as_str().to_string(),
            min_goals_required: request.min_goals_required.map(i64::from),
            created_by: Some(creator_id.to_string()),
            metrics: request
                .metrics
                .iter()
                .map(|m| NewChallengeMetric {
                    metric_key: m.metric_key.trim().to_string(),
                    target_value: m.target_value,
                    rule_type: m.rule_type.as_str().to_string(),
                })
                .collect(),
            department_ids,
        };

        let record = ChallengeRepository::new(&self.pool).insert(&new).await?;
        info!(challenge_id = %record.id, creator_id, title = %record.title, "Challenge created");

        self.complete_expired(today).await?;
        self.detail(&record.id).await
    }

    /// Challenge with metrics, departments and active participant count
    pub async fn detail(&self, challenge_id: &str) -> ChallengeResult<ChallengeDetail> {
        let (challenge, _) = load_challenge(&self.pool, challenge_id).await?;
        self.expand(challenge).await
    }

    /// Challenges visible to the user's department, newest first
    pub async fn list(&self, user_id: &str, query: &ListChallengesQuery) -> ChallengeResult<ChallengePage> {
        query.validate()?;
        let department_id = self.department_of(user_id).await?;

        let limit = i64::from(query.page_size);
        let offset = i64::from(query.page - 1) * limit;
        let (challenges, total) = ChallengeRepository::new(&self.pool)
            .list_visible(
                &department_id,
                query.status.map(|s| s.as_str()),
                query.scope.map(|s| s.as_str()),
                limit,
                offset,
            )
            .await?;

        Ok(ChallengePage {
            challenges,
            total,
            page: query.page,
            page_size: query.page_size,
        })
    }

    /// Creator-only partial update. Status may only move forward.
    pub async fn update(
        &self,
        challenge_id: &str,
        user_id: &str,
        request: &UpdateChallengeRequest,
        today: NaiveDate,
    ) -> ChallengeResult<ChallengeDetail> {
        request.validate()?;
        let (challenge, _) = load_challenge(&self.pool, challenge_id).await?;

        if challenge.created_by.as_deref() != Some(user_id) {
            return Err(ChallengeError::Forbidden(
                "Not authorized to update this challenge".to_string(),
            ));
        }

        let repo = ChallengeRepository::new(&self.pool);

        if let Some(next) = request.status {
            let current: ChallengeStatus = challenge.status.parse()?;
            if !current.can_transition_to(next) {
                return Err(ChallengeError::invalid(format!(
                    "Cannot move challenge from {} back to {}",
                    current.as_str(),
                    next.as_str()
                )));
            }
        }
        if let Some(min_goals) = request.min_goals_required {
            let metric_count = repo.get_metrics(challenge_id).await?.len();
            validate_min_goals(min_goals, metric_count)?;
        }

        let changes = ChallengeChanges {
            title: request.title.as_ref().map(|t| t.trim().to_string()),
            description: request.description.clone(),
            status: request.status.map(|s| s.as_str().to_string()),
            min_goals_required: request.min_goals_required.map(i64::from),
        };
        repo.update(challenge_id, &changes)
            .await?
            .ok_or_else(|| ChallengeError::not_found("Challenge"))?;

        info!(challenge_id, user_id, status = ?request.status, "Challenge updated");

        self.complete_expired(today).await?;
        self.detail(challenge_id).await
    }

    /// Active, unfinished challenges the user can see, with their join state
    pub async fn available(&self, user_id: &str, today: NaiveDate) -> ChallengeResult<Vec<AvailableChallenge>> {
        let department_id = self.department_of(user_id).await?;
        let challenges = ChallengeRepository::new(&self.pool)
            .list_available(&department_id, today)
            .await?;
        let participants = ParticipantRepository::new(&self.pool);

        let mut out = Vec::with_capacity(challenges.len());
        for challenge in challenges {
            let joined = participants.find_active(&challenge.id, user_id).await?;
            let days_remaining = if challenge.end_date >= today {
                (challenge.end_date - today).num_days() + 1
            } else {
                0
            };
            out.push(AvailableChallenge {
                user_joined: joined.is_some(),
                user_daily_target: joined.and_then(|p| p.selected_daily_target),
                days_remaining,
                detail: self.expand(challenge).await?,
            });
        }

        Ok(out)
    }

    /// Flip expired active challenges to completed. Returns how many changed.
    pub async fn complete_expired(&self, today: NaiveDate) -> ChallengeResult<u64> {
        let completed = ChallengeRepository::new(&self.pool)
            .complete_expired(today)
            .await?;
        if completed > 0 {
            info!(completed, %today, "Auto-completed expired challenges");
        } else {
            debug!(%today, "No expired challenges");
        }
        Ok(completed)
    }

    async fn expand(&self, challenge: ChallengeRecord) -> ChallengeResult<ChallengeDetail> {
        let repo = ChallengeRepository::new(&self.pool);
        let metrics = repo.get_metrics(&challenge.id).await?;
        let department_ids = repo.get_department_ids(&challenge.id).await?;
        let participant_count = repo.participant_count(&challenge.id).await?;

        Ok(ChallengeDetail {
            challenge,
            metrics,
            department_ids,
            participant_count,
        })
    }

    async fn department_of(&self, user_id: &str) -> ChallengeResult<String> {
        Ok(require_user(&self.pool, user_id).await?.department_id)
    }
}
