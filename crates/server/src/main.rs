//! Stride — challenge participation, streak and leaderboard backend
//!
//! Usage:
//!   stride serve --port 3001     — Launch the HTTP API
//!   stride rebuild               — Recompute cached snapshots and team rollups

use async_trait::async_trait;
use axum::{
    extract::{FromRequestParts, Path, Query, State},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post, put},
    Router,
};
use chrono::{FixedOffset, NaiveDate};
use clap::{Parser, Subcommand};
use engine::{
    calendar::today_at, ChallengeError, ChallengeRegistry, CreateChallengeRequest, DateWindow,
    ErrorKind, JoinChallengeRequest, LeaderboardRanker, ListChallengesQuery, LogStepsRequest,
    ParticipationManager, SetTargetRequest, StepService, UpdateChallengeRequest,
};
use persistence::repository::DirectoryRepository;
use persistence::Database;
use serde::Deserialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

const APP_VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), "-", env!("STRIDE_REVISION"));

/// Header carrying the caller identity, set by the upstream auth gateway
const USER_HEADER: &str = "x-user-id";

#[derive(Parser)]
#[command(name = "stride")]
#[command(about = "Challenge participation, streak and leaderboard backend", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// SQLite database file
    #[arg(long, global = true, env = "STRIDE_DB_PATH", default_value = "data/stride.db")]
    db_path: String,

    /// UTC offset in minutes used to decide what "today" is
    #[arg(
        long,
        global = true,
        env = "STRIDE_UTC_OFFSET_MINUTES",
        default_value_t = 330,
        allow_hyphen_values = true
    )]
    utc_offset_minutes: i32,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Launch the HTTP API
    Serve {
        /// Host to bind to
        #[arg(long, env = "STRIDE_HOST", default_value = "0.0.0.0")]
        host: String,
        /// Port to listen on
        #[arg(short, long, env = "STRIDE_PORT", default_value_t = 3001)]
        port: u16,
    },
    /// Recompute every cached streak snapshot and team rollup from the step log
    Rebuild,
}

#[derive(Clone)]
struct AppState {
    db: Arc<Database>,
    steps: Arc<StepService>,
    participation: Arc<ParticipationManager>,
    ranker: Arc<LeaderboardRanker>,
    registry: Arc<ChallengeRegistry>,
    offset: FixedOffset,
}

impl AppState {
    fn new(db: Database, offset: FixedOffset) -> Self {
        let pool = db.pool_clone();
        Self {
            steps: Arc::new(StepService::new(pool.clone())),
            participation: Arc::new(ParticipationManager::new(pool.clone())),
            ranker: Arc::new(LeaderboardRanker::new(pool.clone())),
            registry: Arc::new(ChallengeRegistry::new(pool)),
            db: Arc::new(db),
            offset,
        }
    }

    fn today(&self) -> NaiveDate {
        today_at(self.offset)
    }
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("debug,engine=debug,persistence=debug,stride=debug,sqlx=warn")
    } else {
        EnvFilter::new("info,engine=info,persistence=info,stride=info,sqlx=warn")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).compact())
        .with(filter)
        .init();
}

fn parse_offset(minutes: i32) -> anyhow::Result<FixedOffset> {
    minutes
        .checked_mul(60)
        .and_then(FixedOffset::east_opt)
        .ok_or_else(|| anyhow::anyhow!("UTC offset out of range: {} minutes", minutes))
}

async fn open_database(db_path: &str) -> anyhow::Result<Database> {
    let db = Database::new(db_path).await.map_err(|e| {
        error!("Failed to initialize database: {}", e);
        anyhow::anyhow!("Database initialization failed: {}", e)
    })?;
    info!("Database initialized: {}", db_path);
    Ok(db)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env first so clap's env fallbacks can see it
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let offset = parse_offset(cli.utc_offset_minutes)?;

    match cli.command {
        Commands::Serve { host, port } => {
            cmd_serve(&cli.db_path, offset, &host, port).await?;
        }
        Commands::Rebuild => {
            cmd_rebuild(&cli.db_path, offset).await?;
        }
    }

    Ok(())
}

// ============================================================================
// Serve command — HTTP API
// ============================================================================

async fn cmd_serve(db_path: &str, offset: FixedOffset, host: &str, port: u16) -> anyhow::Result<()> {
    info!("Stride v{} starting...", APP_VERSION);

    let db = open_database(db_path).await?;
    let state = AppState::new(db, offset);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .nest("/api", api_routes(state.clone()))
        .layer(cors);

    let addr: std::net::SocketAddr = format!("{}:{}", host, port).parse()?;
    println!("\n=== Stride v{} ===", APP_VERSION);
    println!("Challenge & Streak Server");
    println!("Listening on http://{}", addr);
    println!("\nEndpoints:");
    println!("  GET   /api/health                          - Health check");
    println!("  POST  /api/steps                           - Log steps for a day");
    println!("  GET   /api/steps/today                     - Today's total");
    println!("  GET   /api/steps/history?from&to           - Step history");
    println!("  GET   /api/steps/week?day                  - Monday-anchored week summary");
    println!("  GET   /api/steps/logs?from&to              - Raw step writes");
    println!("  GET   /api/streaks/current                 - Habit and goal streaks ending today");
    println!("  POST  /api/challenges                      - Create challenge");
    println!("  GET   /api/challenges                      - List visible challenges");
    println!("  GET   /api/challenges/available            - Joinable challenges");
    println!("  GET   /api/challenges/my                   - My challenges");
    println!("  GET   /api/challenges/:id                  - Challenge detail");
    println!("  PATCH /api/challenges/:id                  - Update challenge (creator)");
    println!("  POST  /api/challenges/:id/join             - Join");
    println!("  POST  /api/challenges/:id/leave            - Leave");
    println!("  PUT   /api/challenges/:id/target           - Lock daily target");
    println!("  GET   /api/challenges/:id/progress?as_of   - Cached vs live progress");
    println!("  GET   /api/challenges/:id/leaderboard?as_of - Ranked participants");
    println!("  GET   /api/challenges/:id/teams            - Team standings");
    println!("  POST  /api/admin/departments|teams|users   - Directory");
    println!("\n  Database: {}", db_path);
    println!("  Today ({}): {}", offset, state.today());
    println!("\nPress Ctrl+C to stop\n");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn api_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(api_health))
        .route("/steps", post(api_log_steps))
        .route("/steps/today", get(api_steps_today))
        .route("/steps/history", get(api_steps_history))
        .route("/steps/week", get(api_steps_week))
        .route("/steps/logs", get(api_step_logs))
        .route("/streaks/current", get(api_current_streak))
        .route("/challenges", post(api_create_challenge).get(api_list_challenges))
        .route("/challenges/available", get(api_available_challenges))
        .route("/challenges/my", get(api_my_challenges))
        .route(
            "/challenges/:id",
            get(api_challenge_detail).patch(api_update_challenge),
        )
        .route("/challenges/:id/join", post(api_join))
        .route("/challenges/:id/leave", post(api_leave))
        .route("/challenges/:id/target", put(api_set_target))
        .route("/challenges/:id/progress", get(api_progress))
        .route("/challenges/:id/leaderboard", get(api_leaderboard))
        .route("/challenges/:id/teams", get(api_team_standings))
        .route("/admin/departments", post(api_create_department))
        .route("/admin/teams", post(api_create_team))
        .route("/admin/users", post(api_create_user))
        .with_state(state)
}

// ============================================================================
// Rebuild command — recompute caches from the raw step log
// ============================================================================

async fn cmd_rebuild(db_path: &str, offset: FixedOffset) -> anyhow::Result<()> {
    println!("\n=== Stride v{} ===", APP_VERSION);

    let db = open_database(db_path).await?;
    let state = AppState::new(db, offset);
    let today = state.today();

    let completed = state
        .registry
        .complete_expired(today)
        .await
        .map_err(|e| anyhow::anyhow!("Auto-complete failed: {}", e))?;
    let report = state
        .participation
        .rebuild_all()
        .await
        .map_err(|e| anyhow::anyhow!("Rebuild failed: {}", e))?;

    info!(
        "Done! {} participations and {} challenges rebuilt, {} challenges auto-completed.",
        report.participations, report.challenges, completed
    );
    Ok(())
}

// ============================================================================
// Errors & identity
// ============================================================================

/// Error returned by every handler
#[derive(Debug)]
enum ApiError {
    Challenge(ChallengeError),
    Unauthorized,
}

impl From<ChallengeError> for ApiError {
    fn from(e: ChallengeError) -> Self {
        Self::Challenge(e)
    }
}

impl From<persistence::DbError> for ApiError {
    fn from(e: persistence::DbError) -> Self {
        Self::Challenge(ChallengeError::Storage(e))
    }
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::NotFound | ErrorKind::NotAParticipant => StatusCode::NOT_FOUND,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
        ErrorKind::Forbidden => StatusCode::FORBIDDEN,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            Self::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                format!("Missing {} header", USER_HEADER),
            ),
            Self::Challenge(e) => {
                let kind = e.kind();
                let message = if kind == ErrorKind::Internal {
                    error!("Request failed: {}", e);
                    "Internal server error".to_string()
                } else {
                    e.to_string()
                };
                (status_for(kind), kind.code(), message)
            }
        };

        (
            status,
            Json(serde_json::json!({
                "success": false,
                "error": code,
                "message": message,
            })),
        )
            .into_response()
    }
}

type ApiResult = Result<Json<serde_json::Value>, ApiError>;

/// Caller identity taken from the trusted gateway header
struct AuthUser(String);

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| AuthUser(v.to_string()))
            .ok_or(ApiError::Unauthorized)
    }
}

// ============================================================================
// API Handlers — Steps
// ============================================================================

/// GET /api/health
async fn api_health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let db_ok = state.db.ping().await.is_ok();
    Json(serde_json::json!({
        "status": if db_ok { "ok" } else { "degraded" },
        "service": "stride",
        "version": APP_VERSION,
        "today": state.today(),
    }))
}

/// POST /api/steps — log a write, replace the day's total and refresh challenge snapshots
async fn api_log_steps(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(request): Json<LogStepsRequest>,
) -> ApiResult {
    let logged = state.steps.log_steps(&user_id, &request, state.today()).await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "data": logged,
    })))
}

/// GET /api/steps/today
async fn api_steps_today(State(state): State<AppState>, AuthUser(user_id): AuthUser) -> ApiResult {
    let total = state.steps.day_total(&user_id, state.today()).await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "data": total,
    })))
}

#[derive(Deserialize)]
struct HistoryQuery {
    from: NaiveDate,
    to: NaiveDate,
}

/// GET /api/steps/history?from=YYYY-MM-DD&to=YYYY-MM-DD
async fn api_steps_history(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Query(query): Query<HistoryQuery>,
) -> ApiResult {
    let window = DateWindow::new(query.from, query.to)?;
    let history = state.steps.history(&user_id, &window).await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "data": history,
        "total": history.len(),
    })))
}

/// GET /api/steps/logs?from=YYYY-MM-DD&to=YYYY-MM-DD — every write, newest first
async fn api_step_logs(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Query(query): Query<HistoryQuery>,
) -> ApiResult {
    let window = DateWindow::new(query.from, query.to)?;
    let logs = state.steps.logs(&user_id, &window).await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "data": logs,
        "total": logs.len(),
    })))
}

/// GET /api/streaks/current
async fn api_current_streak(State(state): State<AppState>, AuthUser(user_id): AuthUser) -> ApiResult {
    let streak = state.steps.current_streak(&user_id, state.today()).await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "data": streak,
    })))
}

#[derive(Deserialize)]
struct DayQuery {
    day: Option<NaiveDate>,
}

/// GET /api/steps/week?day=YYYY-MM-DD — defaults to the current week
async fn api_steps_week(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Query(query): Query<DayQuery>,
) -> ApiResult {
    let day = query.day.unwrap_or_else(|| state.today());
    let summary = state.steps.week_summary(&user_id, day).await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "data": summary,
    })))
}

// ============================================================================
// API Handlers — Challenges
// ============================================================================

/// POST /api/challenges — create a draft challenge
async fn api_create_challenge(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(request): Json<CreateChallengeRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let detail = state.registry.create(&user_id, &request, state.today()).await?;
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "success": true,
            "data": detail,
        })),
    ))
}

/// GET /api/challenges?status&scope&page&page_size
async fn api_list_challenges(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Query(query): Query<ListChallengesQuery>,
) -> ApiResult {
    let page = state.registry.list(&user_id, &query).await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "data": page.challenges,
        "total": page.total,
        "page": page.page,
        "page_size": page.page_size,
    })))
}

/// GET /api/challenges/available
async fn api_available_challenges(State(state): State<AppState>, AuthUser(user_id): AuthUser) -> ApiResult {
    let available = state.registry.available(&user_id, state.today()).await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "data": available,
    })))
}

/// GET /api/challenges/my
async fn api_my_challenges(State(state): State<AppState>, AuthUser(user_id): AuthUser) -> ApiResult {
    let mine = state.participation.my_challenges(&user_id, state.today()).await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "data": mine,
    })))
}

/// GET /api/challenges/:id
async fn api_challenge_detail(
    State(state): State<AppState>,
    AuthUser(_): AuthUser,
    Path(id): Path<String>,
) -> ApiResult {
    let detail = state.registry.detail(&id).await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "data": detail,
    })))
}

/// PATCH /api/challenges/:id — creator only
async fn api_update_challenge(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<String>,
    Json(request): Json<UpdateChallengeRequest>,
) -> ApiResult {
    let detail = state
        .registry
        .update(&id, &user_id, &request, state.today())
        .await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "data": detail,
    })))
}

/// POST /api/challenges/:id/join — body is optional
async fn api_join(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<String>,
    body: Option<Json<JoinChallengeRequest>>,
) -> ApiResult {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let participant = state.participation.join(&id, &user_id, &request).await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "data": participant,
    })))
}

/// POST /api/challenges/:id/leave
async fn api_leave(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<String>,
) -> ApiResult {
    state.participation.leave(&id, &user_id).await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "message": "Left challenge successfully",
    })))
}

/// PUT /api/challenges/:id/target — first write wins
async fn api_set_target(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<String>,
    Json(request): Json<SetTargetRequest>,
) -> ApiResult {
    let participant = state
        .participation
        .set_target(&id, &user_id, request.daily_target)
        .await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "data": participant,
    })))
}

#[derive(Deserialize)]
struct AsOfQuery {
    as_of: Option<NaiveDate>,
}

/// GET /api/challenges/:id/progress?as_of=YYYY-MM-DD
async fn api_progress(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<String>,
    Query(query): Query<AsOfQuery>,
) -> ApiResult {
    let as_of = query.as_of.unwrap_or_else(|| state.today());
    let progress = state.participation.progress(&id, &user_id, as_of).await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "data": progress,
    })))
}

/// GET /api/challenges/:id/leaderboard?as_of=YYYY-MM-DD
async fn api_leaderboard(
    State(state): State<AppState>,
    AuthUser(_): AuthUser,
    Path(id): Path<String>,
    Query(query): Query<AsOfQuery>,
) -> ApiResult {
    let as_of = query.as_of.unwrap_or_else(|| state.today());
    let board = state.ranker.rank(&id, as_of).await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "data": board,
    })))
}

/// GET /api/challenges/:id/teams
async fn api_team_standings(
    State(state): State<AppState>,
    AuthUser(_): AuthUser,
    Path(id): Path<String>,
) -> ApiResult {
    let standings = state.ranker.team_standings(&id).await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "data": standings,
    })))
}

// ============================================================================
// API Handlers — Directory (admin)
// ============================================================================

#[derive(Deserialize)]
struct CreateDepartmentBody {
    name: String,
    parent_id: Option<String>,
}

#[derive(Deserialize)]
struct CreateTeamBody {
    name: String,
    department_id: String,
}

#[derive(Deserialize)]
struct CreateUserBody {
    name: Option<String>,
    email: String,
    department_id: String,
}

fn require_name(field: &str, value: &str) -> Result<(), ApiError> {
    if value.trim().is_empty() {
        return Err(ChallengeError::InvalidInput(format!("{} must not be blank", field)).into());
    }
    Ok(())
}

async fn require_department(repo: &DirectoryRepository<'_>, id: &str) -> Result<(), ApiError> {
    if repo.get_department(id).await?.is_none() {
        return Err(ChallengeError::NotFound("Department".to_string()).into());
    }
    Ok(())
}

/// POST /api/admin/departments
async fn api_create_department(
    State(state): State<AppState>,
    Json(body): Json<CreateDepartmentBody>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    require_name("name", &body.name)?;
    let repo = DirectoryRepository::new(state.db.pool());
    if let Some(parent) = &body.parent_id {
        require_department(&repo, parent).await?;
    }

    let department = repo
        .create_department(body.name.trim(), body.parent_id.as_deref())
        .await?;
    info!(department_id = %department.id, name = %department.name, "Department created");
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "success": true, "data": department })),
    ))
}

/// POST /api/admin/teams
async fn api_create_team(
    State(state): State<AppState>,
    Json(body): Json<CreateTeamBody>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    require_name("name", &body.name)?;
    let repo = DirectoryRepository::new(state.db.pool());
    require_department(&repo, &body.department_id).await?;

    let team = repo.create_team(body.name.trim(), &body.department_id).await?;
    info!(team_id = %team.id, name = %team.name, "Team created");
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "success": true, "data": team })),
    ))
}

/// POST /api/admin/users
async fn api_create_user(
    State(state): State<AppState>,
    Json(body): Json<CreateUserBody>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    require_name("email", &body.email)?;
    let repo = DirectoryRepository::new(state.db.pool());
    require_department(&repo, &body.department_id).await?;

    let user = repo
        .create_user(body.name.as_deref(), body.email.trim(), &body.department_id)
        .await
        .map_err(|e| {
            if e.is_unique_violation() {
                ApiError::from(ChallengeError::InvalidInput("Email already registered".to_string()))
            } else {
                ApiError::from(e)
            }
        })?;
    info!(user_id = %user.id, "User created");
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "success": true, "data": user })),
    ))
}
