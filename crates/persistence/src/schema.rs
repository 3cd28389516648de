//! Database schema definitions

/// SQL to create all tables
/// NOTE: calendar days are stored as TEXT `YYYY-MM-DD` (sortable), instants as epoch seconds
pub const CREATE_TABLES: &str = r#"
-- Organisation directory
CREATE TABLE IF NOT EXISTS departments (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    parent_id TEXT REFERENCES departments(id),
    created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
);

CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    name TEXT,
    email TEXT NOT NULL UNIQUE,
    department_id TEXT NOT NULL REFERENCES departments(id),
    created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
);

CREATE TABLE IF NOT EXISTS teams (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    department_id TEXT NOT NULL REFERENCES departments(id),
    created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
);

-- One row per user per calendar day, later writes replace the value
CREATE TABLE IF NOT EXISTS daily_steps (
    user_id TEXT NOT NULL REFERENCES users(id),
    day TEXT NOT NULL,
    steps INTEGER NOT NULL DEFAULT 0 CHECK (steps >= 0),
    updated_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
    PRIMARY KEY (user_id, day)
);

-- Raw audit trail of every step write, daily_steps holds the effective total
CREATE TABLE IF NOT EXISTS step_logs (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL REFERENCES users(id),
    log_date TEXT NOT NULL,
    steps INTEGER NOT NULL CHECK (steps >= 0),
    source TEXT NOT NULL DEFAULT 'manual',
    note TEXT,
    created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
);

-- Challenge definitions
CREATE TABLE IF NOT EXISTS challenges (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    period TEXT NOT NULL CHECK (period IN ('week', 'month')),
    scope TEXT NOT NULL CHECK (scope IN ('individual', 'team', 'department')),
    start_date TEXT NOT NULL,
    end_date TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'draft'
        CHECK (status IN ('draft', 'active', 'completed', 'archived')),
    min_goals_required INTEGER,
    created_by TEXT REFERENCES users(id),
    created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
    CHECK (end_date >= start_date)
);

CREATE TABLE IF NOT EXISTS challenge_metrics (
    id TEXT PRIMARY KEY,
    challenge_id TEXT NOT NULL REFERENCES challenges(id) ON DELETE CASCADE,
    metric_key TEXT NOT NULL,
    target_value REAL,
    rule_type TEXT NOT NULL DEFAULT 'daily' CHECK (rule_type IN ('daily', 'weekly')),
    UNIQUE (challenge_id, metric_key)
);

-- No rows for a challenge means it is company-wide
CREATE TABLE IF NOT EXISTS challenge_departments (
    challenge_id TEXT NOT NULL REFERENCES challenges(id) ON DELETE CASCADE,
    department_id TEXT NOT NULL REFERENCES departments(id),
    PRIMARY KEY (challenge_id, department_id)
);

-- Participation rows are never deleted: leaving sets left_at
CREATE TABLE IF NOT EXISTS challenge_participants (
    id TEXT PRIMARY KEY,
    challenge_id TEXT NOT NULL REFERENCES challenges(id),
    user_id TEXT NOT NULL REFERENCES users(id),
    team_id TEXT REFERENCES teams(id),
    joined_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
    left_at INTEGER,
    selected_daily_target INTEGER,
    current_streak INTEGER NOT NULL DEFAULT 0,
    longest_streak INTEGER NOT NULL DEFAULT 0,
    perfect_days INTEGER NOT NULL DEFAULT 0,
    total_score INTEGER NOT NULL DEFAULT 0,
    last_activity_date TEXT
);

-- Derived per-team totals, rebuilt from daily_steps
CREATE TABLE IF NOT EXISTS challenge_team_rollups (
    challenge_id TEXT NOT NULL REFERENCES challenges(id),
    team_id TEXT NOT NULL REFERENCES teams(id),
    member_count INTEGER NOT NULL DEFAULT 0,
    total_steps INTEGER NOT NULL DEFAULT 0,
    avg_steps_per_member REAL NOT NULL DEFAULT 0,
    active_days INTEGER NOT NULL DEFAULT 0,
    refreshed_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
    PRIMARY KEY (challenge_id, team_id)
);

-- ========== INDEXES ==========

CREATE INDEX IF NOT EXISTS idx_users_department ON users(department_id);
CREATE INDEX IF NOT EXISTS idx_daily_steps_day ON daily_steps(day);
CREATE INDEX IF NOT EXISTS idx_step_logs_user_date ON step_logs(user_id, log_date);
CREATE INDEX IF NOT EXISTS idx_challenges_status ON challenges(status, end_date);
CREATE INDEX IF NOT EXISTS idx_challenge_departments_dept ON challenge_departments(department_id);

-- At most one active participation per (challenge, user)
CREATE UNIQUE INDEX IF NOT EXISTS ux_participants_active
    ON challenge_participants(challenge_id, user_id) WHERE left_at IS NULL;
CREATE INDEX IF NOT EXISTS idx_participants_user ON challenge_participants(user_id, left_at);
CREATE INDEX IF NOT EXISTS idx_participants_challenge ON challenge_participants(challenge_id, left_at)
"#;

/// Column additions applied after CREATE_TABLES; re-running them is tolerated
pub const MIGRATIONS: &[&str] = &["ALTER TABLE challenges ADD COLUMN description TEXT"];
