pub const SCHEMA: &str = r#"
-- Repositories mirrored from the platform; local id is the FK root
CREATE TABLE IF NOT EXISTS repositories (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    external_id INTEGER NOT NULL UNIQUE,
    owner TEXT NOT NULL,
    name TEXT NOT NULL,
    full_name TEXT NOT NULL UNIQUE,
    default_branch TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Admin-owned knobs; thresholds in minutes, -1 = disabled
CREATE TABLE IF NOT EXISTS repository_settings (
    repository_id INTEGER PRIMARY KEY REFERENCES repositories(id) ON DELETE CASCADE,
    lock_expiration_threshold INTEGER,
    lock_reservation_threshold INTEGER
);

-- Environments carry the deployment lock; locked_at is set iff locked_by is set
CREATE TABLE IF NOT EXISTS environments (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    repository_id INTEGER NOT NULL REFERENCES repositories(id) ON DELETE CASCADE,
    external_id INTEGER,
    name TEXT NOT NULL,
    locked_by TEXT,
    locked_at TEXT,
    lock_expiration_threshold INTEGER,
    lock_reservation_threshold INTEGER,
    updated_at TEXT NOT NULL,

    UNIQUE(repository_id, name),
    CHECK ((locked_by IS NULL) = (locked_at IS NULL))
);

-- Append-only; unlocked_at NULL marks the open lock
CREATE TABLE IF NOT EXISTS environment_lock_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    environment_id INTEGER NOT NULL REFERENCES environments(id) ON DELETE CASCADE,
    locked_by TEXT NOT NULL,
    locked_at TEXT NOT NULL,
    unlocked_at TEXT
);

-- Open pull requests, used to link deployments
CREATE TABLE IF NOT EXISTS pull_requests (
    id INTEGER PRIMARY KEY,
    repository_id INTEGER NOT NULL REFERENCES repositories(id) ON DELETE CASCADE,
    number INTEGER NOT NULL,
    title TEXT NOT NULL,
    state TEXT NOT NULL,
    head_ref TEXT NOT NULL,
    head_sha TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Deployments as the platform reports them; id is the platform id
CREATE TABLE IF NOT EXISTS external_deployments (
    id INTEGER PRIMARY KEY,
    repository_id INTEGER NOT NULL REFERENCES repositories(id) ON DELETE CASCADE,
    environment_id INTEGER NOT NULL REFERENCES environments(id) ON DELETE CASCADE,
    state TEXT NOT NULL,
    sha TEXT NOT NULL,
    ref_name TEXT NOT NULL,
    task TEXT NOT NULL,
    pull_request_id INTEGER REFERENCES pull_requests(id) ON DELETE SET NULL,
    creator_login TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Deployments started by this system before the platform confirms them
CREATE TABLE IF NOT EXISTS native_deployments (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    environment_id INTEGER NOT NULL REFERENCES environments(id) ON DELETE CASCADE,
    status TEXT NOT NULL,
    sha TEXT NOT NULL,
    branch_name TEXT NOT NULL,
    creator_login TEXT,
    external_deployment_id INTEGER REFERENCES external_deployments(id) ON DELETE SET NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- One row per pull-path run
CREATE TABLE IF NOT EXISTS sync_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    repository TEXT NOT NULL,
    start_time TEXT NOT NULL,
    end_time TEXT,
    status TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS labels (
    id INTEGER PRIMARY KEY,
    repository_id INTEGER NOT NULL REFERENCES repositories(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    color TEXT NOT NULL,
    description TEXT
);

CREATE TABLE IF NOT EXISTS workflows (
    id INTEGER PRIMARY KEY,
    repository_id INTEGER NOT NULL REFERENCES repositories(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    path TEXT NOT NULL,
    state TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS branches (
    repository_id INTEGER NOT NULL REFERENCES repositories(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    head_sha TEXT NOT NULL,
    protected INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (repository_id, name)
);

CREATE TABLE IF NOT EXISTS commits (
    repository_id INTEGER NOT NULL REFERENCES repositories(id) ON DELETE CASCADE,
    sha TEXT NOT NULL,
    message TEXT NOT NULL,
    author_login TEXT,
    authored_at TEXT,
    PRIMARY KEY (repository_id, sha)
);

CREATE TABLE IF NOT EXISTS releases (
    id INTEGER PRIMARY KEY,
    repository_id INTEGER NOT NULL REFERENCES repositories(id) ON DELETE CASCADE,
    tag_name TEXT NOT NULL,
    name TEXT,
    draft INTEGER NOT NULL DEFAULT 0,
    prerelease INTEGER NOT NULL DEFAULT 0,
    published_at TEXT
);

CREATE TABLE IF NOT EXISTS workflow_runs (
    id INTEGER PRIMARY KEY,
    repository_id INTEGER NOT NULL REFERENCES repositories(id) ON DELETE CASCADE,
    workflow_id INTEGER NOT NULL,
    name TEXT NOT NULL,
    head_branch TEXT NOT NULL,
    head_sha TEXT NOT NULL,
    status TEXT NOT NULL,
    conclusion TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Create indexes
CREATE INDEX IF NOT EXISTS idx_environments_repository ON environments(repository_id);
CREATE INDEX IF NOT EXISTS idx_environments_locked ON environments(locked_by);
CREATE INDEX IF NOT EXISTS idx_lock_history_environment ON environment_lock_history(environment_id);
CREATE INDEX IF NOT EXISTS idx_pull_requests_repository ON pull_requests(repository_id);
CREATE INDEX IF NOT EXISTS idx_external_deployments_sha ON external_deployments(repository_id, sha);
CREATE INDEX IF NOT EXISTS idx_external_deployments_state ON external_deployments(state, updated_at);
CREATE INDEX IF NOT EXISTS idx_native_deployments_env_branch ON native_deployments(environment_id, branch_name);
CREATE INDEX IF NOT EXISTS idx_native_deployments_status ON native_deployments(status, updated_at);
CREATE INDEX IF NOT EXISTS idx_sync_runs_repository ON sync_runs(repository, start_time);
CREATE INDEX IF NOT EXISTS idx_workflow_runs_repository ON workflow_runs(repository_id);
"#;
