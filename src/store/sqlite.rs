use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior, params};

use super::Store;
use super::schema::SCHEMA;
use crate::error::{Error, Result};
use crate::types::*;

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path)?;

        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Returns a guard to the underlying database connection.
    /// This allows consuming applications to execute custom SQL.
    pub fn connection(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn()
    }
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            // Handle SQLite's default datetime format: "YYYY-MM-DD HH:MM:SS"
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            tracing::error!("Invalid datetime in database: '{}' - {}", s, e);
            Utc::now()
        })
}

/// Fixed width so that string order in SQL matches time order.
fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn get_datetime(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    Ok(parse_datetime(&row.get::<_, String>(idx)?))
}

fn get_opt_datetime(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    Ok(row
        .get::<_, Option<String>>(idx)?
        .map(|s| parse_datetime(&s)))
}

fn get_enum<T: FromStr<Err = Error>>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    row.get::<_, String>(idx)?
        .parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

const REPOSITORY_COLUMNS: &str =
    "id, external_id, owner, name, full_name, default_branch, created_at, updated_at";

fn repository_from_row(row: &Row<'_>) -> rusqlite::Result<Repository> {
    Ok(Repository {
        id: row.get(0)?,
        external_id: row.get(1)?,
        owner: row.get(2)?,
        name: row.get(3)?,
        full_name: row.get(4)?,
        default_branch: row.get(5)?,
        created_at: get_datetime(row, 6)?,
        updated_at: get_datetime(row, 7)?,
    })
}

const ENVIRONMENT_COLUMNS: &str = "id, repository_id, external_id, name, locked_by, locked_at, \
     lock_expiration_threshold, lock_reservation_threshold, updated_at";

fn environment_from_row(row: &Row<'_>) -> rusqlite::Result<Environment> {
    Ok(Environment {
        id: row.get(0)?,
        repository_id: row.get(1)?,
        external_id: row.get(2)?,
        name: row.get(3)?,
        locked_by: row.get(4)?,
        locked_at: get_opt_datetime(row, 5)?,
        lock_expiration_threshold: row.get(6)?,
        lock_reservation_threshold: row.get(7)?,
        updated_at: get_datetime(row, 8)?,
    })
}

const EXTERNAL_COLUMNS: &str = "id, repository_id, environment_id, state, sha, ref_name, task, \
     pull_request_id, creator_login, created_at, updated_at";

fn external_from_row(row: &Row<'_>) -> rusqlite::Result<ExternalDeployment> {
    Ok(ExternalDeployment {
        id: row.get(0)?,
        repository_id: row.get(1)?,
        environment_id: row.get(2)?,
        state: get_enum(row, 3)?,
        sha: row.get(4)?,
        ref_name: row.get(5)?,
        task: row.get(6)?,
        pull_request_id: row.get(7)?,
        creator_login: row.get(8)?,
        created_at: get_datetime(row, 9)?,
        updated_at: get_datetime(row, 10)?,
    })
}

const NATIVE_COLUMNS: &str = "n.id, n.environment_id, n.status, n.sha, n.branch_name, \
     n.creator_login, n.external_deployment_id, n.created_at, n.updated_at";

fn native_from_row(row: &Row<'_>) -> rusqlite::Result<NativeDeployment> {
    Ok(NativeDeployment {
        id: row.get(0)?,
        environment_id: row.get(1)?,
        status: get_enum(row, 2)?,
        sha: row.get(3)?,
        branch_name: row.get(4)?,
        creator_login: row.get(5)?,
        external_deployment_id: row.get(6)?,
        created_at: get_datetime(row, 7)?,
        updated_at: get_datetime(row, 8)?,
    })
}

fn sync_run_from_row(row: &Row<'_>) -> rusqlite::Result<SyncRun> {
    Ok(SyncRun {
        id: row.get(0)?,
        repository: row.get(1)?,
        start_time: get_datetime(row, 2)?,
        end_time: get_opt_datetime(row, 3)?,
        status: get_enum(row, 4)?,
    })
}

fn pull_request_from_row(row: &Row<'_>) -> rusqlite::Result<PullRequest> {
    Ok(PullRequest {
        id: row.get(0)?,
        repository_id: row.get(1)?,
        number: row.get(2)?,
        title: row.get(3)?,
        state: row.get(4)?,
        head_ref: row.get(5)?,
        head_sha: row.get(6)?,
        updated_at: get_datetime(row, 7)?,
    })
}

fn placeholders(values: &[&str]) -> String {
    values
        .iter()
        .map(|v| format!("'{v}'"))
        .collect::<Vec<_>>()
        .join(", ")
}

impl Store for SqliteStore {
    fn initialize(&self) -> Result<()> {
        self.conn().execute_batch(SCHEMA)?;
        Ok(())
    }

    // Repository operations

    fn upsert_repository(&self, repo: &Repository) -> Result<Repository> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO repositories (external_id, owner, name, full_name, default_branch, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(external_id) DO UPDATE SET
                owner = excluded.owner,
                name = excluded.name,
                full_name = excluded.full_name,
                default_branch = excluded.default_branch,
                updated_at = excluded.updated_at",
            params![
                repo.external_id,
                repo.owner,
                repo.name,
                repo.full_name,
                repo.default_branch,
                format_datetime(&repo.created_at),
                format_datetime(&repo.updated_at),
            ],
        )?;

        conn.query_row(
            &format!("SELECT {REPOSITORY_COLUMNS} FROM repositories WHERE external_id = ?1"),
            params![repo.external_id],
            repository_from_row,
        )
        .map_err(Error::from)
    }

    fn get_repository(&self, id: i64) -> Result<Option<Repository>> {
        self.conn()
            .query_row(
                &format!("SELECT {REPOSITORY_COLUMNS} FROM repositories WHERE id = ?1"),
                params![id],
                repository_from_row,
            )
            .optional()
            .map_err(Error::from)
    }

    fn get_repository_by_full_name(&self, full_name: &str) -> Result<Option<Repository>> {
        self.conn()
            .query_row(
                &format!(
                    "SELECT {REPOSITORY_COLUMNS} FROM repositories WHERE full_name = ?1 COLLATE NOCASE"
                ),
                params![full_name],
                repository_from_row,
            )
            .optional()
            .map_err(Error::from)
    }

    fn get_repository_settings(&self, repository_id: i64) -> Result<Option<RepositorySettings>> {
        self.conn()
            .query_row(
                "SELECT repository_id, lock_expiration_threshold, lock_reservation_threshold
                 FROM repository_settings WHERE repository_id = ?1",
                params![repository_id],
                |row| {
                    Ok(RepositorySettings {
                        repository_id: row.get(0)?,
                        lock_expiration_threshold: row.get(1)?,
                        lock_reservation_threshold: row.get(2)?,
                    })
                },
            )
            .optional()
            .map_err(Error::from)
    }

    fn upsert_repository_settings(&self, settings: &RepositorySettings) -> Result<()> {
        self.conn().execute(
            "INSERT INTO repository_settings (repository_id, lock_expiration_threshold, lock_reservation_threshold)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(repository_id) DO UPDATE SET
                lock_expiration_threshold = excluded.lock_expiration_threshold,
                lock_reservation_threshold = excluded.lock_reservation_threshold",
            params![
                settings.repository_id,
                settings.lock_expiration_threshold,
                settings.lock_reservation_threshold,
            ],
        )?;
        Ok(())
    }

    // Environment operations

    fn upsert_environment(&self, env: &Environment) -> Result<Environment> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO environments (repository_id, external_id, name, lock_expiration_threshold,
                                       lock_reservation_threshold, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(repository_id, name) DO UPDATE SET
                external_id = COALESCE(excluded.external_id, environments.external_id),
                updated_at = excluded.updated_at",
            params![
                env.repository_id,
                env.external_id,
                env.name,
                env.lock_expiration_threshold,
                env.lock_reservation_threshold,
                format_datetime(&env.updated_at),
            ],
        )?;

        conn.query_row(
            &format!(
                "SELECT {ENVIRONMENT_COLUMNS} FROM environments WHERE repository_id = ?1 AND name = ?2"
            ),
            params![env.repository_id, env.name],
            environment_from_row,
        )
        .map_err(Error::from)
    }

    fn get_environment(&self, id: i64) -> Result<Option<Environment>> {
        self.conn()
            .query_row(
                &format!("SELECT {ENVIRONMENT_COLUMNS} FROM environments WHERE id = ?1"),
                params![id],
                environment_from_row,
            )
            .optional()
            .map_err(Error::from)
    }

    fn get_environment_by_name(
        &self,
        repository_id: i64,
        name: &str,
    ) -> Result<Option<Environment>> {
        self.conn()
            .query_row(
                &format!(
                    "SELECT {ENVIRONMENT_COLUMNS} FROM environments WHERE repository_id = ?1 AND name = ?2"
                ),
                params![repository_id, name],
                environment_from_row,
            )
            .optional()
            .map_err(Error::from)
    }

    fn list_environments(&self, repository_id: i64) -> Result<Vec<Environment>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {ENVIRONMENT_COLUMNS} FROM environments WHERE repository_id = ?1 ORDER BY name"
        ))?;
        let rows = stmt.query_map(params![repository_id], environment_from_row)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn list_locked_environments(&self) -> Result<Vec<Environment>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {ENVIRONMENT_COLUMNS} FROM environments WHERE locked_by IS NOT NULL ORDER BY id"
        ))?;
        let rows = stmt.query_map([], environment_from_row)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn lock_environment(&self, id: i64, locked_by: &str, at: DateTime<Utc>) -> Result<bool> {
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let at = format_datetime(&at);

        let rows = tx.execute(
            "UPDATE environments SET locked_by = ?1, locked_at = ?2
             WHERE id = ?3 AND locked_by IS NULL",
            params![locked_by, at, id],
        )?;
        if rows == 0 {
            return Ok(false);
        }

        tx.execute(
            "INSERT INTO environment_lock_history (environment_id, locked_by, locked_at)
             VALUES (?1, ?2, ?3)",
            params![id, locked_by, at],
        )?;
        tx.commit()?;
        Ok(true)
    }

    fn release_environment_lock(
        &self,
        id: i64,
        locked_by: &str,
        locked_at: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let rows = tx.execute(
            "UPDATE environments SET locked_by = NULL, locked_at = NULL
             WHERE id = ?1 AND locked_by = ?2 AND locked_at = ?3",
            params![id, locked_by, format_datetime(&locked_at)],
        )?;
        if rows == 0 {
            return Ok(false);
        }

        tx.execute(
            "UPDATE environment_lock_history SET unlocked_at = ?1
             WHERE environment_id = ?2 AND unlocked_at IS NULL",
            params![format_datetime(&at), id],
        )?;
        tx.commit()?;
        Ok(true)
    }

    fn list_lock_history(&self, environment_id: i64) -> Result<Vec<EnvironmentLockHistory>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, environment_id, locked_by, locked_at, unlocked_at
             FROM environment_lock_history WHERE environment_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![environment_id], |row| {
            Ok(EnvironmentLockHistory {
                id: row.get(0)?,
                environment_id: row.get(1)?,
                locked_by: row.get(2)?,
                locked_at: get_datetime(row, 3)?,
                unlocked_at: get_opt_datetime(row, 4)?,
            })
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    // External deployment operations

    fn get_external_deployment(&self, id: i64) -> Result<Option<ExternalDeployment>> {
        self.conn()
            .query_row(
                &format!("SELECT {EXTERNAL_COLUMNS} FROM external_deployments WHERE id = ?1"),
                params![id],
                external_from_row,
            )
            .optional()
            .map_err(Error::from)
    }

    fn save_external_deployment(&self, d: &ExternalDeployment) -> Result<()> {
        self.conn().execute(
            "INSERT INTO external_deployments (id, repository_id, environment_id, state, sha, ref_name,
                                               task, pull_request_id, creator_login, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT(id) DO UPDATE SET
                repository_id = excluded.repository_id,
                environment_id = excluded.environment_id,
                state = excluded.state,
                sha = excluded.sha,
                ref_name = excluded.ref_name,
                task = excluded.task,
                pull_request_id = excluded.pull_request_id,
                creator_login = excluded.creator_login,
                created_at = excluded.created_at,
                updated_at = excluded.updated_at",
            params![
                d.id,
                d.repository_id,
                d.environment_id,
                d.state.as_str(),
                d.sha,
                d.ref_name,
                d.task,
                d.pull_request_id,
                d.creator_login,
                format_datetime(&d.created_at),
                format_datetime(&d.updated_at),
            ],
        )?;
        Ok(())
    }

    fn list_external_deployments_by_sha(
        &self,
        repository_id: i64,
        sha: &str,
    ) -> Result<Vec<ExternalDeployment>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {EXTERNAL_COLUMNS} FROM external_deployments
             WHERE repository_id = ?1 AND sha = ?2 ORDER BY environment_id, updated_at"
        ))?;
        let rows = stmt.query_map(params![repository_id, sha], external_from_row)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn find_stuck_external_deployments(
        &self,
        updated_before: DateTime<Utc>,
    ) -> Result<Vec<ExternalDeployment>> {
        let conn = self.conn();
        let states: Vec<&str> = DeploymentState::IN_FLIGHT.iter().map(|s| s.as_str()).collect();
        let mut stmt = conn.prepare(&format!(
            "SELECT {EXTERNAL_COLUMNS} FROM external_deployments
             WHERE state IN ({}) AND updated_at < ?1 ORDER BY id",
            placeholders(&states)
        ))?;
        let rows = stmt.query_map(params![format_datetime(&updated_before)], external_from_row)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn fail_stuck_external_deployment(
        &self,
        id: i64,
        updated_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let states: Vec<&str> = DeploymentState::IN_FLIGHT.iter().map(|s| s.as_str()).collect();
        let rows = self.conn().execute(
            &format!(
                "UPDATE external_deployments SET state = ?1, updated_at = ?2
                 WHERE id = ?3 AND state IN ({}) AND updated_at < ?4",
                placeholders(&states)
            ),
            params![
                DeploymentState::Failure.as_str(),
                format_datetime(&now),
                id,
                format_datetime(&updated_before),
            ],
        )?;
        Ok(rows > 0)
    }

    // Native deployment operations

    fn create_native_deployment(&self, d: &NativeDeployment) -> Result<i64> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO native_deployments (environment_id, status, sha, branch_name, creator_login,
                                             external_deployment_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                d.environment_id,
                d.status.as_str(),
                d.sha,
                d.branch_name,
                d.creator_login,
                d.external_deployment_id,
                format_datetime(&d.created_at),
                format_datetime(&d.updated_at),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn get_native_deployment(&self, id: i64) -> Result<Option<NativeDeployment>> {
        self.conn()
            .query_row(
                &format!("SELECT {NATIVE_COLUMNS} FROM native_deployments n WHERE n.id = ?1"),
                params![id],
                native_from_row,
            )
            .optional()
            .map_err(Error::from)
    }

    fn save_native_deployment(&self, d: &NativeDeployment) -> Result<()> {
        let rows = self.conn().execute(
            "UPDATE native_deployments SET status = ?1, external_deployment_id = ?2, updated_at = ?3
             WHERE id = ?4",
            params![
                d.status.as_str(),
                d.external_deployment_id,
                format_datetime(&d.updated_at),
                d.id,
            ],
        )?;

        if rows == 0 {
            return Err(Error::NotFound);
        }
        Ok(())
    }

    fn find_native_by_external_id(&self, external_id: i64) -> Result<Option<NativeDeployment>> {
        self.conn()
            .query_row(
                &format!(
                    "SELECT {NATIVE_COLUMNS} FROM native_deployments n
                     WHERE n.external_deployment_id = ?1 ORDER BY n.id LIMIT 1"
                ),
                params![external_id],
                native_from_row,
            )
            .optional()
            .map_err(Error::from)
    }

    fn find_latest_unlinked_native_deployment(
        &self,
        environment_id: i64,
        branch_name: &str,
    ) -> Result<Option<NativeDeployment>> {
        self.conn()
            .query_row(
                &format!(
                    "SELECT {NATIVE_COLUMNS} FROM native_deployments n
                     WHERE n.environment_id = ?1 AND n.branch_name = ?2
                       AND n.external_deployment_id IS NULL
                     ORDER BY n.created_at DESC, n.id DESC LIMIT 1"
                ),
                params![environment_id, branch_name],
                native_from_row,
            )
            .optional()
            .map_err(Error::from)
    }

    fn list_native_deployments_by_sha(
        &self,
        repository_id: i64,
        sha: &str,
    ) -> Result<Vec<NativeDeployment>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {NATIVE_COLUMNS} FROM native_deployments n
             JOIN environments e ON e.id = n.environment_id
             WHERE e.repository_id = ?1 AND n.sha = ?2
             ORDER BY n.environment_id, n.updated_at"
        ))?;
        let rows = stmt.query_map(params![repository_id, sha], native_from_row)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn find_stuck_native_deployments(
        &self,
        updated_before: DateTime<Utc>,
    ) -> Result<Vec<NativeDeployment>> {
        let conn = self.conn();
        let statuses: Vec<&str> = NativeStatus::IN_FLIGHT.iter().map(|s| s.as_str()).collect();
        let mut stmt = conn.prepare(&format!(
            "SELECT {NATIVE_COLUMNS} FROM native_deployments n
             WHERE n.status IN ({}) AND n.external_deployment_id IS NULL AND n.updated_at < ?1
             ORDER BY n.id",
            placeholders(&statuses)
        ))?;
        let rows = stmt.query_map(params![format_datetime(&updated_before)], native_from_row)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn fail_stuck_native_deployment(
        &self,
        id: i64,
        updated_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let statuses: Vec<&str> = NativeStatus::IN_FLIGHT.iter().map(|s| s.as_str()).collect();
        let rows = self.conn().execute(
            &format!(
                "UPDATE native_deployments SET status = ?1, updated_at = ?2
                 WHERE id = ?3 AND status IN ({}) AND external_deployment_id IS NULL
                   AND updated_at < ?4",
                placeholders(&statuses)
            ),
            params![
                NativeStatus::Failed.as_str(),
                format_datetime(&now),
                id,
                format_datetime(&updated_before),
            ],
        )?;
        Ok(rows > 0)
    }

    // Sync run operations

    fn begin_sync_run(
        &self,
        repository: &str,
        now: DateTime<Utc>,
        cooldown: Duration,
    ) -> Result<Option<SyncRun>> {
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let latest_start: Option<String> = tx
            .query_row(
                "SELECT start_time FROM sync_runs WHERE repository = ?1
                 ORDER BY start_time DESC, id DESC LIMIT 1",
                params![repository],
                |row| row.get(0),
            )
            .optional()?;

        if let Some(start) = latest_start {
            if now - parse_datetime(&start) < cooldown {
                return Ok(None);
            }
        }

        tx.execute(
            "INSERT INTO sync_runs (repository, start_time, status) VALUES (?1, ?2, ?3)",
            params![
                repository,
                format_datetime(&now),
                SyncRunStatus::InProgress.as_str()
            ],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;

        Ok(Some(SyncRun {
            id,
            repository: repository.to_string(),
            start_time: now,
            end_time: None,
            status: SyncRunStatus::InProgress,
        }))
    }

    fn finish_sync_run(
        &self,
        id: i64,
        status: SyncRunStatus,
        end_time: DateTime<Utc>,
    ) -> Result<()> {
        let rows = self.conn().execute(
            "UPDATE sync_runs SET status = ?1, end_time = ?2 WHERE id = ?3",
            params![status.as_str(), format_datetime(&end_time), id],
        )?;

        if rows == 0 {
            return Err(Error::NotFound);
        }
        Ok(())
    }

    fn latest_sync_run(&self, repository: &str) -> Result<Option<SyncRun>> {
        self.conn()
            .query_row(
                "SELECT id, repository, start_time, end_time, status FROM sync_runs
                 WHERE repository = ?1 ORDER BY start_time DESC, id DESC LIMIT 1",
                params![repository],
                sync_run_from_row,
            )
            .optional()
            .map_err(Error::from)
    }

    fn last_sync_start(&self, repository: &str, exclude_id: i64) -> Result<Option<DateTime<Utc>>> {
        let start: Option<String> = self
            .conn()
            .query_row(
                "SELECT start_time FROM sync_runs
                 WHERE repository = ?1 AND id != ?2 AND status IN (?3, ?4)
                 ORDER BY start_time DESC, id DESC LIMIT 1",
                params![
                    repository,
                    exclude_id,
                    SyncRunStatus::Success.as_str(),
                    SyncRunStatus::InProgress.as_str(),
                ],
                |row| row.get(0),
            )
            .optional()?;
        Ok(start.map(|s| parse_datetime(&s)))
    }

    // Pull-side mirror operations

    fn upsert_label(&self, label: &Label) -> Result<()> {
        self.conn().execute(
            "INSERT INTO labels (id, repository_id, name, color, description)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                color = excluded.color,
                description = excluded.description",
            params![
                label.id,
                label.repository_id,
                label.name,
                label.color,
                label.description
            ],
        )?;
        Ok(())
    }

    fn upsert_pull_request(&self, pr: &PullRequest) -> Result<()> {
        self.conn().execute(
            "INSERT INTO pull_requests (id, repository_id, number, title, state, head_ref, head_sha, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                state = excluded.state,
                head_ref = excluded.head_ref,
                head_sha = excluded.head_sha,
                updated_at = excluded.updated_at",
            params![
                pr.id,
                pr.repository_id,
                pr.number,
                pr.title,
                pr.state,
                pr.head_ref,
                pr.head_sha,
                format_datetime(&pr.updated_at),
            ],
        )?;
        Ok(())
    }

    fn close_missing_pull_requests(&self, repository_id: i64, open_ids: &[i64]) -> Result<usize> {
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let stale: Vec<i64> = {
            let mut stmt = tx.prepare(
                "SELECT id FROM pull_requests WHERE repository_id = ?1 AND state = 'open'",
            )?;
            let ids = stmt.query_map(params![repository_id], |row| row.get::<_, i64>(0))?;
            ids.collect::<std::result::Result<Vec<_>, _>>()?
                .into_iter()
                .filter(|id| !open_ids.contains(id))
                .collect()
        };

        for id in &stale {
            tx.execute(
                "UPDATE pull_requests SET state = 'closed' WHERE id = ?1",
                params![id],
            )?;
        }
        tx.commit()?;
        Ok(stale.len())
    }

    fn find_open_pull_request(
        &self,
        repository_id: i64,
        branch: &str,
        sha: &str,
    ) -> Result<Option<PullRequest>> {
        self.conn()
            .query_row(
                "SELECT id, repository_id, number, title, state, head_ref, head_sha, updated_at
                 FROM pull_requests
                 WHERE repository_id = ?1 AND state = 'open' AND (head_ref = ?2 OR head_sha = ?3)
                 ORDER BY updated_at DESC LIMIT 1",
                params![repository_id, branch, sha],
                pull_request_from_row,
            )
            .optional()
            .map_err(Error::from)
    }

    fn upsert_workflow(&self, workflow: &Workflow) -> Result<()> {
        self.conn().execute(
            "INSERT INTO workflows (id, repository_id, name, path, state)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                path = excluded.path,
                state = excluded.state",
            params![
                workflow.id,
                workflow.repository_id,
                workflow.name,
                workflow.path,
                workflow.state
            ],
        )?;
        Ok(())
    }

    fn upsert_branch(&self, branch: &Branch) -> Result<()> {
        self.conn().execute(
            "INSERT INTO branches (repository_id, name, head_sha, protected)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(repository_id, name) DO UPDATE SET
                head_sha = excluded.head_sha,
                protected = excluded.protected",
            params![
                branch.repository_id,
                branch.name,
                branch.head_sha,
                branch.protected
            ],
        )?;
        Ok(())
    }

    fn list_branches(&self, repository_id: i64) -> Result<Vec<Branch>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT repository_id, name, head_sha, protected FROM branches
             WHERE repository_id = ?1 ORDER BY name",
        )?;
        let rows = stmt.query_map(params![repository_id], |row| {
            Ok(Branch {
                repository_id: row.get(0)?,
                name: row.get(1)?,
                head_sha: row.get(2)?,
                protected: row.get(3)?,
            })
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn upsert_commit(&self, commit: &Commit) -> Result<()> {
        self.conn().execute(
            "INSERT INTO commits (repository_id, sha, message, author_login, authored_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(repository_id, sha) DO UPDATE SET
                message = excluded.message,
                author_login = excluded.author_login,
                authored_at = excluded.authored_at",
            params![
                commit.repository_id,
                commit.sha,
                commit.message,
                commit.author_login,
                commit.authored_at.as_ref().map(format_datetime),
            ],
        )?;
        Ok(())
    }

    fn upsert_release(&self, release: &Release) -> Result<()> {
        self.conn().execute(
            "INSERT INTO releases (id, repository_id, tag_name, name, draft, prerelease, published_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(id) DO UPDATE SET
                tag_name = excluded.tag_name,
                name = excluded.name,
                draft = excluded.draft,
                prerelease = excluded.prerelease,
                published_at = excluded.published_at",
            params![
                release.id,
                release.repository_id,
                release.tag_name,
                release.name,
                release.draft,
                release.prerelease,
                release.published_at.as_ref().map(format_datetime),
            ],
        )?;
        Ok(())
    }

    fn upsert_workflow_run(&self, run: &WorkflowRun) -> Result<()> {
        self.conn().execute(
            "INSERT INTO workflow_runs (id, repository_id, workflow_id, name, head_branch, head_sha,
                                        status, conclusion, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                conclusion = excluded.conclusion,
                updated_at = excluded.updated_at
             WHERE excluded.updated_at >= workflow_runs.updated_at",
            params![
                run.id,
                run.repository_id,
                run.workflow_id,
                run.name,
                run.head_branch,
                run.head_sha,
                run.status,
                run.conclusion,
                format_datetime(&run.created_at),
                format_datetime(&run.updated_at),
            ],
        )?;
        Ok(())
    }

    fn get_workflow_run(&self, id: i64) -> Result<Option<WorkflowRun>> {
        self.conn()
            .query_row(
                "SELECT id, repository_id, workflow_id, name, head_branch, head_sha, status,
                        conclusion, created_at, updated_at
                 FROM workflow_runs WHERE id = ?1",
                params![id],
                |row| {
                    Ok(WorkflowRun {
                        id: row.get(0)?,
                        repository_id: row.get(1)?,
                        workflow_id: row.get(2)?,
                        name: row.get(3)?,
                        head_branch: row.get(4)?,
                        head_sha: row.get(5)?,
                        status: row.get(6)?,
                        conclusion: row.get(7)?,
                        created_at: get_datetime(row, 8)?,
                        updated_at: get_datetime(row, 9)?,
                    })
                },
            )
            .optional()
            .map_err(Error::from)
    }
}
