//! VendHub SQLite database.
//!
//! One `VendDb` holds every table: users, machines, tasks and their checklists,
//! checklist templates, bunkers with their movements, and the action log.
//! Mutations that need an audit entry take a [`NewAction`] and write it in the
//! same transaction as the change.

pub mod action_log;
pub mod inventory;
pub mod machines;
pub mod tasks;
pub mod templates;
pub mod users;

pub use action_log::NewAction;
pub use inventory::Weighing;
pub use tasks::{NewStep, NewTask, StepCompletion, TaskFilter, TaskUpdate};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use vendhub_core::error::{Result, VendHubError};

/// All persistent back-office state.
pub struct VendDb {
    conn: Mutex<Connection>,
}

impl VendDb {
    /// Open or create the database. `:memory:` gives a throwaway instance.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && path != Path::new(":memory:")
        {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)
            .map_err(|e| VendHubError::Database(format!("DB open error: {e}")))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;
             PRAGMA foreign_keys = ON;",
        )
        .map_err(|e| VendHubError::Database(format!("DB pragma error: {e}")))?;

        let db = Self { conn: Mutex::new(conn) };
        db.migrate()?;
        tracing::debug!("database schema ready at {}", path.display());
        Ok(db)
    }

    /// Open a fresh in-memory database.
    pub fn in_memory() -> Result<Self> {
        Self::open(Path::new(":memory:"))
    }

    /// Run schema migrations.
    fn migrate(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                email TEXT UNIQUE NOT NULL,
                password_hash TEXT NOT NULL,
                role TEXT NOT NULL DEFAULT 'OPERATOR',
                telegram_id INTEGER UNIQUE,
                active INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS machines (
                id TEXT PRIMARY KEY,
                code TEXT UNIQUE NOT NULL,
                name TEXT NOT NULL,
                location TEXT NOT NULL DEFAULT '',
                status TEXT NOT NULL DEFAULT 'OFFLINE',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS checklist_templates (
                id TEXT PRIMARY KEY,
                name TEXT UNIQUE NOT NULL,
                task_type TEXT NOT NULL,
                steps_json TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                task_type TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'CREATED',
                priority TEXT NOT NULL DEFAULT 'MEDIUM',
                priority_rank INTEGER NOT NULL DEFAULT 1,
                machine_id TEXT REFERENCES machines(id),
                assigned_to TEXT REFERENCES users(id),
                created_by TEXT NOT NULL,
                template_id TEXT,
                due_at TEXT,
                started_at TEXT,
                completed_at TEXT,
                cancel_reason TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);
            CREATE INDEX IF NOT EXISTS idx_tasks_assignee ON tasks(assigned_to);

            CREATE TABLE IF NOT EXISTS bunkers (
                id TEXT PRIMARY KEY,
                code TEXT UNIQUE NOT NULL,
                ingredient TEXT NOT NULL,
                capacity_grams REAL NOT NULL,
                current_grams REAL NOT NULL DEFAULT 0,
                machine_id TEXT REFERENCES machines(id),
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS checklist_steps (
                id TEXT PRIMARY KEY,
                task_id TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
                position INTEGER NOT NULL,
                title TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                required INTEGER NOT NULL DEFAULT 1,
                requires_photo INTEGER NOT NULL DEFAULT 0,
                requires_weight INTEGER NOT NULL DEFAULT 0,
                bunker_id TEXT REFERENCES bunkers(id),
                completed INTEGER NOT NULL DEFAULT 0,
                completed_by TEXT,
                completed_at TEXT,
                photo_url TEXT,
                weight_grams REAL,
                notes TEXT,
                UNIQUE(task_id, position)
            );

            CREATE TABLE IF NOT EXISTS inventory_movements (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                bunker_id TEXT NOT NULL REFERENCES bunkers(id),
                kind TEXT NOT NULL,
                delta_grams REAL NOT NULL,
                weight_after REAL NOT NULL,
                machine_id TEXT,
                actor_id TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS action_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                actor_id TEXT NOT NULL,
                action TEXT NOT NULL,
                entity_type TEXT NOT NULL,
                entity_id TEXT NOT NULL,
                details TEXT,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_action_log_entity ON action_log(entity_type, entity_id);
            ",
        )
        .map_err(|e| VendHubError::Database(format!("Migration error: {e}")))?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| VendHubError::Database(format!("Lock: {e}")))
    }
}

/// Map a rusqlite error into a database error with context.
pub(crate) fn db_err(context: &'static str) -> impl Fn(rusqlite::Error) -> VendHubError {
    move |e| match e {
        rusqlite::Error::SqliteFailure(f, msg)
            if f.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            VendHubError::Conflict(format!(
                "{context}: {}",
                msg.unwrap_or_else(|| "constraint violation".into())
            ))
        }
        other => VendHubError::Database(format!("{context}: {other}")),
    }
}

/// Current time in the fixed-width form stored in every timestamp column.
pub fn now_ts() -> String {
    ts(Utc::now())
}

pub fn ts(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_ts(s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))
}

pub(crate) fn parse_opt_ts(s: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    s.as_deref().map(parse_ts).transpose()
}

/// Parse an enum stored as text, surfacing bad values as conversion errors.
pub(crate) fn parse_enum<T>(s: &str) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = VendHubError>,
{
    s.parse::<T>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })
}
