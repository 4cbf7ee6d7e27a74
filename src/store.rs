//! Durable record storage.
//!
//! Uses rusqlite (SQLite) behind a thread-safe [`RecordStore`] handle.
//! All access is serialized through a `Mutex<Connection>`, which also makes
//! every operation atomic with respect to its row.
//!
//! Timestamps are stored as RFC 3339 strings with microsecond precision, so
//! a [`Record`] returned by a write compares equal to the one read back.

use crate::error::FormError;
use crate::output::{Record, StructuredPayload};
use chrono::{DateTime, Duration, SecondsFormat, SubsecRound, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// A single schema migration.
struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
}

/// All migrations in order. Each is applied at most once.
const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    description: "create_records_table",
    sql: "CREATE TABLE records (
        id         INTEGER PRIMARY KEY AUTOINCREMENT,
        task_id    TEXT NOT NULL UNIQUE,
        raw_json   TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );",
}];

const SELECT_COLUMNS: &str = "SELECT id, task_id, raw_json, created_at, updated_at FROM records";

/// Thread-safe handle to the record table.
///
/// Cloning is cheap (inner `Arc`); clones share one connection.
#[derive(Clone)]
pub struct RecordStore {
    conn: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for RecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordStore").finish_non_exhaustive()
    }
}

impl RecordStore {
    /// Open (or create) the database at `path` and run pending migrations.
    pub fn open(path: &Path) -> Result<Self, FormError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| FormError::io(parent, e))?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        run_migrations(&conn)?;

        info!("Record store opened at {}", path.display());
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open a private in-memory store. Runs all migrations.
    pub fn open_in_memory() -> Result<Self, FormError> {
        let conn = Connection::open_in_memory()?;
        run_migrations(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn with_conn<F, T>(&self, f: F) -> Result<T, FormError>
    where
        F: FnOnce(&Connection) -> Result<T, FormError>,
    {
        let conn = self.conn.lock().map_err(|_| FormError::LockPoisoned)?;
        f(&conn)
    }

    /// Insert a new record for `task_id`.
    ///
    /// # Errors
    /// [`FormError::DuplicateTask`] if a record for `task_id` already exists.
    pub fn create(&self, task_id: &str, payload: &StructuredPayload) -> Result<Record, FormError> {
        let raw_json = encode_payload(payload)?;
        let now = now();
        let stamp = format_ts(&now);

        let id = self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT INTO records (task_id, raw_json, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?3)",
                params![task_id, raw_json, stamp],
            );
            match inserted {
                Ok(_) => Ok(conn.last_insert_rowid()),
                Err(rusqlite::Error::SqliteFailure(e, _))
                    if e.code == ErrorCode::ConstraintViolation =>
                {
                    Err(FormError::DuplicateTask {
                        task_id: task_id.to_string(),
                    })
                }
                Err(e) => Err(e.into()),
            }
        })?;

        debug!("Created record {} for task {}", id, task_id);
        Ok(Record {
            id,
            task_id: task_id.to_string(),
            raw_json: payload.clone(),
            created_at: now,
            updated_at: now,
        })
    }

    /// Fetch a record by id.
    pub fn get(&self, id: i64) -> Result<Record, FormError> {
        self.with_conn(|conn| find_by_id(conn, id))?
            .ok_or(FormError::NotFound { id })
    }

    /// Fetch the record produced by `task_id`.
    pub fn get_by_task(&self, task_id: &str) -> Result<Record, FormError> {
        let row = self.with_conn(|conn| {
            conn.query_row(
                &format!("{SELECT_COLUMNS} WHERE task_id = ?1"),
                params![task_id],
                RecordRow::from_row,
            )
            .optional()
            .map_err(FormError::from)
        })?;
        match row {
            Some(row) => row.into_record(),
            None => Err(FormError::TaskNotFound {
                task_id: task_id.to_string(),
            }),
        }
    }

    /// All records, ordered by id ascending.
    pub fn list(&self) -> Result<Vec<Record>, FormError> {
        let rows = self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("{SELECT_COLUMNS} ORDER BY id ASC"))?;
            let rows = stmt
                .query_map([], RecordRow::from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;
        rows.into_iter().map(RecordRow::into_record).collect()
    }

    /// Replace the payload of record `id` wholesale.
    ///
    /// `updated_at` is strictly greater than its previous value, even when
    /// two updates land within the same clock tick.
    pub fn update(&self, id: i64, payload: &StructuredPayload) -> Result<Record, FormError> {
        let raw_json = encode_payload(payload)?;

        let record = self.with_conn(|conn| {
            let mut record = find_by_id(conn, id)?.ok_or(FormError::NotFound { id })?;

            let floor = record.updated_at + Duration::microseconds(1);
            let updated_at = now().max(floor);

            conn.execute(
                "UPDATE records SET raw_json = ?2, updated_at = ?3 WHERE id = ?1",
                params![id, raw_json, format_ts(&updated_at)],
            )?;

            record.raw_json = payload.clone();
            record.updated_at = updated_at;
            Ok(record)
        })?;

        debug!("Updated record {} ({} fields)", id, payload.len());
        Ok(record)
    }

    /// Permanently remove record `id`.
    pub fn delete(&self, id: i64) -> Result<(), FormError> {
        let removed = self.with_conn(|conn| {
            Ok(conn.execute("DELETE FROM records WHERE id = ?1", params![id])?)
        })?;
        if removed == 0 {
            return Err(FormError::NotFound { id });
        }
        debug!("Deleted record {}", id);
        Ok(())
    }

    /// Number of stored records.
    pub fn count(&self) -> Result<u64, FormError> {
        self.with_conn(|conn| {
            Ok(conn.query_row("SELECT COUNT(*) FROM records", [], |r| r.get(0))?)
        })
    }
}

/// A raw row from the `records` table.
struct RecordRow {
    id: i64,
    task_id: String,
    raw_json: String,
    created_at: String,
    updated_at: String,
}

impl RecordRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            task_id: row.get("task_id")?,
            raw_json: row.get("raw_json")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }

    fn into_record(self) -> Result<Record, FormError> {
        let id = self.id;
        let corrupt = |detail: String| FormError::CorruptRecord { id, detail };

        let raw_json: StructuredPayload =
            serde_json::from_str(&self.raw_json).map_err(|e| corrupt(format!("raw_json: {e}")))?;
        let created_at = parse_ts(&self.created_at).map_err(|e| corrupt(format!("created_at: {e}")))?;
        let updated_at = parse_ts(&self.updated_at).map_err(|e| corrupt(format!("updated_at: {e}")))?;

        Ok(Record {
            id,
            task_id: self.task_id,
            raw_json,
            created_at,
            updated_at,
        })
    }
}

fn find_by_id(conn: &Connection, id: i64) -> Result<Option<Record>, FormError> {
    conn.query_row(
        &format!("{SELECT_COLUMNS} WHERE id = ?1"),
        params![id],
        RecordRow::from_row,
    )
    .optional()?
    .map(RecordRow::into_record)
    .transpose()
}

fn encode_payload(payload: &StructuredPayload) -> Result<String, FormError> {
    serde_json::to_string(payload).map_err(|e| FormError::Internal(format!("payload encoding: {e}")))
}

/// Current time at the precision the store keeps.
fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc))
}

/// Apply pending migrations, tracked in `_migrations`.
fn run_migrations(conn: &Connection) -> Result<(), FormError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    let current_version: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM _migrations",
        [],
        |r| r.get(0),
    )?;

    for migration in MIGRATIONS.iter().filter(|m| m.version > current_version) {
        info!(
            "Running migration v{}: {}",
            migration.version, migration.description
        );
        conn.execute_batch(migration.sql)
            .map_err(|e| FormError::Migration {
                version: migration.version,
                reason: e.to_string(),
            })?;
        conn.execute(
            "INSERT INTO _migrations (version, description) VALUES (?1, ?2)",
            params![migration.version, migration.description],
        )?;
    }

    Ok(())
}
