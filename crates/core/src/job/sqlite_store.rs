//! SQLite-backed job store implementation.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};

use super::{ConversionJob, JobFilter, JobGuard, JobMutation, JobState, JobStore, JobStoreError, NewJob};

const SELECT_COLUMNS: &str = "SELECT id, original_filename, stored_filename, source_format, target_format, file_size_bytes, state, originator, created_at, updated_at FROM jobs";

/// SQLite-backed job store.
pub struct SqliteJobStore {
    conn: Mutex<Connection>,
}

impl SqliteJobStore {
    /// Create a new SQLite job store, creating the database file and tables if needed.
    pub fn new(path: &Path) -> Result<Self, JobStoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                JobStoreError::Database(format!("cannot create {}: {}", parent.display(), e))
            })?;
        }
        let conn = Connection::open(path)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory SQLite job store (useful for testing).
    pub fn in_memory() -> Result<Self, JobStoreError> {
        let conn = Connection::open_in_memory()?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), JobStoreError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                original_filename TEXT NOT NULL,
                stored_filename TEXT NOT NULL UNIQUE,
                source_format TEXT NOT NULL,
                target_format TEXT,
                file_size_bytes INTEGER NOT NULL,
                state TEXT NOT NULL,
                originator TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_jobs_created_at ON jobs(created_at DESC);
            "#,
        )?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, JobStoreError> {
        self.conn
            .lock()
            .map_err(|_| JobStoreError::Database("job store lock poisoned".to_string()))
    }

    fn build_where_clause(filter: &JobFilter) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(status) = filter.status {
            conditions.push("json_extract(state, '$.type') = ?");
            params.push(Box::new(status.as_str()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        (where_clause, params)
    }

    fn parse_timestamp(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now())
    }

    fn row_to_job(row: &rusqlite::Row) -> rusqlite::Result<ConversionJob> {
        let state_json: String = row.get(6)?;
        let state: JobState = serde_json::from_str(&state_json)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(6, Type::Text, Box::new(e)))?;
        let file_size: i64 = row.get(5)?;
        let created_at: String = row.get(8)?;
        let updated_at: String = row.get(9)?;

        Ok(ConversionJob {
            id: row.get(0)?,
            original_filename: row.get(1)?,
            stored_filename: row.get(2)?,
            source_format: row.get(3)?,
            target_format: row.get(4)?,
            file_size_bytes: file_size.max(0) as u64,
            state,
            originator: row.get(7)?,
            created_at: Self::parse_timestamp(&created_at),
            updated_at: Self::parse_timestamp(&updated_at),
        })
    }

    fn fetch(conn: &Connection, id: &str) -> Result<Option<ConversionJob>, JobStoreError> {
        let sql = format!("{} WHERE id = ?", SELECT_COLUMNS);
        Ok(conn
            .query_row(&sql, params![id], Self::row_to_job)
            .optional()?)
    }

    fn state_json(state: &JobState) -> Result<String, JobStoreError> {
        serde_json::to_string(state).map_err(|e| JobStoreError::Database(e.to_string()))
    }

    /// Rejects changes to fields that are fixed at creation.
    fn check_immutable(before: &ConversionJob, after: &ConversionJob) -> Result<(), JobStoreError> {
        let changed = if before.id != after.id {
            Some("id")
        } else if before.stored_filename != after.stored_filename {
            Some("stored_filename")
        } else if before.original_filename != after.original_filename {
            Some("original_filename")
        } else if before.source_format != after.source_format {
            Some("source_format")
        } else if before.file_size_bytes != after.file_size_bytes {
            Some("file_size_bytes")
        } else if before.created_at != after.created_at {
            Some("created_at")
        } else if before.originator.is_some() && before.originator != after.originator {
            Some("originator")
        } else {
            None
        };

        match changed {
            Some(field) => Err(JobStoreError::InvariantViolation {
                job_id: before.id.clone(),
                reason: format!("{} is immutable", field),
            }),
            None => Ok(()),
        }
    }
}

impl JobStore for SqliteJobStore {
    fn create(&self, job: NewJob) -> Result<ConversionJob, JobStoreError> {
        let conn = self.lock()?;

        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        let state = JobState::Uploaded;

        conn.execute(
            "INSERT INTO jobs (id, original_filename, stored_filename, source_format, target_format, file_size_bytes, state, originator, created_at, updated_at) VALUES (?, ?, ?, ?, NULL, ?, ?, ?, ?, ?)",
            params![
                id,
                job.original_filename,
                job.stored_filename,
                job.source_format,
                job.file_size_bytes as i64,
                Self::state_json(&state)?,
                job.originator,
                now.to_rfc3339(),
                now.to_rfc3339(),
            ],
        )?;

        Ok(ConversionJob {
            id,
            original_filename: job.original_filename,
            stored_filename: job.stored_filename,
            source_format: job.source_format,
            target_format: None,
            file_size_bytes: job.file_size_bytes,
            state,
            originator: job.originator,
            created_at: now,
            updated_at: now,
        })
    }

    fn get(&self, id: &str) -> Result<Option<ConversionJob>, JobStoreError> {
        let conn = self.lock()?;
        Self::fetch(&conn, id)
    }

    fn list(&self, filter: &JobFilter) -> Result<Vec<ConversionJob>, JobStoreError> {
        let conn = self.lock()?;

        let (where_clause, params) = Self::build_where_clause(filter);

        let sql = format!(
            "{} {} ORDER BY created_at DESC, rowid DESC LIMIT ? OFFSET ?",
            SELECT_COLUMNS, where_clause
        );

        let mut stmt = conn.prepare(&sql)?;

        let mut all_params: Vec<Box<dyn rusqlite::ToSql>> = params;
        all_params.push(Box::new(filter.limit));
        all_params.push(Box::new(filter.offset));

        let param_refs: Vec<&dyn rusqlite::ToSql> = all_params.iter().map(|p| p.as_ref()).collect();

        let rows = stmt.query_map(param_refs.as_slice(), Self::row_to_job)?;

        let mut jobs = Vec::new();
        for row_result in rows {
            jobs.push(row_result?);
        }

        Ok(jobs)
    }

    fn count(&self, filter: &JobFilter) -> Result<i64, JobStoreError> {
        let conn = self.lock()?;

        let (where_clause, params) = Self::build_where_clause(filter);

        let sql = format!("SELECT COUNT(*) FROM jobs {}", where_clause);

        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let count: i64 = conn.query_row(&sql, param_refs.as_slice(), |row| row.get(0))?;

        Ok(count)
    }

    fn update(
        &self,
        id: &str,
        mutation: &mut JobMutation<'_>,
    ) -> Result<ConversionJob, JobStoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let current = Self::fetch(&tx, id)?.ok_or_else(|| JobStoreError::NotFound(id.to_string()))?;

        let mut updated = current.clone();
        mutation(&mut updated)?;

        Self::check_immutable(&current, &updated)?;

        if !current.state.can_transition_to(&updated.state) {
            return Err(JobStoreError::InvalidTransition {
                job_id: id.to_string(),
                from: current.status(),
                to: updated.status(),
            });
        }

        updated
            .check_invariants()
            .map_err(|reason| JobStoreError::InvariantViolation {
                job_id: id.to_string(),
                reason,
            })?;

        updated.updated_at = Utc::now();

        tx.execute(
            "UPDATE jobs SET target_format = ?, state = ?, originator = ?, updated_at = ? WHERE id = ?",
            params![
                updated.target_format,
                Self::state_json(&updated.state)?,
                updated.originator,
                updated.updated_at.to_rfc3339(),
                id,
            ],
        )?;
        tx.commit()?;

        Ok(updated)
    }

    fn delete(&self, id: &str, guard: &mut JobGuard<'_>) -> Result<ConversionJob, JobStoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let job = Self::fetch(&tx, id)?.ok_or_else(|| JobStoreError::NotFound(id.to_string()))?;
        guard(&job)?;

        tx.execute("DELETE FROM jobs WHERE id = ?", params![id])?;
        tx.commit()?;

        Ok(job)
    }
}
