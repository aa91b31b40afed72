//! SQLite-backed job store implementation.

use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::broadcast;

use super::store::KeyedLocks;
use super::{Job, JobChannels, JobPatch, JobStore, Retention, StoreError};

/// SQLite-backed job store.
///
/// Records are stored as JSON alongside the columns used for filtering.
/// Each write holds the per-job lock for the whole read-merge-write-publish
/// sequence, while the connection itself is only held per statement.
pub struct SqliteJobStore {
    conn: Mutex<Connection>,
    locks: KeyedLocks,
    channels: JobChannels,
    retention: Retention,
}

impl SqliteJobStore {
    /// Open (or create) the database file and its tables.
    pub fn new(path: &Path, retention: Retention) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(|e| StoreError::Database(e.to_string()))?;
        Self::from_connection(conn, retention)
    }

    /// Create an in-memory SQLite job store (useful for testing).
    pub fn in_memory(retention: Retention) -> Result<Self, StoreError> {
        let conn =
            Connection::open_in_memory().map_err(|e| StoreError::Database(e.to_string()))?;
        Self::from_connection(conn, retention)
    }

    fn from_connection(conn: Connection, retention: Retention) -> Result<Self, StoreError> {
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            locks: KeyedLocks::default(),
            channels: JobChannels::new(),
            retention,
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                category TEXT NOT NULL,
                status TEXT NOT NULL,
                record TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                expires_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_jobs_expires_at ON jobs(expires_at);
            CREATE INDEX IF NOT EXISTS idx_jobs_created_at ON jobs(created_at);
            "#,
        )
        .map_err(|e| StoreError::Database(e.to_string()))
    }

    fn now_millis() -> i64 {
        Utc::now().timestamp_millis()
    }

    fn load_live(&self, job_id: &str) -> Result<Option<Job>, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let record: Option<String> = conn
            .query_row(
                "SELECT record FROM jobs WHERE id = ?1 AND expires_at > ?2",
                params![job_id, Self::now_millis()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| StoreError::Database(e.to_string()))?;

        record
            .map(|json| {
                serde_json::from_str(&json).map_err(|e| StoreError::Serialization(e.to_string()))
            })
            .transpose()
    }

    fn save(&self, job: &Job) -> Result<(), StoreError> {
        let record =
            serde_json::to_string(job).map_err(|e| StoreError::Serialization(e.to_string()))?;
        let ttl = self.retention.for_category(job.category);
        let expires_at = Self::now_millis() + ttl.as_millis() as i64;

        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        conn.execute(
            r#"
            INSERT INTO jobs (id, category, status, record, created_at, updated_at, expires_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(id) DO UPDATE SET
                category = excluded.category,
                status = excluded.status,
                record = excluded.record,
                created_at = excluded.created_at,
                updated_at = excluded.updated_at,
                expires_at = excluded.expires_at
            "#,
            params![
                job.id,
                job.category.as_str(),
                job.status.as_str(),
                record,
                job.created_at.to_rfc3339(),
                job.updated_at.to_rfc3339(),
                expires_at,
            ],
        )
        .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(())
    }
}

impl JobStore for SqliteJobStore {
    fn put(&self, job_id: &str, patch: JobPatch) -> Result<Job, StoreError> {
        let lock = self.locks.lock_for(job_id)?;
        let _guard = lock.lock().map_err(|_| StoreError::Poisoned)?;

        let merged = match self.load_live(job_id)? {
            Some(mut job) => {
                job.apply(patch);
                job
            }
            None => Job::from_patch(job_id, patch)
                .ok_or_else(|| StoreError::NotFound(job_id.to_string()))?,
        };

        self.save(&merged)?;
        self.channels.publish(&merged);
        Ok(merged)
    }

    fn create(&self, job_id: &str, patch: JobPatch) -> Result<Job, StoreError> {
        let lock = self.locks.lock_for(job_id)?;
        let _guard = lock.lock().map_err(|_| StoreError::Poisoned)?;

        if self.load_live(job_id)?.is_some() {
            return Err(StoreError::AlreadyExists(job_id.to_string()));
        }
        let job = Job::from_patch(job_id, patch)
            .ok_or_else(|| StoreError::NotFound(job_id.to_string()))?;

        self.save(&job)?;
        self.channels.publish(&job);
        Ok(job)
    }

    fn get(&self, job_id: &str) -> Result<Option<Job>, StoreError> {
        self.load_live(job_id)
    }

    fn delete(&self, job_id: &str) -> Result<bool, StoreError> {
        let lock = self.locks.lock_for(job_id)?;
        let _guard = lock.lock().map_err(|_| StoreError::Poisoned)?;

        let removed = {
            let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
            conn.execute(
                "DELETE FROM jobs WHERE id = ?1 AND expires_at > ?2",
                params![job_id, Self::now_millis()],
            )
            .map_err(|e| StoreError::Database(e.to_string()))?;
            let removed = conn.changes() > 0;
            // Expired leftovers go as well
            conn.execute("DELETE FROM jobs WHERE id = ?1", params![job_id])
                .map_err(|e| StoreError::Database(e.to_string()))?;
            removed
        };

        self.channels.close(job_id);
        self.locks.forget(job_id);
        Ok(removed)
    }

    fn scan(&self, prefix: &str) -> Result<Vec<Job>, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let mut stmt = conn
            .prepare(
                r#"
                SELECT record FROM jobs
                WHERE substr(id, 1, length(?1)) = ?1 AND expires_at > ?2
                ORDER BY created_at DESC
                "#,
            )
            .map_err(|e| StoreError::Database(e.to_string()))?;

        let rows = stmt
            .query_map(params![prefix, Self::now_millis()], |row| {
                row.get::<_, String>(0)
            })
            .map_err(|e| StoreError::Database(e.to_string()))?;

        let mut jobs = Vec::new();
        for row in rows {
            let json = row.map_err(|e| StoreError::Database(e.to_string()))?;
            let job: Job =
                serde_json::from_str(&json).map_err(|e| StoreError::Serialization(e.to_string()))?;
            jobs.push(job);
        }
        Ok(jobs)
    }

    fn subscribe(&self, job_id: &str) -> broadcast::Receiver<Job> {
        self.channels.subscribe(job_id)
    }

    fn purge_expired(&self) -> Result<usize, StoreError> {
        let expired: Vec<String> = {
            let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
            let now = Self::now_millis();
            let mut stmt = conn
                .prepare("SELECT id FROM jobs WHERE expires_at <= ?1")
                .map_err(|e| StoreError::Database(e.to_string()))?;
            let ids = stmt
                .query_map(params![now], |row| row.get::<_, String>(0))
                .map_err(|e| StoreError::Database(e.to_string()))?
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| StoreError::Database(e.to_string()))?;
            conn.execute("DELETE FROM jobs WHERE expires_at <= ?1", params![now])
                .map_err(|e| StoreError::Database(e.to_string()))?;
            ids
        };

        for id in &expired {
            self.channels.close(id);
            self.locks.forget(id);
        }
        Ok(expired.len())
    }
}
