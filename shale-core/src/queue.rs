use crate::error::Result;
use crate::rpc::{QueueApi, ReplicationJob};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{Connection, params};
use std::path::PathBuf;

/// Durable, at-least-once FIFO job store backing the replication queue.
///
/// Jobs are claimed with a visibility-timeout lease: `dequeue` stamps
/// `lease_until` and returns the jobs; a job that is not acked before the
/// lease expires becomes deliverable again. Consumers must be idempotent,
/// which the shard's key-based overwrite already guarantees.
pub struct JobStore {
    db_path: PathBuf,
    visibility_millis: i64,
}

impl JobStore {
    pub fn new(db_path: PathBuf, visibility_millis: i64) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let store = Self {
            db_path,
            visibility_millis,
        };
        store.init_schema()?;
        Ok(store)
    }

    fn get_conn(&self) -> Result<Connection> {
        let conn = Connection::open(&self.db_path)?;
        Ok(conn)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.get_conn()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS jobs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                target TEXT NOT NULL,
                body TEXT NOT NULL,
                created_at TEXT NOT NULL,
                lease_until INTEGER
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_jobs_target ON jobs(target, id)",
            [],
        )?;

        Ok(())
    }

    /// Persist a new job for `target`. The id is store-assigned and
    /// monotonically increasing.
    pub fn enqueue_job(&self, target: &str, body: &serde_json::Value) -> Result<i64> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO jobs (target, body, created_at) VALUES (?1, ?2, ?3)",
            params![target, body.to_string(), Utc::now().to_rfc3339()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Claim the pending jobs for `target` in id order. Claimed jobs carry a
    /// lease and are not handed out again until it expires.
    pub fn dequeue_jobs(&self, target: &str) -> Result<Vec<ReplicationJob>> {
        let mut conn = self.get_conn()?;
        let now = Utc::now().timestamp_millis();
        let tx = conn.transaction()?;

        let mut claimed: Vec<(i64, String)> = Vec::new();
        {
            let mut stmt = tx.prepare(
                "SELECT id, body FROM jobs
                 WHERE target = ?1 AND (lease_until IS NULL OR lease_until < ?2)
                 ORDER BY id",
            )?;
            let rows = stmt.query_map(params![target, now], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })?;
            for row in rows {
                claimed.push(row?);
            }
        }

        let lease_until = now + self.visibility_millis;
        for (id, _) in &claimed {
            tx.execute(
                "UPDATE jobs SET lease_until = ?1 WHERE id = ?2",
                params![lease_until, id],
            )?;
        }
        tx.commit()?;

        claimed
            .into_iter()
            .map(|(id, body)| {
                let body = serde_json::from_str(&body)?;
                Ok(ReplicationJob {
                    job_id: id,
                    target: target.to_string(),
                    body,
                })
            })
            .collect()
    }

    /// Delete an applied job. Acking an already-deleted job is not an error.
    pub fn ack_job(&self, target: &str, job_id: i64) -> Result<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "DELETE FROM jobs WHERE id = ?1 AND target = ?2",
            params![job_id, target],
        )?;
        Ok(())
    }

    pub fn pending_count(&self, target: &str) -> Result<usize> {
        let conn = self.get_conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM jobs WHERE target = ?1",
            params![target],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

#[async_trait]
impl QueueApi for JobStore {
    async fn enqueue(&self, target: &str, body: serde_json::Value) -> Result<i64> {
        self.enqueue_job(target, &body)
    }

    async fn dequeue(&self, target: &str) -> Result<Vec<ReplicationJob>> {
        self.dequeue_jobs(target)
    }

    async fn ack(&self, target: &str, job_id: i64) -> Result<()> {
        self.ack_job(target, job_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_enqueue_assigns_increasing_ids() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = JobStore::new(temp_dir.path().join("queue.db"), 60_000).unwrap();

        let first = store.enqueue_job("backup-1", &json!({"n": 1})).unwrap();
        let second = store.enqueue_job("backup-1", &json!({"n": 2})).unwrap();
        assert!(second > first);
    }

    #[test]
    fn test_dequeue_returns_jobs_in_order_for_target_only() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = JobStore::new(temp_dir.path().join("queue.db"), 60_000).unwrap();

        store.enqueue_job("backup-1", &json!({"n": 1})).unwrap();
        store.enqueue_job("backup-2", &json!({"n": 2})).unwrap();
        store.enqueue_job("backup-1", &json!({"n": 3})).unwrap();

        let jobs = store.dequeue_jobs("backup-1").unwrap();
        assert_eq!(jobs.len(), 2);
        assert!(jobs[0].job_id < jobs[1].job_id);
        assert_eq!(jobs[0].body["n"], 1);
        assert_eq!(jobs[1].body["n"], 3);
    }

    #[test]
    fn test_claimed_jobs_are_not_redelivered_within_lease() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = JobStore::new(temp_dir.path().join("queue.db"), 60_000).unwrap();

        store.enqueue_job("backup-1", &json!({"n": 1})).unwrap();
        assert_eq!(store.dequeue_jobs("backup-1").unwrap().len(), 1);
        assert_eq!(store.dequeue_jobs("backup-1").unwrap().len(), 0);
    }

    #[test]
    fn test_expired_lease_is_redelivered() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = JobStore::new(temp_dir.path().join("queue.db"), 0).unwrap();

        store.enqueue_job("backup-1", &json!({"n": 1})).unwrap();
        assert_eq!(store.dequeue_jobs("backup-1").unwrap().len(), 1);
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert_eq!(store.dequeue_jobs("backup-1").unwrap().len(), 1);
    }

    #[test]
    fn test_ack_removes_job() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = JobStore::new(temp_dir.path().join("queue.db"), 0).unwrap();

        let id = store.enqueue_job("backup-1", &json!({"n": 1})).unwrap();
        store.ack_job("backup-1", id).unwrap();
        assert_eq!(store.pending_count("backup-1").unwrap(), 0);
        assert!(store.dequeue_jobs("backup-1").unwrap().is_empty());

        // acking again is harmless
        store.ack_job("backup-1", id).unwrap();
    }
}
