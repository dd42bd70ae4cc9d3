//! SQLite-backed exception queue and knowledge-case metadata.

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use super::{
    diagnosis_payload, failure_payload, now_string, ExceptionQueue, ExceptionRecord,
    ExceptionStatus, NewException,
};
use crate::knowledge::KnowledgeCase;
use crate::workflow::{DiagnosisResult, JobInfo};

const SCHEMA: &str = r#"
PRAGMA journal_mode = WAL;

CREATE TABLE IF NOT EXISTS flink_job_exceptions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    job_id TEXT NOT NULL,
    job_name TEXT,
    job_type TEXT,
    job_config TEXT,
    error_message TEXT NOT NULL,
    error_type TEXT,
    status TEXT NOT NULL DEFAULT 'pending',
    suggested_fix TEXT,
    diagnosis_confidence REAL,
    created_at TEXT NOT NULL,
    diagnosed_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_exceptions_status_created ON flink_job_exceptions(status, created_at);
CREATE INDEX IF NOT EXISTS idx_exceptions_job_id ON flink_job_exceptions(job_id);

CREATE TABLE IF NOT EXISTS knowledge_cases (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    case_id TEXT NOT NULL UNIQUE,
    error_type TEXT NOT NULL,
    error_pattern TEXT NOT NULL,
    root_cause TEXT NOT NULL,
    solution TEXT NOT NULL,
    source_exception_id INTEGER,
    source_type TEXT NOT NULL DEFAULT 'manual',
    verified INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_cases_error_type ON knowledge_cases(error_type);
"#;

const RECORD_COLUMNS: &str = "id, job_id, job_name, job_type, job_config, error_message, error_type,
     status, suggested_fix, diagnosis_confidence, created_at, diagnosed_at";

/// One connection per queue instance; separate instances (or processes) on the
/// same file coordinate through SQLite's write lock.
#[derive(Clone)]
pub struct SqliteExceptionQueue {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteExceptionQueue {
    pub async fn open(path: PathBuf, busy_timeout: Duration) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                anyhow::anyhow!("Failed to create database dir {}: {}", parent.display(), e)
            })?;
        }

        let conn = tokio::task::spawn_blocking(move || Self::open_blocking(&path, busy_timeout))
            .await??;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn open_blocking(path: &Path, busy_timeout: Duration) -> anyhow::Result<Connection> {
        let conn = Connection::open(path)
            .map_err(|e| anyhow::anyhow!("Failed to open SQLite database {}: {}", path.display(), e))?;
        conn.busy_timeout(busy_timeout)?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| anyhow::anyhow!("Failed to run schema: {}", e))?;
        Ok(conn)
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> anyhow::Result<T>
    where
        F: FnOnce(&mut Connection) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.blocking_lock();
            f(&mut conn)
        })
        .await?
    }
}

fn parse_json_column(raw: Option<String>) -> Option<serde_json::Value> {
    raw.and_then(|s| serde_json::from_str(&s).ok())
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<ExceptionRecord> {
    let status: String = row.get(7)?;
    Ok(ExceptionRecord {
        id: row.get(0)?,
        job_id: row.get(1)?,
        job_name: row.get(2)?,
        job_type: row.get(3)?,
        job_config: parse_json_column(row.get(4)?),
        error_message: row.get(5)?,
        error_type: row.get(6)?,
        status: ExceptionStatus::parse(&status).unwrap_or(ExceptionStatus::Pending),
        suggested_fix: parse_json_column(row.get(8)?),
        diagnosis_confidence: row.get(9)?,
        created_at: row.get(10)?,
        diagnosed_at: row.get(11)?,
    })
}

fn finish_record(
    conn: &Connection,
    exception_id: i64,
    status: ExceptionStatus,
    payload: &serde_json::Value,
    confidence: Option<f64>,
) -> anyhow::Result<()> {
    let updated = conn.execute(
        "UPDATE flink_job_exceptions
         SET status = ?1, suggested_fix = ?2, diagnosis_confidence = COALESCE(?3, diagnosis_confidence),
             diagnosed_at = ?4
         WHERE id = ?5",
        params![
            status.as_str(),
            payload.to_string(),
            confidence,
            now_string(),
            exception_id
        ],
    )?;
    if updated == 0 {
        anyhow::bail!("Exception {} not found", exception_id);
    }
    Ok(())
}

#[async_trait]
impl ExceptionQueue for SqliteExceptionQueue {
    async fn claim_pending(&self) -> anyhow::Result<Option<JobInfo>> {
        self.with_conn(|conn| {
            // IMMEDIATE takes the write lock up front, so a concurrent claimant
            // waits (busy_timeout) and then sees the row already in progress.
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let record = tx
                .query_row(
                    &format!(
                        "UPDATE flink_job_exceptions
                         SET status = 'in_progress'
                         WHERE id = (
                             SELECT id FROM flink_job_exceptions
                             WHERE status = 'pending'
                             ORDER BY created_at ASC, id ASC
                             LIMIT 1
                         ) AND status = 'pending'
                         RETURNING {}",
                        RECORD_COLUMNS
                    ),
                    [],
                    row_to_record,
                )
                .optional()?;
            tx.commit()?;
            Ok(record.map(|r| r.to_job_info()))
        })
        .await
    }

    async fn complete(
        &self,
        exception_id: i64,
        diagnosis: &DiagnosisResult,
        status: ExceptionStatus,
    ) -> anyhow::Result<()> {
        let payload = diagnosis_payload(diagnosis);
        let confidence = diagnosis.confidence;
        self.with_conn(move |conn| {
            finish_record(conn, exception_id, status, &payload, Some(confidence))
        })
        .await?;
        tracing::info!(exception_id, status = %status, confidence, "Updated diagnosis result");
        Ok(())
    }

    async fn mark_failed(&self, exception_id: i64, message: &str) -> anyhow::Result<()> {
        let payload = failure_payload(message);
        self.with_conn(move |conn| {
            finish_record(conn, exception_id, ExceptionStatus::Failed, &payload, None)
        })
        .await?;
        tracing::warn!(exception_id, error = %message, "Marked exception as failed");
        Ok(())
    }

    async fn insert_case(&self, case: &KnowledgeCase) -> anyhow::Result<()> {
        let case = case.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO knowledge_cases
                     (case_id, error_type, error_pattern, root_cause, solution,
                      source_exception_id, source_type, verified, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    case.case_id,
                    case.error_type,
                    case.error_pattern,
                    case.root_cause,
                    case.solution,
                    case.source_exception_id,
                    case.source_type.as_str(),
                    case.verified,
                    case.created_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn count_pending(&self) -> anyhow::Result<u64> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM flink_job_exceptions WHERE status = 'pending'",
                [],
                |row| row.get(0),
            )?;
            Ok(count.max(0) as u64)
        })
        .await
    }

    async fn ping(&self) -> anyhow::Result<()> {
        self.with_conn(|conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
            Ok(())
        })
        .await
    }

    async fn insert_exception(&self, new: &NewException) -> anyhow::Result<i64> {
        let new = new.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO flink_job_exceptions
                     (job_id, job_name, job_type, job_config, error_message, error_type, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending', ?7)",
                params![
                    new.job_id,
                    new.job_name,
                    new.job_type,
                    new.job_config.as_ref().map(|c| c.to_string()),
                    new.error_message,
                    new.error_type,
                    now_string(),
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    async fn get_exception(&self, id: i64) -> anyhow::Result<Option<ExceptionRecord>> {
        self.with_conn(move |conn| {
            Ok(conn
                .query_row(
                    &format!("SELECT {} FROM flink_job_exceptions WHERE id = ?1", RECORD_COLUMNS),
                    params![id],
                    row_to_record,
                )
                .optional()?)
        })
        .await
    }

    async fn find_by_job_id(&self, job_id: &str) -> anyhow::Result<Option<ExceptionRecord>> {
        let job_id = job_id.to_string();
        self.with_conn(move |conn| {
            Ok(conn
                .query_row(
                    &format!(
                        "SELECT {} FROM flink_job_exceptions WHERE job_id = ?1
                         ORDER BY created_at DESC, id DESC LIMIT 1",
                        RECORD_COLUMNS
                    ),
                    params![job_id],
                    row_to_record,
                )
                .optional()?)
        })
        .await
    }

    async fn list_recent(&self, limit: usize) -> anyhow::Result<Vec<ExceptionRecord>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM flink_job_exceptions ORDER BY created_at DESC, id DESC LIMIT ?1",
                RECORD_COLUMNS
            ))?;
            let records = stmt
                .query_map(params![limit as i64], row_to_record)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(records)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::SourceType;
    use crate::workflow::Priority;
    use chrono::Utc;

    async fn open_queue(dir: &tempfile::TempDir) -> SqliteExceptionQueue {
        SqliteExceptionQueue::open(dir.path().join("oceanus.db"), Duration::from_secs(5))
            .await
            .unwrap()
    }

    fn exception(job_id: &str) -> NewException {
        NewException {
            job_id: job_id.to_string(),
            job_name: Some("Checkpoint Job".to_string()),
            job_type: Some("streaming".to_string()),
            job_config: Some(serde_json::json!({"parallelism": 4})),
            error_message: "Checkpoint expired before completing.".to_string(),
            error_type: None,
        }
    }

    fn diagnosis() -> DiagnosisResult {
        DiagnosisResult {
            root_cause: "slow sink".to_string(),
            detailed_analysis: "barrier alignment".to_string(),
            suggested_fix: "increase checkpoint timeout".to_string(),
            priority: Priority::Medium,
            confidence: 0.75,
            related_docs: vec!["https://flink.apache.org".to_string()],
        }
    }

    #[tokio::test]
    async fn claim_takes_oldest_pending_once() {
        let dir = tempfile::tempdir().unwrap();
        let queue = open_queue(&dir).await;
        let first = queue.insert_exception(&exception("job-1")).await.unwrap();
        queue.insert_exception(&exception("job-2")).await.unwrap();

        let job = queue.claim_pending().await.unwrap().unwrap();
        assert_eq!(job.exception_id, first);
        assert_eq!(job.job_config, Some(serde_json::json!({"parallelism": 4})));
        assert_eq!(queue.count_pending().await.unwrap(), 1);

        let record = queue.get_exception(first).await.unwrap().unwrap();
        assert_eq!(record.status, ExceptionStatus::InProgress);

        assert_eq!(queue.claim_pending().await.unwrap().unwrap().job_id, "job-2");
        assert!(queue.claim_pending().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn complete_persists_diagnosis() {
        let dir = tempfile::tempdir().unwrap();
        let queue = open_queue(&dir).await;
        let id = queue.insert_exception(&exception("job-1")).await.unwrap();
        queue.claim_pending().await.unwrap();

        queue
            .complete(id, &diagnosis(), ExceptionStatus::Completed)
            .await
            .unwrap();

        let record = queue.find_by_job_id("job-1").await.unwrap().unwrap();
        assert_eq!(record.status, ExceptionStatus::Completed);
        assert_eq!(record.diagnosis_confidence, Some(0.75));
        assert!(record.diagnosed_at.is_some());
        let fix = record.suggested_fix.unwrap();
        assert_eq!(fix["root_cause"], "slow sink");
        assert!(fix.get("confidence").is_none());
    }

    #[tokio::test]
    async fn mark_failed_stores_error_payload() {
        let dir = tempfile::tempdir().unwrap();
        let queue = open_queue(&dir).await;
        let id = queue.insert_exception(&exception("job-1")).await.unwrap();

        queue.mark_failed(id, "Unknown error").await.unwrap();

        let record = queue.get_exception(id).await.unwrap().unwrap();
        assert_eq!(record.status, ExceptionStatus::Failed);
        assert_eq!(record.suggested_fix, Some(serde_json::json!({"error": "Unknown error"})));
        assert!(queue.mark_failed(9999, "x").await.is_err());
    }

    #[tokio::test]
    async fn knowledge_case_id_is_unique() {
        let dir = tempfile::tempdir().unwrap();
        let queue = open_queue(&dir).await;
        let case = KnowledgeCase {
            case_id: "case_0123456789ab".to_string(),
            error_type: "checkpoint_failure".to_string(),
            error_pattern: "Checkpoint <NUM> expired".to_string(),
            root_cause: "slow sink".to_string(),
            solution: "increase timeout".to_string(),
            source_exception_id: Some(1),
            source_type: SourceType::Auto,
            verified: false,
            created_at: Utc::now(),
        };
        queue.insert_case(&case).await.unwrap();
        assert!(queue.insert_case(&case).await.is_err());
    }

    #[tokio::test]
    async fn list_recent_is_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let queue = open_queue(&dir).await;
        for i in 0..3 {
            queue
                .insert_exception(&exception(&format!("job-{}", i)))
                .await
                .unwrap();
        }
        let recent = queue.list_recent(2).await.unwrap();
        let ids: Vec<_> = recent.iter().map(|r| r.job_id.as_str()).collect();
        assert_eq!(ids, vec!["job-2", "job-1"]);
        tokio_test::assert_ok!(queue.ping().await);
    }

    #[tokio::test]
    async fn concurrent_claims_have_one_winner() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("oceanus.db");
        let a = SqliteExceptionQueue::open(path.clone(), Duration::from_secs(5))
            .await
            .unwrap();
        let b = SqliteExceptionQueue::open(path, Duration::from_secs(5))
            .await
            .unwrap();
        a.insert_exception(&exception("job-1")).await.unwrap();

        let claims = futures::future::join_all(
            [a.clone(), b.clone(), a, b]
                .into_iter()
                .map(|q| async move { q.claim_pending().await.unwrap() }),
        )
        .await;

        assert_eq!(claims.iter().filter(|c| c.is_some()).count(), 1);
    }
}
