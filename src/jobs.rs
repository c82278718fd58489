//! Asynchronous transfer jobs.
//!
//! [`JobTracker::submit`] registers a job and returns its id straight away;
//! the transfer itself runs on a spawned tokio task which opens its own
//! session and file handles. Callers poll [`JobTracker::status`].
//!
//! ```text
//! Starting -> Processing -> Completed
//!                        -> Failed
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tracing::{error, info};
use uuid::Uuid;

use crate::config::TransferSettings;
use crate::engine::TransferEngine;
use crate::error::{BridgeError, BridgeResult};
use crate::inspector::describe_tables;
use crate::planner::build_plan;
use crate::request::{Direction, ExportRequest, ImportRequest, TransferRequest};
use crate::session::Connector;

/// Lifecycle state of a job. States only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Starting,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    fn rank(&self) -> u8 {
        match self {
            JobStatus::Starting => 0,
            JobStatus::Processing => 1,
            JobStatus::Completed | JobStatus::Failed => 2,
        }
    }

    /// Whether a job in this state may move to `next`.
    pub fn can_advance_to(&self, next: JobStatus) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Starting => "starting",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tracked transfer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferJob {
    pub id: String,
    pub direction: Direction,
    pub status: JobStatus,
    pub records_processed: u64,
    /// Set for exports once they complete.
    pub output_file: Option<PathBuf>,
    /// Set when the job failed.
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TransferJob {
    fn new(id: String, direction: Direction) -> Self {
        let now = Utc::now();
        Self {
            id,
            direction,
            status: JobStatus::Starting,
            records_processed: 0,
            output_file: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

struct Inner {
    jobs: RwLock<HashMap<String, TransferJob>>,
    connector: Arc<dyn Connector>,
    settings: TransferSettings,
}

/// Registry of transfer jobs. Clones share the same registry.
#[derive(Clone)]
pub struct JobTracker {
    inner: Arc<Inner>,
}

impl JobTracker {
    pub fn new(connector: Arc<dyn Connector>, settings: TransferSettings) -> Self {
        Self {
            inner: Arc::new(Inner {
                jobs: RwLock::new(HashMap::new()),
                connector,
                settings,
            }),
        }
    }

    /// Validate a request, register it as `Starting` and start it.
    ///
    /// Must be called from within a tokio runtime. Invalid requests are
    /// rejected here and never become jobs.
    pub fn submit(&self, request: impl Into<TransferRequest>) -> BridgeResult<String> {
        let request = request.into();
        request.validate()?;

        let id = Uuid::new_v4().to_string();
        let job = TransferJob::new(id.clone(), request.direction());
        self.inner
            .jobs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone(), job);
        info!(job = %id, direction = %request.direction(), "job submitted");

        let tracker = self.clone();
        let job_id = id.clone();
        let worker = tokio::spawn(async move {
            tracker.run(job_id, request).await;
        });

        // A panicking session or engine must still leave the job terminal.
        let tracker = self.clone();
        let job_id = id.clone();
        tokio::spawn(async move {
            if let Err(e) = worker.await {
                let reason = if e.is_panic() {
                    panic_message(e.into_panic())
                } else {
                    "job task was cancelled".to_string()
                };
                error!(job = %job_id, reason = %reason, "job task aborted");
                tracker.advance(&job_id, JobStatus::Failed, |job| {
                    job.error = Some(BridgeError::Transfer(reason).to_string());
                });
            }
        });
        Ok(id)
    }

    /// Current state of a job.
    pub fn status(&self, id: &str) -> BridgeResult<TransferJob> {
        self.inner
            .jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
            .ok_or_else(|| BridgeError::NotFound(id.to_string()))
    }

    /// Every known job, oldest first.
    pub fn jobs(&self) -> Vec<TransferJob> {
        let mut jobs: Vec<TransferJob> = self
            .inner
            .jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        jobs
    }

    /// Poll until the job reaches a terminal state.
    pub async fn wait(&self, id: &str, poll_interval: Duration) -> BridgeResult<TransferJob> {
        loop {
            let job = self.status(id)?;
            if job.status.is_terminal() {
                return Ok(job);
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    fn update(&self, id: &str, f: impl FnOnce(&mut TransferJob)) {
        let mut jobs = self.inner.jobs.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(job) = jobs.get_mut(id) {
            if job.status.is_terminal() {
                return;
            }
            f(job);
            job.updated_at = Utc::now();
        }
    }

    fn advance(&self, id: &str, next: JobStatus, f: impl FnOnce(&mut TransferJob)) {
        self.update(id, |job| {
            if job.status.can_advance_to(next) {
                job.status = next;
                f(job);
            }
        });
    }

    async fn run(&self, id: String, request: TransferRequest) {
        self.advance(&id, JobStatus::Processing, |_| {});

        let progress = {
            let tracker = self.clone();
            let id = id.clone();
            move |records: u64| {
                tracker.update(&id, |job| {
                    if job.status == JobStatus::Processing {
                        job.records_processed = job.records_processed.max(records);
                    }
                })
            }
        };

        let outcome = match &request {
            TransferRequest::Export(r) => self
                .run_export(&id, r, progress)
                .await
                .map(|(n, path)| (n, Some(path))),
            TransferRequest::Import(r) => self.run_import(r, progress).await.map(|n| (n, None)),
        };

        match outcome {
            Ok((records, output_file)) => {
                info!(job = %id, records, "job completed");
                self.advance(&id, JobStatus::Completed, |job| {
                    job.records_processed = records;
                    job.output_file = output_file;
                });
            }
            Err(e) => {
                error!(job = %id, error = %e, "job failed");
                self.advance(&id, JobStatus::Failed, |job| {
                    job.error = Some(e.to_string());
                });
            }
        }
    }

    async fn run_export(
        &self,
        id: &str,
        request: &ExportRequest,
        progress: impl Fn(u64) + Send + Sync + 'static,
    ) -> BridgeResult<(u64, PathBuf)> {
        let session = self.inner.connector.connect(&request.connection).await?;
        let tables = describe_tables(session.as_ref(), &request.tables).await?;
        let plan = build_plan(&tables, &request.columns, request.join.as_ref(), None)?;

        let path = request.output_file.clone().unwrap_or_else(|| {
            self.inner
                .settings
                .export_dir
                .join(format!("export_{}.csv", id))
        });
        let file = File::create(&path).map_err(|e| {
            BridgeError::Transfer(format!("failed to create {}: {}", path.display(), e))
        })?;
        let mut writer = BufWriter::new(file);

        let engine = TransferEngine::new()
            .with_batch_size(self.inner.settings.batch_size)
            .with_progress(progress);
        let records = engine
            .export_to_file(session.as_ref(), &plan, &mut writer, &request.format)
            .await?;
        writer
            .flush()
            .map_err(|e| BridgeError::Transfer(format!("failed to write {}: {}", path.display(), e)))?;
        Ok((records, path))
    }

    async fn run_import(
        &self,
        request: &ImportRequest,
        progress: impl Fn(u64) + Send + Sync + 'static,
    ) -> BridgeResult<u64> {
        let session = self.inner.connector.connect(&request.connection).await?;
        let mut file = File::open(&request.file_path).map_err(|e| {
            BridgeError::Transfer(format!(
                "failed to open {}: {}",
                request.file_path.display(),
                e
            ))
        })?;

        let engine = TransferEngine::new()
            .with_batch_size(request.batch_size.unwrap_or(self.inner.settings.batch_size))
            .with_progress(progress);
        engine
            .import_from_file(
                &mut file,
                session.as_ref(),
                &request.target_table,
                &request.columns,
                &request.format,
            )
            .await
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown cause".to_string());
    format!("job panicked: {}", detail)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_only_moves_forward() {
        use JobStatus::*;
        assert!(Starting.can_advance_to(Processing));
        assert!(Starting.can_advance_to(Failed));
        assert!(Processing.can_advance_to(Completed));
        assert!(Processing.can_advance_to(Failed));
        assert!(!Processing.can_advance_to(Starting));
        assert!(!Processing.can_advance_to(Processing));
        assert!(!Completed.can_advance_to(Failed));
        assert!(!Failed.can_advance_to(Completed));
    }

    #[test]
    fn test_panic_message() {
        assert_eq!(panic_message(Box::new("boom")), "job panicked: boom");
        assert_eq!(panic_message(Box::new(String::from("bad row"))), "job panicked: bad row");
        assert_eq!(panic_message(Box::new(7u8)), "job panicked: unknown cause");
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(serde_json::to_string(&JobStatus::Processing).unwrap(), "\"processing\"");
        let job = TransferJob::new("j1".into(), Direction::Import);
        let json = serde_json::to_value(&job).unwrap();
        assert_eq!(json["status"], "starting");
        assert_eq!(json["direction"], "import");
        assert_eq!(json["records_processed"], 0);
        assert!(json["error"].is_null());
    }
}
