//! Job-level interface types
//!
//! The queue, job store and worker live outside this crate; these are
//! the records and hooks they exchange with the pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Job lifecycle, driven by the external worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    #[default]
    Queued,
    Processing,
    Completed,
    Failed,
}

/// Row shape of the enclosing job store
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub job_id: String,
    pub input_path: PathBuf,
    pub status: JobStatus,
    pub error_message: Option<String>,
    pub archive_path: Option<PathBuf>,
    pub metadata_json: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    pub fn new(job_id: String, input_path: PathBuf) -> Self {
        Self {
            job_id,
            input_path,
            status: JobStatus::Queued,
            error_message: None,
            archive_path: None,
            metadata_json: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }
}

/// What the worker records on success
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSuccess {
    pub archive_path: PathBuf,
    pub metadata_json: String,
    /// Pre-dedup combined transcription, kept for diagnostics
    pub transcription: String,
}

/// What the worker records on failure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobFailure {
    pub failure_stage: String,
    pub failure_kind: String,
    pub message: String,
}

/// Optional hook invoked between stages, never on the hot path.
pub trait DebugRecorder: Send + Sync {
    fn record(&self, stage_name: &str, data: &serde_json::Value);
}

/// Cooperative cancellation, checked at stage boundaries only.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_token_shared_across_clones() {
        let token = CancelToken::new();
        let observer = token.clone();
        assert!(!observer.is_cancelled());
        token.cancel();
        assert!(observer.is_cancelled());
    }

    #[test]
    fn test_job_record_serializes_camel_case() {
        let record = JobRecord::new("j-1".to_string(), PathBuf::from("/tmp/a.mp3"));
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"jobId\""));
        assert!(json.contains("\"status\":\"queued\""));
    }
}
