//! Process-wide job registry.
//!
//! All writes go through the registry mutex; reads hand out copies so no
//! caller ever holds the lock across I/O. Terminal states are final: once a
//! job is completed, cancelled or errored, later transitions are ignored,
//! and progress never moves backwards while a job is running.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use serde::Serialize;
use tracing::debug;

use super::Identity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Processing,
    Completed,
    Cancelled,
    Error,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, JobStatus::Processing)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobInfo {
    pub id: String,
    pub status: JobStatus,
    pub progress: f32,
    pub message: String,
    pub output_file: Option<String>,
    pub download_name: Option<String>,
    #[serde(skip)]
    pub user_id: Option<String>,
    #[serde(skip)]
    pub is_premium: bool,
    #[serde(skip)]
    pub created_at: SystemTime,
}

#[derive(Debug, Default)]
pub struct JobStore {
    inner: Mutex<HashMap<String, JobInfo>>,
}

impl JobStore {
    /// Register a new job in `processing` state under a caller-chosen id
    /// (a UUID v4 string; the orchestrator names uploads after it).
    pub fn create(&self, id: &str, user: Option<&Identity>) {
        let info = JobInfo {
            id: id.to_string(),
            status: JobStatus::Processing,
            progress: 0.0,
            message: "Starting...".to_string(),
            output_file: None,
            download_name: None,
            user_id: user.map(|u| u.user_id.clone()),
            is_premium: user.map(|u| u.is_premium).unwrap_or(false),
            created_at: SystemTime::now(),
        };
        let mut jobs = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        jobs.insert(id.to_string(), info);
    }

    /// Copy of the job state, safe to use outside the lock.
    pub fn snapshot(&self, id: &str) -> Option<JobInfo> {
        let jobs = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        jobs.get(id).cloned()
    }

    /// Update progress of a running job. Progress is clamped monotone so
    /// observers never see it move backwards.
    pub fn set_progress(&self, id: &str, percent: f32, message: &str) {
        self.update(id, |job| {
            if job.status != JobStatus::Processing {
                return;
            }
            job.progress = job.progress.max(percent.clamp(0.0, 100.0));
            job.message = message.to_string();
        });
    }

    pub fn mark_completed(&self, id: &str, output_file: &str, download_name: &str) {
        self.update(id, |job| {
            if job.status != JobStatus::Processing {
                return;
            }
            job.status = JobStatus::Completed;
            job.progress = 100.0;
            job.message = "Done!".to_string();
            job.output_file = Some(output_file.to_string());
            job.download_name = Some(download_name.to_string());
        });
    }

    pub fn mark_error(&self, id: &str, message: &str) {
        self.update(id, |job| {
            if job.status != JobStatus::Processing {
                return;
            }
            job.status = JobStatus::Error;
            job.progress = 0.0;
            job.message = message.to_string();
        });
    }

    /// Flag a job as cancelled. The flag is a persistent signal: workers
    /// observe it between audio chunks and while queueing for the gate.
    /// Returns false when the job is unknown or already terminal.
    pub fn mark_cancelled(&self, id: &str) -> bool {
        let mut jobs = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let Some(job) = jobs.get_mut(id) else {
            return false;
        };
        if job.status.is_terminal() {
            return false;
        }
        job.status = JobStatus::Cancelled;
        job.message = "Cancelled.".to_string();
        debug!(target: "jobs", job = id, "cancel requested");
        true
    }

    pub fn is_cancelled(&self, id: &str) -> bool {
        let jobs = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        jobs.get(id)
            .map(|job| job.status == JobStatus::Cancelled)
            .unwrap_or(false)
    }

    /// Drop records older than `age`. Runs opportunistically on new
    /// conversion requests, mirroring the file cleaner.
    pub fn evict_older_than(&self, age: Duration) {
        let now = SystemTime::now();
        let mut jobs = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        jobs.retain(|_, job| {
            now.duration_since(job.created_at)
                .map(|elapsed| elapsed <= age)
                .unwrap_or(true)
        });
    }

    fn update<F: FnOnce(&mut JobInfo)>(&self, id: &str, f: F) {
        let mut jobs = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(job) = jobs.get_mut(id) {
            f(job);
        }
    }
}
