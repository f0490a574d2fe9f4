//! Per-job progress snapshots as a lazy event sequence.
//!
//! Each tick snapshots the job under the registry lock (copy out, no I/O
//! under lock) and emits one `data: {...}` frame. The sequence ends after
//! the first terminal status. Authorization is decided once, from the
//! identity captured when the stream was opened.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use super::job_store::JobStore;

const POLL_INTERVAL: Duration = Duration::from_millis(500);
const CHANNEL_DEPTH: usize = 16;

fn frame(value: serde_json::Value) -> String {
    format!("data: {value}\n\n")
}

/// Subscribe to a job's progress. `caller` is the user id captured at
/// stream initiation; it is never re-resolved per tick.
///
/// Must be called from within a tokio runtime.
pub fn subscribe(
    jobs: Arc<JobStore>,
    job_id: String,
    caller: Option<String>,
) -> ReceiverStream<String> {
    let (tx, rx) = tokio::sync::mpsc::channel::<String>(CHANNEL_DEPTH);

    tokio::spawn(async move {
        // Ownership check happens once, against the captured identity.
        if let Some(job) = jobs.snapshot(&job_id)
            && let Some(owner) = &job.user_id
            && caller.as_deref() != Some(owner.as_str())
        {
            let _ = tx
                .send(frame(json!({
                    "status": "error",
                    "message": "Unauthorized.",
                    "progress": 0,
                })))
                .await;
            return;
        }

        loop {
            let Some(job) = jobs.snapshot(&job_id) else {
                let _ = tx
                    .send(frame(json!({
                        "status": "error",
                        "message": "Job not found.",
                        "progress": 0,
                    })))
                    .await;
                return;
            };

            let event = frame(json!({
                "status": job.status,
                "progress": job.progress,
                "message": job.message,
            }));
            if tx.send(event).await.is_err() {
                debug!(target: "jobs", job = %job_id, "progress subscriber went away");
                return;
            }
            if job.status.is_terminal() {
                return;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    });

    ReceiverStream::new(rx)
}
