use std::path::Path;
use std::time::Instant;

use tokio::sync::{Notify, RwLock, RwLockReadGuard};
use uuid::Uuid;

use crate::error::{Result, SignError};
use crate::queue::job::{Delivery, JobHandle, SignJob};
use crate::queue::queue::{FailureDisposition, JobQueue, QueueSnapshot};
use crate::queue::retry::RetryPolicy;

/// Async front of [`JobQueue`], shared between the API and the worker pool.
///
/// Consumers wait in [`SharedQueue::next`] on a `Notify` (plus a timer for
/// the earliest backoff deadline) instead of polling.
#[derive(Debug)]
pub struct SharedQueue {
    inner: RwLock<JobQueue>,
    notify: Notify,
}

impl Default for SharedQueue {
    fn default() -> Self {
        Self::new(JobQueue::new())
    }
}

impl SharedQueue {
    pub fn new(queue: JobQueue) -> Self {
        Self {
            inner: RwLock::new(queue),
            notify: Notify::new(),
        }
    }

    /// Accept a signing intent. Returns as soon as the job is queued.
    pub async fn enqueue(&self, job: SignJob) -> Result<JobHandle> {
        let request_id = job.request_id.clone();
        let user_id = job.user_id.clone();
        let handle = self.inner.write().await.push(job)?;
        tracing::info!(
            job_id = %handle.job_id,
            request_id = %request_id,
            user_id = %user_id,
            "Sign job enqueued"
        );
        self.notify.notify_one();
        Ok(handle)
    }

    /// Wait for the next ready job and lease it.
    pub async fn next(&self) -> Delivery {
        loop {
            let deadline = {
                let mut queue = self.inner.write().await;
                if let Some(delivery) = queue.pop_ready(Instant::now()) {
                    return delivery;
                }
                queue.next_deadline()
            };

            match deadline {
                Some(at) => {
                    tokio::select! {
                        _ = self.notify.notified() => {}
                        _ = tokio::time::sleep_until(at.into()) => {}
                    }
                }
                None => self.notify.notified().await,
            }
        }
    }

    pub async fn complete(&self, id: &Uuid) -> bool {
        let completed = self.inner.write().await.complete(id);
        if completed {
            // The user's next job may now be deliverable.
            self.notify.notify_one();
        }
        completed
    }

    pub async fn fail(&self, id: &Uuid, error: &SignError) -> Option<FailureDisposition> {
        let disposition =
            self.inner
                .write()
                .await
                .fail(id, &error.to_string(), error.kind(), Instant::now());
        if disposition.is_some() {
            // Either a new deadline or an unblocked user.
            self.notify.notify_one();
        }
        disposition
    }

    pub async fn release(&self, id: &Uuid) -> bool {
        let released = self.inner.write().await.release(id);
        if released {
            self.notify.notify_one();
        }
        released
    }

    pub async fn requeue_in_flight(&self) -> usize {
        let count = self.inner.write().await.requeue_in_flight();
        if count > 0 {
            tracing::warn!(count, "Requeued in-flight jobs for redelivery");
            self.notify.notify_one();
        }
        count
    }

    pub async fn retry_dead(&self, id: &Uuid) -> Result<()> {
        self.inner.write().await.retry_dead(id)?;
        tracing::info!(job_id = %id, "Dead job requeued");
        self.notify.notify_one();
        Ok(())
    }

    /// Read access for inspection endpoints and tests.
    pub async fn read(&self) -> RwLockReadGuard<'_, JobQueue> {
        self.inner.read().await
    }

    pub async fn snapshot(&self) -> QueueSnapshot {
        self.inner.read().await.snapshot()
    }

    pub async fn write_snapshot(&self, path: &Path) -> Result<()> {
        let snapshot = self.snapshot().await;
        let raw = serde_json::to_vec_pretty(&snapshot)
            .map_err(|e| SignError::Internal(format!("queue snapshot: {}", e)))?;
        tokio::fs::write(path, raw).await?;
        tracing::info!(
            path = %path.display(),
            jobs = snapshot.jobs.len(),
            "Queue snapshot written"
        );
        Ok(())
    }

    /// Load a queue written by [`SharedQueue::write_snapshot`]. A missing file
    /// yields an empty queue.
    pub async fn restore(path: &Path, max_jobs: usize, retry: RetryPolicy) -> Result<JobQueue> {
        let raw = match tokio::fs::read(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(JobQueue::with_capacity(max_jobs).with_retry_policy(retry));
            }
            Err(e) => return Err(e.into()),
        };
        let snapshot: QueueSnapshot = serde_json::from_slice(&raw)
            .map_err(|e| SignError::InvalidInput(format!("{}: {}", path.display(), e)))?;
        let queue = JobQueue::from_snapshot(snapshot, max_jobs, retry);
        tracing::info!(
            path = %path.display(),
            jobs = queue.len(),
            pending = queue.pending_jobs().len(),
            "Queue restored from snapshot"
        );
        Ok(queue)
    }
}
