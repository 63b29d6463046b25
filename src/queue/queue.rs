use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{FailureKind, Result, SignError};
use crate::queue::job::{Delivery, JobHandle, JobRecord, JobStatus, SignJob};
use crate::queue::retry::RetryPolicy;

const DEFAULT_MAX_JOBS: usize = 10_000;

/// What happened to a job after a failed delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    /// Requeued; next delivery no earlier than `delay` from now.
    Retry { attempt: u32, delay: Duration },
    /// Moved to the dead set.
    Dead,
}

/// Serializable form of the queue, written on shutdown and read on start.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueSnapshot {
    pub jobs: Vec<JobRecord>,
    /// Pending delivery order at the time of the snapshot.
    pub order: Vec<Uuid>,
}

/// Signing job queue: records keyed by id plus a FIFO of pending ids.
///
/// Each user is a partition. At most one job per user is leased at a time,
/// and a user's jobs are delivered in order: a job backing off after a
/// transient failure keeps its place and holds back that user's later jobs
/// until it completes or goes dead. Across users, delivery is in enqueue
/// order among ready jobs. A delivered job stays `Running` until it is
/// completed, failed or released, so a crash between delivery and completion
/// is recovered with [`JobQueue::requeue_in_flight`] (at-least-once).
#[derive(Debug)]
pub struct JobQueue {
    jobs: HashMap<Uuid, JobRecord>,
    order: VecDeque<Uuid>,
    max_jobs: usize,
    retry: RetryPolicy,
    remove_on_complete: bool,
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl JobQueue {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_JOBS)
    }

    pub fn with_capacity(max_jobs: usize) -> Self {
        Self {
            jobs: HashMap::new(),
            order: VecDeque::new(),
            max_jobs,
            retry: RetryPolicy::default(),
            remove_on_complete: true,
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Keep completed records around for inspection instead of dropping them.
    pub fn keep_completed(mut self) -> Self {
        self.remove_on_complete = false;
        self
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Add a job. Fails if a field is missing or the queue is at capacity.
    pub fn push(&mut self, job: SignJob) -> Result<JobHandle> {
        job.validate()?;
        if self.is_full() {
            return Err(SignError::QueueFull);
        }
        let record = JobRecord::new(job);
        let handle = JobHandle { job_id: record.id };
        self.order.push_back(record.id);
        self.jobs.insert(record.id, record);
        Ok(handle)
    }

    /// Lease the oldest ready job whose user has nothing leased and nothing
    /// earlier still waiting out a backoff.
    pub fn pop_ready(&mut self, now: Instant) -> Option<Delivery> {
        let mut blocked: HashSet<&str> = self
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Running)
            .map(|j| j.job.user_id.as_str())
            .collect();

        let mut position = None;
        for (index, id) in self.order.iter().enumerate() {
            let Some(job) = self.jobs.get(id) else {
                continue;
            };
            let user = job.job.user_id.as_str();
            if blocked.contains(user) {
                continue;
            }
            if job.is_ready(now) {
                position = Some(index);
                break;
            }
            blocked.insert(user);
        }

        let id = self.order.remove(position?)?;
        let job = self.jobs.get_mut(&id)?;
        job.status = JobStatus::Running;
        job.attempts += 1;
        job.started_at = Some(Utc::now());
        job.ready_at = None;
        Some(Delivery {
            id,
            job: job.job.clone(),
            attempt: job.attempts,
        })
    }

    /// Earliest instant at which a pending job becomes ready, if any.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.order
            .iter()
            .filter_map(|id| self.jobs.get(id))
            .filter(|job| job.status == JobStatus::Pending)
            .filter_map(|job| job.ready_at)
            .min()
    }

    pub fn complete(&mut self, id: &Uuid) -> bool {
        let Some(job) = self.jobs.get_mut(id) else {
            return false;
        };
        if job.status != JobStatus::Running {
            return false;
        }
        if self.remove_on_complete {
            self.jobs.remove(id);
        } else {
            job.status = JobStatus::Completed;
            job.completed_at = Some(Utc::now());
        }
        true
    }

    /// Record a failed delivery and apply the retry policy.
    pub fn fail(
        &mut self,
        id: &Uuid,
        error: &str,
        kind: FailureKind,
        now: Instant,
    ) -> Option<FailureDisposition> {
        let job = self.jobs.get_mut(id)?;
        if job.status != JobStatus::Running {
            return None;
        }
        job.last_error = Some(error.to_string());

        if kind == FailureKind::Transient && self.retry.allows_retry(job.attempts) {
            let delay = self.retry.delay_for(job.attempts);
            job.status = JobStatus::Pending;
            job.ready_at = Some(now + delay);
            let attempt = job.attempts;
            let user_id = job.job.user_id.clone();
            // Back in line ahead of the same user's later jobs.
            let position = self.order.iter().position(|other| {
                self.jobs
                    .get(other)
                    .map_or(false, |j| j.job.user_id == user_id)
            });
            match position {
                Some(index) => self.order.insert(index, *id),
                None => self.order.push_back(*id),
            }
            Some(FailureDisposition::Retry { attempt, delay })
        } else {
            job.status = JobStatus::Failed;
            job.completed_at = Some(Utc::now());
            Some(FailureDisposition::Dead)
        }
    }

    /// Return a leased job to the head of the queue without charging an
    /// attempt.
    pub fn release(&mut self, id: &Uuid) -> bool {
        let Some(job) = self.jobs.get_mut(id) else {
            return false;
        };
        if job.status != JobStatus::Running {
            return false;
        }
        job.status = JobStatus::Pending;
        job.attempts = job.attempts.saturating_sub(1);
        self.order.push_front(*id);
        true
    }

    /// Make every leased job deliverable again. Returns how many were
    /// requeued.
    pub fn requeue_in_flight(&mut self) -> usize {
        let mut running: Vec<&JobRecord> = self
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Running)
            .collect();
        running.sort_by_key(|j| j.created_at);
        let ids: Vec<Uuid> = running.iter().map(|j| j.id).collect();

        for id in ids.iter().rev() {
            if let Some(job) = self.jobs.get_mut(id) {
                job.status = JobStatus::Pending;
                job.ready_at = None;
            }
            self.order.push_front(*id);
        }
        ids.len()
    }

    /// Put a dead job back in line with a fresh attempt budget.
    pub fn retry_dead(&mut self, id: &Uuid) -> Result<()> {
        let job = self.jobs.get_mut(id).ok_or(SignError::JobNotFound(*id))?;
        if job.status != JobStatus::Failed {
            return Err(SignError::InvalidInput(format!(
                "job {} is {}, not failed",
                id, job.status
            )));
        }
        job.status = JobStatus::Pending;
        job.attempts = 0;
        job.ready_at = None;
        job.completed_at = None;
        self.order.push_back(*id);
        Ok(())
    }

    pub fn get_job(&self, id: &Uuid) -> Option<&JobRecord> {
        self.jobs.get(id)
    }

    /// All jobs sorted chronologically by creation time.
    pub fn all_jobs(&self) -> Vec<&JobRecord> {
        let mut jobs: Vec<&JobRecord> = self.jobs.values().collect();
        jobs.sort_by_key(|j| j.created_at);
        jobs
    }

    /// Pending jobs in delivery order.
    pub fn pending_jobs(&self) -> Vec<&JobRecord> {
        self.order
            .iter()
            .filter_map(|id| self.jobs.get(id))
            .collect()
    }

    pub fn dead_jobs(&self) -> Vec<&JobRecord> {
        let mut jobs: Vec<&JobRecord> = self
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Failed)
            .collect();
        jobs.sort_by_key(|j| j.completed_at);
        jobs
    }

    pub fn running_count(&self) -> usize {
        self.jobs
            .values()
            .filter(|j| j.status == JobStatus::Running)
            .count()
    }

    /// Drop completed records. Dead jobs are kept for inspection.
    pub fn cleanup_finished_jobs(&mut self) -> usize {
        let before = self.jobs.len();
        self.jobs.retain(|_, job| job.status != JobStatus::Completed);
        before - self.jobs.len()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.jobs.len() >= self.max_jobs
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            jobs: self.all_jobs().into_iter().cloned().collect(),
            order: self.order.iter().copied().collect(),
        }
    }

    /// Rebuild a queue from a snapshot. Jobs that were running when the
    /// snapshot was taken are redelivered first.
    pub fn from_snapshot(snapshot: QueueSnapshot, max_jobs: usize, retry: RetryPolicy) -> Self {
        let mut queue = Self::with_capacity(max_jobs).with_retry_policy(retry);
        for mut job in snapshot.jobs {
            job.ready_at = None;
            queue.jobs.insert(job.id, job);
        }
        queue.order = snapshot
            .order
            .into_iter()
            .filter(|id| {
                queue
                    .jobs
                    .get(id)
                    .map(|j| j.status == JobStatus::Pending)
                    .unwrap_or(false)
            })
            .collect();
        queue.requeue_in_flight();
        queue
    }
}
