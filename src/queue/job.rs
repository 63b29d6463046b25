use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, SignError};

/// Intent to sign every pending document of a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignJob {
    pub request_id: String,
    /// The signer. Also the serialization key in the worker pool.
    pub user_id: String,
    pub signature_id: String,
    pub court_id: String,
}

impl SignJob {
    pub fn new(
        request_id: impl Into<String>,
        user_id: impl Into<String>,
        signature_id: impl Into<String>,
        court_id: impl Into<String>,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            user_id: user_id.into(),
            signature_id: signature_id.into(),
            court_id: court_id.into(),
        }
    }

    /// Every field must be present and non-blank.
    pub fn validate(&self) -> Result<()> {
        let fields = [
            ("requestId", &self.request_id),
            ("userId", &self.user_id),
            ("signatureId", &self.signature_id),
            ("courtId", &self.court_id),
        ];
        for (name, value) in fields {
            if value.trim().is_empty() {
                return Err(SignError::InvalidJob(format!("missing {}", name)));
            }
        }
        Ok(())
    }
}

/// Wire form of an enqueue call: `{"kind": "sign-document", ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum JobPayload {
    #[serde(rename = "sign-document")]
    SignDocument(SignJob),
}

impl JobPayload {
    pub fn into_job(self) -> SignJob {
        match self {
            JobPayload::SignDocument(job) => job,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    /// Dead: exhausted its retries or failed permanently.
    Failed,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Queue bookkeeping for one enqueued job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub id: Uuid,
    pub job: SignJob,
    pub status: JobStatus,
    /// Deliveries so far, including the current one.
    pub attempts: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Earliest instant the job may be delivered again. Not persisted: a
    /// restored job is ready immediately.
    #[serde(skip)]
    pub ready_at: Option<Instant>,
}

impl JobRecord {
    pub fn new(job: SignJob) -> Self {
        Self {
            id: Uuid::new_v4(),
            job,
            status: JobStatus::Pending,
            attempts: 0,
            last_error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            ready_at: None,
        }
    }

    pub fn is_ready(&self, now: Instant) -> bool {
        self.status == JobStatus::Pending && self.ready_at.map_or(true, |at| at <= now)
    }
}

/// Returned by `enqueue`; processing happens asynchronously.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobHandle {
    pub job_id: Uuid,
}

/// A job leased to the worker pool. Must be answered with `complete`, `fail`
/// or `release`.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub id: Uuid,
    pub job: SignJob,
    pub attempt: u32,
}
