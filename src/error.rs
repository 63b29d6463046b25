use std::time::Duration;

use thiserror::Error;

use crate::request::RequestStatus;

/// How the worker pool should treat a failed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Retrying cannot help; the job goes straight to the dead set.
    Permanent,
    /// Infrastructure hiccup; the job is requeued with backoff.
    Transient,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::Permanent => write!(f, "permanent"),
            FailureKind::Transient => write!(f, "transient"),
        }
    }
}

/// Failures raised by a render collaborator. Each variant names what went wrong
/// so operators can fix the template or the document data.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    #[error("placeholder {0:?} has no value")]
    MissingPlaceholder(String),

    #[error("image for placeholder {placeholder:?} not found at {path}")]
    ImageNotFound { placeholder: String, path: String },

    #[error("malformed template: {0}")]
    MalformedTemplate(String),
}

#[derive(Error, Debug)]
pub enum SignError {
    #[error("Court not found: {0}")]
    CourtNotFound(String),

    #[error("Request not found: {0}")]
    RequestNotFound(String),

    #[error("Document {document_id} not found in request {request_id}")]
    DocumentNotFound {
        request_id: String,
        document_id: String,
    },

    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("Signature {signature_id} not found for user {user_id}")]
    SignatureNotFound {
        signature_id: String,
        user_id: String,
    },

    #[error("Template file not found: {0}")]
    TemplateNotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Illegal status transition from {from} to {to}")]
    IllegalTransition {
        from: RequestStatus,
        to: RequestStatus,
    },

    #[error("Request {0} changed underneath the signing run")]
    Conflict(String),

    #[error("Invalid job: {0}")]
    InvalidJob(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Job queue is at capacity")]
    QueueFull,

    #[error("Job not found: {0}")]
    JobNotFound(uuid::Uuid),

    #[error("Render failed for document {document_id}: {source}")]
    Render {
        document_id: String,
        #[source]
        source: RenderError,
    },

    #[error("Conversion failed: {0}")]
    Convert(String),

    #[error("QR generation failed: {0}")]
    Qr(String),

    #[error("{stage} timed out after {after:?}")]
    Timeout { stage: &'static str, after: Duration },

    #[error("Artifact I/O error: {0}")]
    Artifact(#[from] std::io::Error),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Job handler panicked: {0}")]
    Panicked(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SignError {
    /// Classify the error for the retry policy.
    pub fn kind(&self) -> FailureKind {
        match self {
            SignError::Convert(_)
            | SignError::Qr(_)
            | SignError::Timeout { .. }
            | SignError::Artifact(_)
            | SignError::Store(_) => FailureKind::Transient,
            SignError::CourtNotFound(_)
            | SignError::RequestNotFound(_)
            | SignError::DocumentNotFound { .. }
            | SignError::UserNotFound(_)
            | SignError::SignatureNotFound { .. }
            | SignError::TemplateNotFound(_)
            | SignError::Unauthorized(_)
            | SignError::IllegalTransition { .. }
            | SignError::Conflict(_)
            | SignError::InvalidJob(_)
            | SignError::InvalidInput(_)
            | SignError::QueueFull
            | SignError::JobNotFound(_)
            | SignError::Render { .. }
            | SignError::Panicked(_)
            | SignError::Internal(_) => FailureKind::Permanent,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind() == FailureKind::Transient
    }
}

pub type Result<T> = std::result::Result<T, SignError>;
