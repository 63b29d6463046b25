//! Persistence boundary for signing requests and their lookups.
//!
//! The pipeline only reads and conditionally updates. Every update carries a
//! [`RequestFilter`]; when the stored record no longer matches (for example the
//! status moved on), the update is refused with `Ok(None)` and the caller
//! decides what that means. Updates are atomic per request; there are no
//! multi-request transactions.

pub mod memory;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::{Result, SignError};
use crate::request::{Court, Document, RequestStatus, Signature, SigningRequest, User};

pub use memory::{MemoryStore, StoreSeed};

#[async_trait]
pub trait SigningStore: Send + Sync {
    async fn find_court(&self, id: &str) -> Result<Option<Court>>;

    async fn find_user(&self, id: &str) -> Result<Option<User>>;

    /// Signatures are only visible to their owner.
    async fn find_signature(&self, id: &str, owner_id: &str) -> Result<Option<Signature>>;

    async fn find_request(&self, filter: &RequestFilter) -> Result<Option<SigningRequest>>;

    /// Locate the request that owns a document (public QR lookups).
    async fn find_request_by_document(&self, document_id: &str) -> Result<Option<SigningRequest>>;

    /// Apply `patch` if the current record matches `filter`. Returns the
    /// updated record, or `None` when nothing matched.
    async fn update_request(
        &self,
        filter: &RequestFilter,
        patch: RequestPatch,
    ) -> Result<Option<SigningRequest>>;
}

/// Predicate over a stored request. `id` is always required.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestFilter {
    pub id: String,
    pub status: Option<RequestStatus>,
    pub assigned_to: Option<String>,
    pub created_by: Option<String>,
    pub document_id: Option<String>,
}

impl RequestFilter {
    pub fn by_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status: RequestStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn assigned_to(mut self, user_id: impl Into<String>) -> Self {
        self.assigned_to = Some(user_id.into());
        self
    }

    pub fn created_by(mut self, user_id: impl Into<String>) -> Self {
        self.created_by = Some(user_id.into());
        self
    }

    pub fn containing_document(mut self, document_id: impl Into<String>) -> Self {
        self.document_id = Some(document_id.into());
        self
    }

    pub fn matches(&self, request: &SigningRequest) -> bool {
        request.id == self.id
            && self.status.map_or(true, |s| request.status == s)
            && self
                .assigned_to
                .as_deref()
                .map_or(true, |u| request.assigned_to.as_deref() == Some(u))
            && self
                .created_by
                .as_deref()
                .map_or(true, |u| request.created_by == u)
            && self
                .document_id
                .as_deref()
                .map_or(true, |d| request.document(d).is_some())
    }
}

/// Partial update of a request. `None` leaves a field untouched; the nested
/// `Option`s distinguish "clear" from "leave alone".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestPatch {
    pub status: Option<RequestStatus>,
    pub assigned_to: Option<Option<String>>,
    pub delegated_to: Option<Option<String>>,
    pub rejection_reason: Option<Option<String>>,
    /// Replace the whole document sequence. Must not shrink it.
    pub documents: Option<Vec<Document>>,
    /// Replace a single document, matched by id.
    pub document: Option<Document>,
    pub document_count: Option<usize>,
    pub updated_by: Option<String>,
}

impl RequestPatch {
    pub fn status(mut self, status: RequestStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn assigned_to(mut self, user_id: Option<String>) -> Self {
        self.assigned_to = Some(user_id);
        self
    }

    pub fn delegated_to(mut self, user_id: Option<String>) -> Self {
        self.delegated_to = Some(user_id);
        self
    }

    pub fn rejection_reason(mut self, reason: Option<String>) -> Self {
        self.rejection_reason = Some(reason);
        self
    }

    pub fn documents(mut self, documents: Vec<Document>) -> Self {
        self.documents = Some(documents);
        self
    }

    pub fn document(mut self, document: Document) -> Self {
        self.document = Some(document);
        self
    }

    pub fn document_count(mut self, count: usize) -> Self {
        self.document_count = Some(count);
        self
    }

    pub fn updated_by(mut self, user_id: impl Into<String>) -> Self {
        self.updated_by = Some(user_id.into());
        self
    }

    /// Apply the patch in place, enforcing the record invariants: the
    /// document sequence never shrinks and `assignedTo` is cleared whenever
    /// the request leaves an assignable state.
    pub fn apply_to(self, request: &mut SigningRequest) -> Result<()> {
        if let Some(documents) = &self.documents {
            if documents.len() < request.documents.len() {
                return Err(SignError::Internal(format!(
                    "document sequence of request {} cannot shrink ({} -> {})",
                    request.id,
                    request.documents.len(),
                    documents.len()
                )));
            }
        }
        if let Some(document) = &self.document {
            if request.document(&document.id).is_none() {
                return Err(SignError::DocumentNotFound {
                    request_id: request.id.clone(),
                    document_id: document.id.clone(),
                });
            }
        }

        if let Some(status) = self.status {
            request.status = status;
        }
        if let Some(assigned_to) = self.assigned_to {
            request.assigned_to = assigned_to;
        }
        if !request.status.holds_assignee() {
            request.assigned_to = None;
        }
        if let Some(delegated_to) = self.delegated_to {
            request.delegated_to = delegated_to;
        }
        if let Some(reason) = self.rejection_reason {
            request.rejection_reason = reason;
        }
        if let Some(documents) = self.documents {
            request.documents = documents;
        }
        if let Some(document) = self.document {
            if let Some(slot) = request.documents.iter_mut().find(|d| d.id == document.id) {
                *slot = document;
            }
        }
        if let Some(count) = self.document_count {
            request.document_count = Some(count);
        }
        if let Some(updated_by) = self.updated_by {
            request.updated_by = Some(updated_by);
        }
        request.updated_at = Some(Utc::now());
        Ok(())
    }
}
