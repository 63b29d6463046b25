//! Status changes driven by people rather than the signing pipeline: sending a
//! request to an officer, rejecting it (wholly or per document), delegating it
//! back to its reader, and moving a signed request towards dispatch.
//!
//! Each operation reads the request with a narrowing filter, checks the
//! transition against the state machine, and writes back with a filter pinned
//! to the status it read, so it cannot clobber an in-flight signing run.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;

use crate::error::{Result, SignError};
use crate::request::{Actor, Document, RequestStatus, Role, SignStatus, SigningRequest};
use crate::store::{RequestFilter, RequestPatch, SigningStore};

/// Public view of a single document, served to QR code scans.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentView {
    pub request_id: String,
    pub title: String,
    pub document: Document,
}

#[derive(Clone)]
pub struct RequestWorkflow {
    store: Arc<dyn SigningStore>,
}

impl RequestWorkflow {
    pub fn new(store: Arc<dyn SigningStore>) -> Self {
        Self { store }
    }

    /// Hand an unsigned request to an officer.
    pub async fn send_for_signature(
        &self,
        request_id: &str,
        creator_id: &str,
        officer_id: &str,
    ) -> Result<SigningRequest> {
        let filter = RequestFilter::by_id(request_id)
            .with_status(RequestStatus::Unsigned)
            .created_by(creator_id);
        let request = self.load(&filter).await?;

        if request.documents.is_empty() {
            return Err(SignError::InvalidInput(
                "cannot send a request without documents".to_string(),
            ));
        }

        let officer = self
            .store
            .find_user(officer_id)
            .await?
            .filter(|u| u.role == Role::Officer)
            .ok_or_else(|| SignError::InvalidInput(format!("invalid officer: {}", officer_id)))?;

        let patch = RequestPatch::default()
            .assigned_to(Some(officer.id))
            .updated_by(creator_id);
        self.advance(&request, RequestStatus::ReadyForSignature, patch)
            .await
    }

    /// Reject the whole request; every document inherits the reason.
    pub async fn reject_request(
        &self,
        request_id: &str,
        officer_id: &str,
        reason: &str,
    ) -> Result<SigningRequest> {
        let reason = required_reason(reason)?;
        let filter = RequestFilter::by_id(request_id)
            .with_status(RequestStatus::ReadyForSignature)
            .assigned_to(officer_id);
        let request = self.load(&filter).await?;

        let now = Utc::now();
        let documents = request
            .documents
            .iter()
            .cloned()
            .map(|mut d| {
                d.sign_status = SignStatus::Rejected;
                d.rejection_reason = Some(reason.clone());
                d.rejected_at = Some(now);
                d
            })
            .collect();

        let patch = RequestPatch::default()
            .documents(documents)
            .rejection_reason(Some(reason))
            .updated_by(officer_id);
        self.advance(&request, RequestStatus::Rejected, patch).await
    }

    /// Reject one document; the request itself stays with the officer.
    pub async fn reject_document(
        &self,
        request_id: &str,
        document_id: &str,
        officer_id: &str,
        reason: &str,
    ) -> Result<SigningRequest> {
        let reason = required_reason(reason)?;
        let filter = RequestFilter::by_id(request_id)
            .with_status(RequestStatus::ReadyForSignature)
            .assigned_to(officer_id)
            .containing_document(document_id);
        let request = self.load(&filter).await?;

        let mut document = request
            .document(document_id)
            .cloned()
            .ok_or_else(|| SignError::DocumentNotFound {
                request_id: request_id.to_string(),
                document_id: document_id.to_string(),
            })?;
        document.sign_status = SignStatus::Rejected;
        document.rejection_reason = Some(reason);
        document.rejected_at = Some(Utc::now());

        let patch = RequestPatch::default()
            .document(document)
            .updated_by(officer_id);
        self.store
            .update_request(&filter, patch)
            .await?
            .ok_or_else(|| SignError::Conflict(request_id.to_string()))
    }

    /// Send the request back to the reader who created it, who then signs it.
    pub async fn delegate(&self, request_id: &str, officer_id: &str) -> Result<SigningRequest> {
        let filter = RequestFilter::by_id(request_id)
            .with_status(RequestStatus::ReadyForSignature)
            .assigned_to(officer_id);
        let request = self.load(&filter).await?;

        let patch = RequestPatch::default()
            .delegated_to(Some(request.created_by.clone()))
            .updated_by(officer_id);
        self.advance(&request, RequestStatus::Delegated, patch).await
    }

    pub async fn mark_ready_for_dispatch(
        &self,
        request_id: &str,
        user_id: &str,
    ) -> Result<SigningRequest> {
        let request = self.load(&RequestFilter::by_id(request_id)).await?;
        let patch = RequestPatch::default().updated_by(user_id);
        self.advance(&request, RequestStatus::ReadyForDispatch, patch)
            .await
    }

    pub async fn dispatch(&self, request_id: &str, user_id: &str) -> Result<SigningRequest> {
        let request = self.load(&RequestFilter::by_id(request_id)).await?;
        let patch = RequestPatch::default().updated_by(user_id);
        self.advance(&request, RequestStatus::Dispatched, patch).await
    }

    pub async fn document_lookup(&self, document_id: &str) -> Result<DocumentView> {
        let request = self
            .store
            .find_request_by_document(document_id)
            .await?
            .ok_or_else(|| SignError::RequestNotFound(format!("owner of document {}", document_id)))?;
        let document = request
            .document(document_id)
            .cloned()
            .ok_or_else(|| SignError::DocumentNotFound {
                request_id: request.id.clone(),
                document_id: document_id.to_string(),
            })?;

        Ok(DocumentView {
            request_id: request.id,
            title: request.title,
            document,
        })
    }

    async fn load(&self, filter: &RequestFilter) -> Result<SigningRequest> {
        self.store
            .find_request(filter)
            .await?
            .ok_or_else(|| SignError::RequestNotFound(filter.id.clone()))
    }

    async fn advance(
        &self,
        request: &SigningRequest,
        to: RequestStatus,
        patch: RequestPatch,
    ) -> Result<SigningRequest> {
        let to = request.status.transition(to, Actor::Endpoint)?;
        let filter = RequestFilter::by_id(&request.id).with_status(request.status);
        let updated = self
            .store
            .update_request(&filter, patch.status(to))
            .await?
            .ok_or_else(|| SignError::Conflict(request.id.clone()))?;

        tracing::info!(
            request_id = %updated.id,
            from = %request.status,
            to = %updated.status,
            "Request status changed"
        );
        Ok(updated)
    }
}

fn required_reason(reason: &str) -> Result<String> {
    let reason = reason.trim();
    if reason.is_empty() {
        return Err(SignError::InvalidInput(
            "rejection reason is required".to_string(),
        ));
    }
    Ok(reason.to_string())
}
