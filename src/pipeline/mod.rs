//! Per-job orchestration of a signing run.
//!
//! A run moves the request to `InProcess`, signs every document that is
//! neither rejected nor already signed (QR code, render, convert, store), and
//! finally marks the request `Signed`. Each signed document is written back
//! as soon as it is done, so a run that aborts midway leaves its finished
//! documents signed and the request `InProcess`. A redelivered job resumes
//! such a request: finished documents are carried forward, not re-rendered.

pub mod authorize;

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use crate::artifacts::ArtifactStore;
use crate::collab::{
    CommandConverter, CommandQrGenerator, Converter, PlaceholderRenderer, QrGenerator,
    RenderContext, Renderer,
};
use crate::config::{PipelineConfig, SignerConfig};
use crate::error::{Result, SignError};
use crate::progress::{ProgressEvent, ProgressPublisher};
use crate::queue::SignJob;
use crate::request::{
    Actor, Court, Document, RequestStatus, Signature, SignStatus, SigningRequest, User,
};
use crate::store::{RequestFilter, RequestPatch, SigningStore};
use crate::worker::JobHandler;

pub use authorize::authorize;

/// Placeholder receiving the signer's signature image.
pub const SIGNATURE_KEY: &str = "signatureImage";
/// Placeholder receiving the court's name.
pub const COURT_KEY: &str = "courtName";
/// Placeholder receiving the document's QR code image.
pub const QR_KEY: &str = "qrImage";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignOutcome {
    /// The request was already signed; nothing was touched.
    AlreadySigned,
    Signed {
        document_count: usize,
        newly_signed: usize,
    },
}

/// The external pieces a run calls for every document.
#[derive(Clone)]
pub struct Collaborators {
    pub renderer: Arc<dyn Renderer>,
    pub converter: Arc<dyn Converter>,
    pub qr: Arc<dyn QrGenerator>,
}

impl Collaborators {
    /// Built-in renderer plus the configured converter and QR programs.
    pub fn from_config(config: &SignerConfig) -> Self {
        Self {
            renderer: Arc::new(PlaceholderRenderer::new()),
            converter: Arc::new(CommandConverter::new(config.converter.clone())),
            qr: Arc::new(CommandQrGenerator::new(config.qr.clone())),
        }
    }
}

struct Resolved {
    court: Court,
    request: SigningRequest,
    user: User,
    signature: Signature,
}

pub struct SigningPipeline {
    store: Arc<dyn SigningStore>,
    collaborators: Collaborators,
    publisher: Arc<dyn ProgressPublisher>,
    artifacts: ArtifactStore,
    config: PipelineConfig,
}

impl SigningPipeline {
    pub fn new(
        store: Arc<dyn SigningStore>,
        collaborators: Collaborators,
        publisher: Arc<dyn ProgressPublisher>,
        artifacts: ArtifactStore,
        config: PipelineConfig,
    ) -> Self {
        Self {
            store,
            collaborators,
            publisher,
            artifacts,
            config,
        }
    }

    /// Execute one signing job.
    pub async fn sign(&self, job: &SignJob) -> Result<SignOutcome> {
        let Resolved {
            court,
            request,
            user,
            signature,
        } = self.resolve(job).await?;

        if request.status == RequestStatus::Signed {
            tracing::info!(request_id = %request.id, "Request already signed, skipping");
            return Ok(SignOutcome::AlreadySigned);
        }

        authorize(&user, &request)?;

        // Everything that can fail permanently without touching documents is
        // checked before the request leaves its current state.
        let template = self.artifacts.read_template(&request.template).await?;
        let signature_path = self.artifacts.resolve_image(&signature.image_path).await;

        let request = self.begin(request, &user.id).await?;
        let total = request.documents.len();
        let mut documents = Vec::with_capacity(total);
        let mut newly_signed = 0;

        for (index, document) in request.documents.iter().enumerate() {
            match document.sign_status {
                SignStatus::Rejected | SignStatus::Signed => {
                    tracing::debug!(
                        request_id = %request.id,
                        document_id = %document.id,
                        sign_status = ?document.sign_status,
                        "Carrying document forward"
                    );
                    documents.push(document.clone());
                }
                SignStatus::Unsigned => {
                    tracing::info!(
                        request_id = %request.id,
                        document_id = %document.id,
                        "Signing document {}/{}",
                        index + 1,
                        total
                    );
                    let signed = self
                        .sign_document(&request, document, &template, &court, &signature_path)
                        .await?;
                    self.persist_document(&request.id, &user.id, signed.clone())
                        .await?;
                    documents.push(signed);
                    newly_signed += 1;
                }
            }
            self.publish(&request.id, RequestStatus::InProcess, documents.len());
        }

        self.finish(&request, documents, &user.id).await?;
        tracing::info!(
            request_id = %request.id,
            document_count = total,
            newly_signed,
            "Request signed"
        );
        Ok(SignOutcome::Signed {
            document_count: total,
            newly_signed,
        })
    }

    async fn resolve(&self, job: &SignJob) -> Result<Resolved> {
        let court = self
            .store
            .find_court(&job.court_id)
            .await?
            .ok_or_else(|| SignError::CourtNotFound(job.court_id.clone()))?;
        let request = self
            .store
            .find_request(&RequestFilter::by_id(&job.request_id))
            .await?
            .ok_or_else(|| SignError::RequestNotFound(job.request_id.clone()))?;
        let user = self
            .store
            .find_user(&job.user_id)
            .await?
            .ok_or_else(|| SignError::UserNotFound(job.user_id.clone()))?;
        let signature = self
            .store
            .find_signature(&job.signature_id, &job.user_id)
            .await?
            .ok_or_else(|| SignError::SignatureNotFound {
                signature_id: job.signature_id.clone(),
                user_id: job.user_id.clone(),
            })?;

        Ok(Resolved {
            court,
            request,
            user,
            signature,
        })
    }

    /// Move the request into `InProcess`, or resume one that already is.
    async fn begin(&self, request: SigningRequest, user_id: &str) -> Result<SigningRequest> {
        if request.status == RequestStatus::InProcess {
            tracing::warn!(
                request_id = %request.id,
                signed = request.signed_count(),
                total = request.documents.len(),
                "Resuming interrupted signing run"
            );
            self.publish(&request.id, RequestStatus::InProcess, 0);
            return Ok(request);
        }

        let next = request
            .status
            .transition(RequestStatus::InProcess, Actor::Pipeline)?;
        let filter = RequestFilter::by_id(&request.id).with_status(request.status);
        let patch = RequestPatch::default()
            .status(next)
            .assigned_to(None)
            .updated_by(user_id);
        let updated = self
            .store
            .update_request(&filter, patch)
            .await?
            .ok_or_else(|| SignError::Conflict(request.id.clone()))?;

        self.publish(&updated.id, RequestStatus::InProcess, 0);
        Ok(updated)
    }

    async fn sign_document(
        &self,
        request: &SigningRequest,
        document: &Document,
        template: &[u8],
        court: &Court,
        signature_path: &Path,
    ) -> Result<Document> {
        let url = self.config.document_url(&document.id);
        let png = self
            .bounded("qr", self.collaborators.qr.generate(&url, self.config.qr_pixels))
            .await?;
        let qr_path = self
            .artifacts
            .write_qr(&request.id, &document.id, &png)
            .await?;

        match self
            .render_and_store(request, document, template, court, signature_path, &qr_path)
            .await
        {
            Ok(signed_path) => Ok(Document {
                sign_status: SignStatus::Signed,
                signed_at: Some(Utc::now()),
                signed_artifact_path: Some(path_string(signed_path)),
                qr_artifact_path: Some(path_string(qr_path)),
                ..document.clone()
            }),
            Err(e) => {
                // No document will point at this QR code.
                self.artifacts.discard(&qr_path).await;
                Err(e)
            }
        }
    }

    async fn render_and_store(
        &self,
        request: &SigningRequest,
        document: &Document,
        template: &[u8],
        court: &Court,
        signature_path: &Path,
        qr_path: &Path,
    ) -> Result<PathBuf> {
        let context = RenderContext::from_text_fields(&document.template_data)
            .image(SIGNATURE_KEY, signature_path, self.config.signature_size)
            .text(COURT_KEY, court.name.clone())
            .image(QR_KEY, qr_path, self.config.qr_size);

        let rendered = self
            .bounded("render", async {
                self.collaborators
                    .renderer
                    .render(template, &context)
                    .await
                    .map_err(|source| SignError::Render {
                        document_id: document.id.clone(),
                        source,
                    })
            })
            .await?;
        let converted = self
            .bounded("convert", self.collaborators.converter.convert(rendered))
            .await?;
        self.artifacts
            .write_signed(
                &request.id,
                &document.id,
                self.collaborators.converter.output_extension(),
                &converted,
            )
            .await
    }

    async fn persist_document(&self, request_id: &str, user_id: &str, document: Document) -> Result<()> {
        let filter = RequestFilter::by_id(request_id).with_status(RequestStatus::InProcess);
        let patch = RequestPatch::default().document(document).updated_by(user_id);
        self.store
            .update_request(&filter, patch)
            .await?
            .ok_or_else(|| SignError::Conflict(request_id.to_string()))?;
        Ok(())
    }

    async fn finish(&self, request: &SigningRequest, documents: Vec<Document>, user_id: &str) -> Result<()> {
        let next = RequestStatus::InProcess.transition(RequestStatus::Signed, Actor::Pipeline)?;
        let total = documents.len();
        let filter = RequestFilter::by_id(&request.id).with_status(RequestStatus::InProcess);
        let patch = RequestPatch::default()
            .status(next)
            .documents(documents)
            .document_count(total)
            .updated_by(user_id);
        self.store
            .update_request(&filter, patch)
            .await?
            .ok_or_else(|| SignError::Conflict(request.id.clone()))?;

        self.publish(&request.id, RequestStatus::Signed, total);
        Ok(())
    }

    async fn bounded<T, F>(&self, stage: &'static str, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let after = self.config.collaborator_timeout;
        tokio::time::timeout(after, call)
            .await
            .map_err(|_| SignError::Timeout { stage, after })?
    }

    fn publish(&self, request_id: &str, status: RequestStatus, document_count: usize) {
        self.publisher
            .publish(ProgressEvent::new(request_id, status, document_count));
    }
}

#[async_trait]
impl JobHandler for SigningPipeline {
    async fn handle(&self, job: &SignJob) -> Result<()> {
        match self.sign(job).await {
            Ok(_) => Ok(()),
            Err(e) => {
                tracing::error!(
                    request_id = %job.request_id,
                    user_id = %job.user_id,
                    kind = %e.kind(),
                    error = %e,
                    "Failed to sign request"
                );
                Err(e)
            }
        }
    }
}

fn path_string(path: PathBuf) -> String {
    path.to_string_lossy().into_owned()
}
