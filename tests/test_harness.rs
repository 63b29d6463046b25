//! Test harness for signing pipeline, worker pool and API integration tests.
//!
//! Provides a seeded in-memory store, a scratch artifact root and scriptable
//! collaborators (renderer, converter, QR generator, progress publisher).

#![allow(dead_code)]

use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use courtsign::artifacts::ArtifactStore;
use courtsign::collab::{
    Converter, PlaceholderRenderer, QrGenerator, RenderContext, RenderValue, Renderer,
};
use courtsign::config::PipelineConfig;
use courtsign::error::{RenderError, Result, SignError};
use courtsign::pipeline::{Collaborators, SigningPipeline};
use courtsign::progress::{ProgressEvent, ProgressPublisher};
use courtsign::queue::SignJob;
use courtsign::request::{
    Court, Document, RequestStatus, Role, Signature, SigningRequest, User,
};
use courtsign::store::MemoryStore;

pub const COURT_ID: &str = "court-1";
pub const COURT_NAME: &str = "District Court of Example";
pub const OFFICER: &str = "officer-1";
pub const OFFICER_SIGNATURE: &str = "sig-officer";
pub const READER: &str = "reader-1";
pub const READER_SIGNATURE: &str = "sig-reader";
pub const OTHER_READER: &str = "reader-2";
pub const ADMIN: &str = "admin-1";
pub const TEMPLATE: &str = "order.html";
pub const TEMPLATE_BODY: &str =
    "<h1>{caseNumber}</h1>{%signatureImage}<p>{courtName}</p>{%qrImage}";

// =============================================================================
// Collaborator fakes
// =============================================================================

/// Keeps every published event, in order.
#[derive(Default)]
pub struct RecordingPublisher {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingPublisher {
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().unwrap().clone()
    }

    /// `(status, documentCount)` pairs for one request.
    pub fn trace(&self, request_id: &str) -> Vec<(u8, usize)> {
        self.events()
            .into_iter()
            .filter(|e| e.request_id == request_id)
            .map(|e| (e.status, e.document_count))
            .collect()
    }
}

impl ProgressPublisher for RecordingPublisher {
    fn publish(&self, event: ProgressEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// The built-in placeholder renderer, with call counting and injectable
/// failures keyed on a document's `caseNumber`.
#[derive(Default)]
pub struct FakeRenderer {
    inner: PlaceholderRenderer,
    calls: AtomicUsize,
    fail_cases: Mutex<HashSet<String>>,
}

impl FakeRenderer {
    pub fn fail_on_case(&self, case_number: &str) {
        self.fail_cases
            .lock()
            .unwrap()
            .insert(case_number.to_string());
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Renderer for FakeRenderer {
    async fn render(
        &self,
        template: &[u8],
        context: &RenderContext,
    ) -> std::result::Result<Vec<u8>, RenderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(RenderValue::Text(case)) = context.get("caseNumber") {
            if self.fail_cases.lock().unwrap().contains(case) {
                return Err(RenderError::MissingPlaceholder("judgeName".to_string()));
            }
        }
        self.inner.render(template, context).await
    }
}

/// Prefixes its input so outputs are recognisable. Can fail transiently a
/// fixed number of times, or stall.
#[derive(Default)]
pub struct FakeConverter {
    calls: AtomicUsize,
    failures_left: AtomicUsize,
    delay: Mutex<Option<Duration>>,
}

impl FakeConverter {
    pub fn fail_next(&self, times: usize) {
        self.failures_left.store(times, Ordering::SeqCst);
    }

    pub fn stall_for(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Converter for FakeConverter {
    async fn convert(&self, document: Vec<u8>) -> Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(SignError::Convert("converter unavailable".to_string()));
        }
        let mut out = b"%PDF-".to_vec();
        out.extend_from_slice(&document);
        Ok(out)
    }
}

/// Records the URLs it was asked to encode.
#[derive(Default)]
pub struct FakeQr {
    urls: Mutex<Vec<String>>,
}

impl FakeQr {
    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }
}

#[async_trait]
impl QrGenerator for FakeQr {
    async fn generate(&self, url: &str, _size: u32) -> Result<Vec<u8>> {
        self.urls.lock().unwrap().push(url.to_string());
        Ok(b"\x89PNG-fake".to_vec())
    }
}

// =============================================================================
// Fixture
// =============================================================================

/// Seeded store plus scratch artifact directory with one template and the
/// signature images of both signers.
pub struct Fixture {
    pub dir: TempDir,
    pub store: Arc<MemoryStore>,
    pub publisher: Arc<RecordingPublisher>,
    pub renderer: Arc<FakeRenderer>,
    pub converter: Arc<FakeConverter>,
    pub qr: Arc<FakeQr>,
    pub artifacts: ArtifactStore,
}

impl Fixture {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let artifacts = ArtifactStore::new(dir.path());

        tokio::fs::create_dir_all(artifacts.templates_dir())
            .await
            .unwrap();
        tokio::fs::write(artifacts.templates_dir().join(TEMPLATE), TEMPLATE_BODY)
            .await
            .unwrap();
        tokio::fs::create_dir_all(artifacts.signatures_dir())
            .await
            .unwrap();
        for file in ["officer.png", "reader.png"] {
            tokio::fs::write(artifacts.signatures_dir().join(file), b"png")
                .await
                .unwrap();
        }

        let store = Arc::new(MemoryStore::new());
        store
            .insert_court(Court {
                id: COURT_ID.to_string(),
                name: COURT_NAME.to_string(),
            })
            .await;
        for (id, role) in [
            (OFFICER, Role::Officer),
            (READER, Role::Reader),
            (OTHER_READER, Role::Reader),
            (ADMIN, Role::Admin),
        ] {
            store
                .insert_user(User {
                    id: id.to_string(),
                    name: id.to_string(),
                    role,
                })
                .await;
        }
        store
            .insert_signature(Signature {
                id: OFFICER_SIGNATURE.to_string(),
                user_id: OFFICER.to_string(),
                image_path: "signatures/officer.png".to_string(),
            })
            .await;
        store
            .insert_signature(Signature {
                id: READER_SIGNATURE.to_string(),
                user_id: READER.to_string(),
                image_path: "reader.png".to_string(),
            })
            .await;

        Self {
            dir,
            store,
            publisher: Arc::new(RecordingPublisher::default()),
            renderer: Arc::new(FakeRenderer::default()),
            converter: Arc::new(FakeConverter::default()),
            qr: Arc::new(FakeQr::default()),
            artifacts,
        }
    }

    pub fn pipeline(&self) -> SigningPipeline {
        self.pipeline_with(PipelineConfig::default())
    }

    pub fn pipeline_with(&self, config: PipelineConfig) -> SigningPipeline {
        let collaborators = Collaborators {
            renderer: self.renderer.clone(),
            converter: self.converter.clone(),
            qr: self.qr.clone(),
        };
        SigningPipeline::new(
            self.store.clone(),
            collaborators,
            self.publisher.clone(),
            self.artifacts.clone(),
            config,
        )
    }

    pub async fn add(&self, request: SigningRequest) {
        self.store.insert_request(request).await;
    }

    pub async fn request(&self, id: &str) -> SigningRequest {
        self.store.get_request(id).await.unwrap()
    }
}

// =============================================================================
// Builders
// =============================================================================

pub fn document(id: &str) -> Document {
    Document::new(id).with_field("caseNumber", format!("CASE-{}", id))
}

/// Request created by the reader and sent to the officer.
pub fn ready_request(id: &str, documents: Vec<Document>) -> SigningRequest {
    let mut request = SigningRequest::new(id, TEMPLATE, READER);
    request.title = format!("Request {}", id);
    for doc in documents {
        request = request.with_document(doc);
    }
    request.status = RequestStatus::ReadyForSignature;
    request.assigned_to = Some(OFFICER.to_string());
    request
}

/// Request the officer delegated back to the reader.
pub fn delegated_request(id: &str, documents: Vec<Document>) -> SigningRequest {
    let mut request = ready_request(id, documents);
    request.status = RequestStatus::Delegated;
    request.assigned_to = Some(READER.to_string());
    request.delegated_to = Some(READER.to_string());
    request
}

pub fn officer_job(request_id: &str) -> SignJob {
    SignJob::new(request_id, OFFICER, OFFICER_SIGNATURE, COURT_ID)
}

pub fn reader_job(request_id: &str) -> SignJob {
    SignJob::new(request_id, READER, READER_SIGNATURE, COURT_ID)
}

// =============================================================================
// Waiting helpers
// =============================================================================

/// Wait for a condition to become true with timeout
pub async fn wait_for<F, Fut>(
    condition: F,
    timeout_duration: Duration,
    poll_interval: Duration,
) -> bool
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = tokio::time::Instant::now();
    while start.elapsed() < timeout_duration {
        if condition().await {
            return true;
        }
        tokio::time::sleep(poll_interval).await;
    }
    false
}

/// Assert a condition eventually becomes true
pub async fn assert_eventually<F, Fut>(condition: F, timeout_duration: Duration, message: &str)
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let result = wait_for(condition, timeout_duration, Duration::from_millis(10)).await;
    assert!(result, "{}", message);
}
