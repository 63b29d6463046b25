mod test_harness;

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use courtsign::api::{router, ApiState};
use courtsign::error::FailureKind;
use courtsign::progress::{BroadcastPublisher, ProgressEvent, ProgressPublisher};
use courtsign::queue::{JobQueue, SharedQueue};
use courtsign::request::{RequestStatus, RequestWorkflow, SigningRequest};
use test_harness::*;

struct TestApi {
    fx: Fixture,
    queue: Arc<SharedQueue>,
    publisher: BroadcastPublisher,
    app: Router,
}

async fn test_api(queue: JobQueue) -> TestApi {
    let fx = Fixture::new().await;
    let queue = Arc::new(SharedQueue::new(queue));
    let publisher = BroadcastPublisher::new(16);
    let state = ApiState {
        queue: queue.clone(),
        workflow: Arc::new(RequestWorkflow::new(fx.store.clone())),
        publisher: publisher.clone(),
    };
    TestApi {
        fx,
        queue,
        publisher,
        app: router(state),
    }
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

fn sign_job_body(request_id: &str) -> Value {
    json!({
        "kind": "sign-document",
        "requestId": request_id,
        "userId": OFFICER,
        "signatureId": OFFICER_SIGNATURE,
        "courtId": COURT_ID,
    })
}

#[tokio::test]
async fn test_enqueue_accepts_and_lists() {
    let api = test_api(JobQueue::new()).await;

    let (status, body) = send(&api.app, "POST", "/api/jobs", Some(sign_job_body("r1"))).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let job_id = body["jobId"].as_str().unwrap().to_string();

    let (status, body) = send(&api.app, "GET", "/api/jobs", None).await;
    assert_eq!(status, StatusCode::OK);
    let jobs = body.as_array().unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0]["id"], job_id);
    assert_eq!(jobs[0]["requestId"], "r1");
    assert_eq!(jobs[0]["status"], "pending");
}

#[tokio::test]
async fn test_enqueue_rejects_invalid_jobs() {
    let api = test_api(JobQueue::new()).await;

    let mut missing = sign_job_body("r1");
    missing.as_object_mut().unwrap().remove("signatureId");
    let (status, _) = send(&api.app, "POST", "/api/jobs", Some(missing)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let mut blank = sign_job_body("r1");
    blank["courtId"] = json!("");
    let (status, body) = send(&api.app, "POST", "/api/jobs", Some(blank)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("courtId"));

    let mut wrong_kind = sign_job_body("r1");
    wrong_kind["kind"] = json!("shred-document");
    let (status, _) = send(&api.app, "POST", "/api/jobs", Some(wrong_kind)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert!(api.queue.read().await.is_empty());
}

#[tokio::test]
async fn test_enqueue_when_full() {
    let api = test_api(JobQueue::with_capacity(1)).await;

    let (status, _) = send(&api.app, "POST", "/api/jobs", Some(sign_job_body("r1"))).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let (status, _) = send(&api.app, "POST", "/api/jobs", Some(sign_job_body("r2"))).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_dead_jobs_and_retry() {
    let api = test_api(JobQueue::new()).await;
    let (_, body) = send(&api.app, "POST", "/api/jobs", Some(sign_job_body("r1"))).await;
    let job_id = body["jobId"].as_str().unwrap().to_string();

    {
        let delivery = api.queue.next().await;
        let err = courtsign::error::SignError::TemplateNotFound("order.html".to_string());
        assert_eq!(err.kind(), FailureKind::Permanent);
        api.queue.fail(&delivery.id, &err).await;
    }

    let (status, body) = send(&api.app, "GET", "/api/jobs/dead", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["id"], job_id);
    assert_eq!(body[0]["status"], "failed");
    assert!(body[0]["lastError"].as_str().unwrap().contains("order.html"));

    let uri = format!("/api/jobs/{}/retry", job_id);
    let (status, _) = send(&api.app, "POST", &uri, None).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let (_, body) = send(&api.app, "GET", "/api/jobs/dead", None).await;
    assert!(body.as_array().unwrap().is_empty());

    // Retrying a job that is not dead is a client error.
    let (status, _) = send(&api.app, "POST", &uri, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let unknown = format!("/api/jobs/{}/retry", uuid::Uuid::new_v4());
    let (status, _) = send(&api.app, "POST", &unknown, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_workflow_endpoints() {
    let api = test_api(JobQueue::new()).await;
    api.fx
        .add(
            SigningRequest::new("r1", TEMPLATE, READER)
                .with_document(document("d1"))
                .with_document(document("d2")),
        )
        .await;

    let (status, body) = send(
        &api.app,
        "POST",
        "/api/requests/r1/send",
        Some(json!({"creatorId": READER, "officerId": OFFICER})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "readyForSignature");
    assert_eq!(body["assignedTo"], OFFICER);

    let (status, _) = send(
        &api.app,
        "POST",
        "/api/requests/r1/documents/d2/reject",
        Some(json!({"officerId": OFFICER})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(
        &api.app,
        "POST",
        "/api/requests/r1/documents/d2/reject",
        Some(json!({"officerId": OFFICER, "reason": "unsigned annex"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["documents"][1]["signStatus"], "rejected");

    let (status, _) = send(
        &api.app,
        "POST",
        "/api/requests/r1/delegate",
        Some(json!({"officerId": "officer-9"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(
        &api.app,
        "POST",
        "/api/requests/r1/delegate",
        Some(json!({"officerId": OFFICER})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "delegated");
    assert_eq!(body["delegatedTo"], READER);

    let (status, _) = send(
        &api.app,
        "POST",
        "/api/requests/r1/dispatch",
        Some(json!({"userId": OFFICER})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    api.fx.pipeline().sign(&reader_job("r1")).await.unwrap();
    assert_eq!(api.fx.request("r1").await.status, RequestStatus::Signed);

    for (path, expected) in [("ready", "readyForDispatch"), ("dispatch", "dispatched")] {
        let (status, body) = send(
            &api.app,
            "POST",
            &format!("/api/requests/r1/{}", path),
            Some(json!({"userId": OFFICER})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], expected);
    }
}

#[tokio::test]
async fn test_reject_request_endpoint() {
    let api = test_api(JobQueue::new()).await;
    api.fx
        .add(ready_request("r1", vec![document("d1")]))
        .await;

    let (status, body) = send(
        &api.app,
        "POST",
        "/api/requests/r1/reject",
        Some(json!({"officerId": OFFICER, "reason": "incomplete"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "rejected");
    assert_eq!(body["rejectionReason"], "incomplete");
}

#[tokio::test]
async fn test_document_lookup_endpoint() {
    let api = test_api(JobQueue::new()).await;
    api.fx
        .add(ready_request("r1", vec![document("d1")]))
        .await;

    let (status, body) = send(&api.app, "GET", "/api/documents/d1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["requestId"], "r1");
    assert_eq!(body["document"]["templateData"]["caseNumber"], "CASE-d1");

    let (status, body) = send(&api.app, "GET", "/api/documents/nope", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_progress_events_stream() {
    let api = test_api(JobQueue::new()).await;

    let response = api
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/requests/r1/events")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers()[header::CONTENT_TYPE]
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));

    api.publisher
        .publish(ProgressEvent::new("r2", RequestStatus::InProcess, 0));
    api.publisher
        .publish(ProgressEvent::new("r1", RequestStatus::InProcess, 2));

    let mut body = response.into_body();
    let deadline = Instant::now() + Duration::from_secs(2);
    let mut received = String::new();
    while !received.contains("documentCount") {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let frame = tokio::time::timeout(remaining, body.frame())
            .await
            .expect("progress event should arrive")
            .unwrap()
            .unwrap();
        if let Ok(data) = frame.into_data() {
            received.push_str(&String::from_utf8_lossy(&data));
        }
    }

    assert!(received.contains("event: progress"));
    assert!(received.contains(r#""requestId":"r1""#));
    assert!(received.contains(r#""status":4"#));
    assert!(received.contains(r#""documentCount":2"#));
    assert!(!received.contains(r#""requestId":"r2""#));
}
