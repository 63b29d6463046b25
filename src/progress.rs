use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::request::RequestStatus;

/// Milestone of a signing run, as pushed to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub request_id: String,
    /// Numeric status code, see [`RequestStatus::code`].
    pub status: u8,
    pub document_count: usize,
}

impl ProgressEvent {
    pub fn new(request_id: impl Into<String>, status: RequestStatus, document_count: usize) -> Self {
        Self {
            request_id: request_id.into(),
            status: status.code(),
            document_count,
        }
    }

    pub fn request_status(&self) -> Option<RequestStatus> {
        RequestStatus::from_code(self.status)
    }
}

/// Best-effort fan-out of progress events. Publishing never fails and never
/// blocks the pipeline; subscribers that are absent or lagging miss events.
pub trait ProgressPublisher: Send + Sync {
    fn publish(&self, event: ProgressEvent);
}

/// In-process publisher backed by a broadcast channel.
#[derive(Debug, Clone)]
pub struct BroadcastPublisher {
    tx: broadcast::Sender<ProgressEvent>,
}

impl BroadcastPublisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for BroadcastPublisher {
    fn default() -> Self {
        Self::new(256)
    }
}

impl ProgressPublisher for BroadcastPublisher {
    fn publish(&self, event: ProgressEvent) {
        tracing::debug!(
            request_id = %event.request_id,
            status = event.status,
            document_count = event.document_count,
            "Progress"
        );
        // No subscribers is fine; delivery is best-effort.
        let _ = self.tx.send(event);
    }
}
