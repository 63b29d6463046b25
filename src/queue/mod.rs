pub mod job;
#[allow(clippy::module_inception)]
pub mod queue;
pub mod retry;
pub mod shared;

pub use job::{Delivery, JobHandle, JobPayload, JobRecord, JobStatus, SignJob};
pub use queue::{FailureDisposition, JobQueue, QueueSnapshot};
pub use retry::RetryPolicy;
pub use shared::SharedQueue;
