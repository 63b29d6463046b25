use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::WorkerConfig;
use crate::error::{Result, SignError};
use crate::queue::{Delivery, FailureDisposition, SharedQueue, SignJob};
use crate::worker::serializer::{Turn, UserSerializer};

/// Executes one delivered job. Implemented by the signing pipeline; tests
/// plug in their own handlers.
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    async fn handle(&self, job: &SignJob) -> Result<()>;
}

/// Pulls jobs off the queue and runs them with bounded parallelism and
/// one-at-a-time execution per user.
///
/// A job takes three steps before its handler runs:
/// 1. a prefetch permit (bounds how many jobs are leased at once),
/// 2. its user's turn from the [`UserSerializer`],
/// 3. an execution permit (bounds concurrently running handlers).
///
/// The queue leases at most one job per user, so a user's backlog never
/// ties up prefetch permits. Execution permits are only requested once the
/// user's turn has arrived.
pub struct WorkerPool {
    queue: Arc<SharedQueue>,
    handler: Arc<dyn JobHandler>,
    serializer: UserSerializer,
    execution: Arc<Semaphore>,
    prefetch: Arc<Semaphore>,
    config: WorkerConfig,
}

impl WorkerPool {
    pub fn new(config: WorkerConfig, queue: Arc<SharedQueue>, handler: Arc<dyn JobHandler>) -> Self {
        Self {
            queue,
            handler,
            serializer: UserSerializer::new(),
            execution: Arc::new(Semaphore::new(config.concurrency.max(1))),
            prefetch: Arc::new(Semaphore::new(config.prefetch.max(1))),
            config,
        }
    }

    pub fn serializer(&self) -> &UserSerializer {
        &self.serializer
    }

    /// Dispatch loop. Returns after `shutdown` is cancelled and every leased
    /// job has finished.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        tracing::info!(
            concurrency = self.config.concurrency,
            prefetch = self.config.prefetch,
            "Worker pool started"
        );
        let mut tasks = JoinSet::new();

        loop {
            let permit = tokio::select! {
                _ = shutdown.cancelled() => break,
                permit = self.prefetch.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let delivery = tokio::select! {
                _ = shutdown.cancelled() => break,
                delivery = self.queue.next() => delivery,
            };

            // Admission happens here, in dequeue order, so per-user order
            // follows queue order regardless of task scheduling.
            let turn = self.serializer.admit(&delivery.job.user_id);
            let pool = self.clone();
            tasks.spawn(async move {
                let _permit = permit;
                pool.process(delivery, turn).await;
            });

            while let Some(result) = tasks.try_join_next() {
                if let Err(e) = result {
                    tracing::error!(error = %e, "Dispatch task failed");
                }
            }
        }

        tracing::info!(in_flight = tasks.len(), "Worker pool draining");
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                tracing::error!(error = %e, "Dispatch task failed");
            }
        }
        tracing::info!("Worker pool stopped");
    }

    async fn process(&self, delivery: Delivery, turn: Turn) {
        let _turn = turn.ready().await;
        let _permit = match self.execution.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                self.queue.release(&delivery.id).await;
                return;
            }
        };

        tracing::info!(
            job_id = %delivery.id,
            request_id = %delivery.job.request_id,
            user_id = %delivery.job.user_id,
            attempt = delivery.attempt,
            "Processing sign job"
        );

        // The handler runs in its own task so a panic stays contained to
        // this job.
        let handler = self.handler.clone();
        let job = delivery.job.clone();
        let outcome = tokio::spawn(async move { handler.handle(&job).await }).await;

        let error = match outcome {
            Ok(Ok(())) => {
                self.queue.complete(&delivery.id).await;
                tracing::info!(job_id = %delivery.id, "Sign job completed");
                return;
            }
            Ok(Err(e)) => e,
            Err(join_error) if join_error.is_panic() => {
                SignError::Panicked(format!("job {}", delivery.id))
            }
            Err(join_error) => SignError::Internal(join_error.to_string()),
        };

        match self.queue.fail(&delivery.id, &error).await {
            Some(FailureDisposition::Retry { attempt, delay }) => tracing::warn!(
                job_id = %delivery.id,
                attempt,
                retry_in = ?delay,
                error = %error,
                "Sign job failed, will retry"
            ),
            Some(FailureDisposition::Dead) => tracing::error!(
                job_id = %delivery.id,
                kind = %error.kind(),
                error = %error,
                "Sign job failed permanently"
            ),
            None => tracing::warn!(
                job_id = %delivery.id,
                "Failed job was no longer leased"
            ),
        }
    }
}
