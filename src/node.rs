use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::api::{run_api, ApiState};
use crate::artifacts::ArtifactStore;
use crate::config::SignerConfig;
use crate::error::Result;
use crate::pipeline::{Collaborators, SigningPipeline};
use crate::progress::BroadcastPublisher;
use crate::queue::{JobQueue, SharedQueue};
use crate::request::RequestWorkflow;
use crate::store::{MemoryStore, SigningStore};
use crate::worker::WorkerPool;

/// One signing service process: store, queue, worker pool and HTTP API.
pub struct Node {
    pub config: SignerConfig,
    pub store: Arc<MemoryStore>,
    pub queue: Arc<SharedQueue>,
    pub publisher: BroadcastPublisher,
    pub workflow: Arc<RequestWorkflow>,
    pub pool: Arc<WorkerPool>,
}

impl Node {
    /// Wire the components together. Loads the store seed and the queue
    /// snapshot when configured.
    pub async fn new(config: SignerConfig) -> Result<Self> {
        let store = Arc::new(match &config.seed_path {
            Some(path) => MemoryStore::from_json_file(path).await?,
            None => MemoryStore::new(),
        });
        let shared_store: Arc<dyn SigningStore> = store.clone();

        let capacity = config.worker.queue_capacity;
        let queue = match &config.worker.snapshot_path {
            Some(path) => SharedQueue::restore(path, capacity, config.retry.clone()).await?,
            None => JobQueue::with_capacity(capacity).with_retry_policy(config.retry.clone()),
        };
        let queue = Arc::new(SharedQueue::new(queue));

        let publisher = BroadcastPublisher::default();
        let pipeline = SigningPipeline::new(
            shared_store.clone(),
            Collaborators::from_config(&config),
            Arc::new(publisher.clone()),
            ArtifactStore::new(&config.storage_root),
            config.pipeline.clone(),
        );
        let pool = Arc::new(WorkerPool::new(
            config.worker.clone(),
            queue.clone(),
            Arc::new(pipeline),
        ));

        Ok(Self {
            workflow: Arc::new(RequestWorkflow::new(shared_store)),
            config,
            store,
            queue,
            publisher,
            pool,
        })
    }

    pub fn api_state(&self) -> ApiState {
        ApiState {
            queue: self.queue.clone(),
            workflow: self.workflow.clone(),
            publisher: self.publisher.clone(),
        }
    }

    /// Run until `shutdown` is cancelled.
    ///
    /// On shutdown the API stops accepting connections, the pool finishes the
    /// jobs it already leased, and the queue is written to the snapshot path
    /// if one is configured.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        tracing::info!(
            listen_addr = %self.config.listen_addr,
            storage_root = %self.config.storage_root.display(),
            concurrency = self.config.worker.concurrency,
            max_attempts = self.config.retry.max_attempts,
            "Starting signing node"
        );

        let api = tokio::spawn(run_api(
            self.config.listen_addr,
            self.api_state(),
            shutdown.clone(),
        ));

        self.pool.clone().run(shutdown.clone()).await;

        if let Err(e) = api.await {
            tracing::error!(error = %e, "API task failed");
        }

        if let Some(path) = &self.config.worker.snapshot_path {
            self.queue.write_snapshot(path).await?;
        }
        tracing::info!("Signing node stopped");
        Ok(())
    }
}
