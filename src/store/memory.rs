use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::{Result, SignError};
use crate::request::{Court, Signature, SigningRequest, User};
use crate::store::{RequestFilter, RequestPatch, SigningStore};

/// Fixture file layout accepted by [`MemoryStore::from_seed`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSeed {
    #[serde(default)]
    pub courts: Vec<Court>,
    #[serde(default)]
    pub users: Vec<User>,
    #[serde(default)]
    pub signatures: Vec<Signature>,
    #[serde(default)]
    pub requests: Vec<SigningRequest>,
}

/// Process-local store. Every successful `update_request` is counted so tests
/// can assert that a failed run left the store untouched.
#[derive(Debug, Default)]
pub struct MemoryStore {
    courts: RwLock<HashMap<String, Court>>,
    users: RwLock<HashMap<String, User>>,
    signatures: RwLock<HashMap<String, Signature>>,
    requests: RwLock<HashMap<String, SigningRequest>>,
    updates: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_seed(seed: StoreSeed) -> Self {
        Self {
            courts: RwLock::new(seed.courts.into_iter().map(|c| (c.id.clone(), c)).collect()),
            users: RwLock::new(seed.users.into_iter().map(|u| (u.id.clone(), u)).collect()),
            signatures: RwLock::new(
                seed.signatures
                    .into_iter()
                    .map(|s| (s.id.clone(), s))
                    .collect(),
            ),
            requests: RwLock::new(
                seed.requests
                    .into_iter()
                    .map(|r| (r.id.clone(), r))
                    .collect(),
            ),
            updates: AtomicUsize::new(0),
        }
    }

    /// Load a JSON fixture file (see [`StoreSeed`]).
    pub async fn from_json_file(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read(path).await?;
        let seed: StoreSeed = serde_json::from_slice(&raw)
            .map_err(|e| SignError::InvalidInput(format!("{}: {}", path.display(), e)))?;
        tracing::info!(
            path = %path.display(),
            requests = seed.requests.len(),
            users = seed.users.len(),
            "Loaded store seed"
        );
        Ok(Self::from_seed(seed))
    }

    pub async fn insert_court(&self, court: Court) {
        self.courts.write().await.insert(court.id.clone(), court);
    }

    pub async fn insert_user(&self, user: User) {
        self.users.write().await.insert(user.id.clone(), user);
    }

    pub async fn insert_signature(&self, signature: Signature) {
        self.signatures
            .write()
            .await
            .insert(signature.id.clone(), signature);
    }

    pub async fn insert_request(&self, request: SigningRequest) {
        self.requests
            .write()
            .await
            .insert(request.id.clone(), request);
    }

    pub async fn get_request(&self, id: &str) -> Option<SigningRequest> {
        self.requests.read().await.get(id).cloned()
    }

    /// Number of updates applied since creation. Inserts are not counted.
    pub fn update_count(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SigningStore for MemoryStore {
    async fn find_court(&self, id: &str) -> Result<Option<Court>> {
        Ok(self.courts.read().await.get(id).cloned())
    }

    async fn find_user(&self, id: &str) -> Result<Option<User>> {
        Ok(self.users.read().await.get(id).cloned())
    }

    async fn find_signature(&self, id: &str, owner_id: &str) -> Result<Option<Signature>> {
        Ok(self
            .signatures
            .read()
            .await
            .get(id)
            .filter(|s| s.user_id == owner_id)
            .cloned())
    }

    async fn find_request(&self, filter: &RequestFilter) -> Result<Option<SigningRequest>> {
        Ok(self
            .requests
            .read()
            .await
            .get(&filter.id)
            .filter(|r| filter.matches(r))
            .cloned())
    }

    async fn find_request_by_document(&self, document_id: &str) -> Result<Option<SigningRequest>> {
        Ok(self
            .requests
            .read()
            .await
            .values()
            .find(|r| r.document(document_id).is_some())
            .cloned())
    }

    async fn update_request(
        &self,
        filter: &RequestFilter,
        patch: RequestPatch,
    ) -> Result<Option<SigningRequest>> {
        let mut requests = self.requests.write().await;
        let Some(current) = requests.get(&filter.id).filter(|r| filter.matches(r)) else {
            return Ok(None);
        };

        // Patch a copy so a rejected patch leaves the stored record intact.
        let mut updated = current.clone();
        patch.apply_to(&mut updated)?;
        requests.insert(updated.id.clone(), updated.clone());
        self.updates.fetch_add(1, Ordering::SeqCst);
        Ok(Some(updated))
    }
}
