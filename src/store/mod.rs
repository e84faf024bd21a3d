//! Index store contract
//!
//! The ingestion pipeline and the query engine only talk to the search
//! cluster through [`IndexStore`] and [`ModelService`]. [`ElasticClient`]
//! implements both against the Elasticsearch REST API; [`MemoryStore`] is an
//! in-process index used by tests and local experiments.

mod elastic;
mod memory;
mod schema;

pub use elastic::{ElasticClient, ElasticClientConfig};
pub use memory::MemoryStore;
pub use schema::IndexSchema;

use crate::ingest::ImageDocument;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("TLS certificate verification failed for {host}: {detail}")]
    CertificateVerification { host: String, detail: String },

    #[error("Cannot connect to {host}: {detail}")]
    Connection { host: String, detail: String },

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Index already exists: {0}")]
    IndexAlreadyExists(String),

    #[error("Index not found: {0}")]
    IndexNotFound(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Request failed with status {status}: {body}")]
    Request { status: u16, body: String },

    #[error("Unexpected response: {0}")]
    Decode(String),
}

impl StoreError {
    pub fn is_certificate_error(&self) -> bool {
        matches!(self, Self::CertificateVerification { .. })
    }
}

/// Outcome of one document inside a bulk request; `Err` carries the reason
/// reported by the store.
pub type BulkItemResult = Result<(), String>;

/// Extra time the client waits past a bulk request's server-side `timeout`,
/// so the cluster's own timeout answer is read instead of being cut off
pub const BULK_TIMEOUT_GRACE: Duration = Duration::from_secs(10);

/// Approximate kNN request
#[derive(Debug, Clone, PartialEq)]
pub struct KnnQuery {
    pub field: String,
    pub query_vector: Vec<f32>,
    pub k: usize,
    pub num_candidates: usize,
    /// Fields returned for each hit
    pub fields: Vec<String>,
}

/// One ranked kNN result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub image_id: String,
    pub image_name: String,
    pub relative_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
}

/// Document store with kNN vector search
#[async_trait]
pub trait IndexStore: Send + Sync {
    async fn index_exists(&self, index: &str) -> Result<bool, StoreError>;

    /// Fails with [`StoreError::IndexAlreadyExists`] if the index is present
    async fn create_index(&self, index: &str, schema: &IndexSchema) -> Result<(), StoreError>;

    /// Fails with [`StoreError::IndexNotFound`] if the index is absent
    async fn delete_index(&self, index: &str) -> Result<(), StoreError>;

    /// Write a batch of documents. The returned vector is aligned with `docs`.
    /// An `Err` from this call means the whole batch was not accepted.
    async fn bulk_index(
        &self,
        index: &str,
        docs: &[ImageDocument],
        timeout: Duration,
    ) -> Result<Vec<BulkItemResult>, StoreError>;

    /// Exact lookup of a document's stored embedding by `image_id`
    async fn find_embedding(
        &self,
        index: &str,
        image_id: &str,
    ) -> Result<Option<Vec<f32>>, StoreError>;

    /// Hits in descending similarity order
    async fn knn_search(&self, index: &str, query: &KnnQuery) -> Result<Vec<SearchHit>, StoreError>;

    async fn count(&self, index: &str) -> Result<usize, StoreError>;
}

/// Models deployed inside the search cluster
#[async_trait]
pub trait ModelService: Send + Sync {
    /// Deployment state as reported by the cluster. `Ok(None)` means the model
    /// is known but has no deployment statistics; an unknown model fails with
    /// [`StoreError::ModelNotFound`].
    async fn deployment_state(&self, model_id: &str) -> Result<Option<String>, StoreError>;

    /// Embed free text with the deployed model
    async fn infer_text(&self, model_id: &str, text: &str) -> Result<Vec<f32>, StoreError>;
}
