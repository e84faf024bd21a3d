//! Similarity query engine
//!
//! Three query shapes (free text, an already indexed image, an uploaded
//! image) are turned into a query vector and resolved by one kNN search.

mod readiness;

pub use readiness::{AvailabilityMonitor, ModelReadiness};

use crate::embedding::{check_dimension, EmbeddingError, ImageEmbedder};
use crate::store::{IndexStore, KnnQuery, ModelService, SearchHit, StoreError};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Vector field searched by every query
pub const KNN_FIELD: &str = "image_embedding";
/// Neighbours returned
pub const KNN_K: usize = 5;
/// Candidates examined per shard before picking the top `KNN_K`
pub const KNN_NUM_CANDIDATES: usize = 10;
/// Fields returned per hit; the stored vector is never fetched for display
pub const RESULT_FIELDS: [&str; 3] = ["image_id", "image_name", "relative_path"];

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Index '{0}' does not exist; run ingestion first")]
    IndexMissing(String),

    #[error("No indexed image with id '{0}'")]
    UnknownImage(String),

    #[error("Query text cannot be empty")]
    EmptyQuery,

    #[error("Embedding provider did not respond within {0:?}")]
    ProviderTimeout(Duration),

    #[error("Query embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What the caller is searching with
#[derive(Debug, Clone, PartialEq)]
pub enum SimilarityQuery {
    /// Free text, embedded by the model deployed in the cluster
    Text(String),
    /// An indexed image, referenced by `image_id`; its stored vector is reused
    Existing(String),
    /// A freshly uploaded image on local disk
    Upload(PathBuf),
}

/// Resolves [`SimilarityQuery`]s against one index
#[derive(Clone)]
pub struct QueryEngine {
    store: Arc<dyn IndexStore>,
    models: Arc<dyn ModelService>,
    embedder: Arc<dyn ImageEmbedder>,
    index: String,
    text_model_id: String,
    timeout: Duration,
}

impl QueryEngine {
    pub fn new(
        store: Arc<dyn IndexStore>,
        models: Arc<dyn ModelService>,
        embedder: Arc<dyn ImageEmbedder>,
        index: impl Into<String>,
        text_model_id: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            models,
            embedder,
            index: index.into(),
            text_model_id: text_model_id.into(),
            timeout,
        }
    }

    pub fn index(&self) -> &str {
        &self.index
    }

    pub fn text_model_id(&self) -> &str {
        &self.text_model_id
    }

    pub async fn index_exists(&self) -> Result<bool, SearchError> {
        Ok(self.store.index_exists(&self.index).await?)
    }

    /// Run a query. Fails with [`SearchError::IndexMissing`] when nothing has
    /// been indexed yet, which is distinct from an empty result.
    pub async fn search(&self, query: &SimilarityQuery) -> Result<Vec<SearchHit>, SearchError> {
        if !self.index_exists().await? {
            return Err(SearchError::IndexMissing(self.index.clone()));
        }

        let vector = self.query_vector(query).await?;
        self.knn(vector).await
    }

    /// Produce the query vector for `query`
    pub async fn query_vector(&self, query: &SimilarityQuery) -> Result<Vec<f32>, SearchError> {
        let vector = match query {
            SimilarityQuery::Text(text) => {
                let text = text.trim();
                if text.is_empty() {
                    return Err(SearchError::EmptyQuery);
                }
                self.infer_text(text).await?
            }
            SimilarityQuery::Existing(image_id) => self
                .store
                .find_embedding(&self.index, image_id)
                .await
                .map_err(|e| self.index_error(e))?
                .ok_or_else(|| SearchError::UnknownImage(image_id.clone()))?,
            SimilarityQuery::Upload(path) => self.embed_upload(path.clone()).await?,
        };

        check_dimension(&vector, self.embedder.dimension())?;
        Ok(vector)
    }

    /// kNN over `image_embedding`, hits in the store's ranking order
    pub async fn knn(&self, query_vector: Vec<f32>) -> Result<Vec<SearchHit>, SearchError> {
        let query = KnnQuery {
            field: KNN_FIELD.to_string(),
            query_vector,
            k: KNN_K,
            num_candidates: KNN_NUM_CANDIDATES,
            fields: RESULT_FIELDS.iter().map(|f| f.to_string()).collect(),
        };

        let hits = self
            .store
            .knn_search(&self.index, &query)
            .await
            .map_err(|e| self.index_error(e))?;
        debug!("kNN search on {} returned {} hits", self.index, hits.len());
        Ok(hits)
    }

    /// Text inference with a request timeout, retried once
    async fn infer_text(&self, text: &str) -> Result<Vec<f32>, SearchError> {
        for attempt in 1..=2 {
            let inference = self.models.infer_text(&self.text_model_id, text);
            match tokio::time::timeout(self.timeout, inference).await {
                Ok(result) => return Ok(result?),
                Err(_) => warn!(
                    "Text inference on {} timed out after {:?} (attempt {}/2)",
                    self.text_model_id, self.timeout, attempt
                ),
            }
        }
        Err(SearchError::ProviderTimeout(self.timeout))
    }

    async fn embed_upload(&self, path: PathBuf) -> Result<Vec<f32>, SearchError> {
        let embedder = self.embedder.clone();
        let task = tokio::task::spawn_blocking(move || embedder.embed_image(&path));

        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(result)) => Ok(result?),
            Ok(Err(e)) => Err(EmbeddingError::GenerationError(e.to_string()).into()),
            Err(_) => Err(SearchError::ProviderTimeout(self.timeout)),
        }
    }

    fn index_error(&self, err: StoreError) -> SearchError {
        match err {
            StoreError::IndexNotFound(_) => SearchError::IndexMissing(self.index.clone()),
            other => SearchError::Store(other),
        }
    }
}
