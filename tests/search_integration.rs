/// Query engine integration tests
///
/// Text, existing-image and uploaded-image queries resolved against the
/// in-memory store, with stub models standing in for the cluster.
use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use visearch::embedding::{EmbeddingError, ImageEmbedder};
use visearch::ingest::ImageDocument;
use visearch::search::{QueryEngine, SearchError, SimilarityQuery, KNN_K};
use visearch::store::{IndexSchema, IndexStore, MemoryStore, ModelService, StoreError};

const INDEX: &str = "my-image-embeddings";
const MODEL: &str = "sentence-transformers__clip-vit-b-32-multilingual-v1";

/// Text model that maps known words to fixed vectors, optionally stalling
/// for the first `stalls` calls
struct StubTextModel {
    delay: Duration,
    stalls: usize,
    calls: AtomicUsize,
}

impl StubTextModel {
    fn responsive() -> Self {
        Self::stalling(0, Duration::ZERO)
    }

    fn stalling(stalls: usize, delay: Duration) -> Self {
        Self {
            delay,
            stalls,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ModelService for StubTextModel {
    async fn deployment_state(&self, _model_id: &str) -> Result<Option<String>, StoreError> {
        Ok(Some("started".to_string()))
    }

    async fn infer_text(&self, model_id: &str, text: &str) -> Result<Vec<f32>, StoreError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.stalls {
            tokio::time::sleep(self.delay).await;
        }
        match text {
            "sunset" => Ok(vec![1.0, 0.0, 0.0]),
            "forest" => Ok(vec![0.0, 1.0, 0.0]),
            _ => Err(StoreError::Request {
                status: 400,
                body: format!("{} cannot embed '{}'", model_id, text),
            }),
        }
    }
}

/// Image embedder that reads three comma-separated floats from the file
struct CsvEmbedder;

impl ImageEmbedder for CsvEmbedder {
    fn embed_image(&self, path: &Path) -> Result<Vec<f32>, EmbeddingError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| EmbeddingError::InvalidInput(e.to_string()))?;
        content
            .trim()
            .split(',')
            .map(|v| {
                v.trim()
                    .parse::<f32>()
                    .map_err(|e| EmbeddingError::GenerationError(e.to_string()))
            })
            .collect()
    }

    fn dimension(&self) -> usize {
        3
    }

    fn model_name(&self) -> &str {
        "csv"
    }
}

fn schema() -> IndexSchema {
    IndexSchema::from_json(
        r#"{ "settings": {}, "mappings": { "properties": {
            "image_embedding": { "type": "dense_vector", "dims": 3, "similarity": "cosine" }
        } } }"#,
    )
    .unwrap()
}

fn doc(id: &str, vector: [f32; 3]) -> ImageDocument {
    ImageDocument {
        image_id: id.to_string(),
        image_name: format!("{}.jpg", id),
        relative_path: format!("2021/{}.jpg", id),
        image_embedding: vector.to_vec(),
        exif: None,
    }
}

async fn seeded_store(docs: &[ImageDocument]) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store.create_index(INDEX, &schema()).await.unwrap();
    let results = store
        .bulk_index(INDEX, docs, Duration::from_secs(1))
        .await
        .unwrap();
    assert!(results.iter().all(|r| r.is_ok()));
    store
}

fn engine(store: Arc<MemoryStore>, models: Arc<StubTextModel>, timeout: Duration) -> QueryEngine {
    QueryEngine::new(store, models, Arc::new(CsvEmbedder), INDEX, MODEL, timeout)
}

fn gallery() -> Vec<ImageDocument> {
    vec![
        doc("sunset", [0.9, 0.1, 0.0]),
        doc("pines", [0.1, 0.9, 0.0]),
        doc("dusk", [0.7, 0.3, 0.0]),
        doc("oak", [0.0, 1.0, 0.1]),
        doc("sea", [0.0, 0.0, 1.0]),
        doc("glow", [1.0, 0.0, 0.05]),
        doc("moss", [0.2, 0.8, 0.3]),
    ]
}

#[tokio::test]
async fn test_text_query_ranks_by_similarity() {
    let store = seeded_store(&gallery()).await;
    let engine = engine(store, Arc::new(StubTextModel::responsive()), Duration::from_secs(5));

    let hits = engine
        .search(&SimilarityQuery::Text("sunset".to_string()))
        .await
        .unwrap();

    assert_eq!(hits.len(), KNN_K);
    assert_eq!(hits[0].image_id, "glow");
    assert_eq!(hits[1].image_id, "sunset");
    assert_eq!(hits[1].relative_path, "2021/sunset.jpg");
    assert_eq!(hits[1].image_name, "sunset.jpg");
}

#[tokio::test]
async fn test_fewer_than_k_documents_returns_all() {
    let store = seeded_store(&gallery()[..2]).await;
    let engine = engine(store, Arc::new(StubTextModel::responsive()), Duration::from_secs(5));

    let hits = engine
        .search(&SimilarityQuery::Text("forest".to_string()))
        .await
        .unwrap();

    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].image_id, "pines");
}

#[tokio::test]
async fn test_missing_index_is_distinct_from_empty_result() {
    let store = Arc::new(MemoryStore::new());
    let engine = engine(store.clone(), Arc::new(StubTextModel::responsive()), Duration::from_secs(5));

    let err = engine
        .search(&SimilarityQuery::Text("sunset".to_string()))
        .await
        .unwrap_err();
    assert!(matches!(err, SearchError::IndexMissing(ref index) if index == INDEX));

    store.create_index(INDEX, &schema()).await.unwrap();
    let hits = engine
        .search(&SimilarityQuery::Text("sunset".to_string()))
        .await
        .unwrap();
    assert!(hits.is_empty());
}

#[tokio::test]
async fn test_existing_image_reuses_stored_vector() {
    let store = seeded_store(&gallery()).await;
    let models = Arc::new(StubTextModel::responsive());
    let engine = engine(store, models.clone(), Duration::from_secs(5));

    let query = SimilarityQuery::Existing("pines".to_string());
    let vector = engine.query_vector(&query).await.unwrap();
    assert_eq!(vector, vec![0.1, 0.9, 0.0]);

    let hits = engine.search(&query).await.unwrap();
    assert_eq!(hits[0].image_id, "pines");
    assert_eq!(models.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_unknown_image_id() {
    let store = seeded_store(&gallery()).await;
    let engine = engine(store, Arc::new(StubTextModel::responsive()), Duration::from_secs(5));

    let err = engine
        .search(&SimilarityQuery::Existing("volcano".to_string()))
        .await
        .unwrap_err();
    assert!(matches!(err, SearchError::UnknownImage(ref id) if id == "volcano"));
}

#[tokio::test]
async fn test_empty_text_is_rejected() {
    let store = seeded_store(&gallery()).await;
    let models = Arc::new(StubTextModel::responsive());
    let engine = engine(store, models.clone(), Duration::from_secs(5));

    let err = engine
        .search(&SimilarityQuery::Text("   ".to_string()))
        .await
        .unwrap_err();
    assert!(matches!(err, SearchError::EmptyQuery));
    assert_eq!(models.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_uploaded_image_query() {
    let temp = TempDir::new().unwrap();
    let upload = temp.path().join("query.jpg");
    std::fs::write(&upload, "0.0, 0.1, 0.9").unwrap();

    let store = seeded_store(&gallery()).await;
    let engine = engine(store, Arc::new(StubTextModel::responsive()), Duration::from_secs(5));

    let hits = engine.search(&SimilarityQuery::Upload(upload)).await.unwrap();
    assert_eq!(hits[0].image_id, "sea");
}

#[tokio::test]
async fn test_wrong_dimension_query_vector_is_rejected() {
    let temp = TempDir::new().unwrap();
    let upload = temp.path().join("query.jpg");
    std::fs::write(&upload, "0.5, 0.5").unwrap();

    let store = seeded_store(&gallery()).await;
    let engine = engine(store, Arc::new(StubTextModel::responsive()), Duration::from_secs(5));

    let err = engine.search(&SimilarityQuery::Upload(upload)).await.unwrap_err();
    assert!(matches!(
        err,
        SearchError::Embedding(EmbeddingError::DimensionMismatch { expected: 3, actual: 2 })
    ));
}

#[tokio::test]
async fn test_text_inference_retried_once_after_timeout() {
    let store = seeded_store(&gallery()).await;
    let models = Arc::new(StubTextModel::stalling(1, Duration::from_secs(5)));
    let engine = engine(store, models.clone(), Duration::from_millis(100));

    let hits = engine
        .search(&SimilarityQuery::Text("forest".to_string()))
        .await
        .unwrap();

    assert_eq!(hits[0].image_id, "oak");
    assert_eq!(models.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_text_inference_gives_up_after_second_timeout() {
    let store = seeded_store(&gallery()).await;
    let models = Arc::new(StubTextModel::stalling(2, Duration::from_secs(5)));
    let engine = engine(store, models.clone(), Duration::from_millis(100));

    let err = engine
        .search(&SimilarityQuery::Text("forest".to_string()))
        .await
        .unwrap_err();

    assert!(matches!(err, SearchError::ProviderTimeout(_)));
    assert_eq!(models.calls.load(Ordering::SeqCst), 2);
}
