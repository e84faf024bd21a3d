// In-process index store with exact cosine kNN

use super::{BulkItemResult, IndexSchema, IndexStore, KnnQuery, SearchHit, StoreError};
use crate::ingest::ImageDocument;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

struct MemoryIndex {
    dims: Option<usize>,
    docs: Vec<ImageDocument>,
}

/// In-memory [`IndexStore`]
///
/// Mirrors the behaviour the pipeline relies on: documents whose embedding
/// length disagrees with the mapping are rejected individually, duplicate
/// `image_id`s are stored side by side, and kNN ranks by cosine similarity.
#[derive(Default)]
pub struct MemoryStore {
    indices: RwLock<HashMap<String, MemoryIndex>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, MemoryIndex>> {
        self.indices.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, MemoryIndex>> {
        self.indices.write().unwrap_or_else(|e| e.into_inner())
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }
    dot / (mag_a * mag_b)
}

#[async_trait]
impl IndexStore for MemoryStore {
    async fn index_exists(&self, index: &str) -> Result<bool, StoreError> {
        Ok(self.read().contains_key(index))
    }

    async fn create_index(&self, index: &str, schema: &IndexSchema) -> Result<(), StoreError> {
        let mut indices = self.write();
        if indices.contains_key(index) {
            return Err(StoreError::IndexAlreadyExists(index.to_string()));
        }
        indices.insert(
            index.to_string(),
            MemoryIndex {
                dims: schema.embedding_dims(),
                docs: Vec::new(),
            },
        );
        Ok(())
    }

    async fn delete_index(&self, index: &str) -> Result<(), StoreError> {
        self.write()
            .remove(index)
            .map(|_| ())
            .ok_or_else(|| StoreError::IndexNotFound(index.to_string()))
    }

    async fn bulk_index(
        &self,
        index: &str,
        docs: &[ImageDocument],
        _timeout: Duration,
    ) -> Result<Vec<BulkItemResult>, StoreError> {
        let mut indices = self.write();
        let target = indices
            .get_mut(index)
            .ok_or_else(|| StoreError::IndexNotFound(index.to_string()))?;

        Ok(docs
            .iter()
            .map(|doc| match target.dims {
                Some(dims) if doc.image_embedding.len() != dims => Err(format!(
                    "document_parsing_exception: expected {} dimensions, got {}",
                    dims,
                    doc.image_embedding.len()
                )),
                _ => {
                    target.docs.push(doc.clone());
                    Ok(())
                }
            })
            .collect())
    }

    async fn find_embedding(
        &self,
        index: &str,
        image_id: &str,
    ) -> Result<Option<Vec<f32>>, StoreError> {
        let indices = self.read();
        let target = indices
            .get(index)
            .ok_or_else(|| StoreError::IndexNotFound(index.to_string()))?;

        Ok(target
            .docs
            .iter()
            .find(|doc| doc.image_id == image_id)
            .map(|doc| doc.image_embedding.clone()))
    }

    async fn knn_search(&self, index: &str, query: &KnnQuery) -> Result<Vec<SearchHit>, StoreError> {
        let indices = self.read();
        let target = indices
            .get(index)
            .ok_or_else(|| StoreError::IndexNotFound(index.to_string()))?;

        let mut scored: Vec<(f32, &ImageDocument)> = target
            .docs
            .iter()
            .map(|doc| (cosine_similarity(&query.query_vector, &doc.image_embedding), doc))
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(query.k);

        Ok(scored
            .into_iter()
            .map(|(score, doc)| SearchHit {
                image_id: doc.image_id.clone(),
                image_name: doc.image_name.clone(),
                relative_path: doc.relative_path.clone(),
                score: Some(score),
            })
            .collect())
    }

    async fn count(&self, index: &str) -> Result<usize, StoreError> {
        self.read()
            .get(index)
            .map(|target| target.docs.len())
            .ok_or_else(|| StoreError::IndexNotFound(index.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema(dims: usize) -> IndexSchema {
        IndexSchema {
            mappings: json!({ "properties": {
                "image_embedding": { "type": "dense_vector", "dims": dims }
            } }),
            settings: json!({}),
        }
    }

    fn doc(id: &str, embedding: Vec<f32>) -> ImageDocument {
        ImageDocument {
            image_id: id.to_string(),
            image_name: format!("{}.jpg", id),
            relative_path: format!("{}.jpg", id),
            image_embedding: embedding,
            exif: None,
        }
    }

    #[tokio::test]
    async fn test_create_twice_and_delete_missing() {
        let store = MemoryStore::new();
        store.create_index("images", &schema(2)).await.unwrap();

        assert!(matches!(
            store.create_index("images", &schema(2)).await,
            Err(StoreError::IndexAlreadyExists(_))
        ));

        store.delete_index("images").await.unwrap();
        assert!(matches!(
            store.delete_index("images").await,
            Err(StoreError::IndexNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_bulk_rejects_wrong_dimensions_individually() {
        let store = MemoryStore::new();
        store.create_index("images", &schema(2)).await.unwrap();

        let docs = vec![
            doc("a", vec![1.0, 0.0]),
            doc("b", vec![1.0, 0.0, 0.0]),
            doc("c", vec![0.0, 1.0]),
        ];
        let results = store
            .bulk_index("images", &docs, Duration::from_secs(1))
            .await
            .unwrap();

        assert!(results[0].is_ok());
        assert!(results[1].is_err());
        assert!(results[2].is_ok());
        assert_eq!(store.count("images").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_knn_orders_by_similarity() {
        let store = MemoryStore::new();
        store.create_index("images", &schema(2)).await.unwrap();
        let docs = vec![
            doc("east", vec![1.0, 0.0]),
            doc("north", vec![0.0, 1.0]),
            doc("northeast", vec![0.7, 0.7]),
        ];
        store
            .bulk_index("images", &docs, Duration::from_secs(1))
            .await
            .unwrap();

        let query = KnnQuery {
            field: "image_embedding".to_string(),
            query_vector: vec![1.0, 0.1],
            k: 2,
            num_candidates: 4,
            fields: vec![],
        };
        let hits = store.knn_search("images", &query).await.unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.image_id.as_str()).collect();
        assert_eq!(ids, vec!["east", "northeast"]);
    }
}
