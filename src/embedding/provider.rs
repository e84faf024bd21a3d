/// Image embedding provider trait and FastEmbed implementation
use fastembed::{ImageEmbedding, ImageEmbeddingModel, ImageInitOptions};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("Model initialization failed: {0}")]
    InitializationError(String),

    #[error("Embedding generation failed: {0}")]
    GenerationError(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Trait for image embedding providers
///
/// Implementations are synchronous and CPU bound; async callers run them on
/// the blocking pool.
pub trait ImageEmbedder: Send + Sync {
    /// Generate the embedding for the image stored at `path`
    fn embed_image(&self, path: &Path) -> Result<Vec<f32>, EmbeddingError>;

    /// Get the embedding dimension
    fn dimension(&self) -> usize;

    /// Get the model name
    fn model_name(&self) -> &str;
}

/// Reject vectors whose length differs from the provider's dimensionality
pub fn check_dimension(embedding: &[f32], expected: usize) -> Result<(), EmbeddingError> {
    if embedding.len() != expected {
        return Err(EmbeddingError::DimensionMismatch {
            expected,
            actual: embedding.len(),
        });
    }
    Ok(())
}

/// FastEmbed provider running the CLIP ViT-B/32 vision tower locally
pub struct FastEmbedImageProvider {
    model: Arc<ImageEmbedding>,
    model_name: String,
    dimension: usize,
}

impl FastEmbedImageProvider {
    /// Create a new provider for the named model
    ///
    /// **Important**: model weights are downloaded on first use (~350MB for
    /// CLIP ViT-B/32).
    pub fn new(model_name: &str) -> Result<Self, EmbeddingError> {
        let (embedding_model, dimension) = match model_name {
            "clip-ViT-B-32" | "clip-vit-b-32" | "Qdrant/clip-ViT-B-32-vision" => {
                (ImageEmbeddingModel::ClipVitB32, 512)
            }
            _ => {
                return Err(EmbeddingError::InitializationError(format!(
                    "Unsupported image model: {}. Supported: clip-ViT-B-32",
                    model_name
                )));
            }
        };

        tracing::info!("Initializing image embedding model: {} ({}D)", model_name, dimension);

        let init_options = ImageInitOptions::new(embedding_model).with_show_download_progress(true);

        let model = ImageEmbedding::try_new(init_options)
            .map_err(|e| EmbeddingError::InitializationError(e.to_string()))?;

        Ok(Self {
            model: Arc::new(model),
            model_name: model_name.to_string(),
            dimension,
        })
    }
}

impl ImageEmbedder for FastEmbedImageProvider {
    fn embed_image(&self, path: &Path) -> Result<Vec<f32>, EmbeddingError> {
        if !path.is_file() {
            return Err(EmbeddingError::InvalidInput(format!(
                "Not a file: {}",
                path.display()
            )));
        }

        let mut embeddings = self
            .model
            .embed(vec![path], None)
            .map_err(|e| EmbeddingError::GenerationError(e.to_string()))?;

        let embedding = embeddings.pop().ok_or_else(|| {
            EmbeddingError::GenerationError("No embeddings generated".to_string())
        })?;

        check_dimension(&embedding, self.dimension)?;

        Ok(embedding)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}
