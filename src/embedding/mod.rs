/// Embedding generation for images
///
/// - ImageEmbedder trait for abstraction over the vision model
/// - FastEmbedImageProvider for local CLIP ViT-B/32 embeddings (512-dim)
///
/// Text queries are embedded by the model deployed in the search cluster,
/// see `store::ModelService`.
mod provider;

pub use provider::{check_dimension, EmbeddingError, FastEmbedImageProvider, ImageEmbedder};
