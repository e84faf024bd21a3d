use crate::embedding::{check_dimension, EmbeddingError};
use crate::metadata::ExifData;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path};

/// The unit of indexing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageDocument {
    pub image_id: String,
    pub image_name: String,
    pub relative_path: String,
    pub image_embedding: Vec<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exif: Option<ExifData>,
}

/// Identifier of an image: its file name without extension
///
/// Two files with the same base name in different directories share an id.
pub fn image_id_for(path: &Path) -> Option<String> {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .map(str::to_string)
}

/// `path` relative to `root`, `/`-separated
pub fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Option<Vec<&str>> = relative
        .components()
        .map(|c| match c {
            Component::Normal(part) => part.to_str(),
            _ => None,
        })
        .collect();
    let parts = parts?;
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}

impl ImageDocument {
    /// Assemble a document for the image at `path` under `root`
    ///
    /// Rejects embeddings whose length differs from `expected_dims`.
    pub fn build(
        root: &Path,
        path: &Path,
        image_embedding: Vec<f32>,
        expected_dims: usize,
        exif: Option<ExifData>,
    ) -> Result<Self, EmbeddingError> {
        check_dimension(&image_embedding, expected_dims)?;

        let invalid = || EmbeddingError::InvalidInput(format!("Unusable image path: {:?}", path));
        let image_id = image_id_for(path).ok_or_else(invalid)?;
        let image_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .map(str::to_string)
            .ok_or_else(invalid)?;
        let relative_path = relative_path(root, path).ok_or_else(invalid)?;

        Ok(Self {
            image_id,
            image_name,
            relative_path,
            image_embedding,
            exif,
        })
    }
}
