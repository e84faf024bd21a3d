use crate::error::{Result, VisearchError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;

/// Index definition handed verbatim to index creation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexSchema {
    pub mappings: Value,
    pub settings: Value,
}

impl IndexSchema {
    /// Load a schema file with top-level `mappings` and `settings` keys
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| VisearchError::Io {
            source: e,
            context: format!("Failed to read index schema: {:?}", path),
        })?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content).map_err(|e| VisearchError::Json {
            source: e,
            context: "Index schema must be an object with 'mappings' and 'settings'".to_string(),
        })
    }

    /// Declared dimensionality of the `image_embedding` field
    pub fn embedding_dims(&self) -> Option<usize> {
        let field = self.mappings.pointer("/properties/image_embedding")?;
        if field.get("type")?.as_str()? != "dense_vector" {
            return None;
        }
        field.get("dims")?.as_u64().map(|d| d as usize)
    }

    /// Check that `image_embedding` is a dense vector of `expected_dims`
    pub fn validate(&self, expected_dims: usize) -> Result<()> {
        let field = self
            .mappings
            .pointer("/properties/image_embedding")
            .ok_or_else(|| {
                VisearchError::Schema("mappings do not declare 'image_embedding'".to_string())
            })?;

        let field_type = field.get("type").and_then(Value::as_str).unwrap_or_default();
        if field_type != "dense_vector" {
            return Err(VisearchError::Schema(format!(
                "'image_embedding' must be a dense_vector, found '{}'",
                field_type
            )));
        }

        match self.embedding_dims() {
            Some(dims) if dims == expected_dims => Ok(()),
            Some(dims) => Err(VisearchError::Schema(format!(
                "'image_embedding' declares {} dims but the embedding model produces {}",
                dims, expected_dims
            ))),
            None => Err(VisearchError::Schema(
                "'image_embedding' does not declare 'dims'".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BUNDLED: &str = include_str!("../../resources/image-embeddings-mappings.json");

    #[test]
    fn test_bundled_schema_is_valid() {
        let schema = IndexSchema::from_json(BUNDLED).unwrap();
        assert_eq!(schema.embedding_dims(), Some(512));
        assert!(schema.validate(512).is_ok());
        assert!(schema.settings.get("index").is_some());
    }

    #[test]
    fn test_dimension_mismatch() {
        let schema = IndexSchema::from_json(BUNDLED).unwrap();
        assert!(matches!(schema.validate(384), Err(VisearchError::Schema(_))));
    }

    #[test]
    fn test_missing_settings_rejected() {
        let result = IndexSchema::from_json(r#"{"mappings": {"properties": {}}}"#);
        assert!(matches!(result, Err(VisearchError::Json { .. })));
    }

    #[test]
    fn test_embedding_not_dense_vector() {
        let schema = IndexSchema::from_json(
            r#"{
                "settings": {},
                "mappings": {"properties": {"image_embedding": {"type": "float"}}}
            }"#,
        )
        .unwrap();
        assert_eq!(schema.embedding_dims(), None);
        assert!(schema.validate(512).is_err());
    }
}
