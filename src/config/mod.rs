//! Configuration management for visearch
//!
//! Loads the TOML configuration, applies environment overrides and validates
//! the result. CLI flags are applied on top by the caller for a single run.

use crate::error::{Result, VisearchError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

mod validator;

pub use validator::ConfigValidator;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "_meta")]
    pub meta: MetaConfig,
    pub elasticsearch: ElasticsearchConfig,
    pub index: IndexConfig,
    pub corpus: CorpusConfig,
    pub ingest: IngestConfig,
    pub embedding: EmbeddingConfig,
    pub server: ServerConfig,
}

/// Metadata about the configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaConfig {
    pub schema_version: String,
    #[serde(default = "current_timestamp")]
    pub created_at: String,
}

fn current_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Connection settings for the index store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElasticsearchConfig {
    pub host: String,
    pub user: String,
    pub password: String,
    pub verify_certs: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_certs: Option<PathBuf>,
    pub request_timeout_secs: u64,
}

/// Target index and its schema definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    pub name: String,
    pub mappings_file: PathBuf,
}

/// Where the source images live
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorpusConfig {
    pub images_root: PathBuf,
    pub pattern: String,
}

/// Ingestion pipeline tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    pub thread_count: usize,
    pub chunk_size: usize,
    pub bulk_timeout_secs: u64,
    pub embed_workers: usize,
    pub delete_existing: bool,
    pub extract_gps_location: bool,
}

/// Embedding models
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub image_model: String,
    /// Text model deployed inside the search cluster
    pub text_model_id: String,
    pub dimension: usize,
}

/// Query service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Maximum accepted request body, in bytes
    pub max_content_length: usize,
    pub upload_dir: PathBuf,
    pub query_timeout_secs: u64,
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(VisearchError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| VisearchError::Io {
            source: e,
            context: format!("Failed to read config file: {:?}", path),
        })?;
        let mut config: Config = toml::from_str(&content)?;

        config.apply_env_overrides();

        ConfigValidator::validate(&config)?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| VisearchError::Io {
            source: e,
            context: format!("Failed to write config file: {:?}", path),
        })?;
        Ok(())
    }

    /// Apply environment variable overrides
    ///
    /// Accepts `VISEARCH_SECTION__KEY=value` as well as the deployment
    /// variables `ES_HOST`, `ES_USER`, `ES_PWD`, `VERIFY_TLS` and
    /// `MAX_CONTENT_LENGTH`.
    pub fn apply_env_overrides(&mut self) {
        for (key, value) in std::env::vars() {
            let config_key = match key.as_str() {
                "ES_HOST" => "ELASTICSEARCH__HOST",
                "ES_USER" => "ELASTICSEARCH__USER",
                "ES_PWD" => "ELASTICSEARCH__PASSWORD",
                "VERIFY_TLS" => "ELASTICSEARCH__VERIFY_CERTS",
                "MAX_CONTENT_LENGTH" => "SERVER__MAX_CONTENT_LENGTH",
                other => match other.strip_prefix("VISEARCH_") {
                    Some(stripped) => stripped,
                    None => continue,
                },
            };
            if let Err(e) = self.set_value_from_env(config_key, &value) {
                tracing::warn!("Failed to apply env override {}: {}", key, e);
            }
        }
    }

    pub(crate) fn set_value_from_env(&mut self, path: &str, value: &str) -> Result<()> {
        match path {
            "ELASTICSEARCH__HOST" => self.elasticsearch.host = value.to_string(),
            "ELASTICSEARCH__USER" => self.elasticsearch.user = value.to_string(),
            "ELASTICSEARCH__PASSWORD" => self.elasticsearch.password = value.to_string(),
            "ELASTICSEARCH__VERIFY_CERTS" => {
                self.elasticsearch.verify_certs = parse_bool(path, value)?;
            }
            "ELASTICSEARCH__CA_CERTS" => {
                self.elasticsearch.ca_certs = Some(PathBuf::from(value));
            }
            "INDEX__NAME" => self.index.name = value.to_string(),
            "CORPUS__IMAGES_ROOT" => self.corpus.images_root = PathBuf::from(value),
            "EMBEDDING__TEXT_MODEL_ID" => self.embedding.text_model_id = value.to_string(),
            "SERVER__MAX_CONTENT_LENGTH" => {
                self.server.max_content_length =
                    value.parse().map_err(|_| VisearchError::InvalidConfigValue {
                        path: path.to_string(),
                        message: format!("Cannot parse '{}' as a byte count", value),
                    })?;
            }
            "SERVER__PORT" => {
                self.server.port = value.parse().map_err(|_| VisearchError::InvalidConfigValue {
                    path: path.to_string(),
                    message: format!("Cannot parse '{}' as a port", value),
                })?;
            }
            _ => {
                tracing::debug!("Unknown env config key: {}", path);
            }
        }
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| VisearchError::Config("Cannot determine config directory".to_string()))?;

        Ok(config_dir.join("visearch").join("config.toml"))
    }
}

fn parse_bool(path: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(VisearchError::InvalidConfigValue {
            path: path.to_string(),
            message: format!("Cannot parse '{}' as boolean", value),
        }),
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            meta: MetaConfig {
                schema_version: "1.0.0".to_string(),
                created_at: current_timestamp(),
            },
            elasticsearch: ElasticsearchConfig {
                host: "https://localhost:9200".to_string(),
                user: "elastic".to_string(),
                password: "changeme".to_string(),
                verify_certs: true,
                ca_certs: None,
                request_timeout_secs: 3600,
            },
            index: IndexConfig {
                name: "my-image-embeddings".to_string(),
                mappings_file: PathBuf::from("resources/image-embeddings-mappings.json"),
            },
            corpus: CorpusConfig {
                images_root: PathBuf::from("static/images"),
                pattern: "**/*.jp*g".to_string(),
            },
            ingest: IngestConfig {
                thread_count: 4,
                chunk_size: 100,
                bulk_timeout_secs: 120,
                embed_workers: 2,
                delete_existing: true,
                extract_gps_location: false,
            },
            embedding: EmbeddingConfig {
                image_model: "clip-ViT-B-32".to_string(),
                text_model_id: "sentence-transformers__clip-vit-b-32-multilingual-v1".to_string(),
                dimension: 512,
            },
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 5001,
                max_content_length: 1_048_576,
                upload_dir: PathBuf::from("static/tmp-uploads"),
                query_timeout_secs: 30,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_save_and_load_roundtrip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");

        let mut config = Config::default();
        config.ingest.chunk_size = 250;
        config.elasticsearch.ca_certs = Some(PathBuf::from("/etc/ssl/ca.crt"));
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.ingest.chunk_size, 250);
        assert_eq!(
            loaded.elasticsearch.ca_certs,
            Some(PathBuf::from("/etc/ssl/ca.crt"))
        );
        assert_eq!(loaded.index.name, "my-image-embeddings");
    }

    #[test]
    fn test_missing_file() {
        let result = Config::load(Path::new("/nonexistent/visearch.toml"));
        assert!(matches!(result, Err(VisearchError::ConfigNotFound { .. })));
    }

    #[test]
    fn test_env_value_overrides() {
        let mut config = Config::default();
        config
            .set_value_from_env("ELASTICSEARCH__VERIFY_CERTS", "False")
            .unwrap();
        config
            .set_value_from_env("SERVER__MAX_CONTENT_LENGTH", "2048")
            .unwrap();
        assert!(!config.elasticsearch.verify_certs);
        assert_eq!(config.server.max_content_length, 2048);

        assert!(config
            .set_value_from_env("SERVER__MAX_CONTENT_LENGTH", "lots")
            .is_err());
        assert!(config
            .set_value_from_env("ELASTICSEARCH__VERIFY_CERTS", "maybe")
            .is_err());
    }
}
