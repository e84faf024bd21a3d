use crate::config::Config;
use crate::error::{Result, ValidationError, VisearchError};

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        Self::validate_schema_version(config, &mut errors);
        Self::validate_elasticsearch(config, &mut errors);
        Self::validate_index(config, &mut errors);
        Self::validate_corpus(config, &mut errors);
        Self::validate_ingest(config, &mut errors);
        Self::validate_embedding(config, &mut errors);
        Self::validate_server(config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(VisearchError::ConfigValidation { errors })
        }
    }

    fn validate_schema_version(config: &Config, errors: &mut Vec<ValidationError>) {
        let version = &config.meta.schema_version;
        if version != "1.0.0" {
            errors.push(ValidationError::new(
                "_meta.schema_version",
                format!("Unsupported schema version: {}", version),
            ));
        }
    }

    fn validate_elasticsearch(config: &Config, errors: &mut Vec<ValidationError>) {
        let host = &config.elasticsearch.host;
        if !host.starts_with("http://") && !host.starts_with("https://") {
            errors.push(ValidationError::new(
                "elasticsearch.host",
                format!("Host must include scheme, host and port, got '{}'", host),
            ));
        }

        if config.elasticsearch.request_timeout_secs == 0 {
            errors.push(ValidationError::new(
                "elasticsearch.request_timeout_secs",
                "Request timeout must be greater than 0",
            ));
        }
    }

    fn validate_index(config: &Config, errors: &mut Vec<ValidationError>) {
        let name = &config.index.name;
        // Elasticsearch index names are lowercase and cannot start with these
        if name.is_empty()
            || name.chars().any(|c| c.is_ascii_uppercase())
            || name.starts_with(&['-', '_', '+'][..])
        {
            errors.push(ValidationError::new(
                "index.name",
                format!("Invalid index name: '{}'", name),
            ));
        }

        if config.index.mappings_file.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "index.mappings_file",
                "Mappings file path cannot be empty",
            ));
        }
    }

    fn validate_corpus(config: &Config, errors: &mut Vec<ValidationError>) {
        if let Err(e) = glob::Pattern::new(&config.corpus.pattern) {
            errors.push(ValidationError::new(
                "corpus.pattern",
                format!("Invalid pattern '{}': {}", config.corpus.pattern, e),
            ));
        }
    }

    fn validate_ingest(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.ingest.thread_count == 0 {
            errors.push(ValidationError::new(
                "ingest.thread_count",
                "Thread count must be greater than 0",
            ));
        }

        if config.ingest.chunk_size == 0 {
            errors.push(ValidationError::new(
                "ingest.chunk_size",
                "Chunk size must be greater than 0",
            ));
        }

        if config.ingest.embed_workers == 0 {
            errors.push(ValidationError::new(
                "ingest.embed_workers",
                "Embedding workers must be greater than 0",
            ));
        }

        if config.ingest.bulk_timeout_secs == 0 {
            errors.push(ValidationError::new(
                "ingest.bulk_timeout_secs",
                "Bulk timeout must be greater than 0",
            ));
        }
    }

    fn validate_embedding(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.embedding.dimension == 0 {
            errors.push(ValidationError::new(
                "embedding.dimension",
                "Embedding dimension must be greater than 0",
            ));
        }

        if config.embedding.text_model_id.is_empty() {
            errors.push(ValidationError::new(
                "embedding.text_model_id",
                "Text model id cannot be empty",
            ));
        }
    }

    fn validate_server(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.server.max_content_length == 0 {
            errors.push(ValidationError::new(
                "server.max_content_length",
                "Maximum upload size must be greater than 0",
            ));
        }

        if config.server.query_timeout_secs == 0 {
            errors.push(ValidationError::new(
                "server.query_timeout_secs",
                "Query timeout must be greater than 0",
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_config() {
        let config = Config::default();
        assert!(ConfigValidator::validate(&config).is_ok());
    }

    #[test]
    fn test_zero_chunk_size() {
        let mut config = Config::default();
        config.ingest.chunk_size = 0;
        assert!(ConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn test_collects_every_violation() {
        let mut config = Config::default();
        config.ingest.thread_count = 0;
        config.index.name = "My-Images".to_string();
        config.elasticsearch.host = "localhost:9200".to_string();

        match ConfigValidator::validate(&config) {
            Err(VisearchError::ConfigValidation { errors }) => {
                let paths: Vec<&str> = errors.iter().map(|e| e.path.as_str()).collect();
                assert_eq!(errors.len(), 3);
                assert!(paths.contains(&"ingest.thread_count"));
                assert!(paths.contains(&"index.name"));
                assert!(paths.contains(&"elasticsearch.host"));
            }
            other => panic!("expected validation failure, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_pattern() {
        let mut config = Config::default();
        config.corpus.pattern = "**/[*.jpg".to_string();
        assert!(ConfigValidator::validate(&config).is_err());
    }
}
