// Elasticsearch REST client implementing the index store and model contracts

use super::{
    BulkItemResult, IndexSchema, IndexStore, KnnQuery, ModelService, SearchHit, StoreError,
    BULK_TIMEOUT_GRACE,
};
use crate::config::ElasticsearchConfig;
use crate::error::{Result, VisearchError};
use crate::ingest::ImageDocument;
use async_trait::async_trait;
use reqwest::{Certificate, Client, Method, RequestBuilder, Response, StatusCode};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::time::Duration;

/// Connection settings for [`ElasticClient`]
#[derive(Debug, Clone)]
pub struct ElasticClientConfig {
    pub host: String,
    pub user: String,
    pub password: String,
    pub verify_certs: bool,
    pub ca_certs: Option<PathBuf>,
    pub request_timeout: Duration,
}

impl From<&ElasticsearchConfig> for ElasticClientConfig {
    fn from(config: &ElasticsearchConfig) -> Self {
        Self {
            host: config.host.clone(),
            user: config.user.clone(),
            password: config.password.clone(),
            verify_certs: config.verify_certs,
            ca_certs: config.ca_certs.clone(),
            request_timeout: Duration::from_secs(config.request_timeout_secs),
        }
    }
}

/// Elasticsearch client over HTTP(S) with basic auth
pub struct ElasticClient {
    http: Client,
    host: String,
    user: String,
    password: String,
}

impl ElasticClient {
    pub fn new(config: ElasticClientConfig) -> Result<Self> {
        let mut builder = Client::builder()
            .timeout(config.request_timeout)
            .danger_accept_invalid_certs(!config.verify_certs);

        if let Some(ca_path) = &config.ca_certs {
            let pem = std::fs::read(ca_path).map_err(|e| VisearchError::Io {
                source: e,
                context: format!("Failed to read CA certificates: {:?}", ca_path),
            })?;
            let cert = Certificate::from_pem(&pem).map_err(|e| {
                VisearchError::Config(format!("Invalid CA certificate {:?}: {}", ca_path, e))
            })?;
            builder = builder.add_root_certificate(cert);
        }

        if !config.verify_certs {
            tracing::warn!("TLS certificate verification is disabled for {}", config.host);
        }

        let http = builder
            .build()
            .map_err(|e| VisearchError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            host: config.host.trim_end_matches('/').to_string(),
            user: config.user,
            password: config.password,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}/{}", self.host, path.trim_start_matches('/')))
            .basic_auth(&self.user, Some(&self.password))
    }

    /// `timeout` is the cluster-side deadline; the HTTP deadline sits
    /// [`BULK_TIMEOUT_GRACE`] past it
    fn bulk_request(&self, index: &str, body: String, timeout: Duration) -> RequestBuilder {
        self.request(Method::POST, &format!("{}/_bulk", index))
            .query(&[("timeout", format!("{}ms", timeout.as_millis()))])
            .header("Content-Type", "application/x-ndjson")
            .timeout(timeout + BULK_TIMEOUT_GRACE)
            .body(body)
    }

    async fn send(&self, request: RequestBuilder) -> std::result::Result<Response, StoreError> {
        request.send().await.map_err(|e| self.classify(e))
    }

    fn classify(&self, err: reqwest::Error) -> StoreError {
        let detail = error_chain(&err);
        if is_certificate_failure(&detail) {
            StoreError::CertificateVerification {
                host: self.host.clone(),
                detail,
            }
        } else if err.is_timeout() {
            StoreError::Timeout(detail)
        } else if err.is_connect() {
            StoreError::Connection {
                host: self.host.clone(),
                detail,
            }
        } else if err.is_decode() {
            StoreError::Decode(detail)
        } else {
            StoreError::Request {
                status: err.status().map(|s| s.as_u16()).unwrap_or_default(),
                body: detail,
            }
        }
    }

    async fn json_body(&self, response: Response) -> std::result::Result<Value, StoreError> {
        response.json::<Value>().await.map_err(|e| self.classify(e))
    }
}

/// Turn a non-success response into an error, keeping the body for context
async fn failure(response: Response) -> StoreError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    StoreError::Request { status, body }
}

fn error_type(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    value
        .pointer("/error/type")
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn error_chain(err: &dyn std::error::Error) -> String {
    let mut parts = vec![err.to_string()];
    let mut source = err.source();
    while let Some(e) = source {
        parts.push(e.to_string());
        source = e.source();
    }
    parts.join(": ")
}

/// Whether a transport error message describes a TLS trust failure
pub(crate) fn is_certificate_failure(detail: &str) -> bool {
    let lower = detail.to_ascii_lowercase();
    ["certificate", "unknownissuer", "self signed", "self-signed", "x509"]
        .iter()
        .any(|marker| lower.contains(marker))
}

pub(crate) fn bulk_body(docs: &[ImageDocument]) -> std::result::Result<String, StoreError> {
    let mut body = String::new();
    for doc in docs {
        let source = serde_json::to_string(doc)
            .map_err(|e| StoreError::Decode(format!("Cannot serialize {}: {}", doc.image_id, e)))?;
        body.push_str("{\"index\":{}}\n");
        body.push_str(&source);
        body.push('\n');
    }
    Ok(body)
}

pub(crate) fn parse_bulk_response(
    value: &Value,
    expected: usize,
) -> std::result::Result<Vec<BulkItemResult>, StoreError> {
    let items = value
        .get("items")
        .and_then(Value::as_array)
        .ok_or_else(|| StoreError::Decode("bulk response has no 'items'".to_string()))?;

    if items.len() != expected {
        return Err(StoreError::Decode(format!(
            "bulk response has {} items, expected {}",
            items.len(),
            expected
        )));
    }

    Ok(items
        .iter()
        .map(|item| {
            // Each item is keyed by its action name
            let outcome = item
                .as_object()
                .and_then(|obj| obj.values().next())
                .cloned()
                .unwrap_or(Value::Null);
            let status = outcome.get("status").and_then(Value::as_u64).unwrap_or(0);
            match outcome.get("error") {
                Some(error) => Err(format!(
                    "{}: {}",
                    error.get("type").and_then(Value::as_str).unwrap_or("error"),
                    error.get("reason").and_then(Value::as_str).unwrap_or("unknown reason")
                )),
                None if (200..300).contains(&status) => Ok(()),
                None => Err(format!("status {}", status)),
            }
        })
        .collect())
}

fn first_field(fields: &Value, name: &str) -> Option<String> {
    let value = fields.get(name)?;
    let value = match value {
        Value::Array(values) => values.first()?,
        other => other,
    };
    value.as_str().map(str::to_string)
}

pub(crate) fn parse_knn_hits(value: &Value) -> std::result::Result<Vec<SearchHit>, StoreError> {
    let hits = value
        .pointer("/hits/hits")
        .and_then(Value::as_array)
        .ok_or_else(|| StoreError::Decode("search response has no 'hits.hits'".to_string()))?;

    hits.iter()
        .map(|hit| {
            let fields = hit.get("fields").unwrap_or(&Value::Null);
            let field = |name: &str| {
                first_field(fields, name)
                    .ok_or_else(|| StoreError::Decode(format!("hit is missing field '{}'", name)))
            };
            Ok(SearchHit {
                image_id: field("image_id")?,
                image_name: field("image_name")?,
                relative_path: field("relative_path")?,
                score: hit.get("_score").and_then(Value::as_f64).map(|s| s as f32),
            })
        })
        .collect()
}

pub(crate) fn parse_deployment_state(
    model_id: &str,
    value: &Value,
) -> std::result::Result<Option<String>, StoreError> {
    let stats = value
        .get("trained_model_stats")
        .and_then(Value::as_array)
        .and_then(|stats| stats.first())
        .ok_or_else(|| StoreError::ModelNotFound(model_id.to_string()))?;

    Ok(stats
        .pointer("/deployment_stats/state")
        .and_then(Value::as_str)
        .map(str::to_string))
}

fn parse_vector(value: &Value) -> Option<Vec<f32>> {
    value
        .as_array()?
        .iter()
        .map(|v| v.as_f64().map(|f| f as f32))
        .collect()
}

#[async_trait]
impl IndexStore for ElasticClient {
    async fn index_exists(&self, index: &str) -> std::result::Result<bool, StoreError> {
        let response = self.send(self.request(Method::HEAD, index)).await?;
        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(failure(response).await),
        }
    }

    async fn create_index(
        &self,
        index: &str,
        schema: &IndexSchema,
    ) -> std::result::Result<(), StoreError> {
        let body = json!({
            "mappings": schema.mappings,
            "settings": schema.settings,
        });
        let response = self
            .send(self.request(Method::PUT, index).json(&body))
            .await?;
        if response.status().is_success() {
            return Ok(());
        }

        match failure(response).await {
            StoreError::Request { status: 400, body }
                if error_type(&body).as_deref() == Some("resource_already_exists_exception") =>
            {
                Err(StoreError::IndexAlreadyExists(index.to_string()))
            }
            other => Err(other),
        }
    }

    async fn delete_index(&self, index: &str) -> std::result::Result<(), StoreError> {
        let response = self.send(self.request(Method::DELETE, index)).await?;
        match response.status() {
            s if s.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Err(StoreError::IndexNotFound(index.to_string())),
            _ => Err(failure(response).await),
        }
    }

    async fn bulk_index(
        &self,
        index: &str,
        docs: &[ImageDocument],
        timeout: Duration,
    ) -> std::result::Result<Vec<BulkItemResult>, StoreError> {
        if docs.is_empty() {
            return Ok(Vec::new());
        }

        let body = bulk_body(docs)?;
        let response = self.send(self.bulk_request(index, body, timeout)).await?;
        if !response.status().is_success() {
            return Err(failure(response).await);
        }

        let value = self.json_body(response).await?;
        parse_bulk_response(&value, docs.len())
    }

    async fn find_embedding(
        &self,
        index: &str,
        image_id: &str,
    ) -> std::result::Result<Option<Vec<f32>>, StoreError> {
        let body = json!({
            "size": 1,
            "query": { "term": { "image_id": { "value": image_id, "boost": 1.0 } } },
            "_source": ["image_embedding"],
        });
        let response = self
            .send(self.request(Method::POST, &format!("{}/_search", index)).json(&body))
            .await?;

        match response.status() {
            s if s.is_success() => {}
            StatusCode::NOT_FOUND => return Err(StoreError::IndexNotFound(index.to_string())),
            _ => return Err(failure(response).await),
        }

        let value = self.json_body(response).await?;
        let Some(hit) = value.pointer("/hits/hits/0") else {
            return Ok(None);
        };

        hit.pointer("/_source/image_embedding")
            .and_then(parse_vector)
            .map(Some)
            .ok_or_else(|| {
                StoreError::Decode(format!("document {} has no image_embedding", image_id))
            })
    }

    async fn knn_search(
        &self,
        index: &str,
        query: &KnnQuery,
    ) -> std::result::Result<Vec<SearchHit>, StoreError> {
        let body = json!({
            "knn": {
                "field": query.field,
                "query_vector": query.query_vector,
                "k": query.k,
                "num_candidates": query.num_candidates,
            },
            "fields": query.fields,
            "_source": false,
            "size": query.k,
        });
        let response = self
            .send(self.request(Method::POST, &format!("{}/_search", index)).json(&body))
            .await?;

        match response.status() {
            s if s.is_success() => {}
            StatusCode::NOT_FOUND => return Err(StoreError::IndexNotFound(index.to_string())),
            _ => return Err(failure(response).await),
        }

        let value = self.json_body(response).await?;
        parse_knn_hits(&value)
    }

    async fn count(&self, index: &str) -> std::result::Result<usize, StoreError> {
        let response = self
            .send(self.request(Method::GET, &format!("{}/_count", index)))
            .await?;

        match response.status() {
            s if s.is_success() => {}
            StatusCode::NOT_FOUND => return Err(StoreError::IndexNotFound(index.to_string())),
            _ => return Err(failure(response).await),
        }

        let value = self.json_body(response).await?;
        value
            .get("count")
            .and_then(Value::as_u64)
            .map(|c| c as usize)
            .ok_or_else(|| StoreError::Decode("count response has no 'count'".to_string()))
    }
}

#[async_trait]
impl ModelService for ElasticClient {
    async fn deployment_state(
        &self,
        model_id: &str,
    ) -> std::result::Result<Option<String>, StoreError> {
        let response = self
            .send(self.request(Method::GET, &format!("_ml/trained_models/{}/_stats", model_id)))
            .await?;

        match response.status() {
            s if s.is_success() => {}
            StatusCode::NOT_FOUND => return Err(StoreError::ModelNotFound(model_id.to_string())),
            _ => return Err(failure(response).await),
        }

        let value = self.json_body(response).await?;
        parse_deployment_state(model_id, &value)
    }

    async fn infer_text(
        &self,
        model_id: &str,
        text: &str,
    ) -> std::result::Result<Vec<f32>, StoreError> {
        let body = json!({ "docs": [{ "text_field": text }] });
        let response = self
            .send(
                self.request(Method::POST, &format!("_ml/trained_models/{}/_infer", model_id))
                    .json(&body),
            )
            .await?;

        match response.status() {
            s if s.is_success() => {}
            StatusCode::NOT_FOUND => return Err(StoreError::ModelNotFound(model_id.to_string())),
            _ => return Err(failure(response).await),
        }

        let value = self.json_body(response).await?;
        value
            .pointer("/inference_results/0/predicted_value")
            .and_then(parse_vector)
            .ok_or_else(|| StoreError::Decode("inference response has no predicted_value".to_string()))
    }
}
