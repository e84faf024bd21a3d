//! Error responses of the query service

use crate::search::{ModelReadiness, SearchError};
use crate::store::StoreError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};

#[derive(Debug)]
pub enum ApiError {
    /// The target index has not been created yet
    IndexMissing { index: String },
    /// The query model is not deployed; carries the observed state
    ModelNotReady {
        model_id: String,
        state: ModelReadiness,
    },
    /// Request body exceeds the configured limit
    UploadTooLarge { max_bytes: usize },
    BadRequest(String),
    NotFound(String),
    /// The index store or model service failed
    Upstream(String),
    Timeout(String),
    Internal(String),
}

impl ApiError {
    fn parts(&self) -> (StatusCode, &'static str, String, Value) {
        match self {
            Self::IndexMissing { index } => (
                StatusCode::NOT_FOUND,
                "index_missing",
                format!("Index '{}' does not exist yet; run ingestion first", index),
                json!({ "index": index }),
            ),
            Self::ModelNotReady { model_id, state } => (
                StatusCode::SERVICE_UNAVAILABLE,
                "model_not_ready",
                format!("Model '{}' is not started (state: {})", model_id, state),
                json!({ "model_id": model_id, "state": state.as_str() }),
            ),
            Self::UploadTooLarge { max_bytes } => (
                StatusCode::PAYLOAD_TOO_LARGE,
                "upload_too_large",
                format!("Upload exceeds the maximum size of {} bytes", max_bytes),
                json!({ "max_bytes": max_bytes }),
            ),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.clone(), json!({})),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone(), json!({})),
            Self::Upstream(msg) => (StatusCode::BAD_GATEWAY, "upstream_error", msg.clone(), json!({})),
            Self::Timeout(msg) => (StatusCode::GATEWAY_TIMEOUT, "timeout", msg.clone(), json!({})),
            Self::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                msg.clone(),
                json!({}),
            ),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message, extra) = self.parts();

        if status.is_server_error() {
            tracing::error!("{}: {}", code, message);
        }

        let mut body = json!({ "error": code, "message": message });
        if let (Some(body), Value::Object(extra)) = (body.as_object_mut(), extra) {
            body.extend(extra);
        }

        (status, Json(body)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::IndexNotFound(index) => Self::IndexMissing { index },
            StoreError::Timeout(msg) => Self::Timeout(msg),
            other => Self::Upstream(other.to_string()),
        }
    }
}

impl From<SearchError> for ApiError {
    fn from(err: SearchError) -> Self {
        match err {
            SearchError::IndexMissing(index) => Self::IndexMissing { index },
            SearchError::UnknownImage(_) => Self::NotFound(err.to_string()),
            SearchError::EmptyQuery => Self::BadRequest(err.to_string()),
            SearchError::ProviderTimeout(_) => Self::Timeout(err.to_string()),
            SearchError::Embedding(_) => Self::BadRequest(err.to_string()),
            SearchError::Store(e) => e.into(),
        }
    }
}
