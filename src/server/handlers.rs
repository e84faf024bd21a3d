use super::{ApiError, AppState};
use crate::search::SimilarityQuery;
use crate::store::SearchHit;
use axum::body::Bytes;
use axum::extract::{Multipart, Path as UrlPath, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};

/// Body of `POST /image_search`: free text, or the id of an indexed image
#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub image_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub count: usize,
    pub results: Vec<SearchHit>,
}

impl From<Vec<SearchHit>> for SearchResponse {
    fn from(results: Vec<SearchHit>) -> Self {
        Self {
            count: results.len(),
            results,
        }
    }
}

pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

pub async fn status(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let index_exists = state.engine.index_exists().await?;
    let readiness = state.monitor.check(state.engine.text_model_id()).await?;

    Ok(Json(serde_json::json!({
        "index": state.engine.index(),
        "index_exists": index_exists,
        "model_id": state.engine.text_model_id(),
        "model_state": readiness.as_str(),
        "ready": index_exists && readiness.is_ready(),
    })))
}

/// Refuse to query before there is an index or while the model is down
async fn ensure_queryable(state: &AppState) -> Result<(), ApiError> {
    if !state.engine.index_exists().await? {
        return Err(ApiError::IndexMissing {
            index: state.engine.index().to_string(),
        });
    }

    let model_id = state.engine.text_model_id();
    let readiness = state.monitor.check(model_id).await?;
    if !readiness.is_ready() {
        return Err(ApiError::ModelNotReady {
            model_id: model_id.to_string(),
            state: readiness,
        });
    }
    Ok(())
}

pub async fn image_search(
    State(state): State<AppState>,
    Json(request): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, ApiError> {
    ensure_queryable(&state).await?;

    let query = match (request.image_id, request.query) {
        (Some(image_id), _) if !image_id.trim().is_empty() => {
            SimilarityQuery::Existing(image_id.trim().to_string())
        }
        (_, Some(text)) => SimilarityQuery::Text(text),
        _ => {
            return Err(ApiError::BadRequest(
                "Provide either 'query' or 'image_id'".to_string(),
            ))
        }
    };

    let hits = state.engine.search(&query).await?;
    Ok(Json(hits.into()))
}

pub async fn similar_image(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<SearchResponse>, ApiError> {
    let max_bytes = state.max_upload_bytes;
    let declared = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    if declared.is_some_and(|len| len > max_bytes) {
        return Err(ApiError::UploadTooLarge { max_bytes });
    }

    ensure_queryable(&state).await?;

    let (file_name, data) = read_upload(&mut multipart, max_bytes).await?;

    tokio::fs::create_dir_all(&state.upload_dir)
        .await
        .map_err(|e| ApiError::Internal(format!("Cannot create upload directory: {}", e)))?;
    let upload_path = state.upload_dir.join(upload_file_name(&file_name));
    tokio::fs::write(&upload_path, &data)
        .await
        .map_err(|e| ApiError::Internal(format!("Cannot store upload: {}", e)))?;

    let result = state
        .engine
        .search(&SimilarityQuery::Upload(upload_path.clone()))
        .await;

    if let Err(e) = tokio::fs::remove_file(&upload_path).await {
        tracing::warn!("Failed to remove upload {:?}: {}", upload_path, e);
    }

    Ok(Json(result?.into()))
}

/// Pull the `file` field out of the form
async fn read_upload(multipart: &mut Multipart, max_bytes: usize) -> Result<(String, Bytes), ApiError> {
    let too_large = |status: StatusCode| status == StatusCode::PAYLOAD_TOO_LARGE;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => return Err(ApiError::BadRequest("No file selected".to_string())),
            Err(e) if too_large(e.status()) => return Err(ApiError::UploadTooLarge { max_bytes }),
            Err(e) => return Err(ApiError::BadRequest(e.body_text())),
        };

        if field.name() != Some("file") {
            continue;
        }

        let file_name = field.file_name().unwrap_or_default().to_string();
        if file_name.is_empty() {
            return Err(ApiError::BadRequest("No file selected".to_string()));
        }

        let data = match field.bytes().await {
            Ok(data) => data,
            Err(e) if too_large(e.status()) => return Err(ApiError::UploadTooLarge { max_bytes }),
            Err(e) => return Err(ApiError::BadRequest(e.body_text())),
        };
        if data.len() > max_bytes {
            return Err(ApiError::UploadTooLarge { max_bytes });
        }
        if data.is_empty() {
            return Err(ApiError::BadRequest("Uploaded file is empty".to_string()));
        }

        return Ok((file_name, data));
    }
}

/// Server-side name for an upload: a fresh id plus the client's extension
fn upload_file_name(client_name: &str) -> String {
    let extension = Path::new(client_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|ext| ext.to_ascii_lowercase());

    match extension {
        Some(ext) => format!("{}.{}", uuid::Uuid::new_v4(), ext),
        None => uuid::Uuid::new_v4().to_string(),
    }
}

/// Resolve a URL path under `root`, refusing anything that would escape it
fn resolve_under(root: &Path, relative: &str) -> Option<PathBuf> {
    let relative = Path::new(relative);
    if relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_)))
    {
        return None;
    }
    Some(root.join(relative))
}

fn content_type(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());
    match extension.as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => "application/octet-stream",
    }
}

pub async fn get_image(
    State(state): State<AppState>,
    UrlPath(relative): UrlPath<String>,
) -> Result<impl IntoResponse, ApiError> {
    let not_found = || ApiError::NotFound("Image not found.".to_string());
    let path = resolve_under(&state.images_root, &relative).ok_or_else(not_found)?;

    let data = match tokio::fs::read(&path).await {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(not_found()),
        Err(e) if e.kind() == std::io::ErrorKind::IsADirectory => return Err(not_found()),
        Err(e) => return Err(ApiError::Internal(format!("Cannot read image: {}", e))),
    };

    Ok(([(header::CONTENT_TYPE, content_type(&path))], data))
}
