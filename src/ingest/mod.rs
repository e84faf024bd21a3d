//! Corpus ingestion pipeline
//!
//! discovery → per-file embedding (+ optional EXIF) → index (re)creation →
//! chunked concurrent bulk write. Per-file and per-document failures are
//! collected into the [`IngestReport`]; schema and transport-trust failures
//! end the run.

mod bulk;
mod discovery;
mod document;

pub use bulk::{BulkFailure, BulkSummary, BulkWriter};
pub use discovery::discover;
pub use document::{image_id_for, relative_path, ImageDocument};

use crate::config::Config;
use crate::embedding::{EmbeddingError, ImageEmbedder};
use crate::error::Result;
use crate::metadata;
use crate::store::{IndexSchema, IndexStore, StoreError};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tracing::{info, warn};

/// Settings for one ingestion run
#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub images_root: PathBuf,
    pub pattern: String,
    pub index: String,
    pub thread_count: usize,
    pub chunk_size: usize,
    pub bulk_timeout: Duration,
    pub embed_workers: usize,
    pub delete_existing: bool,
    pub extract_gps_location: bool,
}

impl IngestOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            images_root: config.corpus.images_root.clone(),
            pattern: config.corpus.pattern.clone(),
            index: config.index.name.clone(),
            thread_count: config.ingest.thread_count,
            chunk_size: config.ingest.chunk_size,
            bulk_timeout: Duration::from_secs(config.ingest.bulk_timeout_secs),
            embed_workers: config.ingest.embed_workers,
            delete_existing: config.ingest.delete_existing,
            extract_gps_location: config.ingest.extract_gps_location,
        }
    }
}

/// A source file that produced no document
#[derive(Debug, Clone)]
pub struct FileFailure {
    pub path: PathBuf,
    pub error: String,
}

/// Outcome of an ingestion run
#[derive(Debug, Default)]
pub struct IngestReport {
    pub discovered: usize,
    pub documents: usize,
    pub embedding_failures: Vec<FileFailure>,
    pub duplicate_ids: usize,
    pub index_created: bool,
    pub indexed: usize,
    pub bulk_failures: Vec<BulkFailure>,
    pub embed_duration: Duration,
    pub total_duration: Duration,
}

/// Make sure `index` exists with `schema`
///
/// With `delete_existing` any existing index is dropped first. "Already
/// exists" on create and "not found" on delete are no-ops. Returns whether
/// the index was created by this call.
pub async fn ensure_index(
    store: &dyn IndexStore,
    index: &str,
    schema: &IndexSchema,
    delete_existing: bool,
) -> Result<bool> {
    if delete_existing && store.index_exists(index).await? {
        info!("Deleting existing {}", index);
        match store.delete_index(index).await {
            Ok(()) | Err(StoreError::IndexNotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }
    }

    info!("Creating index {}", index);
    match store.create_index(index, schema).await {
        Ok(()) => Ok(true),
        Err(StoreError::IndexAlreadyExists(_)) => {
            info!("Index {} already exists, keeping it", index);
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}

/// Turns a directory tree of images into a populated index
pub struct IngestPipeline {
    store: Arc<dyn IndexStore>,
    embedder: Arc<dyn ImageEmbedder>,
    options: IngestOptions,
}

impl IngestPipeline {
    pub fn new(
        store: Arc<dyn IndexStore>,
        embedder: Arc<dyn ImageEmbedder>,
        options: IngestOptions,
    ) -> Self {
        Self {
            store,
            embedder,
            options,
        }
    }

    /// Run the full pipeline
    pub async fn run(&self, schema: &IndexSchema) -> Result<IngestReport> {
        let start = Instant::now();
        schema.validate(self.embedder.dimension())?;

        // The denominator for progress is fixed before any processing starts
        let files = discover(&self.options.images_root, &self.options.pattern)?;
        info!(
            "Discovered {} images under {:?} matching {}",
            files.len(),
            self.options.images_root,
            self.options.pattern
        );

        let (documents, embedding_failures) = self.embed_files(&files).await;
        let embed_duration = start.elapsed();
        info!("Duration creating image embeddings = {:.2?}", embed_duration);

        let duplicate_ids = count_duplicate_ids(&documents);

        let index_created = ensure_index(
            self.store.as_ref(),
            &self.options.index,
            schema,
            self.options.delete_existing,
        )
        .await?;

        let document_count = documents.len();
        let writer = BulkWriter::new(
            self.store.clone(),
            self.options.index.clone(),
            self.options.thread_count,
            self.options.chunk_size,
            self.options.bulk_timeout,
        );
        let summary = writer.write(documents).await?;
        info!("Indexed {} documents", summary.indexed);

        Ok(IngestReport {
            discovered: files.len(),
            documents: document_count,
            embedding_failures,
            duplicate_ids,
            index_created,
            indexed: summary.indexed,
            bulk_failures: summary.failures,
            embed_duration,
            total_duration: start.elapsed(),
        })
    }

    /// Embed every file, `embed_workers` at a time, in no particular order
    pub async fn embed_files(&self, files: &[PathBuf]) -> (Vec<ImageDocument>, Vec<FileFailure>) {
        let total = files.len();
        let mut documents = Vec::with_capacity(total);
        let mut failures = Vec::new();
        let mut pending = files.iter().cloned();
        let mut tasks = JoinSet::new();
        let mut done = 0usize;

        loop {
            while tasks.len() < self.options.embed_workers.max(1) {
                let Some(path) = pending.next() else { break };
                let embedder = self.embedder.clone();
                let root = self.options.images_root.clone();
                let extract_gps = self.options.extract_gps_location;
                tasks.spawn_blocking(move || {
                    let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| {
                        process_file(embedder.as_ref(), &root, &path, extract_gps)
                    }))
                    .unwrap_or_else(|_| {
                        Err(EmbeddingError::GenerationError(
                            "panicked while processing image".to_string(),
                        ))
                    });
                    (path, outcome)
                });
            }

            let Some(joined) = tasks.join_next().await else {
                break;
            };
            done += 1;

            match joined {
                Ok((path, Ok(doc))) => {
                    info!(
                        "Image {} / {} ({:.0}%): {}",
                        done,
                        total,
                        done as f64 * 100.0 / total as f64,
                        path.display()
                    );
                    documents.push(doc);
                }
                Ok((path, Err(error))) => {
                    warn!("Skipping {}: {}", path.display(), error);
                    failures.push(FileFailure {
                        path,
                        error: error.to_string(),
                    });
                }
                // Panics are caught inside the task, so only cancellation lands here
                Err(e) => {
                    warn!("Embedding task did not complete: {}", e);
                }
            }
        }

        (documents, failures)
    }
}

/// Embed one file and assemble its document
fn process_file(
    embedder: &dyn ImageEmbedder,
    root: &Path,
    path: &Path,
    extract_gps: bool,
) -> std::result::Result<ImageDocument, EmbeddingError> {
    let embedding = embedder.embed_image(path)?;

    let exif = extract_gps.then(|| metadata::extract(path));

    ImageDocument::build(root, path, embedding, embedder.dimension(), exif)
}

fn count_duplicate_ids(documents: &[ImageDocument]) -> usize {
    let mut seen: HashMap<&str, &str> = HashMap::new();
    let mut duplicates = 0;
    for doc in documents {
        if let Some(first) = seen.insert(&doc.image_id, &doc.relative_path) {
            duplicates += 1;
            warn!(
                "Duplicate image_id '{}' for {} and {}; ids are derived from file base names",
                doc.image_id, first, doc.relative_path
            );
        }
    }
    duplicates
}
