/// Bounded-concurrency chunked bulk writer
use super::ImageDocument;
use crate::error::{Result, VisearchError};
use crate::store::{IndexStore, BULK_TIMEOUT_GRACE};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{info, warn};

/// A document the store did not accept
#[derive(Debug, Clone)]
pub struct BulkFailure {
    pub image_id: String,
    pub relative_path: String,
    pub reason: String,
}

/// Result of a bulk write
#[derive(Debug, Default)]
pub struct BulkSummary {
    pub indexed: usize,
    pub failures: Vec<BulkFailure>,
}

/// Writes documents with a fixed number of workers, each sending
/// `chunk_size` documents per request with an explicit timeout
///
/// Per-document and per-batch failures are recorded and the run continues.
/// Only a TLS trust failure aborts the write.
pub struct BulkWriter {
    store: Arc<dyn IndexStore>,
    index: String,
    thread_count: usize,
    chunk_size: usize,
    timeout: Duration,
}

struct Shared {
    docs: Vec<ImageDocument>,
    indexed: AtomicUsize,
    failures: Mutex<Vec<BulkFailure>>,
}

impl Shared {
    fn record_failure(&self, doc: &ImageDocument, reason: String) {
        warn!(
            "Doc failed: {} ({}): {}",
            doc.image_id, doc.relative_path, reason
        );
        self.failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(BulkFailure {
                image_id: doc.image_id.clone(),
                relative_path: doc.relative_path.clone(),
                reason,
            });
    }
}

impl BulkWriter {
    pub fn new(
        store: Arc<dyn IndexStore>,
        index: impl Into<String>,
        thread_count: usize,
        chunk_size: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            index: index.into(),
            thread_count: thread_count.max(1),
            chunk_size: chunk_size.max(1),
            timeout,
        }
    }

    pub async fn write(&self, docs: Vec<ImageDocument>) -> Result<BulkSummary> {
        let total = docs.len();
        let chunk_count = total.div_ceil(self.chunk_size);
        let shared = Arc::new(Shared {
            docs,
            indexed: AtomicUsize::new(0),
            failures: Mutex::new(Vec::new()),
        });

        info!(
            "Indexing {} documents into {} ({} workers, chunks of {})",
            total, self.index, self.thread_count, self.chunk_size
        );

        // Worker w sends chunks w, w + thread_count, w + 2 * thread_count, ...
        let mut workers = JoinSet::new();
        for worker in 0..self.thread_count.min(chunk_count) {
            let shared = shared.clone();
            let store = self.store.clone();
            let index = self.index.clone();
            let chunk_size = self.chunk_size;
            let stride = self.thread_count;
            let timeout = self.timeout;

            workers.spawn(async move {
                for chunk in (worker..chunk_count).step_by(stride) {
                    let start = chunk * chunk_size;
                    let end = (start + chunk_size).min(shared.docs.len());
                    write_chunk(store.as_ref(), &index, &shared, start..end, chunk_size, timeout)
                        .await?;
                }
                Ok::<(), VisearchError>(())
            });
        }

        while let Some(joined) = workers.join_next().await {
            let outcome = joined.map_err(|e| {
                VisearchError::Other(anyhow::anyhow!("bulk worker terminated: {}", e))
            });
            if let Err(e) = outcome.and_then(|r| r) {
                workers.abort_all();
                return Err(e);
            }
        }

        let indexed = shared.indexed.load(Ordering::SeqCst);
        let failures = std::mem::take(&mut *shared.failures.lock().unwrap_or_else(|e| e.into_inner()));

        Ok(BulkSummary { indexed, failures })
    }
}

async fn write_chunk(
    store: &dyn IndexStore,
    index: &str,
    shared: &Shared,
    range: std::ops::Range<usize>,
    chunk_size: usize,
    timeout: Duration,
) -> Result<()> {
    let chunk = &shared.docs[range];

    // The store gets `timeout` as its own deadline; ours only catches a hung call
    let deadline = timeout + BULK_TIMEOUT_GRACE * 2;
    match tokio::time::timeout(deadline, store.bulk_index(index, chunk, timeout)).await {
        Ok(Ok(results)) => {
            for (doc, result) in chunk.iter().zip(results) {
                match result {
                    Ok(()) => {
                        let count = shared.indexed.fetch_add(1, Ordering::SeqCst) + 1;
                        if count % chunk_size == 0 {
                            info!("Indexed {} documents", count);
                        }
                    }
                    Err(reason) => shared.record_failure(doc, reason),
                }
            }
        }
        Ok(Err(e)) if e.is_certificate_error() => return Err(e.into()),
        Ok(Err(e)) => {
            let reason = format!("batch rejected: {}", e);
            for doc in chunk {
                shared.record_failure(doc, reason.clone());
            }
        }
        Err(_) => {
            let reason = format!("batch timed out after {:?}", deadline);
            for doc in chunk {
                shared.record_failure(doc, reason.clone());
            }
        }
    }

    Ok(())
}
