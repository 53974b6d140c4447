//! Best-effort replication to the backup document store.
//!
//! The backup store is an opaque sink: replication runs after the ingest
//! response is already on the wire, failures are logged and never
//! surfaced, and dashboard reads never touch it.

use argus_core::LogBatch;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// Replication chunk cap.
pub const BACKUP_CHUNK_SIZE: usize = 450;

#[async_trait]
pub trait BackupSink: Send + Sync {
    async fn replicate(&self, batch: &LogBatch) -> Result<(), String>;
}

/// Replication disabled.
pub struct NullBackup;

#[async_trait]
impl BackupSink for NullBackup {
    async fn replicate(&self, _batch: &LogBatch) -> Result<(), String> {
        Ok(())
    }
}

/// HTTP document-store adapter: POSTs each chunk as JSON.
pub struct HttpBackup {
    client: reqwest::Client,
    url: String,
    replicated: AtomicU64,
    failures: AtomicU64,
}

impl HttpBackup {
    pub fn new(url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("argus-server/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();
        Self {
            client,
            url,
            replicated: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    pub fn replicated(&self) -> u64 {
        self.replicated.load(Ordering::Relaxed)
    }
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl BackupSink for HttpBackup {
    async fn replicate(&self, batch: &LogBatch) -> Result<(), String> {
        let result = self
            .client
            .post(&self.url)
            .json(batch)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if !result.status().is_success() {
            self.failures.fetch_add(1, Ordering::Relaxed);
            return Err(format!("backup store returned {}", result.status()));
        }
        self.replicated
            .fetch_add(batch.len() as u64, Ordering::Relaxed);
        debug!(events = batch.len(), "Chunk replicated to backup store");
        Ok(())
    }
}

/// Replicate a committed batch in bounded chunks. Runs detached from the
/// ingest response path; failures are logged only.
pub async fn replicate_chunked(sink: &dyn BackupSink, batch: LogBatch) {
    for chunk in batch.into_chunks(BACKUP_CHUNK_SIZE) {
        if let Err(e) = sink.replicate(&chunk).await {
            warn!(error = %e, "Backup replication failed (continuing)");
        }
    }
}
