//! Batch uploader.
//!
//! Every cycle: sweep retention, list sealed segments oldest first,
//! decrypt each, POST it as one or more `LogBatch`es, and delete the
//! segment only once every batch was acknowledged with HTTP 200. Any
//! failure keeps the segment on disk and switches the loop to exponential
//! backoff; corrupt segments are quarantined and skipped.

use crate::spool::EventQueue;
use argus_core::types::DeviceInfo;
use argus_core::{ArgusError, IngestReceipt, LogBatch};
use reqwest::StatusCode;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const BACKOFF_BASE_SECS: u64 = 5;
const BACKOFF_CAP_SECS: u64 = 300;
/// Consecutive failures after which every retry sleeps the full cap.
const BACKOFF_CAP_AFTER: u32 = 3;

pub struct Uploader {
    client: reqwest::Client,
    ingest_url: String,
    api_key: String,
    device_info: DeviceInfo,
    queue: Arc<EventQueue>,
    upload_interval: Duration,
    max_batch_size: usize,
    retention_days: u32,
    running: Arc<AtomicBool>,
    consecutive_failures: AtomicU32,
    segments_delivered: AtomicU64,
    events_delivered: AtomicU64,
}

impl Uploader {
    pub fn new(
        api_endpoint: &str,
        api_key: String,
        device_info: DeviceInfo,
        queue: Arc<EventQueue>,
        upload_interval_secs: u64,
        max_batch_size: usize,
        retention_days: u32,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .user_agent(concat!("argus-agent/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();

        Self {
            client,
            ingest_url: format!("{}/api/logs/ingest", api_endpoint.trim_end_matches('/')),
            api_key,
            device_info,
            queue,
            upload_interval: Duration::from_secs(upload_interval_secs.max(1)),
            max_batch_size,
            retention_days,
            running: Arc::new(AtomicBool::new(false)),
            consecutive_failures: AtomicU32::new(0),
            segments_delivered: AtomicU64::new(0),
            events_delivered: AtomicU64::new(0),
        }
    }

    /// One delivery cycle. Returns false when a segment could not be
    /// delivered and backoff should begin.
    pub async fn run_cycle(&self) -> bool {
        self.queue.sweep_expired(self.retention_days);

        for segment in self.queue.list_segments() {
            let payload = match self.queue.read_segment(&segment) {
                Ok(payload) => payload,
                Err(ArgusError::SegmentCorrupt { .. }) | Err(ArgusError::SegmentFormat(_)) => {
                    self.queue.quarantine(&segment);
                    continue;
                }
                Err(e) => {
                    warn!(segment = %segment.display(), error = %e, "Segment read failed");
                    return false;
                }
            };

            let mut device_info = self.device_info.clone();
            device_info.last_seen = chrono::Utc::now();
            let mut batch = LogBatch::new(device_info);
            batch.file_events = payload.file_events;
            batch.network_events = payload.network_events;
            batch.app_usage_events = payload.app_usage_events;
            batch.alerts = payload.alerts;

            // Oversized segments split across multiple POSTs; the segment
            // is only removed once every chunk is acknowledged.
            for chunk in batch.into_chunks(self.max_batch_size) {
                if !self.post(&chunk).await {
                    return false;
                }
            }

            if let Err(e) = self.queue.delete_segment(&segment) {
                warn!(segment = %segment.display(), error = %e, "Failed to delete acked segment");
            } else {
                self.segments_delivered.fetch_add(1, Ordering::Relaxed);
                debug!(segment = %segment.display(), "Segment delivered and removed");
            }
        }
        true
    }

    async fn post(&self, batch: &LogBatch) -> bool {
        let response = self
            .client
            .post(&self.ingest_url)
            .header("X-Api-Key", &self.api_key)
            .header("X-Device-Id", &self.device_info.device_id)
            .json(batch)
            .send()
            .await;

        match response {
            Ok(resp) if resp.status() == StatusCode::OK => match resp.json::<IngestReceipt>().await
            {
                Ok(receipt) => {
                    self.events_delivered
                        .fetch_add(receipt.received as u64, Ordering::Relaxed);
                    debug!(received = receipt.received, "Batch acknowledged");
                    true
                }
                Err(e) => {
                    warn!(error = %e, "Acknowledgement body unreadable, keeping segment");
                    false
                }
            },
            Ok(resp) => {
                warn!(status = %resp.status(), "Upload rejected, keeping segment");
                false
            }
            Err(e) => {
                warn!(error = %e, "Upload failed, keeping segment");
                false
            }
        }
    }

    /// Spawn the upload loop.
    pub fn start(self: &Arc<Self>) {
        self.running.store(true, Ordering::Relaxed);
        let uploader = Arc::clone(self);
        let running = self.running.clone();

        tokio::spawn(async move {
            info!(url = %uploader.ingest_url, "Uploader started");
            while running.load(Ordering::Relaxed) {
                let delay = if uploader.run_cycle().await {
                    uploader.consecutive_failures.store(0, Ordering::Relaxed);
                    uploader.upload_interval
                } else {
                    let failures = uploader
                        .consecutive_failures
                        .fetch_add(1, Ordering::Relaxed)
                        + 1;
                    let delay = backoff_delay(failures);
                    warn!(failures, delay_secs = delay.as_secs(), "Upload cycle failed, backing off");
                    delay
                };
                tokio::time::sleep(delay).await;
            }
            info!("Uploader stopped");
        });
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    pub fn segments_delivered(&self) -> u64 {
        self.segments_delivered.load(Ordering::Relaxed)
    }

    pub fn events_delivered(&self) -> u64 {
        self.events_delivered.load(Ordering::Relaxed)
    }
}

/// Exponential backoff with base 2 from 5 s; after three consecutive
/// failures every retry waits the full 5-minute cap.
fn backoff_delay(consecutive_failures: u32) -> Duration {
    let secs = if consecutive_failures >= BACKOFF_CAP_AFTER {
        BACKOFF_CAP_SECS
    } else {
        (BACKOFF_BASE_SECS << (consecutive_failures.saturating_sub(1) as u64))
            .min(BACKOFF_CAP_SECS)
    };
    Duration::from_secs(secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_schedule() {
        assert_eq!(backoff_delay(1), Duration::from_secs(5));
        assert_eq!(backoff_delay(2), Duration::from_secs(10));
        assert_eq!(backoff_delay(3), Duration::from_secs(300));
        assert_eq!(backoff_delay(10), Duration::from_secs(300));
    }
}
