//! In-memory primary store.
//!
//! Concurrent maps keyed by event id (devices by device id). Values are
//! immutable once stored, so reads clone snapshots under a short read
//! lock; writes are idempotent upserts keyed by id, which makes agent
//! re-uploads harmless. Query-time noise filtering mirrors the agent so
//! batches from older agents do not pollute results.

use argus_core::noise::NoiseFilter;
use argus_core::types::{
    AlertEvent, AppUsageEvent, DeviceInfo, EventFlag, EventSource, FileEvent, NetworkEvent,
    Severity,
};
use argus_core::LogBatch;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Filters common to the event queries.
#[derive(Debug, Clone, Default)]
pub struct EventQuery {
    pub cutoff: Option<DateTime<Utc>>,
    pub device_id: Option<String>,
    pub flag: Option<EventFlag>,
    pub source: Option<EventSource>,
    pub severity: Option<Severity>,
    pub limit: usize,
}

/// Aggregate rows for the summary endpoints.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessTraffic {
    pub process_name: String,
    pub bytes_sent: u64,
    pub connections: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppDuration {
    pub app_name: String,
    pub total_secs: u64,
    pub sessions: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopTalker {
    pub device_id: String,
    pub user: String,
    pub bytes_sent: u64,
    pub distinct_destinations: usize,
}

pub struct EventStore {
    devices: RwLock<HashMap<String, DeviceInfo>>,
    file_events: RwLock<HashMap<String, FileEvent>>,
    network_events: RwLock<HashMap<String, NetworkEvent>>,
    app_events: RwLock<HashMap<String, AppUsageEvent>>,
    alerts: RwLock<HashMap<String, AlertEvent>>,
    noise: NoiseFilter,
    batches_committed: AtomicU64,
    events_committed: AtomicU64,
}

impl Default for EventStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EventStore {
    pub fn new() -> Self {
        Self {
            devices: RwLock::new(HashMap::new()),
            file_events: RwLock::new(HashMap::new()),
            network_events: RwLock::new(HashMap::new()),
            app_events: RwLock::new(HashMap::new()),
            alerts: RwLock::new(HashMap::new()),
            noise: NoiseFilter::new(),
            batches_committed: AtomicU64::new(0),
            events_committed: AtomicU64::new(0),
        }
    }

    // ── Writes ───────────────────────────────────────────────────────────

    /// Commit a batch synchronously: device upsert plus id-keyed event
    /// upserts. Returns the number of events accepted.
    pub fn commit_batch(&self, batch: &LogBatch) -> usize {
        self.devices
            .write()
            .insert(batch.device_info.device_id.clone(), batch.device_info.clone());

        {
            let mut map = self.file_events.write();
            for event in &batch.file_events {
                map.insert(event.id.clone(), event.clone());
            }
        }
        {
            let mut map = self.network_events.write();
            for event in &batch.network_events {
                map.insert(event.id.clone(), event.clone());
            }
        }
        {
            let mut map = self.app_events.write();
            for event in &batch.app_usage_events {
                map.insert(event.id.clone(), event.clone());
            }
        }
        {
            let mut map = self.alerts.write();
            for event in &batch.alerts {
                map.insert(event.id.clone(), event.clone());
            }
        }

        let received = batch.len();
        self.batches_committed.fetch_add(1, Ordering::Relaxed);
        self.events_committed
            .fetch_add(received as u64, Ordering::Relaxed);
        debug!(device = %batch.device_id, events = received, "Batch committed");
        received
    }

    // ── Reads ────────────────────────────────────────────────────────────

    /// Devices ordered by `last_seen` descending.
    pub fn devices(&self) -> Vec<DeviceInfo> {
        let mut devices: Vec<DeviceInfo> = self.devices.read().values().cloned().collect();
        devices.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
        devices
    }

    pub fn file_events(&self, query: &EventQuery) -> Vec<FileEvent> {
        let mut events: Vec<FileEvent> = self
            .file_events
            .read()
            .values()
            .filter(|e| query.cutoff.map_or(true, |c| e.timestamp >= c))
            .filter(|e| query.device_id.as_deref().map_or(true, |d| e.device_id == d))
            .filter(|e| query.flag.map_or(true, |f| e.flag == f))
            .filter(|e| query.source.map_or(true, |s| e.source == s))
            .filter(|e| !self.noise.is_noisy(&e.full_path))
            .cloned()
            .collect();
        sort_truncate(&mut events, query.limit, |e| e.timestamp);
        events
    }

    /// Transfer events: external sources or transfer flags.
    pub fn transfer_events(&self, query: &EventQuery) -> Vec<FileEvent> {
        let mut events: Vec<FileEvent> = self
            .file_events
            .read()
            .values()
            .filter(|e| {
                matches!(
                    e.source,
                    EventSource::Usb | EventSource::NetworkShare | EventSource::CloudSync
                ) || matches!(
                    e.flag,
                    EventFlag::UsbTransfer
                        | EventFlag::NetworkTransfer
                        | EventFlag::CloudSyncTransfer
                        | EventFlag::ProbableUpload
                )
            })
            .filter(|e| query.cutoff.map_or(true, |c| e.timestamp >= c))
            .filter(|e| query.device_id.as_deref().map_or(true, |d| e.device_id == d))
            .cloned()
            .collect();
        sort_truncate(&mut events, query.limit, |e| e.timestamp);
        events
    }

    pub fn network_events(&self, query: &EventQuery) -> Vec<NetworkEvent> {
        let mut events: Vec<NetworkEvent> = self
            .network_events
            .read()
            .values()
            .filter(|e| query.cutoff.map_or(true, |c| e.timestamp >= c))
            .filter(|e| query.device_id.as_deref().map_or(true, |d| e.device_id == d))
            .cloned()
            .collect();
        sort_truncate(&mut events, query.limit, |e| e.timestamp);
        events
    }

    pub fn app_events(&self, query: &EventQuery) -> Vec<AppUsageEvent> {
        let mut events: Vec<AppUsageEvent> = self
            .app_events
            .read()
            .values()
            .filter(|e| query.cutoff.map_or(true, |c| e.start_time >= c))
            .filter(|e| query.device_id.as_deref().map_or(true, |d| e.device_id == d))
            .cloned()
            .collect();
        sort_truncate(&mut events, query.limit, |e| e.start_time);
        events
    }

    pub fn alerts(&self, query: &EventQuery) -> Vec<AlertEvent> {
        let mut events: Vec<AlertEvent> = self
            .alerts
            .read()
            .values()
            .filter(|e| query.cutoff.map_or(true, |c| e.timestamp >= c))
            .filter(|e| query.device_id.as_deref().map_or(true, |d| e.device_id == d))
            .filter(|e| query.severity.map_or(true, |s| e.severity == s))
            .cloned()
            .collect();
        sort_truncate(&mut events, query.limit, |e| e.timestamp);
        events
    }

    // ── Counts ───────────────────────────────────────────────────────────

    pub fn count_file_events(&self, cutoff: DateTime<Utc>) -> usize {
        self.file_events
            .read()
            .values()
            .filter(|e| e.timestamp >= cutoff && !self.noise.is_noisy(&e.full_path))
            .count()
    }

    pub fn count_network_events(&self, cutoff: DateTime<Utc>) -> usize {
        self.network_events
            .read()
            .values()
            .filter(|e| e.timestamp >= cutoff)
            .count()
    }

    pub fn count_alerts(&self, cutoff: DateTime<Utc>, min_severity: Option<Severity>) -> usize {
        self.alerts
            .read()
            .values()
            .filter(|e| e.timestamp >= cutoff)
            .filter(|e| min_severity.map_or(true, |s| e.severity >= s))
            .count()
    }

    // ── Aggregations ─────────────────────────────────────────────────────

    /// Top processes by outbound bytes within the window.
    pub fn top_processes(&self, cutoff: DateTime<Utc>, n: usize) -> Vec<ProcessTraffic> {
        let mut per_process: HashMap<String, (u64, usize)> = HashMap::new();
        for event in self.network_events.read().values() {
            if event.timestamp < cutoff {
                continue;
            }
            let entry = per_process.entry(event.process_name.clone()).or_default();
            entry.0 += event.bytes_sent;
            entry.1 += 1;
        }
        let mut rows: Vec<ProcessTraffic> = per_process
            .into_iter()
            .map(|(process_name, (bytes_sent, connections))| ProcessTraffic {
                process_name,
                bytes_sent,
                connections,
            })
            .collect();
        rows.sort_by(|a, b| b.bytes_sent.cmp(&a.bytes_sent));
        rows.truncate(n);
        rows
    }

    /// Top applications by foreground duration within the window.
    pub fn top_apps(&self, cutoff: DateTime<Utc>, n: usize) -> Vec<AppDuration> {
        let mut per_app: HashMap<String, (u64, usize)> = HashMap::new();
        for event in self.app_events.read().values() {
            if event.start_time < cutoff {
                continue;
            }
            let entry = per_app.entry(event.app_name.clone()).or_default();
            entry.0 += event.duration_secs;
            entry.1 += 1;
        }
        let mut rows: Vec<AppDuration> = per_app
            .into_iter()
            .map(|(app_name, (total_secs, sessions))| AppDuration {
                app_name,
                total_secs,
                sessions,
            })
            .collect();
        rows.sort_by(|a, b| b.total_secs.cmp(&a.total_secs));
        rows.truncate(n);
        rows
    }

    /// Top (device, user) pairs by outbound bytes, with distinct
    /// destination counts.
    pub fn top_talkers(&self, cutoff: DateTime<Utc>, n: usize) -> Vec<TopTalker> {
        let devices = self.devices.read();
        let mut per_device: HashMap<String, (u64, HashSet<String>)> = HashMap::new();
        for event in self.network_events.read().values() {
            if event.timestamp < cutoff {
                continue;
            }
            let entry = per_device.entry(event.device_id.clone()).or_default();
            entry.0 += event.bytes_sent;
            entry.1.insert(event.destination_ip.clone());
        }
        let mut rows: Vec<TopTalker> = per_device
            .into_iter()
            .map(|(device_id, (bytes_sent, destinations))| TopTalker {
                user: devices
                    .get(&device_id)
                    .map(|d| d.user.clone())
                    .unwrap_or_default(),
                device_id,
                bytes_sent,
                distinct_destinations: destinations.len(),
            })
            .collect();
        rows.sort_by(|a, b| b.bytes_sent.cmp(&a.bytes_sent));
        rows.truncate(n);
        rows
    }

    // ── Stats ────────────────────────────────────────────────────────────

    pub fn batches_committed(&self) -> u64 {
        self.batches_committed.load(Ordering::Relaxed)
    }
    pub fn events_committed(&self) -> u64 {
        self.events_committed.load(Ordering::Relaxed)
    }
    pub fn device_count(&self) -> usize {
        self.devices.read().len()
    }
}

fn sort_truncate<T, K: Ord + Copy>(events: &mut Vec<T>, limit: usize, key: impl Fn(&T) -> K) {
    events.sort_by(|a, b| key(b).cmp(&key(a)));
    if limit > 0 {
        events.truncate(limit);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use argus_core::types::*;
    use chrono::Duration;

    fn device(id: &str, user: &str, last_seen: DateTime<Utc>) -> DeviceInfo {
        DeviceInfo {
            device_id: id.into(),
            hostname: format!("host-{}", id),
            user: user.into(),
            os_version: "linux 6.8".into(),
            agent_version: "0.1.0".into(),
            last_seen,
        }
    }

    fn file_event(id: &str, path: &str, at: DateTime<Utc>) -> FileEvent {
        FileEvent {
            id: id.into(),
            device_id: "dev-1".into(),
            user: "alice".into(),
            file_name: path.rsplit('/').next().unwrap_or(path).into(),
            full_path: path.into(),
            size_bytes: 1024,
            sha256: None,
            action: FileAction::Create,
            timestamp: at,
            process_name: None,
            flag: EventFlag::Normal,
            source: EventSource::Local,
            is_transfer: false,
            direction: TransferDirection::Unknown,
        }
    }

    fn net_event(id: &str, process: &str, bytes: u64, at: DateTime<Utc>) -> NetworkEvent {
        NetworkEvent {
            id: id.into(),
            device_id: "dev-1".into(),
            process_name: process.into(),
            pid: 10,
            bytes_sent: bytes,
            bytes_received: 0,
            destination_ip: "203.0.113.5".into(),
            destination_port: 443,
            duration_secs: 3,
            timestamp: at,
            flag: EventFlag::Normal,
        }
    }

    fn batch_with(
        file_events: Vec<FileEvent>,
        network_events: Vec<NetworkEvent>,
    ) -> LogBatch {
        let mut batch = LogBatch::new(device("dev-1", "alice", Utc::now()));
        batch.file_events = file_events;
        batch.network_events = network_events;
        batch
    }

    #[test]
    fn test_idempotent_upsert() {
        let store = EventStore::new();
        let now = Utc::now();

        let first = file_event("fe-1", "/home/alice/Desktop/a.docx", now);
        store.commit_batch(&batch_with(vec![first], vec![]));

        // Re-upload of the same id with a changed flag overwrites in place.
        let mut second = file_event("fe-1", "/home/alice/Desktop/a.docx", now);
        second.flag = EventFlag::ProbableUpload;
        store.commit_batch(&batch_with(vec![second], vec![]));

        let events = store.file_events(&EventQuery::default());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].flag, EventFlag::ProbableUpload);
    }

    #[test]
    fn test_devices_ordered_by_last_seen() {
        let store = EventStore::new();
        let now = Utc::now();
        store.commit_batch(&LogBatch::new(device("dev-1", "alice", now - Duration::hours(1))));
        store.commit_batch(&LogBatch::new(device("dev-2", "bob", now)));

        let devices = store.devices();
        assert_eq!(devices[0].device_id, "dev-2");
        assert_eq!(devices[1].device_id, "dev-1");
    }

    #[test]
    fn test_query_cutoff_and_limit() {
        let store = EventStore::new();
        let now = Utc::now();
        let mut events = Vec::new();
        for i in 0..5 {
            events.push(file_event(
                &format!("fe-{}", i),
                &format!("/home/alice/doc-{}.txt", i),
                now - Duration::hours(i),
            ));
        }
        store.commit_batch(&batch_with(events, vec![]));

        let query = EventQuery {
            cutoff: Some(now - Duration::hours(2) - Duration::minutes(1)),
            limit: 2,
            ..Default::default()
        };
        let got = store.file_events(&query);
        assert_eq!(got.len(), 2);
        // Newest first.
        assert_eq!(got[0].id, "fe-0");
        assert_eq!(got[1].id, "fe-1");
    }

    #[test]
    fn test_noise_mirrored_at_query_time() {
        let store = EventStore::new();
        let now = Utc::now();
        store.commit_batch(&batch_with(
            vec![
                file_event("fe-1", "/home/alice/Desktop/report.docx", now),
                // A legacy agent uploads unfiltered temp churn.
                file_event("fe-2", "C:\\Users\\u\\AppData\\Local\\Temp\\x.tmp", now),
            ],
            vec![],
        ));

        let events = store.file_events(&EventQuery::default());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, "fe-1");
        assert_eq!(store.count_file_events(now - Duration::hours(1)), 1);
    }

    #[test]
    fn test_transfer_filter_by_source_or_flag() {
        let store = EventStore::new();
        let now = Utc::now();

        let mut usb = file_event("fe-usb", "/media/usb0/secret.docx", now);
        usb.source = EventSource::Usb;
        usb.flag = EventFlag::UsbTransfer;
        let mut probable = file_event("fe-up", "/home/alice/Documents/q3.xlsx", now);
        probable.flag = EventFlag::ProbableUpload;
        let plain = file_event("fe-plain", "/home/alice/notes.md", now);

        store.commit_batch(&batch_with(vec![usb, probable, plain], vec![]));

        let transfers = store.transfer_events(&EventQuery::default());
        let ids: Vec<&str> = transfers.iter().map(|e| e.id.as_str()).collect();
        assert!(ids.contains(&"fe-usb"));
        assert!(ids.contains(&"fe-up"));
        assert!(!ids.contains(&"fe-plain"));
    }

    #[test]
    fn test_alert_severity_filter() {
        let store = EventStore::new();
        let now = Utc::now();
        let mut batch = LogBatch::new(device("dev-1", "alice", now));
        for (i, severity) in [Severity::Low, Severity::High, Severity::Critical]
            .iter()
            .enumerate()
        {
            batch.alerts.push(AlertEvent {
                id: format!("al-{}", i),
                device_id: "dev-1".into(),
                severity: *severity,
                alert_type: AlertType::LargeTransfer,
                description: "outbound volume".into(),
                related_file_name: None,
                related_process_name: None,
                bytes_involved: None,
                timestamp: now,
            });
        }
        store.commit_batch(&batch);

        let query = EventQuery {
            severity: Some(Severity::Critical),
            ..Default::default()
        };
        let critical = store.alerts(&query);
        assert_eq!(critical.len(), 1);
        assert_eq!(critical[0].id, "al-2");
    }

    #[test]
    fn test_top_processes_and_talkers() {
        let store = EventStore::new();
        let now = Utc::now();
        let mut batch = batch_with(
            vec![],
            vec![
                net_event("n1", "curl", 500, now),
                net_event("n2", "curl", 700, now),
                net_event("n3", "rsync", 900, now),
            ],
        );
        batch.network_events[1].destination_ip = "198.51.100.7".into();
        store.commit_batch(&batch);

        let cutoff = now - Duration::hours(1);
        let top = store.top_processes(cutoff, 10);
        assert_eq!(top[0].process_name, "curl");
        assert_eq!(top[0].bytes_sent, 1200);
        assert_eq!(top[0].connections, 2);

        let talkers = store.top_talkers(cutoff, 10);
        assert_eq!(talkers.len(), 1);
        assert_eq!(talkers[0].device_id, "dev-1");
        assert_eq!(talkers[0].user, "alice");
        assert_eq!(talkers[0].bytes_sent, 2100);
        assert_eq!(talkers[0].distinct_destinations, 2);
    }
}
