//! Cross-stream correlation engine.
//!
//! Evaluates three rules inline on the producer thread that delivered the
//! triggering event:
//!
//! - **Large transfer** (Critical): a single connection sent at least the
//!   configured threshold. Deduplicated per (process, destination) for 60 s.
//! - **Continuous transfer** (High): a process's outbound bytes over the
//!   sliding window exceed the threshold across at least two distinct
//!   connections. Suppressed after emission until the window sum drops
//!   back under the threshold.
//! - **Probable upload** (High): a connection sent more than the threshold
//!   and the same process read or copied a file within the preceding
//!   window. The contributing file event is re-flagged before upload.
//!
//! File read/copy events are held here for the probable-upload window and
//! only released to the spool afterwards, so the re-flag always lands
//! before the event leaves the machine.

use argus_core::config::CorrelationSection;
use argus_core::timeutil::MonotonicClock;
use argus_core::types::{
    AlertEvent, AlertType, EventFlag, FileAction, FileEvent, NetworkEvent, Severity,
    TransferDirection,
};
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Repeat-alert horizon for the large-transfer rule.
const LARGE_TRANSFER_DEDUPE_SECS: i64 = 60;

struct ByteSample {
    at: DateTime<Utc>,
    bytes: u64,
    connection_id: String,
}

#[derive(Default)]
struct ProcessWindow {
    samples: VecDeque<ByteSample>,
    suppressed: bool,
}

struct PendingFile {
    event: FileEvent,
    consumed: bool,
}

#[derive(Default)]
struct EngineState {
    /// (process, destination ip) -> last large-transfer alert time.
    large_recent: HashMap<(String, String), DateTime<Utc>>,
    /// process -> outbound byte samples inside the continuous window.
    windows: HashMap<String, ProcessWindow>,
    /// process -> held read/copy file events, oldest first.
    pending_files: HashMap<String, VecDeque<PendingFile>>,
}

pub struct CorrelationEngine {
    config: CorrelationSection,
    device_id: String,
    clock: Arc<MonotonicClock>,
    state: Mutex<EngineState>,
    alerts_emitted: AtomicU64,
    files_annotated: AtomicU64,
}

impl CorrelationEngine {
    pub fn new(config: CorrelationSection, device_id: String, clock: Arc<MonotonicClock>) -> Self {
        Self {
            config,
            device_id,
            clock,
            state: Mutex::new(EngineState::default()),
            alerts_emitted: AtomicU64::new(0),
            files_annotated: AtomicU64::new(0),
        }
    }

    /// Feed one file event through the engine. Read/copy events with an
    /// attributed process are held for the probable-upload window and come
    /// back via [`drain_released`]; everything else is returned for
    /// immediate enqueue.
    pub fn on_file_event(&self, event: FileEvent) -> Option<FileEvent> {
        let holdable = matches!(event.action, FileAction::Read | FileAction::Copy)
            && event.process_name.is_some();
        if !holdable {
            return Some(event);
        }

        let process = event.process_name.clone().unwrap_or_default();
        let mut state = self.state.lock();
        state
            .pending_files
            .entry(process)
            .or_default()
            .push_back(PendingFile {
                event,
                consumed: false,
            });
        None
    }

    /// Feed one network event; returns the alerts it produced, in rule
    /// order (large transfer first) and monotonic timestamp order.
    pub fn on_network_event(&self, event: &NetworkEvent) -> Vec<AlertEvent> {
        let mut alerts = Vec::new();
        let mut state = self.state.lock();

        if let Some(alert) = self.check_large_transfer(&mut state, event) {
            alerts.push(alert);
        }
        if let Some(alert) = self.check_continuous_transfer(&mut state, event) {
            alerts.push(alert);
        }
        if let Some(alert) = self.check_probable_upload(&mut state, event) {
            alerts.push(alert);
        }

        self.alerts_emitted
            .fetch_add(alerts.len() as u64, Ordering::Relaxed);
        alerts
    }

    /// Release held file events whose probable-upload window has elapsed,
    /// oldest first. Called from the flush cycle.
    pub fn drain_released(&self) -> Vec<FileEvent> {
        let now = self.clock.now();
        let window = Duration::seconds(self.config.probable_upload_window_seconds as i64);
        let mut released = Vec::new();

        let mut state = self.state.lock();
        for queue in state.pending_files.values_mut() {
            while queue
                .front()
                .map_or(false, |p| p.event.timestamp + window <= now)
            {
                if let Some(pending) = queue.pop_front() {
                    released.push(pending.event);
                }
            }
        }
        state.pending_files.retain(|_, q| !q.is_empty());
        drop(state);

        released.sort_by_key(|e| e.timestamp);
        released
    }

    /// Release everything held, regardless of age. Used at shutdown so no
    /// file event is lost with the window still open.
    pub fn flush_all_pending(&self) -> Vec<FileEvent> {
        let mut state = self.state.lock();
        let mut released: Vec<FileEvent> = state
            .pending_files
            .drain()
            .flat_map(|(_, queue)| queue.into_iter().map(|p| p.event))
            .collect();
        drop(state);
        released.sort_by_key(|e| e.timestamp);
        released
    }

    pub fn alerts_emitted(&self) -> u64 {
        self.alerts_emitted.load(Ordering::Relaxed)
    }

    pub fn files_annotated(&self) -> u64 {
        self.files_annotated.load(Ordering::Relaxed)
    }

    // ── Rules ────────────────────────────────────────────────────────────

    fn check_large_transfer(
        &self,
        state: &mut EngineState,
        event: &NetworkEvent,
    ) -> Option<AlertEvent> {
        if event.bytes_sent < self.config.large_transfer_threshold_bytes {
            return None;
        }

        let key = (event.process_name.clone(), event.destination_ip.clone());
        let dedupe = Duration::seconds(LARGE_TRANSFER_DEDUPE_SECS);
        if let Some(last) = state.large_recent.get(&key) {
            if event.timestamp - *last < dedupe {
                debug!(process = %event.process_name, dest = %event.destination_ip,
                    "Large-transfer alert suppressed by dedupe window");
                return None;
            }
        }
        state.large_recent.insert(key, event.timestamp);
        state
            .large_recent
            .retain(|_, at| event.timestamp - *at < dedupe * 5);

        info!(process = %event.process_name, dest = %event.destination_ip,
            bytes = event.bytes_sent, "Large outbound transfer detected");
        Some(self.alert(
            Severity::Critical,
            AlertType::LargeTransfer,
            format!(
                "{} sent {} bytes to {}:{} in a single connection",
                event.process_name, event.bytes_sent, event.destination_ip, event.destination_port
            ),
            None,
            Some(event.process_name.clone()),
            Some(event.bytes_sent),
        ))
    }

    fn check_continuous_transfer(
        &self,
        state: &mut EngineState,
        event: &NetworkEvent,
    ) -> Option<AlertEvent> {
        let window = state
            .windows
            .entry(event.process_name.clone())
            .or_default();
        window.samples.push_back(ByteSample {
            at: event.timestamp,
            bytes: event.bytes_sent,
            connection_id: event.id.clone(),
        });

        let horizon =
            event.timestamp - Duration::minutes(self.config.continuous_transfer_window_minutes as i64);
        while window.samples.front().map_or(false, |s| s.at < horizon) {
            window.samples.pop_front();
        }

        let sum: u64 = window.samples.iter().map(|s| s.bytes).sum();
        let distinct: HashSet<&str> = window
            .samples
            .iter()
            .map(|s| s.connection_id.as_str())
            .collect();

        if sum <= self.config.continuous_transfer_threshold_bytes {
            window.suppressed = false;
            return None;
        }
        if distinct.len() < 2 || window.suppressed {
            return None;
        }
        window.suppressed = true;

        info!(process = %event.process_name, window_bytes = sum,
            connections = distinct.len(), "Continuous outbound transfer detected");
        Some(self.alert(
            Severity::High,
            AlertType::ContinuousTransfer,
            format!(
                "{} sent {} bytes across {} connections within {} minutes",
                event.process_name,
                sum,
                distinct.len(),
                self.config.continuous_transfer_window_minutes
            ),
            None,
            Some(event.process_name.clone()),
            Some(sum),
        ))
    }

    fn check_probable_upload(
        &self,
        state: &mut EngineState,
        event: &NetworkEvent,
    ) -> Option<AlertEvent> {
        if event.bytes_sent <= self.config.probable_upload_threshold_bytes {
            return None;
        }

        let queue = state.pending_files.get_mut(&event.process_name)?;
        let window = Duration::seconds(self.config.probable_upload_window_seconds as i64);

        // Most recent unconsumed read/copy inside the window; each file
        // event feeds at most one alert.
        let pending = queue.iter_mut().rev().find(|p| {
            !p.consumed
                && event.timestamp >= p.event.timestamp
                && event.timestamp - p.event.timestamp <= window
        })?;
        pending.consumed = true;
        pending.event.flag = EventFlag::ProbableUpload;
        pending.event.is_transfer = true;
        pending.event.direction = TransferDirection::Outgoing;
        self.files_annotated.fetch_add(1, Ordering::Relaxed);

        let file_name = pending.event.file_name.clone();
        info!(process = %event.process_name, file = %file_name,
            bytes = event.bytes_sent, "Probable upload detected");
        Some(self.alert(
            Severity::High,
            AlertType::ProbableUpload,
            format!(
                "{} sent {} bytes shortly after accessing {}",
                event.process_name, event.bytes_sent, file_name
            ),
            Some(file_name),
            Some(event.process_name.clone()),
            Some(event.bytes_sent),
        ))
    }

    fn alert(
        &self,
        severity: Severity,
        alert_type: AlertType,
        description: String,
        related_file_name: Option<String>,
        related_process_name: Option<String>,
        bytes_involved: Option<u64>,
    ) -> AlertEvent {
        AlertEvent {
            id: Uuid::new_v4().to_string(),
            device_id: self.device_id.clone(),
            severity,
            alert_type,
            description,
            related_file_name,
            related_process_name,
            bytes_involved,
            timestamp: self.clock.now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use argus_core::types::EventSource;

    const MIB: u64 = 1024 * 1024;

    fn engine() -> CorrelationEngine {
        CorrelationEngine::new(
            CorrelationSection::default(),
            "dev-1".into(),
            Arc::new(MonotonicClock::new()),
        )
    }

    fn net(id: &str, process: &str, bytes: u64, at: DateTime<Utc>) -> NetworkEvent {
        NetworkEvent {
            id: id.into(),
            device_id: "dev-1".into(),
            process_name: process.into(),
            pid: 812,
            bytes_sent: bytes,
            bytes_received: 100,
            destination_ip: "203.0.113.5".into(),
            destination_port: 443,
            duration_secs: 4,
            timestamp: at,
            flag: EventFlag::Normal,
        }
    }

    fn file(process: &str, name: &str, at: DateTime<Utc>) -> FileEvent {
        FileEvent {
            id: Uuid::new_v4().to_string(),
            device_id: "dev-1".into(),
            user: "alice".into(),
            file_name: name.into(),
            full_path: format!("/home/alice/Documents/{}", name),
            size_bytes: 2_457_600,
            sha256: None,
            action: FileAction::Read,
            timestamp: at,
            process_name: Some(process.into()),
            flag: EventFlag::Normal,
            source: EventSource::Local,
            is_transfer: false,
            direction: TransferDirection::Unknown,
        }
    }

    #[test]
    fn test_large_transfer_fires_at_threshold() {
        let engine = engine();
        let alerts = engine.on_network_event(&net("c1", "curl", 25 * MIB, Utc::now()));
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, Severity::Critical);
        assert_eq!(alerts[0].alert_type, AlertType::LargeTransfer);
        assert_eq!(alerts[0].bytes_involved, Some(25 * MIB));
        assert_eq!(alerts[0].related_process_name.as_deref(), Some("curl"));
    }

    #[test]
    fn test_large_transfer_below_threshold_silent() {
        let engine = engine();
        let alerts = engine.on_network_event(&net("c1", "curl", 25 * MIB - 1, Utc::now()));
        assert!(alerts.is_empty());
    }

    #[test]
    fn test_large_transfer_dedupe_window() {
        let engine = engine();
        let t0 = Utc::now();
        assert_eq!(engine.on_network_event(&net("c1", "curl", 26 * MIB, t0)).len(), 1);
        // Same process + destination 30 s later: suppressed.
        let again = net("c2", "curl", 26 * MIB, t0 + Duration::seconds(30));
        assert!(engine.on_network_event(&again).is_empty());
        // 61 s later: fires again.
        let later = net("c3", "curl", 26 * MIB, t0 + Duration::seconds(61));
        assert_eq!(engine.on_network_event(&later).len(), 1);
    }

    #[test]
    fn test_large_transfer_distinct_destination_not_deduped() {
        let engine = engine();
        let t0 = Utc::now();
        assert_eq!(engine.on_network_event(&net("c1", "curl", 26 * MIB, t0)).len(), 1);
        let mut other = net("c2", "curl", 26 * MIB, t0 + Duration::seconds(5));
        other.destination_ip = "198.51.100.9".into();
        assert_eq!(engine.on_network_event(&other).len(), 1);
    }

    #[test]
    fn test_continuous_transfer_needs_two_connections() {
        let engine = engine();
        let t0 = Utc::now();
        // One 31 MiB connection: over the window threshold but only one
        // distinct connection, so only the large-transfer rule may speak.
        let alerts = engine.on_network_event(&net("c1", "rsync", 31 * MIB, t0));
        assert!(alerts
            .iter()
            .all(|a| a.alert_type != AlertType::ContinuousTransfer));
    }

    #[test]
    fn test_continuous_transfer_strictly_greater() {
        let engine = engine();
        let t0 = Utc::now();
        // Two connections summing exactly 30 MiB: not strictly greater.
        engine.on_network_event(&net("c1", "rsync", 15 * MIB, t0));
        let alerts = engine.on_network_event(&net("c2", "rsync", 15 * MIB, t0 + Duration::seconds(1)));
        assert!(alerts.is_empty());
        // One more byte tips it.
        let alerts = engine.on_network_event(&net("c3", "rsync", 1, t0 + Duration::seconds(2)));
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].alert_type, AlertType::ContinuousTransfer);
        assert_eq!(alerts[0].severity, Severity::High);
    }

    #[test]
    fn test_continuous_transfer_suppressed_until_window_drains() {
        let engine = engine();
        let t0 = Utc::now();
        engine.on_network_event(&net("c1", "rsync", 16 * MIB, t0));
        let alerts = engine.on_network_event(&net("c2", "rsync", 16 * MIB, t0 + Duration::seconds(1)));
        assert_eq!(alerts.len(), 1);
        // Still over threshold: no repeat.
        let alerts = engine.on_network_event(&net("c3", "rsync", MIB, t0 + Duration::seconds(2)));
        assert!(alerts.is_empty());
        // Eleven minutes on, the old samples age out, the sum drops, and a
        // fresh burst alerts again.
        let t1 = t0 + Duration::minutes(11);
        engine.on_network_event(&net("c4", "rsync", 16 * MIB, t1));
        let alerts = engine.on_network_event(&net("c5", "rsync", 16 * MIB, t1 + Duration::seconds(1)));
        assert_eq!(alerts.len(), 1);
    }

    #[test]
    fn test_probable_upload_references_recent_file() {
        let engine = engine();
        let t0 = Utc::now() - Duration::seconds(10);
        assert!(engine.on_file_event(file("chrome", "Report.xlsx", t0)).is_none());

        let alerts = engine.on_network_event(&net("c1", "chrome", 6_500_000, t0 + Duration::seconds(10)));
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].alert_type, AlertType::ProbableUpload);
        assert_eq!(alerts[0].related_file_name.as_deref(), Some("Report.xlsx"));

        // The held file event comes back re-flagged.
        let released = engine.flush_all_pending();
        assert_eq!(released.len(), 1);
        assert_eq!(released[0].flag, EventFlag::ProbableUpload);
        assert!(released[0].is_transfer);
        assert_eq!(released[0].direction, TransferDirection::Outgoing);
    }

    #[test]
    fn test_probable_upload_strict_bounds() {
        let engine = engine();
        let t0 = Utc::now();
        engine.on_file_event(file("chrome", "a.xlsx", t0));
        // Exactly the threshold: strict comparison means no alert.
        let alerts = engine.on_network_event(&net("c1", "chrome", 5 * MIB, t0 + Duration::seconds(5)));
        assert!(alerts.is_empty());
        // Outside the 15 s window: no alert.
        let alerts = engine.on_network_event(&net("c2", "chrome", 6 * MIB, t0 + Duration::seconds(16)));
        assert!(alerts.is_empty());
        // Inside the window and strictly over: alert.
        let alerts = engine.on_network_event(&net("c3", "chrome", 6 * MIB, t0 + Duration::seconds(15)));
        assert_eq!(alerts.len(), 1);
    }

    #[test]
    fn test_probable_upload_consumes_file_once() {
        let engine = engine();
        let t0 = Utc::now();
        engine.on_file_event(file("chrome", "a.xlsx", t0));
        assert_eq!(
            engine.on_network_event(&net("c1", "chrome", 6 * MIB, t0 + Duration::seconds(2))).len(),
            1
        );
        // Same file cannot feed a second alert.
        assert!(engine
            .on_network_event(&net("c2", "chrome", 6 * MIB, t0 + Duration::seconds(3)))
            .is_empty());
    }

    #[test]
    fn test_rule_order_large_before_probable() {
        let engine = engine();
        let t0 = Utc::now();
        engine.on_file_event(file("curl", "dump.bin", t0));
        let alerts = engine.on_network_event(&net("c1", "curl", 26 * MIB, t0 + Duration::seconds(1)));
        assert_eq!(alerts.len(), 2);
        assert_eq!(alerts[0].alert_type, AlertType::LargeTransfer);
        assert_eq!(alerts[1].alert_type, AlertType::ProbableUpload);
        assert!(alerts[0].timestamp < alerts[1].timestamp);
    }

    #[test]
    fn test_drain_released_honors_hold_window() {
        let engine = engine();
        // An old file is released; a fresh one stays held.
        engine.on_file_event(file("chrome", "old.xlsx", Utc::now() - Duration::seconds(30)));
        engine.on_file_event(file("chrome", "fresh.xlsx", Utc::now()));

        let released = engine.drain_released();
        assert_eq!(released.len(), 1);
        assert_eq!(released[0].file_name, "old.xlsx");

        let rest = engine.flush_all_pending();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].file_name, "fresh.xlsx");
    }

    #[test]
    fn test_non_holdable_events_pass_through() {
        let engine = engine();
        let mut ev = file("chrome", "new.docx", Utc::now());
        ev.action = FileAction::Create;
        assert!(engine.on_file_event(ev).is_some());

        let mut unattributed = file("chrome", "b.xlsx", Utc::now());
        unattributed.process_name = None;
        assert!(engine.on_file_event(unattributed).is_some());
    }
}
