//! Per-process outbound TCP accounting.
//!
//! Snapshots the TCP table on a fixed cadence and keys connections by
//! (pid, local 5-tuple). A connection that disappears from the table
//! produces one [`NetworkEvent`] carrying the bytes accumulated since its
//! first sighting and the observed duration.

use crate::platform::{TcpConnection, TcpTableProvider};
use argus_core::config::NetworkMonitorSection;
use argus_core::timeutil::MonotonicClock;
use argus_core::types::{EventFlag, NetworkEvent};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

pub type NetEventSink = Arc<dyn Fn(NetworkEvent) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ConnKey {
    pid: u32,
    local_addr: String,
    local_port: u16,
    remote_addr: String,
    remote_port: u16,
}

struct ConnTrack {
    process_name: String,
    first_seen: DateTime<Utc>,
    last_seen: DateTime<Utc>,
    /// Counter values at first sighting; deltas are reported.
    base_sent: u64,
    base_received: u64,
    last_sent: u64,
    last_received: u64,
}

pub struct NetworkMonitor {
    config: NetworkMonitorSection,
    device_id: String,
    clock: Arc<MonotonicClock>,
    table: Arc<dyn TcpTableProvider>,
    live: Mutex<HashMap<ConnKey, ConnTrack>>,
    running: Arc<AtomicBool>,
    polls_completed: AtomicU64,
    events_emitted: AtomicU64,
}

impl NetworkMonitor {
    pub fn new(
        config: NetworkMonitorSection,
        device_id: String,
        clock: Arc<MonotonicClock>,
        table: Arc<dyn TcpTableProvider>,
    ) -> Self {
        Self {
            config,
            device_id,
            clock,
            table,
            live: Mutex::new(HashMap::new()),
            running: Arc::new(AtomicBool::new(false)),
            polls_completed: AtomicU64::new(0),
            events_emitted: AtomicU64::new(0),
        }
    }

    /// One polling step: update tracked connections, emit an event per
    /// connection that vanished since the previous poll.
    pub fn poll_once(&self) -> Vec<NetworkEvent> {
        self.polls_completed.fetch_add(1, Ordering::Relaxed);
        let now = self.clock.now();

        let snapshot = self.table.snapshot();
        let mut live = self.live.lock();
        let mut present: HashSet<ConnKey> = HashSet::new();

        for conn in snapshot {
            if !self.accounted(&conn) {
                continue;
            }
            let key = ConnKey {
                pid: conn.pid,
                local_addr: conn.local_addr.clone(),
                local_port: conn.local_port,
                remote_addr: conn.remote_addr.clone(),
                remote_port: conn.remote_port,
            };
            present.insert(key.clone());

            match live.get_mut(&key) {
                Some(track) => {
                    track.last_seen = now;
                    track.last_sent = conn.bytes_sent;
                    track.last_received = conn.bytes_received;
                }
                None => {
                    live.insert(
                        key,
                        ConnTrack {
                            process_name: conn.process_name,
                            first_seen: now,
                            last_seen: now,
                            base_sent: conn.bytes_sent,
                            base_received: conn.bytes_received,
                            last_sent: conn.bytes_sent,
                            last_received: conn.bytes_received,
                        },
                    );
                }
            }
        }

        // Connections gone from the table close their window.
        let closed: Vec<(ConnKey, ConnTrack)> = {
            let gone: Vec<ConnKey> = live
                .keys()
                .filter(|k| !present.contains(*k))
                .cloned()
                .collect();
            gone.into_iter()
                .filter_map(|k| live.remove(&k).map(|t| (k, t)))
                .collect()
        };
        drop(live);

        let mut events = Vec::new();
        for (key, track) in closed {
            self.events_emitted.fetch_add(1, Ordering::Relaxed);
            events.push(NetworkEvent {
                id: Uuid::new_v4().to_string(),
                device_id: self.device_id.clone(),
                process_name: track.process_name,
                pid: key.pid,
                bytes_sent: track.last_sent.saturating_sub(track.base_sent),
                bytes_received: track.last_received.saturating_sub(track.base_received),
                destination_ip: key.remote_addr,
                destination_port: key.remote_port,
                duration_secs: (track.last_seen - track.first_seen).num_seconds().max(0) as u64,
                timestamp: self.clock.now(),
                flag: EventFlag::Normal,
            });
        }
        events
    }

    /// Flush every tracked connection as closed (shutdown path).
    pub fn finish(&self) -> Vec<NetworkEvent> {
        let drained: Vec<(ConnKey, ConnTrack)> = self.live.lock().drain().collect();
        drained
            .into_iter()
            .map(|(key, track)| NetworkEvent {
                id: Uuid::new_v4().to_string(),
                device_id: self.device_id.clone(),
                process_name: track.process_name,
                pid: key.pid,
                bytes_sent: track.last_sent.saturating_sub(track.base_sent),
                bytes_received: track.last_received.saturating_sub(track.base_received),
                destination_ip: key.remote_addr,
                destination_port: key.remote_port,
                duration_secs: (track.last_seen - track.first_seen).num_seconds().max(0) as u64,
                timestamp: self.clock.now(),
                flag: EventFlag::Normal,
            })
            .collect()
    }

    /// Whether this table row participates in accounting.
    fn accounted(&self, conn: &TcpConnection) -> bool {
        if conn.state == "LISTEN" || conn.remote_port == 0 {
            return false;
        }
        if self
            .config
            .private_subnets
            .iter()
            .any(|prefix| conn.remote_addr.starts_with(prefix.as_str()))
        {
            return false;
        }
        let proc_lower = conn.process_name.to_lowercase();
        if self
            .config
            .excluded_processes
            .iter()
            .any(|p| p.to_lowercase() == proc_lower)
        {
            return false;
        }
        true
    }

    pub fn start_periodic(self: &Arc<Self>, sink: NetEventSink) {
        self.running.store(true, Ordering::Relaxed);
        let monitor = Arc::clone(self);
        let running = self.running.clone();
        let interval_ms = self.config.polling_interval_ms.max(500);

        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(std::time::Duration::from_millis(interval_ms));
            while running.load(Ordering::Relaxed) {
                ticker.tick().await;
                for event in monitor.poll_once() {
                    sink(event);
                }
            }
        });
        info!(interval_ms, "Network monitor started");
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    pub fn polls_completed(&self) -> u64 {
        self.polls_completed.load(Ordering::Relaxed)
    }

    pub fn events_emitted(&self) -> u64 {
        self.events_emitted.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PlMutex;

    struct ScriptedTable(PlMutex<Vec<TcpConnection>>);

    impl ScriptedTable {
        fn new() -> Arc<Self> {
            Arc::new(Self(PlMutex::new(Vec::new())))
        }
        fn set(&self, conns: Vec<TcpConnection>) {
            *self.0.lock() = conns;
        }
    }

    impl TcpTableProvider for ScriptedTable {
        fn snapshot(&self) -> Vec<TcpConnection> {
            self.0.lock().clone()
        }
    }

    fn conn(process: &str, remote: &str, sent: u64) -> TcpConnection {
        TcpConnection {
            pid: 812,
            process_name: process.into(),
            local_addr: "192.168.1.5".into(),
            local_port: 50412,
            remote_addr: remote.into(),
            remote_port: 443,
            bytes_sent: sent,
            bytes_received: 10,
            state: "ESTAB".into(),
        }
    }

    fn monitor(table: Arc<ScriptedTable>) -> NetworkMonitor {
        NetworkMonitor::new(
            NetworkMonitorSection::default(),
            "dev-1".into(),
            Arc::new(MonotonicClock::new()),
            table,
        )
    }

    #[test]
    fn test_closed_connection_emits_delta_bytes() {
        let table = ScriptedTable::new();
        let monitor = monitor(table.clone());

        // First sighting at 1000 bytes already sent; grows to 6000.
        table.set(vec![conn("curl", "203.0.113.5", 1000)]);
        assert!(monitor.poll_once().is_empty());
        table.set(vec![conn("curl", "203.0.113.5", 6000)]);
        assert!(monitor.poll_once().is_empty());

        // Connection disappears.
        table.set(vec![]);
        let events = monitor.poll_once();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].bytes_sent, 5000);
        assert_eq!(events[0].process_name, "curl");
        assert_eq!(events[0].destination_ip, "203.0.113.5");
        assert_eq!(events[0].destination_port, 443);
    }

    #[test]
    fn test_private_destinations_dropped() {
        let table = ScriptedTable::new();
        let monitor = monitor(table.clone());

        for private in ["10.1.2.3", "172.16.0.9", "192.168.0.44", "127.0.0.1"] {
            table.set(vec![conn("curl", private, 5000)]);
            monitor.poll_once();
            table.set(vec![]);
            assert!(
                monitor.poll_once().is_empty(),
                "{} should be filtered",
                private
            );
        }
    }

    #[test]
    fn test_excluded_process_dropped() {
        let table = ScriptedTable::new();
        let mut config = NetworkMonitorSection::default();
        config.excluded_processes = vec!["Backup-Agent".into()];
        let monitor = NetworkMonitor::new(
            config,
            "dev-1".into(),
            Arc::new(MonotonicClock::new()),
            table.clone(),
        );

        table.set(vec![conn("backup-agent", "203.0.113.5", 9000)]);
        monitor.poll_once();
        table.set(vec![]);
        assert!(monitor.poll_once().is_empty());
    }

    #[test]
    fn test_listen_sockets_ignored() {
        let table = ScriptedTable::new();
        let monitor = monitor(table.clone());

        let mut listener = conn("nginx", "0.0.0.0", 0);
        listener.state = "LISTEN".into();
        listener.remote_port = 0;
        table.set(vec![listener]);
        monitor.poll_once();
        table.set(vec![]);
        assert!(monitor.poll_once().is_empty());
    }

    #[test]
    fn test_separate_connections_tracked_independently() {
        let table = ScriptedTable::new();
        let monitor = monitor(table.clone());

        let a = conn("curl", "203.0.113.5", 100);
        let mut b = conn("curl", "198.51.100.7", 300);
        b.local_port = 50413;
        table.set(vec![a.clone(), b.clone()]);
        monitor.poll_once();

        // Only `a` closes.
        table.set(vec![b]);
        let events = monitor.poll_once();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].destination_ip, "203.0.113.5");
    }

    #[test]
    fn test_finish_flushes_live_connections() {
        let table = ScriptedTable::new();
        let monitor = monitor(table.clone());

        table.set(vec![conn("curl", "203.0.113.5", 700)]);
        monitor.poll_once();

        let events = monitor.finish();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].bytes_sent, 0); // no growth observed
    }
}
