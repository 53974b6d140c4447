//! External and network drive discovery.
//!
//! At startup the scanner snapshots every ready drive into a baseline.
//! Each scan afterwards treats a drive as external when it is absent from
//! the baseline or reported as removable, installs a watch on appearance,
//! and removes the watch when the drive disappears. Network drives are
//! rescanned on the same cadence.

use crate::file_monitor::FileMonitor;
use crate::platform::DriveProvider;
use argus_core::types::EventSource;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::info;

pub struct DriveScanner {
    provider: Arc<dyn DriveProvider>,
    /// Drives that were ready when the agent started (lowercased roots).
    baseline: HashSet<String>,
    external_watched: RwLock<HashMap<String, PathBuf>>,
    network_watched: RwLock<HashMap<String, PathBuf>>,
    monitor_usb: bool,
    monitor_network_shares: bool,
    running: Arc<AtomicBool>,
    scans_completed: AtomicU64,
}

impl DriveScanner {
    /// Capture the baseline from the currently-ready drive set.
    pub fn new(
        provider: Arc<dyn DriveProvider>,
        monitor_usb: bool,
        monitor_network_shares: bool,
    ) -> Self {
        let baseline: HashSet<String> = provider
            .drives()
            .into_iter()
            .filter(|d| d.ready)
            .map(|d| d.root.display().to_string().to_lowercase())
            .collect();
        info!(drives = baseline.len(), "Drive baseline captured");
        Self {
            provider,
            baseline,
            external_watched: RwLock::new(HashMap::new()),
            network_watched: RwLock::new(HashMap::new()),
            monitor_usb,
            monitor_network_shares,
            running: Arc::new(AtomicBool::new(false)),
            scans_completed: AtomicU64::new(0),
        }
    }

    /// One scan cycle: diff the current drive set against what is watched.
    pub fn scan_once(&self, monitor: &FileMonitor) {
        self.scans_completed.fetch_add(1, Ordering::Relaxed);

        let mut seen_external = HashSet::new();
        let mut seen_network = HashSet::new();

        for drive in self.provider.drives() {
            if !drive.ready {
                continue;
            }
            let lower = drive.root.display().to_string().to_lowercase();

            if drive.network {
                if self.monitor_network_shares {
                    seen_network.insert(lower.clone());
                    let mut watched = self.network_watched.write();
                    if !watched.contains_key(&lower) {
                        info!(root = %drive.root.display(), "Network drive detected");
                        monitor.add_root(&drive.root, EventSource::NetworkShare);
                        watched.insert(lower, drive.root);
                    }
                }
                continue;
            }

            let external = drive.removable || !self.baseline.contains(&lower);
            if external && self.monitor_usb {
                seen_external.insert(lower.clone());
                let mut watched = self.external_watched.write();
                if !watched.contains_key(&lower) {
                    info!(root = %drive.root.display(), removable = drive.removable,
                        "External drive detected");
                    monitor.add_root(&drive.root, EventSource::Usb);
                    watched.insert(lower, drive.root);
                }
            }
        }

        // Drives that disappeared lose their watches.
        for root in drain_absent(&mut self.external_watched.write(), &seen_external) {
            info!(root = %root.display(), "External drive removed");
            monitor.remove_root(&root);
        }
        for root in drain_absent(&mut self.network_watched.write(), &seen_network) {
            info!(root = %root.display(), "Network drive removed");
            monitor.remove_root(&root);
        }
    }

    /// Spawn the periodic scan loop (3 s cadence in production).
    pub fn start_periodic(
        self: &Arc<Self>,
        interval_secs: u64,
        monitor: Arc<FileMonitor>,
    ) {
        self.running.store(true, Ordering::Relaxed);
        let scanner = Arc::clone(self);
        let running = self.running.clone();

        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(std::time::Duration::from_secs(interval_secs.max(1)));
            while running.load(Ordering::Relaxed) {
                ticker.tick().await;
                scanner.scan_once(&monitor);
            }
        });
        info!(interval_secs, "Drive scanner started");
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    pub fn known_external_count(&self) -> usize {
        self.external_watched.read().len()
    }

    pub fn scans_completed(&self) -> u64 {
        self.scans_completed.load(Ordering::Relaxed)
    }
}

/// Remove and return the roots whose keys are not in `keep`.
fn drain_absent(watched: &mut HashMap<String, PathBuf>, keep: &HashSet<String>) -> Vec<PathBuf> {
    let gone: Vec<String> = watched
        .keys()
        .filter(|k| !keep.contains(*k))
        .cloned()
        .collect();
    gone.into_iter().filter_map(|k| watched.remove(&k)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{DriveInfo, NoForeground};
    use argus_core::config::FileMonitorSection;
    use argus_core::timeutil::MonotonicClock;
    use parking_lot::Mutex;
    use std::path::Path;

    struct ScriptedDrives(Mutex<Vec<DriveInfo>>);

    impl ScriptedDrives {
        fn new(drives: Vec<DriveInfo>) -> Arc<Self> {
            Arc::new(Self(Mutex::new(drives)))
        }
        fn set(&self, drives: Vec<DriveInfo>) {
            *self.0.lock() = drives;
        }
    }

    impl DriveProvider for ScriptedDrives {
        fn drives(&self) -> Vec<DriveInfo> {
            self.0.lock().clone()
        }
    }

    fn fixed(root: &str, removable: bool, network: bool) -> DriveInfo {
        DriveInfo {
            root: PathBuf::from(root),
            removable,
            network,
            ready: true,
        }
    }

    fn monitor() -> FileMonitor {
        let mut config = FileMonitorSection::default();
        config.auto_watch_user_folders = false;
        FileMonitor::new(
            config,
            "dev-1".into(),
            "alice".into(),
            Arc::new(MonotonicClock::new()),
            Arc::new(NoForeground),
            Path::new("/var/lib/argus/spool"),
        )
    }

    #[test]
    fn test_baseline_drive_not_external() {
        let drives = ScriptedDrives::new(vec![fixed("/", false, false)]);
        let scanner = DriveScanner::new(drives.clone(), true, true);
        let monitor = monitor();

        scanner.scan_once(&monitor);
        assert_eq!(scanner.known_external_count(), 0);
        assert_eq!(monitor.watched_root_count(), 0);
    }

    #[test]
    fn test_inserted_drive_gets_watched() {
        let drives = ScriptedDrives::new(vec![fixed("/", false, false)]);
        let scanner = DriveScanner::new(drives.clone(), true, true);
        let monitor = monitor();

        // A removable drive appears after baseline capture.
        drives.set(vec![fixed("/", false, false), fixed("/media/usb0", true, false)]);
        scanner.scan_once(&monitor);

        assert_eq!(scanner.known_external_count(), 1);
        assert!(monitor.has_known_external());
        assert_eq!(monitor.watched_root_count(), 1);
    }

    #[test]
    fn test_removable_drive_external_even_in_baseline() {
        // Present at startup but reported removable: still external.
        let drives = ScriptedDrives::new(vec![
            fixed("/", false, false),
            fixed("/media/usb0", true, false),
        ]);
        let scanner = DriveScanner::new(drives, true, true);
        let monitor = monitor();

        scanner.scan_once(&monitor);
        assert_eq!(scanner.known_external_count(), 1);
    }

    #[test]
    fn test_ejected_drive_unwatched() {
        let drives = ScriptedDrives::new(vec![fixed("/", false, false)]);
        let scanner = DriveScanner::new(drives.clone(), true, true);
        let monitor = monitor();

        drives.set(vec![fixed("/", false, false), fixed("/media/usb0", true, false)]);
        scanner.scan_once(&monitor);
        assert_eq!(monitor.watched_root_count(), 1);

        drives.set(vec![fixed("/", false, false)]);
        scanner.scan_once(&monitor);
        assert_eq!(scanner.known_external_count(), 0);
        assert_eq!(monitor.watched_root_count(), 0);
        assert!(!monitor.has_known_external());
    }

    #[test]
    fn test_network_drive_watched_separately() {
        let drives = ScriptedDrives::new(vec![fixed("/", false, false)]);
        let scanner = DriveScanner::new(drives.clone(), true, true);
        let monitor = monitor();

        drives.set(vec![fixed("/", false, false), fixed("/mnt/share", false, true)]);
        scanner.scan_once(&monitor);

        assert_eq!(scanner.known_external_count(), 0);
        assert_eq!(monitor.watched_root_count(), 1);
        assert!(!monitor.has_known_external());
    }

    #[test]
    fn test_monitoring_toggles_respected() {
        let drives = ScriptedDrives::new(vec![]);
        let scanner = DriveScanner::new(drives.clone(), false, false);
        let monitor = monitor();

        drives.set(vec![
            fixed("/media/usb0", true, false),
            fixed("/mnt/share", false, true),
        ]);
        scanner.scan_once(&monitor);
        assert_eq!(monitor.watched_root_count(), 0);
    }
}
