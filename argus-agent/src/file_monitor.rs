//! File activity monitor and classifier.
//!
//! Turns raw `notify` filesystem events into classified [`FileEvent`]s:
//! noise-suppressed, attributed to a process (best effort, via the
//! foreground window), hashed when sensitive, and tagged with transfer
//! semantics when the watch source or the attributed process implies a
//! cross-boundary move.
//!
//! Watches cover auto-detected user folders, configured paths, sensitive
//! directories, well-known cloud-sync roots, and whatever drive roots the
//! drive scanner installs at runtime.

use crate::platform::{ForegroundProvider, ForegroundWindow};
use argus_core::config::{expand_path, FileMonitorSection};
use argus_core::noise::NoiseFilter;
use argus_core::timeutil::MonotonicClock;
use argus_core::types::{EventFlag, EventSource, FileAction, FileEvent, TransferDirection};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::{Mutex, RwLock};
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{sync_channel, TrySendError};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Files above this size are never hashed.
const MAX_HASH_BYTES: u64 = 100 * 1024 * 1024;

/// Well-known cloud-sync folder names under the user profile.
const CLOUD_SYNC_FOLDERS: &[&str] = &[
    "OneDrive",
    "Google Drive",
    "Dropbox",
    "iCloud Drive",
    "MEGA",
    "Box",
];

/// Auto-watched user folders.
const USER_FOLDERS: &[&str] = &[
    "Desktop",
    "Documents",
    "Downloads",
    "Pictures",
    "Videos",
    "Music",
];

const BROWSERS: &[&str] = &[
    "chrome", "brave", "msedge", "firefox", "opera", "vivaldi", "chromium", "iexplore", "safari",
];

const TRANSFER_APPS: &[&str] = &[
    "whatsapp",
    "telegram",
    "slack",
    "teams",
    "discord",
    "skype",
    "zoom",
    "signal",
    "element",
    "thunderbird",
    "outlook",
    "filezilla",
    "winscp",
    "putty",
    "7zfm",
    "winrar",
    "torrent",
    "qbittorrent",
    "utorrent",
    "bittorrent",
    "sharex",
    "dropbox",
    "onedrive",
    "googledrivesync",
];

/// Receives classified events; runs on the notification thread.
pub type FileEventSink = Arc<dyn Fn(FileEvent) + Send + Sync>;

struct RawFsEvent {
    action: FileAction,
    path: PathBuf,
}

struct WatchedRoot {
    path: PathBuf,
    lower: String,
    source: EventSource,
}

pub struct FileMonitor {
    config: FileMonitorSection,
    device_id: String,
    user: String,
    noise: NoiseFilter,
    clock: Arc<MonotonicClock>,
    foreground: Arc<dyn ForegroundProvider>,
    /// Lowercased sensitive directories (hashing + always watched).
    sensitive: Vec<String>,
    roots: RwLock<Vec<WatchedRoot>>,
    watcher: Mutex<Option<RecommendedWatcher>>,
    running: Arc<AtomicBool>,
    events_seen: AtomicU64,
    events_suppressed: AtomicU64,
    events_emitted: AtomicU64,
}

impl FileMonitor {
    pub fn new(
        config: FileMonitorSection,
        device_id: String,
        user: String,
        clock: Arc<MonotonicClock>,
        foreground: Arc<dyn ForegroundProvider>,
        spool_dir: &Path,
    ) -> Self {
        let mut noise = NoiseFilter::with_extras(
            &config
                .excluded_paths
                .iter()
                .map(|p| expand_path(p))
                .collect::<Vec<_>>(),
            &config.excluded_extensions,
        );
        // The agent's own spool churns constantly; never report it.
        noise.add_fragment(&spool_dir.display().to_string());

        let sensitive = config
            .sensitive_directories
            .iter()
            .map(|d| expand_path(d).to_lowercase())
            .collect();

        Self {
            config,
            device_id,
            user,
            noise,
            clock,
            foreground,
            sensitive,
            roots: RwLock::new(Vec::new()),
            watcher: Mutex::new(None),
            running: Arc::new(AtomicBool::new(false)),
            events_seen: AtomicU64::new(0),
            events_suppressed: AtomicU64::new(0),
            events_emitted: AtomicU64::new(0),
        }
    }

    // ── Watch management ─────────────────────────────────────────────────

    /// The static root set: user folders, configured paths, sensitive
    /// directories, and detected cloud-sync folders. Drive roots come in
    /// later through the drive scanner.
    fn static_roots(&self) -> Vec<(PathBuf, EventSource)> {
        let mut roots = Vec::new();

        if self.config.auto_watch_user_folders {
            if let Some(home) = home_dir() {
                for folder in USER_FOLDERS {
                    let path = home.join(folder);
                    if path.is_dir() {
                        roots.push((path, EventSource::Local));
                    }
                }
                for folder in CLOUD_SYNC_FOLDERS {
                    let path = home.join(folder);
                    if path.is_dir() {
                        roots.push((path, EventSource::CloudSync));
                    }
                }
            }
        }

        for raw in &self.config.watch_paths {
            roots.push((PathBuf::from(expand_path(raw)), EventSource::Local));
        }
        for raw in &self.config.sensitive_directories {
            roots.push((PathBuf::from(expand_path(raw)), EventSource::Local));
        }
        for raw in &self.config.cloud_sync_paths {
            roots.push((PathBuf::from(expand_path(raw)), EventSource::CloudSync));
        }

        roots
    }

    /// Register a root and, when the watcher is live, install the watch.
    /// Failures are logged and the root skipped.
    pub fn add_root(&self, path: &Path, source: EventSource) {
        let lower = path.display().to_string().to_lowercase();
        {
            let roots = self.roots.read();
            if roots.iter().any(|r| r.lower == lower) {
                return;
            }
        }

        if let Some(ref mut watcher) = *self.watcher.lock() {
            if let Err(e) = watcher.watch(path, RecursiveMode::Recursive) {
                warn!(path = %path.display(), error = %e, "Failed to install watch, skipping root");
                return;
            }
        }

        info!(path = %path.display(), source = ?source, "Watching root");
        self.roots.write().push(WatchedRoot {
            path: path.to_path_buf(),
            lower,
            source,
        });
    }

    /// Drop a root (e.g. an ejected drive) and its watch.
    pub fn remove_root(&self, path: &Path) {
        let lower = path.display().to_string().to_lowercase();
        let removed = {
            let mut roots = self.roots.write();
            let before = roots.len();
            roots.retain(|r| r.lower != lower);
            roots.len() < before
        };
        if removed {
            if let Some(ref mut watcher) = *self.watcher.lock() {
                if let Err(e) = watcher.unwatch(path) {
                    debug!(path = %path.display(), error = %e, "Unwatch failed");
                }
            }
            info!(path = %path.display(), "Stopped watching root");
        }
    }

    /// Whether any external (USB) root is currently known.
    pub fn has_known_external(&self) -> bool {
        self.roots
            .read()
            .iter()
            .any(|r| r.source == EventSource::Usb)
    }

    pub fn watched_root_count(&self) -> usize {
        self.roots.read().len()
    }

    // ── Lifecycle ────────────────────────────────────────────────────────

    /// Install static watches and spawn the notification thread.
    pub fn start(self: &Arc<Self>, sink: FileEventSink) -> Result<(), String> {
        if self.running.swap(true, Ordering::Relaxed) {
            return Err("File monitor already running".into());
        }

        let (tx, rx) = sync_channel::<RawFsEvent>(self.config.internal_buffer_size.max(256));

        let watcher = RecommendedWatcher::new(
            move |res: Result<Event, notify::Error>| match res {
                Ok(event) => {
                    let Some(action) = map_event_kind(&event.kind) else {
                        return;
                    };
                    for path in event.paths {
                        match tx.try_send(RawFsEvent { action, path }) {
                            Ok(()) => {}
                            Err(TrySendError::Full(dropped)) => {
                                warn!(path = %dropped.path.display(),
                                    "Notification buffer full, event dropped");
                            }
                            Err(TrySendError::Disconnected(_)) => {}
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Watch error, watcher continues");
                }
            },
            Config::default(),
        )
        .map_err(|e| format!("Failed to create watcher: {}", e))?;

        *self.watcher.lock() = Some(watcher);

        for (path, source) in self.static_roots() {
            self.add_root(&path, source);
        }

        let monitor = Arc::clone(self);
        let running = self.running.clone();
        std::thread::Builder::new()
            .name("argus-file-monitor".into())
            .spawn(move || {
                while running.load(Ordering::Relaxed) {
                    match rx.recv_timeout(std::time::Duration::from_millis(500)) {
                        Ok(raw) => {
                            if let Some(event) = monitor.classify(raw.action, &raw.path) {
                                sink(event);
                            }
                        }
                        Err(std::sync::mpsc::RecvTimeoutError::Timeout) => continue,
                        Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
                    }
                }
                info!("File monitor thread exiting");
            })
            .map_err(|e| format!("Failed to spawn monitor thread: {}", e))?;

        info!(roots = self.watched_root_count(), "File monitor started");
        Ok(())
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
        *self.watcher.lock() = None;
        info!(
            seen = self.events_seen.load(Ordering::Relaxed),
            suppressed = self.events_suppressed.load(Ordering::Relaxed),
            emitted = self.events_emitted.load(Ordering::Relaxed),
            "File monitor stopped"
        );
    }

    // ── Classification ───────────────────────────────────────────────────

    /// Classify one raw notification. Returns `None` for suppressed noise.
    fn classify(&self, observed: FileAction, path: &Path) -> Option<FileEvent> {
        self.events_seen.fetch_add(1, Ordering::Relaxed);

        let path_str = path.display().to_string();
        let source = self.resolve_source(&path_str);

        // External, cloud, and network watches are never suppressed.
        if source == EventSource::Local && self.noise.is_noisy(&path_str) {
            self.events_suppressed.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        let size_bytes = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        let attributed = self.foreground.sample();
        let proc_stem = attributed.as_ref().map(|w| process_stem(&w.process_name));

        let mut action = observed;
        let mut flag = EventFlag::Normal;
        let mut is_transfer = false;
        let mut direction = TransferDirection::Unknown;

        // First match wins.
        if source.is_external() && matches!(observed, FileAction::Create | FileAction::Write) {
            flag = match source {
                EventSource::Usb => EventFlag::UsbTransfer,
                EventSource::NetworkShare => EventFlag::NetworkTransfer,
                EventSource::CloudSync => EventFlag::CloudSyncTransfer,
                EventSource::Local => unreachable!(),
            };
            action = FileAction::Copy;
            is_transfer = true;
            direction = TransferDirection::Outgoing;
        } else if source.is_external() && observed == FileAction::Delete {
            direction = TransferDirection::DeleteExternal;
        } else if is_in(&proc_stem, BROWSERS)
            && matches!(observed, FileAction::Create | FileAction::Write)
            && size_bytes > 0
        {
            flag = EventFlag::InternetDownload;
            action = FileAction::Copy;
            is_transfer = true;
            direction = TransferDirection::Incoming;
        } else if self.has_known_external() && observed == FileAction::Create && size_bytes > 0 {
            flag = EventFlag::ProbableUsbTransfer;
            action = FileAction::Copy;
            is_transfer = true;
            direction = TransferDirection::Incoming;
        } else if is_in(&proc_stem, TRANSFER_APPS)
            && matches!(observed, FileAction::Create | FileAction::Write)
            && size_bytes > 0
        {
            flag = EventFlag::AppTransfer;
            action = FileAction::Copy;
            is_transfer = true;
            direction = TransferDirection::Incoming;
        }

        let sha256 = if self.should_hash(&path_str, source, size_bytes) {
            hash_file(path)
        } else {
            None
        };

        self.events_emitted.fetch_add(1, Ordering::Relaxed);
        Some(FileEvent {
            id: Uuid::new_v4().to_string(),
            device_id: self.device_id.clone(),
            user: self.user.clone(),
            file_name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            full_path: path_str,
            size_bytes,
            sha256,
            action,
            timestamp: self.clock.now(),
            process_name: attributed.map(|w: ForegroundWindow| w.process_name),
            flag,
            source,
            is_transfer,
            direction,
        })
    }

    /// Longest-prefix match of the path against the watched roots.
    fn resolve_source(&self, path: &str) -> EventSource {
        let lower = path.to_lowercase();
        let roots = self.roots.read();
        roots
            .iter()
            .filter(|r| lower.starts_with(&r.lower))
            .max_by_key(|r| r.lower.len())
            .map(|r| r.source)
            .unwrap_or(EventSource::Local)
    }

    fn should_hash(&self, path: &str, source: EventSource, size_bytes: u64) -> bool {
        if !self.config.compute_sha256_for_sensitive || size_bytes == 0 || size_bytes > MAX_HASH_BYTES
        {
            return false;
        }
        if source.is_external() {
            return true;
        }
        let lower = path.to_lowercase();
        self.sensitive.iter().any(|d| lower.starts_with(d.as_str()))
    }
}

fn map_event_kind(kind: &EventKind) -> Option<FileAction> {
    match kind {
        EventKind::Create(_) => Some(FileAction::Create),
        EventKind::Modify(notify::event::ModifyKind::Data(_)) => Some(FileAction::Write),
        EventKind::Modify(notify::event::ModifyKind::Name(_)) => Some(FileAction::Rename),
        EventKind::Modify(notify::event::ModifyKind::Any) => Some(FileAction::Write),
        EventKind::Remove(_) => Some(FileAction::Delete),
        _ => None,
    }
}

/// Lowercased executable name without extension: `Chrome.EXE` -> `chrome`.
fn process_stem(name: &str) -> String {
    let lower = name.to_lowercase();
    lower
        .strip_suffix(".exe")
        .or_else(|| lower.strip_suffix(".app"))
        .unwrap_or(&lower)
        .to_string()
}

fn is_in(stem: &Option<String>, list: &[&str]) -> bool {
    stem.as_deref()
        .map_or(false, |s| list.iter().any(|entry| s == *entry))
}

/// Stream the file through SHA-256. Read errors leave the hash unset.
fn hash_file(path: &Path) -> Option<String> {
    let mut file = std::fs::File::open(path).ok()?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 64 * 1024];
    loop {
        match file.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => hasher.update(&buffer[..n]),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Hash read failed");
                return None;
            }
        }
    }
    Some(format!("{:x}", hasher.finalize()))
}

fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
}
