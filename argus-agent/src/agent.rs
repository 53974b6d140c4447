//! Agent orchestrator.
//!
//! Wires the monitors into the correlation engine and the spool, runs the
//! periodic flush, and manages graceful shutdown: stop the loops, release
//! held events, flush once more, then drop the watches.

use crate::app_monitor::AppMonitor;
use crate::correlation::CorrelationEngine;
use crate::drive_scan::DriveScanner;
use crate::file_monitor::FileMonitor;
use crate::net_monitor::NetworkMonitor;
use crate::platform::{
    DriveProvider, ForegroundProvider, NoForeground, SsTcpTable, SysinfoDrives, TcpTableProvider,
};
use crate::spool::EventQueue;
use crate::uploader::Uploader;
use argus_core::config::{expand_path, hostname, AgentConfig};
use argus_core::timeutil::MonotonicClock;
use argus_core::types::DeviceInfo;
use argus_core::ArgusResult;
use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

const FLUSH_INTERVAL_SECS: u64 = 30;
const DRIVE_SCAN_INTERVAL_SECS: u64 = 3;

/// The OS inputs the agent runs against. Swappable for tests.
pub struct PlatformProviders {
    pub drives: Arc<dyn DriveProvider>,
    pub foreground: Arc<dyn ForegroundProvider>,
    pub tcp: Arc<dyn TcpTableProvider>,
}

impl PlatformProviders {
    /// Default best-effort providers for this host.
    pub fn system() -> Self {
        Self {
            drives: Arc::new(SysinfoDrives),
            foreground: Arc::new(NoForeground),
            tcp: Arc::new(SsTcpTable),
        }
    }
}

/// Runtime snapshot for logs and diagnostics.
#[derive(Debug, Clone, serde::Serialize)]
pub struct AgentStatus {
    pub running: bool,
    pub uptime_secs: u64,
    pub watched_roots: usize,
    pub external_drives: usize,
    pub events_pending: usize,
    pub events_enqueued: u64,
    pub alerts_emitted: u64,
    pub app_sessions: u64,
    pub network_events: u64,
    pub segments_delivered: u64,
    pub events_delivered: u64,
}

pub struct Agent {
    config: AgentConfig,
    queue: Arc<EventQueue>,
    engine: Arc<CorrelationEngine>,
    file_monitor: Arc<FileMonitor>,
    drive_scanner: Arc<DriveScanner>,
    app_monitor: Arc<AppMonitor>,
    net_monitor: Arc<NetworkMonitor>,
    uploader: Arc<Uploader>,
    running: Arc<AtomicBool>,
    started_at: RwLock<Option<std::time::Instant>>,
}

impl Agent {
    /// Validate the configuration and construct all components.
    pub fn new(config: AgentConfig, providers: PlatformProviders) -> ArgusResult<Self> {
        config.validate()?;

        let device_id = config.device_id();
        let user = current_user();
        let clock = Arc::new(MonotonicClock::new());

        let spool_dir = PathBuf::from(expand_path(&config.security.local_queue_path));
        if !config.security.encrypt_local_queue || !config.security.tamper_detection {
            warn!("Queue encryption and tamper detection cannot be disabled; segments are always sealed");
        }
        let queue = Arc::new(EventQueue::open(
            &spool_dir,
            config.agent.api_key.as_bytes(),
        )?);

        let engine = Arc::new(CorrelationEngine::new(
            config.correlation.clone(),
            device_id.clone(),
            clock.clone(),
        ));

        let file_monitor = Arc::new(FileMonitor::new(
            config.file_monitor.clone(),
            device_id.clone(),
            user.clone(),
            clock.clone(),
            providers.foreground.clone(),
            &spool_dir,
        ));

        let drive_scanner = Arc::new(DriveScanner::new(
            providers.drives,
            config.file_monitor.monitor_usb,
            config.file_monitor.monitor_network_shares,
        ));

        let app_monitor = Arc::new(AppMonitor::new(
            config.app_monitor.clone(),
            device_id.clone(),
            clock.clone(),
            providers.foreground,
        ));

        let net_monitor = Arc::new(NetworkMonitor::new(
            config.network_monitor.clone(),
            device_id.clone(),
            clock,
            providers.tcp,
        ));

        let device_info = DeviceInfo {
            device_id,
            hostname: hostname(),
            user,
            os_version: os_version(),
            agent_version: env!("CARGO_PKG_VERSION").to_string(),
            last_seen: chrono::Utc::now(),
        };
        let uploader = Arc::new(Uploader::new(
            &config.agent.api_endpoint,
            config.agent.api_key.clone(),
            device_info,
            queue.clone(),
            config.agent.upload_interval_secs,
            config.agent.max_batch_size,
            config.security.log_retention_days,
        ));

        Ok(Self {
            config,
            queue,
            engine,
            file_monitor,
            drive_scanner,
            app_monitor,
            net_monitor,
            uploader,
            running: Arc::new(AtomicBool::new(false)),
            started_at: RwLock::new(None),
        })
    }

    /// Start every enabled subsystem. Requires a tokio runtime.
    pub fn start(&self) -> Result<(), String> {
        if self.running.swap(true, Ordering::Relaxed) {
            return Err("Agent already running".into());
        }
        *self.started_at.write() = Some(std::time::Instant::now());
        info!(version = env!("CARGO_PKG_VERSION"), "Argus agent starting");

        let correlate = self.config.correlation.enabled;

        // File stream: classify -> correlate (hold window) -> spool.
        if self.config.file_monitor.enabled {
            let engine = self.engine.clone();
            let queue = self.queue.clone();
            let sink: crate::file_monitor::FileEventSink = Arc::new(move |event| {
                if correlate {
                    if let Some(released) = engine.on_file_event(event) {
                        queue.enqueue_file(released);
                    }
                } else {
                    queue.enqueue_file(event);
                }
            });
            if let Err(e) = self.file_monitor.start(sink) {
                warn!(error = %e, "File monitor failed to start (continuing without it)");
            } else {
                self.drive_scanner
                    .start_periodic(DRIVE_SCAN_INTERVAL_SECS, self.file_monitor.clone());
            }
        }

        // App stream: straight to the spool.
        if self.config.app_monitor.enabled {
            let queue = self.queue.clone();
            self.app_monitor
                .start_periodic(Arc::new(move |event| queue.enqueue_app(event)));
        }

        // Network stream: correlate inline on the polling task, then spool.
        if self.config.network_monitor.enabled {
            let engine = self.engine.clone();
            let queue = self.queue.clone();
            self.net_monitor.start_periodic(Arc::new(move |event| {
                if correlate {
                    for alert in engine.on_network_event(&event) {
                        queue.enqueue_alert(alert);
                    }
                }
                queue.enqueue_network(event);
            }));
        }

        // Flush loop: release correlation holds, seal a segment.
        {
            let engine = self.engine.clone();
            let queue = self.queue.clone();
            let running = self.running.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(std::time::Duration::from_secs(
                    FLUSH_INTERVAL_SECS,
                ));
                while running.load(Ordering::Relaxed) {
                    ticker.tick().await;
                    for event in engine.drain_released() {
                        queue.enqueue_file(event);
                    }
                    if let Err(e) = queue.flush() {
                        warn!(error = %e, "Spool flush failed");
                    }
                }
            });
        }

        self.uploader.start();
        info!("Argus agent running");
        Ok(())
    }

    /// Graceful shutdown: stop loops, drain everything held, flush once
    /// more, then drop the watches.
    pub fn stop(&self) {
        info!("Argus agent stopping");
        self.running.store(false, Ordering::Relaxed);

        self.drive_scanner.stop();
        self.app_monitor.stop();
        self.net_monitor.stop();
        self.uploader.stop();

        if let Some(event) = self.app_monitor.finish() {
            self.queue.enqueue_app(event);
        }
        for event in self.net_monitor.finish() {
            if self.config.correlation.enabled {
                for alert in self.engine.on_network_event(&event) {
                    self.queue.enqueue_alert(alert);
                }
            }
            self.queue.enqueue_network(event);
        }
        for event in self.engine.flush_all_pending() {
            self.queue.enqueue_file(event);
        }

        if let Err(e) = self.queue.flush() {
            warn!(error = %e, "Final spool flush failed");
        }

        self.file_monitor.stop();
        let status = self.status();
        info!(
            enqueued = status.events_enqueued,
            alerts = status.alerts_emitted,
            delivered = status.events_delivered,
            "Argus agent stopped"
        );
    }

    pub fn status(&self) -> AgentStatus {
        AgentStatus {
            running: self.running.load(Ordering::Relaxed),
            uptime_secs: self
                .started_at
                .read()
                .map(|s| s.elapsed().as_secs())
                .unwrap_or(0),
            watched_roots: self.file_monitor.watched_root_count(),
            external_drives: self.drive_scanner.known_external_count(),
            events_pending: self.queue.pending(),
            events_enqueued: self.queue.total_enqueued(),
            alerts_emitted: self.engine.alerts_emitted(),
            app_sessions: self.app_monitor.sessions_emitted(),
            network_events: self.net_monitor.events_emitted(),
            segments_delivered: self.uploader.segments_delivered(),
            events_delivered: self.uploader.events_delivered(),
        }
    }

    pub fn queue(&self) -> &Arc<EventQueue> {
        &self.queue
    }
}

fn current_user() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".into())
}

fn os_version() -> String {
    sysinfo::System::long_os_version().unwrap_or_else(|| std::env::consts::OS.to_string())
}
