//! Foreground application usage monitor.
//!
//! Samples the foreground window on a fixed cadence and tracks the current
//! session (process + window title + start time). When focus moves to a
//! different process or title, the closed session is emitted as an
//! [`AppUsageEvent`].

use crate::platform::{ForegroundProvider, ForegroundWindow};
use argus_core::config::AppMonitorSection;
use argus_core::timeutil::MonotonicClock;
use argus_core::types::AppUsageEvent;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

pub type AppEventSink = Arc<dyn Fn(AppUsageEvent) + Send + Sync>;

struct Session {
    process_name: String,
    window_title: String,
    pid: u32,
    started: DateTime<Utc>,
}

pub struct AppMonitor {
    config: AppMonitorSection,
    device_id: String,
    clock: Arc<MonotonicClock>,
    foreground: Arc<dyn ForegroundProvider>,
    current: Mutex<Option<Session>>,
    running: Arc<AtomicBool>,
    sessions_emitted: AtomicU64,
}

impl AppMonitor {
    pub fn new(
        config: AppMonitorSection,
        device_id: String,
        clock: Arc<MonotonicClock>,
        foreground: Arc<dyn ForegroundProvider>,
    ) -> Self {
        Self {
            config,
            device_id,
            clock,
            foreground,
            current: Mutex::new(None),
            running: Arc::new(AtomicBool::new(false)),
            sessions_emitted: AtomicU64::new(0),
        }
    }

    /// One sampling step; returns the closed session, if any.
    pub fn sample_once(&self) -> Option<AppUsageEvent> {
        let observed = self.foreground.sample().filter(|w| !self.excluded(w));
        let now = self.clock.now();
        let mut current = self.current.lock();

        let unchanged = match (current.as_ref(), observed.as_ref()) {
            (Some(s), Some(w)) => {
                s.process_name == w.process_name && s.window_title == w.window_title
            }
            (None, None) => true,
            _ => false,
        };
        if unchanged {
            return None;
        }

        let closed = current.take().map(|s| self.close(&s, now));
        *current = observed.map(|w| Session {
            process_name: w.process_name,
            window_title: w.window_title,
            pid: w.pid,
            started: now,
        });
        closed
    }

    /// Close out whatever session is open (shutdown path).
    pub fn finish(&self) -> Option<AppUsageEvent> {
        let now = self.clock.now();
        let mut current = self.current.lock();
        current.take().map(|session| self.close(&session, now))
    }

    fn close(&self, session: &Session, ended: DateTime<Utc>) -> AppUsageEvent {
        self.sessions_emitted.fetch_add(1, Ordering::Relaxed);
        AppUsageEvent {
            id: Uuid::new_v4().to_string(),
            device_id: self.device_id.clone(),
            app_name: session.process_name.clone(),
            window_title: session.window_title.clone(),
            start_time: session.started,
            duration_secs: (ended - session.started).num_seconds().max(0) as u64,
            pid: session.pid,
        }
    }

    fn excluded(&self, window: &ForegroundWindow) -> bool {
        let lower = window.process_name.to_lowercase();
        self.config
            .excluded_processes
            .iter()
            .any(|p| p.to_lowercase() == lower)
    }

    pub fn start_periodic(self: &Arc<Self>, sink: AppEventSink) {
        self.running.store(true, Ordering::Relaxed);
        let monitor = Arc::clone(self);
        let running = self.running.clone();
        let interval_ms = self.config.polling_interval_ms.max(100);

        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(std::time::Duration::from_millis(interval_ms));
            while running.load(Ordering::Relaxed) {
                ticker.tick().await;
                if let Some(event) = monitor.sample_once() {
                    sink(event);
                }
            }
        });
        info!(interval_ms, "App monitor started");
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    pub fn sessions_emitted(&self) -> u64 {
        self.sessions_emitted.load(Ordering::Relaxed)
    }
}
