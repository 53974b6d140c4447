//! Agent configuration: typed sections with defaults, TOML load/save,
//! path expansion, and fail-fast validation of required secrets.

use crate::{ArgusError, ArgusResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Top-level agent configuration (`argus.toml`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub agent: GeneralSection,
    pub file_monitor: FileMonitorSection,
    pub app_monitor: AppMonitorSection,
    pub network_monitor: NetworkMonitorSection,
    pub correlation: CorrelationSection,
    pub security: SecuritySection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralSection {
    /// Stable per-host identifier. Falls back to the hostname when empty.
    pub device_id: String,
    /// Base URL of the aggregation server, e.g. `http://collector:8460`.
    pub api_endpoint: String,
    /// Shared secret sent as `X-Api-Key`. Required.
    pub api_key: String,
    pub upload_interval_secs: u64,
    pub max_batch_size: usize,
}

impl Default for GeneralSection {
    fn default() -> Self {
        Self {
            device_id: String::new(),
            api_endpoint: "http://127.0.0.1:8460".into(),
            api_key: String::new(),
            upload_interval_secs: 60,
            max_batch_size: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FileMonitorSection {
    pub enabled: bool,
    /// Extra roots to watch, env-expanded (`$HOME/shared`, `%USERPROFILE%\..`).
    pub watch_paths: Vec<String>,
    /// Directories whose files get hashed and count as sensitive.
    pub sensitive_directories: Vec<String>,
    /// Cloud-sync roots beyond the auto-detected well-known ones.
    pub cloud_sync_paths: Vec<String>,
    pub compute_sha256_for_sensitive: bool,
    pub monitor_usb: bool,
    pub monitor_network_shares: bool,
    pub excluded_extensions: Vec<String>,
    pub excluded_paths: Vec<String>,
    pub auto_watch_user_folders: bool,
    pub internal_buffer_size: usize,
}

impl Default for FileMonitorSection {
    fn default() -> Self {
        Self {
            enabled: true,
            watch_paths: Vec::new(),
            sensitive_directories: Vec::new(),
            cloud_sync_paths: Vec::new(),
            compute_sha256_for_sensitive: true,
            monitor_usb: true,
            monitor_network_shares: true,
            excluded_extensions: Vec::new(),
            excluded_paths: Vec::new(),
            auto_watch_user_folders: true,
            internal_buffer_size: 64 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppMonitorSection {
    pub enabled: bool,
    pub polling_interval_ms: u64,
    pub excluded_processes: Vec<String>,
}

impl Default for AppMonitorSection {
    fn default() -> Self {
        Self {
            enabled: true,
            polling_interval_ms: 3_000,
            excluded_processes: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkMonitorSection {
    pub enabled: bool,
    pub polling_interval_ms: u64,
    pub excluded_processes: Vec<String>,
    /// Destination prefixes dropped before accounting.
    pub private_subnets: Vec<String>,
}

impl Default for NetworkMonitorSection {
    fn default() -> Self {
        Self {
            enabled: true,
            polling_interval_ms: 5_000,
            excluded_processes: Vec::new(),
            private_subnets: vec![
                "10.".into(),
                "172.16.".into(),
                "192.168.".into(),
                "127.".into(),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelationSection {
    pub enabled: bool,
    pub large_transfer_threshold_bytes: u64,
    pub continuous_transfer_threshold_bytes: u64,
    pub continuous_transfer_window_minutes: u64,
    pub probable_upload_threshold_bytes: u64,
    pub probable_upload_window_seconds: u64,
}

impl Default for CorrelationSection {
    fn default() -> Self {
        Self {
            enabled: true,
            large_transfer_threshold_bytes: 25 * 1024 * 1024,
            continuous_transfer_threshold_bytes: 30 * 1024 * 1024,
            continuous_transfer_window_minutes: 10,
            probable_upload_threshold_bytes: 5 * 1024 * 1024,
            probable_upload_window_seconds: 15,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecuritySection {
    pub encrypt_local_queue: bool,
    pub tamper_detection: bool,
    pub local_queue_path: String,
    pub local_log_path: String,
    pub log_retention_days: u32,
}

impl Default for SecuritySection {
    fn default() -> Self {
        Self {
            encrypt_local_queue: true,
            tamper_detection: true,
            local_queue_path: "~/.argus/spool".into(),
            local_log_path: "~/.argus/agent.log".into(),
            log_retention_days: 90,
        }
    }
}

impl AgentConfig {
    /// Load from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> ArgusResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ArgusError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        let config: AgentConfig = toml::from_str(&raw)
            .map_err(|e| ArgusError::Config(format!("cannot parse {}: {}", path.display(), e)))?;
        info!(path = %path.display(), "Configuration loaded");
        Ok(config)
    }

    /// Write the current configuration (useful with `--generate-config`).
    pub fn save(&self, path: impl AsRef<Path>) -> ArgusResult<()> {
        let rendered = toml::to_string_pretty(self)
            .map_err(|e| ArgusError::Config(format!("cannot render config: {}", e)))?;
        std::fs::write(path.as_ref(), rendered)?;
        Ok(())
    }

    /// Fail fast on configuration that cannot possibly work.
    pub fn validate(&self) -> ArgusResult<()> {
        if self.agent.api_key.trim().is_empty() {
            return Err(ArgusError::Config(
                "agent.api_key is required and must not be empty".into(),
            ));
        }
        if !self.agent.api_endpoint.starts_with("http://")
            && !self.agent.api_endpoint.starts_with("https://")
        {
            return Err(ArgusError::Config(format!(
                "agent.api_endpoint must be an http(s) URL, got '{}'",
                self.agent.api_endpoint
            )));
        }
        if self.agent.max_batch_size == 0 {
            return Err(ArgusError::Config("agent.max_batch_size must be > 0".into()));
        }
        if self.security.local_queue_path.trim().is_empty() {
            return Err(ArgusError::Config(
                "security.local_queue_path must not be empty".into(),
            ));
        }
        Ok(())
    }

    /// Effective device id: the configured one, else the hostname.
    pub fn device_id(&self) -> String {
        if !self.agent.device_id.trim().is_empty() {
            return self.agent.device_id.clone();
        }
        hostname()
    }
}

/// Best-effort hostname without extra dependencies.
pub fn hostname() -> String {
    std::env::var("COMPUTERNAME")
        .or_else(|_| std::env::var("HOSTNAME"))
        .ok()
        .filter(|h| !h.is_empty())
        .or_else(|| {
            std::fs::read_to_string("/etc/hostname")
                .ok()
                .map(|s| s.trim().to_string())
                .filter(|h| !h.is_empty())
        })
        .unwrap_or_else(|| "unknown-host".into())
}

/// Expand `~`, `$VAR`/`${VAR}` and `%VAR%` references in a configured path.
/// Unknown variables are left in place.
pub fn expand_path(raw: &str) -> String {
    let mut out = raw.to_string();

    if out.starts_with("~/") || out.starts_with("~\\") || out == "~" {
        if let Some(home) = std::env::var_os("HOME").or_else(|| std::env::var_os("USERPROFILE")) {
            let home = home.to_string_lossy();
            out = if out == "~" {
                home.to_string()
            } else {
                format!("{}{}", home, &out[1..])
            };
        }
    }

    // %VAR% (Windows-style)
    while let Some(start) = out.find('%') {
        let Some(rel_end) = out[start + 1..].find('%') else {
            break;
        };
        let end = start + 1 + rel_end;
        let var = &out[start + 1..end];
        match std::env::var(var) {
            Ok(val) => out = format!("{}{}{}", &out[..start], val, &out[end + 1..]),
            Err(_) => break,
        }
    }

    // ${VAR} then bare $VAR
    while let Some(start) = out.find("${") {
        let Some(rel_end) = out[start..].find('}') else {
            break;
        };
        let end = start + rel_end;
        let var = &out[start + 2..end];
        match std::env::var(var) {
            Ok(val) => out = format!("{}{}{}", &out[..start], val, &out[end + 1..]),
            Err(_) => break,
        }
    }
    if let Some(start) = out.find('$') {
        let tail = &out[start + 1..];
        let len = tail
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
            .count();
        if len > 0 {
            let var = &tail[..len];
            if let Ok(val) = std::env::var(var) {
                out = format!("{}{}{}", &out[..start], val, &tail[len..]);
            }
        }
    }

    out
}
