//! Event records shared between the agent and the server.
//!
//! Every record carries a globally unique `id` (the server upserts by it)
//! and a UTC timestamp. Enum-valued fields serialize as their variant
//! names so the wire stays readable.

use crate::timeutil::ts;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identity of a monitored endpoint. Upserted by the server on every
/// batch; `last_seen` refreshes with each upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub device_id: String,
    pub hostname: String,
    pub user: String,
    pub os_version: String,
    pub agent_version: String,
    #[serde(with = "ts")]
    pub last_seen: DateTime<Utc>,
}

/// File operation as observed (or inferred) by the classifier.
///
/// `Read` and `Move` are reserved for higher-level sources such as
/// shell-copy tracing; filesystem notifications only yield the others.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileAction {
    Read,
    Write,
    Copy,
    Move,
    Delete,
    Rename,
    Create,
}

/// Which kind of watch produced a file event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventSource {
    Local,
    #[serde(rename = "USB")]
    Usb,
    NetworkShare,
    CloudSync,
}

impl EventSource {
    /// External sources are never noise-suppressed and force transfer
    /// classification on create/write.
    pub fn is_external(self) -> bool {
        !matches!(self, EventSource::Local)
    }
}

impl FromStr for EventSource {
    type Err = ();
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Local" => Ok(EventSource::Local),
            "USB" | "Usb" => Ok(EventSource::Usb),
            "NetworkShare" => Ok(EventSource::NetworkShare),
            "CloudSync" => Ok(EventSource::CloudSync),
            _ => Err(()),
        }
    }
}

/// Classification tag attached to a file event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventFlag {
    Normal,
    UsbTransfer,
    NetworkTransfer,
    CloudSyncTransfer,
    InternetDownload,
    ProbableUsbTransfer,
    AppTransfer,
    ProbableUpload,
}

impl EventFlag {
    /// True for the flags that imply `is_transfer`.
    pub fn is_transfer_flag(self) -> bool {
        !matches!(self, EventFlag::Normal)
    }
}

impl FromStr for EventFlag {
    type Err = ();
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Normal" => Ok(EventFlag::Normal),
            "UsbTransfer" => Ok(EventFlag::UsbTransfer),
            "NetworkTransfer" => Ok(EventFlag::NetworkTransfer),
            "CloudSyncTransfer" => Ok(EventFlag::CloudSyncTransfer),
            "InternetDownload" => Ok(EventFlag::InternetDownload),
            "ProbableUsbTransfer" => Ok(EventFlag::ProbableUsbTransfer),
            "AppTransfer" => Ok(EventFlag::AppTransfer),
            "ProbableUpload" => Ok(EventFlag::ProbableUpload),
            _ => Err(()),
        }
    }
}

impl fmt::Display for EventFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Direction of an inferred cross-boundary transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferDirection {
    Incoming,
    Outgoing,
    DeleteExternal,
    Unknown,
}

/// A classified file-activity record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEvent {
    pub id: String,
    pub device_id: String,
    pub user: String,
    pub file_name: String,
    pub full_path: String,
    pub size_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    pub action: FileAction,
    #[serde(with = "ts")]
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_name: Option<String>,
    pub flag: EventFlag,
    pub source: EventSource,
    pub is_transfer: bool,
    pub direction: TransferDirection,
}

/// One record per closed outbound TCP connection window.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkEvent {
    pub id: String,
    pub device_id: String,
    pub process_name: String,
    pub pid: u32,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub destination_ip: String,
    pub destination_port: u16,
    pub duration_secs: u64,
    #[serde(with = "ts")]
    pub timestamp: DateTime<Utc>,
    pub flag: EventFlag,
}

/// Emitted when foreground focus leaves an application.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppUsageEvent {
    pub id: String,
    pub device_id: String,
    pub app_name: String,
    pub window_title: String,
    #[serde(with = "ts")]
    pub start_time: DateTime<Utc>,
    pub duration_secs: u64,
    pub pid: u32,
}

/// Alert severity, ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl FromStr for Severity {
    type Err = ();
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Low" => Ok(Severity::Low),
            "Medium" => Ok(Severity::Medium),
            "High" => Ok(Severity::High),
            "Critical" => Ok(Severity::Critical),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertType {
    LargeTransfer,
    ContinuousTransfer,
    ProbableUpload,
}

/// A correlation-engine finding.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertEvent {
    pub id: String,
    pub device_id: String,
    pub severity: Severity,
    pub alert_type: AlertType,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_process_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytes_involved: Option<u64>,
    #[serde(with = "ts")]
    pub timestamp: DateTime<Utc>,
}
