//! The upload envelope: everything one POST to the ingestion endpoint
//! carries, and the acknowledgement it returns.

use crate::types::{AlertEvent, AppUsageEvent, DeviceInfo, FileEvent, NetworkEvent};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogBatch {
    pub device_id: String,
    pub device_info: DeviceInfo,
    #[serde(default)]
    pub file_events: Vec<FileEvent>,
    #[serde(default)]
    pub network_events: Vec<NetworkEvent>,
    #[serde(default)]
    pub app_usage_events: Vec<AppUsageEvent>,
    #[serde(default)]
    pub alerts: Vec<AlertEvent>,
}

impl LogBatch {
    pub fn new(device_info: DeviceInfo) -> Self {
        Self {
            device_id: device_info.device_id.clone(),
            device_info,
            file_events: Vec::new(),
            network_events: Vec::new(),
            app_usage_events: Vec::new(),
            alerts: Vec::new(),
        }
    }

    /// Total events of all kinds carried in this batch.
    pub fn len(&self) -> usize {
        self.file_events.len()
            + self.network_events.len()
            + self.app_usage_events.len()
            + self.alerts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Split into batches of at most `max_events` events each, preserving
    /// per-kind order. Used to cap upload POSTs and backup replication
    /// chunks.
    pub fn into_chunks(self, max_events: usize) -> Vec<LogBatch> {
        let max_events = max_events.max(1);
        if self.len() <= max_events {
            return if self.is_empty() { Vec::new() } else { vec![self] };
        }

        let device_info = self.device_info.clone();
        let mut chunks = Vec::new();
        let mut current = LogBatch::new(device_info.clone());

        macro_rules! spill {
            ($field:ident, $events:expr) => {
                for event in $events {
                    if current.len() >= max_events {
                        chunks.push(std::mem::replace(
                            &mut current,
                            LogBatch::new(device_info.clone()),
                        ));
                    }
                    current.$field.push(event);
                }
            };
        }

        spill!(file_events, self.file_events);
        spill!(network_events, self.network_events);
        spill!(app_usage_events, self.app_usage_events);
        spill!(alerts, self.alerts);

        if !current.is_empty() {
            chunks.push(current);
        }
        chunks
    }
}

/// Body of a successful ingest response.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct IngestReceipt {
    pub received: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn device() -> DeviceInfo {
        DeviceInfo {
            device_id: "dev-7".into(),
            hostname: "workstation-7".into(),
            user: "bob".into(),
            os_version: "linux 6.8".into(),
            agent_version: "0.1.0".into(),
            last_seen: Utc::now(),
        }
    }

    #[test]
    fn test_empty_batch() {
        let batch = LogBatch::new(device());
        assert!(batch.is_empty());
        assert_eq!(batch.device_id, "dev-7");
    }

    #[test]
    fn test_wire_field_names() {
        let batch = LogBatch::new(device());
        let json = serde_json::to_value(&batch).unwrap();
        assert!(json.get("deviceId").is_some());
        assert!(json.get("deviceInfo").is_some());
        assert!(json.get("fileEvents").is_some());
        assert!(json.get("networkEvents").is_some());
        assert!(json.get("appUsageEvents").is_some());
        assert!(json.get("alerts").is_some());
    }

    #[test]
    fn test_into_chunks_caps_and_preserves_order() {
        let mut batch = LogBatch::new(device());
        for i in 0..7 {
            batch.alerts.push(crate::types::AlertEvent {
                id: format!("al-{}", i),
                device_id: "dev-7".into(),
                severity: crate::types::Severity::High,
                alert_type: crate::types::AlertType::ContinuousTransfer,
                description: "sustained outbound volume".into(),
                related_file_name: None,
                related_process_name: None,
                bytes_involved: None,
                timestamp: Utc::now(),
            });
        }

        let chunks = batch.into_chunks(3);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 3);
        assert_eq!(chunks[1].len(), 3);
        assert_eq!(chunks[2].len(), 1);
        let ids: Vec<&str> = chunks
            .iter()
            .flat_map(|c| c.alerts.iter().map(|a| a.id.as_str()))
            .collect();
        assert_eq!(ids, vec!["al-0", "al-1", "al-2", "al-3", "al-4", "al-5", "al-6"]);
    }

    #[test]
    fn test_into_chunks_empty_batch() {
        assert!(LogBatch::new(device()).into_chunks(10).is_empty());
    }

    #[test]
    fn test_missing_event_arrays_default_empty() {
        let json = serde_json::json!({
            "deviceId": "dev-7",
            "deviceInfo": serde_json::to_value(device()).unwrap(),
        });
        let batch: LogBatch = serde_json::from_value(json).unwrap();
        assert!(batch.is_empty());
    }
}
