//! # Argus Agent — Per-endpoint activity monitoring
//!
//! Monitors file operations (including external drives, network shares,
//! and cloud-sync folders), foreground application usage, and per-process
//! outbound TCP traffic. A correlation engine derives alerts from the live
//! streams; everything lands in an encrypted on-disk spool and is batch-
//! uploaded to the aggregation server.

pub mod agent;
pub mod app_monitor;
pub mod correlation;
pub mod drive_scan;
pub mod file_monitor;
pub mod net_monitor;
pub mod platform;
pub mod spool;
pub mod uploader;

pub use agent::{Agent, AgentStatus};
