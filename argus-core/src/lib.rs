//! # Argus Core — Shared data model and configuration
//!
//! Everything both deployments agree on lives here: the event records that
//! cross the wire, the `LogBatch` envelope, agent configuration, the noise
//! filter applied on both sides, and the common error type.

pub mod batch;
pub mod config;
pub mod error;
pub mod noise;
pub mod timeutil;
pub mod types;

pub use batch::{IngestReceipt, LogBatch};
pub use error::{ArgusError, ArgusResult};
