//! # Argus Server — Central aggregation for endpoint agents
//!
//! Validates and commits uploaded `LogBatch`es to an in-memory primary
//! store, replicates them best-effort to a backup sink, and serves the
//! dashboard's read-only query endpoints.

pub mod api;
pub mod backup;
pub mod ingest;
pub mod store;

pub use api::{build_router, AppState};
pub use store::EventStore;
