//! Per-call orchestration: supervisor, registry, archive contract.

pub mod archive;
pub mod controller;
pub mod registry;

pub use archive::{CallArchive, CallRecord, LogArchive, TransferredCallRecord};
pub use controller::{spawn_call, CallDeps, CallEvent};
pub use registry::{CallHandle, CallRegistry};
