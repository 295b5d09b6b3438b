//! Persistence collaborator contract.
//!
//! The core snapshots qualification and the message log at terminal state
//! and hands them off here; storage itself lives outside this crate. The
//! default implementation emits the records as structured log lines.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::types::{CallStatus, Qualification, Turn};

/// Snapshot of a finished call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallRecord {
    pub call_control_id: String,
    pub from: String,
    pub to: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Whole seconds between start and end.
    pub duration: i64,
    pub status: CallStatus,
    pub hangup_cause: String,
    pub messages: Vec<Turn>,
    pub qualification: Qualification,
    /// Filled in by the cost-accounting collaborator, not by the core.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost_breakdown: Option<serde_json::Value>,
}

/// Snapshot of a successful bridge to a human agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferredCallRecord {
    pub call_control_id: String,
    pub from: String,
    pub to: String,
    pub transferred_at: DateTime<Utc>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CallArchive: Send + Sync {
    async fn record_call(&self, record: CallRecord);
    async fn record_transfer(&self, record: TransferredCallRecord);
}

/// Default archive: structured JSON log lines, nothing persisted in-process.
pub struct LogArchive;

#[async_trait]
impl CallArchive for LogArchive {
    async fn record_call(&self, record: CallRecord) {
        let json = serde_json::to_string(&record).unwrap_or_default();
        info!(call = %record.call_control_id, status = ?record.status, record = %json, "call record");
    }

    async fn record_transfer(&self, record: TransferredCallRecord) {
        let json = serde_json::to_string(&record).unwrap_or_default();
        info!(call = %record.call_control_id, record = %json, "transfer record");
    }
}
