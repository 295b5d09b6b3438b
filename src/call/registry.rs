//! Process-wide index of active calls.
//!
//! The media WebSocket resolves a call handle once per connection, then
//! checks the bridged flag per frame — a single relaxed atomic load, no lock
//! on the hot path.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::debug;

use crate::call::controller::CallEvent;
use crate::types::PipelineStats;

/// Shared per-call handle: the supervisor mailbox plus the hot-path state
/// the media socket needs without going through the supervisor.
#[derive(Clone)]
pub struct CallHandle {
    pub events: mpsc::Sender<CallEvent>,
    pub bridged: Arc<AtomicBool>,
    pub stats: Arc<PipelineStats>,
}

impl CallHandle {
    pub fn new(events: mpsc::Sender<CallEvent>) -> Self {
        Self {
            events,
            bridged: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(PipelineStats::default()),
        }
    }

    /// Wait-free bridged check for the media hot path.
    pub fn is_bridged(&self) -> bool {
        self.bridged.load(Ordering::Relaxed)
    }
}

#[derive(Default)]
pub struct CallRegistry {
    calls: RwLock<HashMap<String, CallHandle>>,
}

impl CallRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn insert(&self, call_control_id: &str, handle: CallHandle) {
        self.calls
            .write()
            .await
            .insert(call_control_id.to_string(), handle);
    }

    pub async fn remove(&self, call_control_id: &str) -> Option<CallHandle> {
        let removed = self.calls.write().await.remove(call_control_id);
        if removed.is_some() {
            debug!(call = call_control_id, "removed from registry");
        }
        removed
    }

    pub async fn get(&self, call_control_id: &str) -> Option<CallHandle> {
        self.calls.read().await.get(call_control_id).cloned()
    }

    pub async fn contains(&self, call_control_id: &str) -> bool {
        self.calls.read().await.contains_key(call_control_id)
    }

    pub async fn len(&self) -> usize {
        self.calls.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.calls.read().await.is_empty()
    }

    /// Dispatch an event to a call's supervisor, if the call is known.
    pub async fn dispatch(&self, call_control_id: &str, event: CallEvent) -> bool {
        let Some(handle) = self.get(call_control_id).await else {
            return false;
        };
        handle.events.send(event).await.is_ok()
    }

    /// Snapshot of every live call, for the shutdown fan-out.
    pub async fn all(&self) -> Vec<(String, CallHandle)> {
        self.calls
            .read()
            .await
            .iter()
            .map(|(id, handle)| (id.clone(), handle.clone()))
            .collect()
    }
}
