//! Telephony webhook endpoint.
//!
//! The provider expects a 200 within its delivery window; anything slow is
//! scheduled onto the call's supervisor instead of handled inline.

use axum::{extract::State, http::StatusCode, Json};
use tracing::{debug, info, warn};

use super::ServerState;
use crate::call::{spawn_call, CallEvent};
use crate::telephony::{TelephonyEvent, WebhookEnvelope};
use crate::types::Call;

pub async fn handle(State(state): State<ServerState>, Json(envelope): Json<WebhookEnvelope>) -> StatusCode {
    let Some(event) = envelope.to_event() else {
        debug!(event_type = %envelope.data.event_type, "ignoring webhook event");
        return StatusCode::OK;
    };
    let call_control_id = envelope.call_control_id().to_string();
    if call_control_id.is_empty() {
        warn!(event_type = %envelope.data.event_type, "webhook without call_control_id");
        return StatusCode::OK;
    }

    let payload = envelope.data.payload.clone();
    tokio::spawn(async move {
        // A call's first control event creates it. Later events for unknown
        // calls (already cleaned up, or another process's) are dropped.
        if !state.deps.registry.contains(&call_control_id).await {
            if matches!(event, TelephonyEvent::Initiated | TelephonyEvent::Answered) {
                info!(call = %call_control_id, "creating call from webhook");
                let call = Call::new(&call_control_id, &payload.from, &payload.to);
                spawn_call(call, state.deps.clone()).await;
            } else {
                debug!(call = %call_control_id, event = ?event, "event for unknown call dropped");
                return;
            }
        }
        if !state
            .deps
            .registry
            .dispatch(&call_control_id, CallEvent::Telephony(event))
            .await
        {
            warn!(call = %call_control_id, "failed to dispatch webhook event");
        }
    });

    StatusCode::OK
}
