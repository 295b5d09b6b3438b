//! Webhook event vocabulary.
//!
//! The provider POSTs a JSON envelope per control event. Only the fields the
//! call core acts on are modeled; everything else passes through untouched.

use serde::{Deserialize, Serialize};

/// Envelope the provider wraps every webhook event in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEnvelope {
    pub data: WebhookData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookData {
    pub event_type: String,
    #[serde(default)]
    pub payload: WebhookPayload,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebhookPayload {
    #[serde(default)]
    pub call_control_id: String,
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub to: String,
    /// Present on hangup events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hangup_cause: Option<String>,
    /// Present on bridged events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bridged_with: Option<String>,
    /// Present on machine-detection events ("human" / "machine").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

/// A webhook event reduced to what the controller consumes.
#[derive(Debug, Clone, PartialEq)]
pub enum TelephonyEvent {
    Initiated,
    Answered,
    MediaStarted,
    Bridged { with: String },
    Hangup { cause: Option<String> },
    /// Provider-level answering-machine detection verdict.
    MachineDetection { is_machine: bool },
    ProviderError { detail: String },
}

impl WebhookEnvelope {
    /// Map the envelope to a typed event, or `None` for kinds the core
    /// doesn't consume.
    pub fn to_event(&self) -> Option<TelephonyEvent> {
        let data = &self.data;
        // Providers prefix event kinds ("call.answered"); match the suffix.
        let kind = data.event_type.rsplit('.').next().unwrap_or("");
        match (data.event_type.as_str(), kind) {
            (_, "initiated") => Some(TelephonyEvent::Initiated),
            (_, "answered") => Some(TelephonyEvent::Answered),
            ("media.started", _) | ("call.media.started", _) | ("streaming.started", _) => {
                Some(TelephonyEvent::MediaStarted)
            }
            (_, "bridged") => Some(TelephonyEvent::Bridged {
                with: data.payload.bridged_with.clone().unwrap_or_default(),
            }),
            (_, "hangup") => Some(TelephonyEvent::Hangup {
                cause: data.payload.hangup_cause.clone(),
            }),
            ("machine.detection", _) | ("call.machine.detection.ended", _) => {
                Some(TelephonyEvent::MachineDetection {
                    is_machine: data
                        .payload
                        .result
                        .as_deref()
                        .is_some_and(|r| r.eq_ignore_ascii_case("machine")),
                })
            }
            (_, "error") => Some(TelephonyEvent::ProviderError {
                detail: data.event_type.clone(),
            }),
            _ => None,
        }
    }

    pub fn call_control_id(&self) -> &str {
        &self.data.payload.call_control_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(event_type: &str, payload: serde_json::Value) -> WebhookEnvelope {
        serde_json::from_value(serde_json::json!({
            "data": { "event_type": event_type, "payload": payload }
        }))
        .unwrap()
    }

    #[test]
    fn test_answered_event() {
        let env = envelope(
            "call.answered",
            serde_json::json!({
                "call_control_id": "cc-1",
                "from": "+15550100",
                "to": "+15550101"
            }),
        );
        assert_eq!(env.to_event(), Some(TelephonyEvent::Answered));
        assert_eq!(env.call_control_id(), "cc-1");
    }

    #[test]
    fn test_hangup_carries_cause() {
        let env = envelope(
            "call.hangup",
            serde_json::json!({"call_control_id": "cc-1", "hangup_cause": "normal_clearing"}),
        );
        assert_eq!(
            env.to_event(),
            Some(TelephonyEvent::Hangup {
                cause: Some("normal_clearing".to_string())
            })
        );
    }

    #[test]
    fn test_bridged_carries_peer() {
        let env = envelope(
            "call.bridged",
            serde_json::json!({"call_control_id": "cc-1", "bridged_with": "cc-agent"}),
        );
        assert_eq!(
            env.to_event(),
            Some(TelephonyEvent::Bridged {
                with: "cc-agent".to_string()
            })
        );
    }

    #[test]
    fn test_machine_detection_result() {
        let env = envelope(
            "call.machine.detection.ended",
            serde_json::json!({"call_control_id": "cc-1", "result": "machine"}),
        );
        assert_eq!(
            env.to_event(),
            Some(TelephonyEvent::MachineDetection { is_machine: true })
        );

        let env = envelope(
            "call.machine.detection.ended",
            serde_json::json!({"call_control_id": "cc-1", "result": "human"}),
        );
        assert_eq!(
            env.to_event(),
            Some(TelephonyEvent::MachineDetection { is_machine: false })
        );
    }

    #[test]
    fn test_unknown_events_ignored() {
        let env = envelope("call.recording.saved", serde_json::json!({}));
        assert_eq!(env.to_event(), None);
    }
}
