//! LLM-backed turn manager for the qualification script.
//!
//! One `take_turn` per final transcript: build the LLM-visible history, run
//! the completion with tools, apply tool calls against the call's
//! qualification record, then post-process the candidate reply
//! (post-verification override, anti-repetition) before it goes to TTS.

use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::DialogConfig;
use crate::dialog::llm::{ChatApi, ChatMessage, FunctionDefinition, ToolDefinition};
use crate::dialog::script::{
    ScriptStep, DISCOVERY_QUESTION, NEUTRAL_REPROMPT, TRANSFER_CONFIRMATION, VOICEMAIL_FAREWELL,
    SYSTEM_PROMPT, WARNING_PROMPT,
};
use crate::error::CoreError;
use crate::types::{Call, QualField, Speaker, Tri};

/// Terminal decisions the model can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    TransferToAgent,
    Disqualified,
    UserDeclined,
    UserRequestedHangup,
}

impl CallOutcome {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "transfer_to_agent" => Some(CallOutcome::TransferToAgent),
            "disqualified" => Some(CallOutcome::Disqualified),
            "user_declined" => Some(CallOutcome::UserDeclined),
            "user_requested_hangup" => Some(CallOutcome::UserRequestedHangup),
            _ => None,
        }
    }
}

/// Result of one dialog turn.
#[derive(Debug, Clone)]
pub struct DialogTurn {
    /// Text to synthesize and play, if any.
    pub reply: Option<String>,
    /// Terminal decision, if the model took one this turn.
    pub outcome: Option<CallOutcome>,
}

#[derive(Deserialize)]
struct UpdateArgs {
    field: String,
    value: bool,
}

#[derive(Deserialize)]
struct OutcomeArgs {
    outcome: String,
}

pub struct DialogEngine {
    chat: Arc<dyn ChatApi>,
    config: DialogConfig,
    cursor: ScriptStep,
    /// The discovery question has been asked and answered.
    discovery_done: bool,
}

impl DialogEngine {
    pub fn new(chat: Arc<dyn ChatApi>, config: DialogConfig) -> Self {
        Self {
            chat,
            config,
            cursor: ScriptStep::Verification,
            discovery_done: false,
        }
    }

    /// Next expected script step.
    pub fn cursor(&self) -> ScriptStep {
        self.cursor
    }

    /// Scripted warning after prolonged silence.
    pub fn warning_turn(&self, call: &mut Call) -> String {
        call.push_turn(Speaker::Agent, WARNING_PROMPT);
        WARNING_PROMPT.to_string()
    }

    /// Short farewell for an answering machine.
    pub fn voicemail_turn(&self, call: &mut Call) -> String {
        call.push_turn(Speaker::Agent, VOICEMAIL_FAREWELL);
        VOICEMAIL_FAREWELL.to_string()
    }

    /// Closing line for a non-transfer terminal outcome.
    pub fn closing_for(&self, outcome: CallOutcome) -> String {
        match outcome {
            CallOutcome::Disqualified => self.config.closing_disqualified.clone(),
            CallOutcome::UserDeclined | CallOutcome::UserRequestedHangup => {
                self.config.closing_declined.clone()
            }
            CallOutcome::TransferToAgent => TRANSFER_CONFIRMATION.to_string(),
        }
    }

    fn tools() -> Vec<ToolDefinition> {
        vec![
            ToolDefinition {
                r#type: "function".to_string(),
                function: FunctionDefinition {
                    name: "update_qualification".to_string(),
                    description: "Record the answer to exactly one qualification question."
                        .to_string(),
                    parameters: serde_json::json!({
                        "type": "object",
                        "properties": {
                            "field": {
                                "type": "string",
                                "enum": ["verified_info", "no_alzheimers", "no_hospice",
                                         "age_qualified", "has_bank_account"]
                            },
                            "value": { "type": "boolean" }
                        },
                        "required": ["field", "value"]
                    }),
                },
            },
            ToolDefinition {
                r#type: "function".to_string(),
                function: FunctionDefinition {
                    name: "set_call_outcome".to_string(),
                    description: "Decide how the call ends. transfer_to_agent is only valid \
                                  once every qualification field is true."
                        .to_string(),
                    parameters: serde_json::json!({
                        "type": "object",
                        "properties": {
                            "outcome": {
                                "type": "string",
                                "enum": ["transfer_to_agent", "disqualified",
                                         "user_declined", "user_requested_hangup"]
                            }
                        },
                        "required": ["outcome"]
                    }),
                },
            },
        ]
    }

    /// Run one turn against a final user transcript.
    pub async fn take_turn(&mut self, call: &mut Call, utterance: &str) -> Result<DialogTurn, CoreError> {
        call.push_turn(Speaker::User, utterance);

        let answering_discovery = self.cursor == ScriptStep::Discovery;
        let verified_before = call.qualification.verified_info.is_set();

        let messages = self.build_messages(call);
        let turn = self
            .chat
            .complete_with_tools(messages, Self::tools(), self.config.max_tokens)
            .await?;

        let mut outcome = None;
        // Applied strictly in emission order.
        for tc in &turn.tool_calls {
            match tc.function.name.as_str() {
                "update_qualification" => {
                    self.apply_update(call, &tc.function.arguments, answering_discovery);
                }
                "set_call_outcome" => {
                    if let Some(o) = self.apply_outcome(call, &tc.function.arguments) {
                        outcome = Some(o);
                    }
                }
                other => warn!(call = %call.id, tool = other, "unknown tool call ignored"),
            }
        }

        if answering_discovery {
            self.discovery_done = true;
        }
        self.advance_cursor(call);

        let mut reply = turn.content;

        // A verification confirmation must flow straight into discovery; an
        // acknowledgment-only reply here strands the dialog.
        let newly_verified = !verified_before && call.qualification.verified_info == Tri::Yes;
        if newly_verified
            && !call.qualification.no_alzheimers.is_set()
            && reply.as_deref().map(is_acknowledgment_only).unwrap_or(true)
        {
            debug!(call = %call.id, "post-verification override to discovery question");
            reply = Some(DISCOVERY_QUESTION.to_string());
        }

        if let Some(o) = outcome {
            reply = Some(match o {
                CallOutcome::TransferToAgent => reply
                    .filter(|r| !r.trim().is_empty())
                    .unwrap_or_else(|| TRANSFER_CONFIRMATION.to_string()),
                other => self.closing_for(other),
            });
        }

        let reply = reply
            .filter(|r| !r.trim().is_empty())
            .map(|candidate| self.dedupe_reply(call, candidate));

        if let Some(text) = &reply {
            call.push_turn(Speaker::Agent, text.clone());
        }

        Ok(DialogTurn { reply, outcome })
    }

    fn apply_update(&self, call: &mut Call, raw_args: &str, answering_discovery: bool) {
        let args: UpdateArgs = match serde_json::from_str(raw_args) {
            Ok(a) => a,
            Err(e) => {
                warn!(call = %call.id, "bad update_qualification args: {}", e);
                return;
            }
        };
        // The discovery step never records qualification, whatever the model
        // tries.
        if answering_discovery {
            warn!(call = %call.id, field = %args.field, "qualification update during discovery ignored");
            return;
        }
        let Some(field) = QualField::parse(&args.field) else {
            warn!(call = %call.id, field = %args.field, "unknown qualification field");
            return;
        };
        if let Err(e) = call.qualification.set(field, args.value) {
            // Monotonicity holds; the late flip is dropped, not applied.
            warn!(call = %call.id, "{}", e);
        }
    }

    fn apply_outcome(&self, call: &Call, raw_args: &str) -> Option<CallOutcome> {
        let args: OutcomeArgs = match serde_json::from_str(raw_args) {
            Ok(a) => a,
            Err(e) => {
                warn!(call = %call.id, "bad set_call_outcome args: {}", e);
                return None;
            }
        };
        let outcome = match CallOutcome::parse(&args.outcome) {
            Some(o) => o,
            None => {
                warn!(call = %call.id, outcome = %args.outcome, "unknown outcome");
                return None;
            }
        };
        if outcome == CallOutcome::TransferToAgent && !call.qualification.is_fully_qualified() {
            warn!(call = %call.id, "transfer_to_agent refused, qualification incomplete");
            if call.qualification.is_disqualified() {
                return Some(CallOutcome::Disqualified);
            }
            return None;
        }
        Some(outcome)
    }

    fn advance_cursor(&mut self, call: &Call) {
        self.cursor = match call.qualification.first_unset() {
            None => ScriptStep::Wrapup,
            Some(QualField::VerifiedInfo) => ScriptStep::Verification,
            Some(QualField::NoAlzheimers) if !self.discovery_done => ScriptStep::Discovery,
            Some(field) => ScriptStep::for_field(field),
        };
        if call.qualification.is_disqualified() {
            self.cursor = ScriptStep::Wrapup;
        }
    }

    /// Replace a candidate that matches any of the last three agent turns
    /// verbatim. Keeps an acknowledgment loop from stalling the script.
    fn dedupe_reply(&self, call: &Call, candidate: String) -> String {
        let repeated = call
            .log
            .iter()
            .rev()
            .filter(|t| t.speaker == Speaker::Agent)
            .take(3)
            .any(|t| t.text == candidate);
        if !repeated {
            return candidate;
        }
        let replacement = match self.cursor {
            ScriptStep::Wrapup => NEUTRAL_REPROMPT,
            step => step.question(),
        };
        if replacement == candidate {
            NEUTRAL_REPROMPT.to_string()
        } else {
            replacement.to_string()
        }
    }

    fn build_messages(&self, call: &Call) -> Vec<ChatMessage> {
        let state = serde_json::to_string(&call.qualification).unwrap_or_default();
        let mut messages = vec![ChatMessage::system(format!(
            "{}\n\nQualification recorded so far: {}",
            SYSTEM_PROMPT, state
        ))];
        for turn in call.dialog_turns() {
            messages.push(match turn.speaker {
                Speaker::Agent => ChatMessage::assistant(&turn.text),
                Speaker::User => ChatMessage::user(&turn.text),
                Speaker::System => continue,
            });
        }
        messages
    }
}

/// Heuristic for replies that acknowledge without moving the script forward.
fn is_acknowledgment_only(text: &str) -> bool {
    !text.contains('?')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialog::llm::{FunctionCall, LlmTurn, MockChatApi, ToolCall};

    fn tool_call(name: &str, args: serde_json::Value) -> ToolCall {
        ToolCall {
            id: "tc-1".to_string(),
            r#type: "function".to_string(),
            function: FunctionCall {
                name: name.to_string(),
                arguments: args.to_string(),
            },
        }
    }

    fn engine_returning(turns: Vec<LlmTurn>) -> DialogEngine {
        let mut mock = MockChatApi::new();
        let mut queue = std::collections::VecDeque::from(turns);
        mock.expect_complete_with_tools()
            .returning(move |_, _, _| Ok(queue.pop_front().expect("unexpected extra LLM turn")));
        DialogEngine::new(Arc::new(mock), DialogConfig::default())
    }

    #[tokio::test]
    async fn test_verification_override_produces_discovery_question() {
        let mut engine = engine_returning(vec![LlmTurn {
            content: Some("Thank you for confirming.".to_string()),
            tool_calls: vec![tool_call(
                "update_qualification",
                serde_json::json!({"field": "verified_info", "value": true}),
            )],
        }]);
        let mut call = Call::new("cc-1", "+15550100", "+15550101");
        call.push_turn(Speaker::Agent, ScriptStep::Verification.question());

        let turn = engine.take_turn(&mut call, "Yes, that's me").await.unwrap();
        assert_eq!(call.qualification.verified_info, Tri::Yes);
        assert_eq!(turn.reply.as_deref(), Some(DISCOVERY_QUESTION));
        assert_eq!(engine.cursor(), ScriptStep::Discovery);
    }

    #[tokio::test]
    async fn test_discovery_never_updates_qualification() {
        let mut engine = engine_returning(vec![
            LlmTurn {
                content: None,
                tool_calls: vec![tool_call(
                    "update_qualification",
                    serde_json::json!({"field": "verified_info", "value": true}),
                )],
            },
            LlmTurn {
                content: Some("Got it. Have you ever been diagnosed with Alzheimer's or dementia?".to_string()),
                tool_calls: vec![tool_call(
                    "update_qualification",
                    serde_json::json!({"field": "no_alzheimers", "value": true}),
                )],
            },
        ]);
        let mut call = Call::new("cc-2", "+15550100", "+15550101");
        call.push_turn(Speaker::Agent, ScriptStep::Verification.question());

        engine.take_turn(&mut call, "yes").await.unwrap();
        assert_eq!(engine.cursor(), ScriptStep::Discovery);

        // The answer to the discovery question must not record anything.
        engine.take_turn(&mut call, "no, I never got it").await.unwrap();
        assert_eq!(call.qualification.no_alzheimers, Tri::Unset);
        assert_eq!(engine.cursor(), ScriptStep::Alzheimers);
    }

    #[tokio::test]
    async fn test_transfer_gated_on_full_qualification() {
        let mut engine = engine_returning(vec![LlmTurn {
            content: Some("Transferring you now!".to_string()),
            tool_calls: vec![tool_call(
                "set_call_outcome",
                serde_json::json!({"outcome": "transfer_to_agent"}),
            )],
        }]);
        let mut call = Call::new("cc-3", "+15550100", "+15550101");
        // Four of five — not enough.
        for field in &QualField::ALL[..4] {
            call.qualification.set(*field, true).unwrap();
        }
        let turn = engine.take_turn(&mut call, "sure").await.unwrap();
        assert_eq!(turn.outcome, None);
    }

    #[tokio::test]
    async fn test_transfer_accepted_when_fully_qualified() {
        let mut engine = engine_returning(vec![LlmTurn {
            content: None,
            tool_calls: vec![
                tool_call(
                    "update_qualification",
                    serde_json::json!({"field": "has_bank_account", "value": true}),
                ),
                tool_call(
                    "set_call_outcome",
                    serde_json::json!({"outcome": "transfer_to_agent"}),
                ),
            ],
        }]);
        let mut call = Call::new("cc-4", "+15550100", "+15550101");
        for field in &QualField::ALL[..4] {
            call.qualification.set(*field, true).unwrap();
        }
        engine.discovery_done = true;
        let turn = engine.take_turn(&mut call, "yes I do").await.unwrap();
        assert_eq!(turn.outcome, Some(CallOutcome::TransferToAgent));
        assert_eq!(turn.reply.as_deref(), Some(TRANSFER_CONFIRMATION));
    }

    #[tokio::test]
    async fn test_disqualification_uses_configured_closing() {
        let mut engine = engine_returning(vec![LlmTurn {
            content: Some("I understand.".to_string()),
            tool_calls: vec![
                tool_call(
                    "update_qualification",
                    serde_json::json!({"field": "no_alzheimers", "value": false}),
                ),
                tool_call(
                    "set_call_outcome",
                    serde_json::json!({"outcome": "disqualified"}),
                ),
            ],
        }]);
        let mut call = Call::new("cc-5", "+15550100", "+15550101");
        call.qualification.set(QualField::VerifiedInfo, true).unwrap();
        engine.discovery_done = true;

        let turn = engine.take_turn(&mut call, "yes, I was diagnosed").await.unwrap();
        assert_eq!(turn.outcome, Some(CallOutcome::Disqualified));
        assert_eq!(
            turn.reply.as_deref(),
            Some(DialogConfig::default().closing_disqualified.as_str())
        );
        assert_eq!(call.qualification.no_alzheimers, Tri::No);
    }

    #[tokio::test]
    async fn test_late_flip_is_dropped() {
        let mut engine = engine_returning(vec![LlmTurn {
            content: Some("Noted.".to_string()),
            tool_calls: vec![tool_call(
                "update_qualification",
                serde_json::json!({"field": "age_qualified", "value": false}),
            )],
        }]);
        let mut call = Call::new("cc-6", "+15550100", "+15550101");
        call.qualification.set(QualField::VerifiedInfo, true).unwrap();
        call.qualification.set(QualField::AgeQualified, true).unwrap();
        engine.discovery_done = true;

        engine.take_turn(&mut call, "actually I'm ninety").await.unwrap();
        // The earlier answer stands.
        assert_eq!(call.qualification.age_qualified, Tri::Yes);
    }

    #[tokio::test]
    async fn test_anti_repetition_replaces_third_identical_reply() {
        let same = || LlmTurn {
            content: Some("Okay, perfect.".to_string()),
            tool_calls: vec![],
        };
        let mut engine = engine_returning(vec![same(), same(), same()]);
        let mut call = Call::new("cc-7", "+15550100", "+15550101");
        call.qualification.set(QualField::VerifiedInfo, true).unwrap();
        engine.discovery_done = true;

        let first = engine.take_turn(&mut call, "mm").await.unwrap();
        assert_eq!(first.reply.as_deref(), Some("Okay, perfect."));

        let second = engine.take_turn(&mut call, "mm").await.unwrap();
        assert_ne!(second.reply.as_deref(), Some("Okay, perfect."));

        // Property: no three consecutive identical agent turns in the log.
        engine.take_turn(&mut call, "mm").await.unwrap();
        let agent: Vec<&str> = call
            .log
            .iter()
            .filter(|t| t.speaker == Speaker::Agent)
            .map(|t| t.text.as_str())
            .collect();
        for w in agent.windows(3) {
            assert!(!(w[0] == w[1] && w[1] == w[2]), "repeated turn: {:?}", w);
        }
    }

    #[tokio::test]
    async fn test_user_requested_hangup() {
        let mut engine = engine_returning(vec![LlmTurn {
            content: None,
            tool_calls: vec![tool_call(
                "set_call_outcome",
                serde_json::json!({"outcome": "user_requested_hangup"}),
            )],
        }]);
        let mut call = Call::new("cc-8", "+15550100", "+15550101");
        let turn = engine.take_turn(&mut call, "take me off your list").await.unwrap();
        assert_eq!(turn.outcome, Some(CallOutcome::UserRequestedHangup));
        assert_eq!(
            turn.reply.as_deref(),
            Some(DialogConfig::default().closing_declined.as_str())
        );
    }
}
