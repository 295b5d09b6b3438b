//! The scripted qualification flow and its fixed lines.

use crate::types::QualField;

/// Position in the scripted flow. Advances monotonically; the engine never
/// moves the cursor backwards within a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptStep {
    /// Confirm name and address; sets `verified_info` on confirmation.
    Verification,
    /// Ask about the previous offer. No qualification updates here.
    Discovery,
    Alzheimers,
    Hospice,
    Age,
    BankAccount,
    /// Transfer or terminate.
    Wrapup,
}

impl ScriptStep {
    pub fn next(&self) -> ScriptStep {
        match self {
            ScriptStep::Verification => ScriptStep::Discovery,
            ScriptStep::Discovery => ScriptStep::Alzheimers,
            ScriptStep::Alzheimers => ScriptStep::Hospice,
            ScriptStep::Hospice => ScriptStep::Age,
            ScriptStep::Age => ScriptStep::BankAccount,
            ScriptStep::BankAccount => ScriptStep::Wrapup,
            ScriptStep::Wrapup => ScriptStep::Wrapup,
        }
    }

    /// The qualification field this step resolves, if any.
    pub fn field(&self) -> Option<QualField> {
        match self {
            ScriptStep::Verification => Some(QualField::VerifiedInfo),
            ScriptStep::Discovery => None,
            ScriptStep::Alzheimers => Some(QualField::NoAlzheimers),
            ScriptStep::Hospice => Some(QualField::NoHospice),
            ScriptStep::Age => Some(QualField::AgeQualified),
            ScriptStep::BankAccount => Some(QualField::HasBankAccount),
            ScriptStep::Wrapup => None,
        }
    }

    /// Step that asks about a given field.
    pub fn for_field(field: QualField) -> ScriptStep {
        match field {
            QualField::VerifiedInfo => ScriptStep::Verification,
            QualField::NoAlzheimers => ScriptStep::Alzheimers,
            QualField::NoHospice => ScriptStep::Hospice,
            QualField::AgeQualified => ScriptStep::Age,
            QualField::HasBankAccount => ScriptStep::BankAccount,
        }
    }

    /// The scripted question for this step.
    pub fn question(&self) -> &'static str {
        match self {
            ScriptStep::Verification => {
                "Before we get started, can you confirm your name and address for me?"
            }
            ScriptStep::Discovery => DISCOVERY_QUESTION,
            ScriptStep::Alzheimers => {
                "Have you ever been diagnosed with Alzheimer's or dementia?"
            }
            ScriptStep::Hospice => {
                "Are you currently in hospice care or living in a nursing home?"
            }
            ScriptStep::Age => "And can I just confirm, are you between fifty and seventy-eight years old?",
            ScriptStep::BankAccount => {
                "Do you have an active checking or savings account for the coverage?"
            }
            ScriptStep::Wrapup => TRANSFER_CONFIRMATION,
        }
    }
}

pub const DISCOVERY_QUESTION: &str =
    "Great, thank you. Quick question first, did you ever get the final expense \
     coverage you were looking into previously?";

pub const WARNING_PROMPT: &str = "I can't hear you clearly. Please try again.";

pub const VOICEMAIL_FAREWELL: &str =
    "Sorry we missed you, we'll try you back another time. Have a great day.";

pub const TRANSFER_CONFIRMATION: &str =
    "Wonderful, you qualify for the program. Please hold for just a moment while \
     I connect you with a licensed specialist.";

/// Replacement for an about-to-repeat reply with no scripted question left.
pub const NEUTRAL_REPROMPT: &str = "Sorry, could you say that one more time for me?";

/// Instructions the model sees on every turn. Tool usage mirrors the script:
/// one `update_qualification` per answered question, `set_call_outcome` only
/// at a terminal decision.
pub const SYSTEM_PROMPT: &str = r#"You are a warm, natural-sounding phone agent qualifying callers for a final expense insurance program. You are on a live phone call; responses are spoken aloud, so keep them to one or two short sentences with no markdown or lists.

Follow this script strictly, one step per turn:
1. Verify the caller's name and address. When they confirm, call update_qualification with field "verified_info" and value true, then ask the discovery question about the coverage they looked into previously.
2. Ask the discovery question. Never call update_qualification for this step, whatever they answer.
3. Ask whether they have ever been diagnosed with Alzheimer's or dementia. "No" means field "no_alzheimers" is true.
4. Ask whether they are in hospice care or a nursing home. "No" means field "no_hospice" is true.
5. Ask whether they are between fifty and seventy-eight years old. A qualifying age means field "age_qualified" is true.
6. Ask whether they have an active checking or savings account. "Yes" means field "has_bank_account" is true.
7. When all five fields are true, call set_call_outcome with "transfer_to_agent" and tell them you are connecting them with a specialist. If any field is false, call set_call_outcome with "disqualified". If they decline, use "user_declined"; if they ask to hang up, use "user_requested_hangup".

Record exactly one field per answered question. Never re-ask a question that has been answered. Never announce tool calls out loud."#;
