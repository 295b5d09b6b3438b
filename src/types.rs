//! Core data model shared across the call pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::CoreError;

/// Per-call state machine.
///
/// `Qualifying` and `Speaking` alternate while the dialog runs; every path
/// ends in `Terminal` after the cleanup fan-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallState {
    Initiated,
    Ringing,
    Answered,
    Streaming,
    Qualifying,
    Speaking,
    TransferRequested,
    Bridged,
    Hangup,
    Terminal,
}

impl CallState {
    /// True once the call can no longer make dialog progress.
    pub fn is_terminal(&self) -> bool {
        matches!(self, CallState::Hangup | CallState::Terminal)
    }
}

/// Who produced a message-log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    /// Internal annotations (timer fired, transfer scheduled). Kept for
    /// audit, never fed back to the LLM as a prior turn.
    System,
    /// The AI agent side of the conversation.
    Agent,
    /// The callee.
    User,
}

/// One entry in the append-only per-call message log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub speaker: Speaker,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    pub fn now(speaker: Speaker, text: impl Into<String>) -> Self {
        Self {
            speaker,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Tri-valued qualification slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tri {
    #[default]
    Unset,
    Yes,
    No,
}

impl Tri {
    pub fn is_set(&self) -> bool {
        !matches!(self, Tri::Unset)
    }

    pub fn from_bool(v: bool) -> Self {
        if v {
            Tri::Yes
        } else {
            Tri::No
        }
    }
}

/// The five qualification fields, in script order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualField {
    VerifiedInfo,
    NoAlzheimers,
    NoHospice,
    AgeQualified,
    HasBankAccount,
}

impl QualField {
    pub const ALL: [QualField; 5] = [
        QualField::VerifiedInfo,
        QualField::NoAlzheimers,
        QualField::NoHospice,
        QualField::AgeQualified,
        QualField::HasBankAccount,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QualField::VerifiedInfo => "verified_info",
            QualField::NoAlzheimers => "no_alzheimers",
            QualField::NoHospice => "no_hospice",
            QualField::AgeQualified => "age_qualified",
            QualField::HasBankAccount => "has_bank_account",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "verified_info" => Some(QualField::VerifiedInfo),
            "no_alzheimers" => Some(QualField::NoAlzheimers),
            "no_hospice" => Some(QualField::NoHospice),
            "age_qualified" => Some(QualField::AgeQualified),
            "has_bank_account" => Some(QualField::HasBankAccount),
            _ => None,
        }
    }
}

/// Fixed five-slot qualification record.
///
/// Slots move monotonically: once set, a slot keeps its value for the rest
/// of the call. Only the dialog tool-call handler writes here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Qualification {
    pub verified_info: Tri,
    pub no_alzheimers: Tri,
    pub no_hospice: Tri,
    pub age_qualified: Tri,
    pub has_bank_account: Tri,
}

impl Qualification {
    pub fn get(&self, field: QualField) -> Tri {
        match field {
            QualField::VerifiedInfo => self.verified_info,
            QualField::NoAlzheimers => self.no_alzheimers,
            QualField::NoHospice => self.no_hospice,
            QualField::AgeQualified => self.age_qualified,
            QualField::HasBankAccount => self.has_bank_account,
        }
    }

    /// Set one slot. Setting the same value twice is a no-op; changing an
    /// already-set slot is an invariant violation.
    pub fn set(&mut self, field: QualField, value: bool) -> Result<(), CoreError> {
        let tri = Tri::from_bool(value);
        let slot = match field {
            QualField::VerifiedInfo => &mut self.verified_info,
            QualField::NoAlzheimers => &mut self.no_alzheimers,
            QualField::NoHospice => &mut self.no_hospice,
            QualField::AgeQualified => &mut self.age_qualified,
            QualField::HasBankAccount => &mut self.has_bank_account,
        };
        match *slot {
            Tri::Unset => {
                *slot = tri;
                Ok(())
            }
            current if current == tri => Ok(()),
            current => Err(CoreError::InvariantViolation(format!(
                "qualification field {} already {:?}, refusing {:?}",
                field.as_str(),
                current,
                tri
            ))),
        }
    }

    /// All five slots answered `Yes` — the transfer gate.
    pub fn is_fully_qualified(&self) -> bool {
        QualField::ALL.iter().all(|f| self.get(*f) == Tri::Yes)
    }

    /// Any slot answered `No`.
    pub fn is_disqualified(&self) -> bool {
        QualField::ALL.iter().any(|f| self.get(*f) == Tri::No)
    }

    /// First unset field in script order, if any.
    pub fn first_unset(&self) -> Option<QualField> {
        QualField::ALL.iter().copied().find(|f| !self.get(*f).is_set())
    }
}

/// Negotiated media codec for the telephony leg.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodecInfo {
    pub format: String,
    pub sample_rate: u32,
}

impl Default for CodecInfo {
    fn default() -> Self {
        // The provider negotiates G.711 µ-law at 8 kHz for PSTN legs.
        Self {
            format: "PCMU".to_string(),
            sample_rate: 8000,
        }
    }
}

/// Why a call ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HangupCause {
    NormalClearing,
    NoResponse,
    TransferFailed,
    SttUnavailable,
    Voicemail,
    UserRequested,
    Disqualified,
    ProviderError,
    Other(String),
}

impl std::fmt::Display for HangupCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HangupCause::NormalClearing => write!(f, "normal_clearing"),
            HangupCause::NoResponse => write!(f, "no_response"),
            HangupCause::TransferFailed => write!(f, "transfer_failed"),
            HangupCause::SttUnavailable => write!(f, "stt_unavailable"),
            HangupCause::Voicemail => write!(f, "voicemail"),
            HangupCause::UserRequested => write!(f, "user_requested"),
            HangupCause::Disqualified => write!(f, "disqualified"),
            HangupCause::ProviderError => write!(f, "provider_error"),
            HangupCause::Other(s) => write!(f, "{}", s),
        }
    }
}

/// Final status written to the archive record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    Completed,
    Transferred,
    Voicemail,
    NoAnswer,
    NoResponse,
}

/// A transcript surfaced to the dialog layer. Only finals drive turns;
/// partials stay inside the STT client until committed or auto-committed.
#[derive(Debug, Clone, PartialEq)]
pub struct Transcript {
    pub text: String,
    pub confidence: f32,
    pub auto_committed: bool,
    pub voicemail_detected: bool,
}

impl Transcript {
    pub fn committed(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            confidence: 1.0,
            auto_committed: false,
            voicemail_detected: false,
        }
    }
}

/// Per-call runtime flags.
#[derive(Debug, Clone, Copy, Default)]
pub struct CallFlags {
    /// Outbound TTS audio is currently being played to the callee.
    pub ai_speaking: bool,
    /// The user spoke while the AI was speaking (overlap recorded, not acted on).
    pub user_attempted_response: bool,
    pub bridged: bool,
    pub voicemail_detected: bool,
    /// A hangup will fire once the current audio drains.
    pub hangup_scheduled: bool,
}

/// One active call. Created on the first control event, destroyed after the
/// terminal transition plus cleanup.
#[derive(Debug)]
pub struct Call {
    /// Opaque call-control identifier from the telephony provider.
    pub id: String,
    pub from: String,
    pub to: String,
    pub state: CallState,
    pub created_at: DateTime<Utc>,
    pub connected_at: Option<DateTime<Utc>>,
    pub codec: CodecInfo,
    pub qualification: Qualification,
    pub log: Vec<Turn>,
    pub flags: CallFlags,
}

impl Call {
    pub fn new(id: impl Into<String>, from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            from: from.into(),
            to: to.into(),
            state: CallState::Initiated,
            created_at: Utc::now(),
            connected_at: None,
            codec: CodecInfo::default(),
            qualification: Qualification::default(),
            log: Vec::new(),
            flags: CallFlags::default(),
        }
    }

    /// Append to the message log, keeping timestamps non-decreasing even if
    /// the wall clock steps backwards between entries.
    pub fn push_turn(&mut self, speaker: Speaker, text: impl Into<String>) {
        let mut turn = Turn::now(speaker, text);
        if let Some(last) = self.log.last() {
            if turn.timestamp < last.timestamp {
                turn.timestamp = last.timestamp;
            }
        }
        self.log.push(turn);
    }

    /// Agent/user turns only, in order — the LLM-visible history.
    pub fn dialog_turns(&self) -> impl Iterator<Item = &Turn> {
        self.log.iter().filter(|t| t.speaker != Speaker::System)
    }
}

/// Per-call pipeline counters for the terminal-state log line.
#[derive(Debug, Default)]
pub struct PipelineStats {
    pub media_in: AtomicU64,
    pub dropped_not_ready: AtomicU64,
    pub dropped_bridged: AtomicU64,
    pub sent_out: AtomicU64,
}

impl PipelineStats {
    pub fn snapshot(&self) -> (u64, u64, u64, u64) {
        (
            self.media_in.load(Ordering::Relaxed),
            self.dropped_not_ready.load(Ordering::Relaxed),
            self.dropped_bridged.load(Ordering::Relaxed),
            self.sent_out.load(Ordering::Relaxed),
        )
    }
}
