//! End-to-end call flow scenarios against the supervisor, with every
//! provider seam faked: scripted LLM turns, recording telephony, an STT
//! link the test feeds events through, and a TTS that synthesizes one
//! second of audio per utterance. Time is paused, so timer assertions are
//! exact.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

use callcore::call::archive::{CallArchive, CallRecord, TransferredCallRecord};
use callcore::call::{spawn_call, CallDeps, CallEvent, CallRegistry};
use callcore::config::Config;
use callcore::dialog::llm::{ChatApi, ChatMessage, FunctionCall, LlmTurn, ToolCall, ToolDefinition};
use callcore::dialog::script;
use callcore::error::CoreError;
use callcore::telephony::{TelephonyApi, TelephonyEvent};
use callcore::types::{Call, CallStatus, PipelineStats, Transcript, Tri};
use callcore::voice::stt::{SttCommand, SttEvent, SttHandle, SttLink};
use callcore::voice::tts::{Synthesizer, TtsStream};

// ─── Fakes ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Op {
    Originate,
    Answer,
    Hangup,
    StartStream(String),
    StopStream,
    Speak(String),
    Transfer(String),
}

struct FakeTelephony {
    ops: Mutex<Vec<Op>>,
    notify: mpsc::UnboundedSender<Op>,
}

impl FakeTelephony {
    fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Op>) {
        let (notify, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                ops: Mutex::new(Vec::new()),
                notify,
            }),
            rx,
        )
    }

    fn record(&self, op: Op) {
        self.ops.lock().unwrap().push(op.clone());
        let _ = self.notify.send(op);
    }

    fn ops(&self) -> Vec<Op> {
        self.ops.lock().unwrap().clone()
    }
}

#[async_trait]
impl TelephonyApi for FakeTelephony {
    async fn originate(&self, _from: &str, _to: &str) -> Result<String, CoreError> {
        self.record(Op::Originate);
        Ok("cc-out-1".to_string())
    }

    async fn answer(&self, _id: &str) -> Result<(), CoreError> {
        self.record(Op::Answer);
        Ok(())
    }

    async fn hangup(&self, _id: &str) -> Result<(), CoreError> {
        self.record(Op::Hangup);
        Ok(())
    }

    async fn start_stream(&self, _id: &str, ws_url: &str) -> Result<(), CoreError> {
        self.record(Op::StartStream(ws_url.to_string()));
        Ok(())
    }

    async fn stop_stream(&self, _id: &str) -> Result<(), CoreError> {
        self.record(Op::StopStream);
        Ok(())
    }

    async fn speak(&self, _id: &str, text: &str) -> Result<(), CoreError> {
        self.record(Op::Speak(text.to_string()));
        Ok(())
    }

    async fn transfer(&self, _id: &str, number: &str) -> Result<(), CoreError> {
        self.record(Op::Transfer(number.to_string()));
        Ok(())
    }
}

/// Pops one scripted turn per completion call.
struct ScriptedChat {
    turns: Mutex<VecDeque<LlmTurn>>,
}

impl ScriptedChat {
    fn new(turns: Vec<LlmTurn>) -> Arc<Self> {
        Arc::new(Self {
            turns: Mutex::new(turns.into()),
        })
    }
}

#[async_trait]
impl ChatApi for ScriptedChat {
    async fn complete_with_tools(
        &self,
        _messages: Vec<ChatMessage>,
        _tools: Vec<ToolDefinition>,
        _max_tokens: u32,
    ) -> Result<LlmTurn, CoreError> {
        self.turns
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| CoreError::ProviderRejected("no scripted turn left".to_string()))
    }
}

/// Hands out command channels the test can observe; optionally fails from a
/// given attempt number on.
struct FakeSttLink {
    connects: AtomicUsize,
    fail_from_attempt: Option<usize>,
    command_rxs: Mutex<Vec<mpsc::Receiver<SttCommand>>>,
}

impl FakeSttLink {
    fn new(fail_from_attempt: Option<usize>) -> Arc<Self> {
        Arc::new(Self {
            connects: AtomicUsize::new(0),
            fail_from_attempt,
            command_rxs: Mutex::new(Vec::new()),
        })
    }

    fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    fn take_command_rx(&self) -> mpsc::Receiver<SttCommand> {
        self.command_rxs.lock().unwrap().remove(0)
    }
}

#[async_trait]
impl SttLink for FakeSttLink {
    async fn connect(
        &self,
        _call_control_id: &str,
        _events: mpsc::Sender<SttEvent>,
        _stats: Arc<PipelineStats>,
    ) -> Result<SttHandle, CoreError> {
        let attempt = self.connects.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_from_attempt.is_some_and(|n| attempt >= n) {
            return Err(CoreError::TransientNetwork("stt down".to_string()));
        }
        let (tx, rx) = mpsc::channel(64);
        self.command_rxs.lock().unwrap().push(rx);
        Ok(SttHandle::from_channel(tx))
    }
}

/// One second of µ-law per utterance, reported as it is "spoken".
struct FakeTts {
    notify: mpsc::UnboundedSender<String>,
    bytes_per_utterance: usize,
}

impl FakeTts {
    fn new(bytes_per_utterance: usize) -> (Arc<Self>, mpsc::UnboundedReceiver<String>) {
        let (notify, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                notify,
                bytes_per_utterance,
            }),
            rx,
        )
    }
}

#[async_trait]
impl Synthesizer for FakeTts {
    async fn synthesize(&self, text: &str) -> Result<TtsStream, CoreError> {
        let _ = self.notify.send(text.to_string());
        let (tx, rx) = mpsc::channel(4);
        tx.send(vec![0xFFu8; self.bytes_per_utterance]).await.ok();
        drop(tx);
        Ok(TtsStream::new(rx, Arc::new(AtomicBool::new(false))))
    }
}

struct RecordingArchive {
    notify: mpsc::UnboundedSender<CallRecord>,
    transfers: Mutex<Vec<TransferredCallRecord>>,
}

impl RecordingArchive {
    fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<CallRecord>) {
        let (notify, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                notify,
                transfers: Mutex::new(Vec::new()),
            }),
            rx,
        )
    }
}

#[async_trait]
impl CallArchive for RecordingArchive {
    async fn record_call(&self, record: CallRecord) {
        let _ = self.notify.send(record);
    }

    async fn record_transfer(&self, record: TransferredCallRecord) {
        self.transfers.lock().unwrap().push(record);
    }
}

// ─── Harness ─────────────────────────────────────────────────

struct Harness {
    deps: CallDeps,
    telephony: Arc<FakeTelephony>,
    stt: Arc<FakeSttLink>,
    archive: Arc<RecordingArchive>,
    ops: mpsc::UnboundedReceiver<Op>,
    synth: mpsc::UnboundedReceiver<String>,
    records: mpsc::UnboundedReceiver<CallRecord>,
}

fn harness(chat_turns: Vec<LlmTurn>) -> Harness {
    harness_with(chat_turns, None)
}

fn harness_with(chat_turns: Vec<LlmTurn>, stt_fail_from: Option<usize>) -> Harness {
    let (telephony, ops) = FakeTelephony::new();
    let stt = FakeSttLink::new(stt_fail_from);
    let (tts, synth) = FakeTts::new(8000);
    let (archive, records) = RecordingArchive::new();

    let mut config = Config::default();
    config.telephony.agent_number = "+15559990000".to_string();
    config.telephony.webhook_base_url = "https://calls.example.com".to_string();

    let deps = CallDeps {
        telephony: telephony.clone(),
        stt: stt.clone(),
        tts,
        chat: ScriptedChat::new(chat_turns),
        archive: archive.clone(),
        registry: CallRegistry::new(),
        config: Arc::new(config),
    };
    Harness {
        deps,
        telephony,
        stt,
        archive,
        ops,
        synth,
        records,
    }
}

fn tool_call(name: &str, args: serde_json::Value) -> ToolCall {
    ToolCall {
        id: "tc".to_string(),
        r#type: "function".to_string(),
        function: FunctionCall {
            name: name.to_string(),
            arguments: args.to_string(),
        },
    }
}

fn update(field: &str, value: bool) -> ToolCall {
    tool_call(
        "update_qualification",
        serde_json::json!({"field": field, "value": value}),
    )
}

fn outcome(name: &str) -> ToolCall {
    tool_call("set_call_outcome", serde_json::json!({"outcome": name}))
}

fn say(text: &str) -> LlmTurn {
    LlmTurn {
        content: Some(text.to_string()),
        tool_calls: vec![],
    }
}

fn final_transcript(text: &str) -> CallEvent {
    CallEvent::Stt(SttEvent::Final(Transcript::committed(text)))
}

async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}

/// Bring a call up to "media flowing, STT ready".
async fn connect_call(h: &mut Harness) -> (callcore::call::CallHandle, mpsc::Receiver<Vec<u8>>) {
    let call = Call::new("cc-test", "+15550100", "+15550101");
    let handle = spawn_call(call, h.deps.clone()).await;

    handle
        .events
        .send(CallEvent::Telephony(TelephonyEvent::Answered))
        .await
        .unwrap();
    match h.ops.recv().await.unwrap() {
        Op::StartStream(url) => {
            assert!(url.contains("call_control_id=cc-test"));
        }
        other => panic!("expected StartStream, got {:?}", other),
    }

    let (outbound_tx, outbound_rx) = mpsc::channel(64);
    handle
        .events
        .send(CallEvent::MediaConnected { outbound: outbound_tx })
        .await
        .unwrap();
    handle
        .events
        .send(CallEvent::Stt(SttEvent::Ready))
        .await
        .unwrap();
    settle().await;
    assert_eq!(h.stt.connect_count(), 1);
    (handle, outbound_rx)
}

// ─── S1: happy path to transfer ──────────────────────────────

#[tokio::test(start_paused = true)]
async fn s1_happy_path_to_transfer() {
    let turns = vec![
        LlmTurn {
            content: Some(script::ScriptStep::Verification.question().to_string()),
            tool_calls: vec![],
        },
        LlmTurn {
            content: Some(script::DISCOVERY_QUESTION.to_string()),
            tool_calls: vec![update("verified_info", true)],
        },
        say(script::ScriptStep::Alzheimers.question()),
        LlmTurn {
            content: Some(script::ScriptStep::Hospice.question().to_string()),
            tool_calls: vec![update("no_alzheimers", true)],
        },
        LlmTurn {
            content: Some(script::ScriptStep::Age.question().to_string()),
            tool_calls: vec![update("no_hospice", true)],
        },
        LlmTurn {
            content: Some(script::ScriptStep::BankAccount.question().to_string()),
            tool_calls: vec![update("age_qualified", true)],
        },
        LlmTurn {
            content: None,
            tool_calls: vec![update("has_bank_account", true), outcome("transfer_to_agent")],
        },
    ];
    let mut h = harness(turns);
    let (handle, _outbound) = connect_call(&mut h).await;

    for answer in [
        "hello?",
        "yes this is Dan at twelve oak street",
        "no I never got it",
        "no never diagnosed",
        "no I'm at home",
        "I'm sixty four",
        "yes I have a checking account",
    ] {
        handle.events.send(final_transcript(answer)).await.unwrap();
        let spoken = h.synth.recv().await.unwrap();
        assert!(!spoken.is_empty());
    }

    // The transfer fires only after the confirmation audio drains.
    let op = h.ops.recv().await.unwrap();
    assert_eq!(op, Op::Transfer("+15559990000".to_string()));

    handle
        .events
        .send(CallEvent::Telephony(TelephonyEvent::Bridged {
            with: "cc-agent".to_string(),
        }))
        .await
        .unwrap();
    settle().await;

    // Bridged: media frames no longer reach STT.
    let mut stt_cmds = h.stt.take_command_rx();
    while stt_cmds.try_recv().is_ok() {}
    handle
        .events
        .send(CallEvent::MediaFrame(vec![0xFF; 160]))
        .await
        .unwrap();
    settle().await;
    assert!(
        stt_cmds.try_recv().is_err(),
        "frame forwarded to STT after bridge"
    );

    handle
        .events
        .send(CallEvent::Telephony(TelephonyEvent::Hangup {
            cause: Some("normal_clearing".to_string()),
        }))
        .await
        .unwrap();

    let record = h.records.recv().await.unwrap();
    assert_eq!(record.status, CallStatus::Transferred);
    assert!(record.qualification.is_fully_qualified());
    assert!(!record.messages.is_empty());
    assert_eq!(h.archive.transfers.lock().unwrap().len(), 1);
    assert!(h.deps.registry.is_empty().await);
}

// ─── S2: voicemail at greeting ───────────────────────────────

#[tokio::test(start_paused = true)]
async fn s2_voicemail_short_circuit() {
    let mut h = harness(vec![]);
    let (handle, _outbound) = connect_call(&mut h).await;

    handle
        .events
        .send(CallEvent::Stt(SttEvent::Final(Transcript {
            text: "you've reached the voicemail of".to_string(),
            confidence: 1.0,
            auto_committed: false,
            voicemail_detected: true,
        })))
        .await
        .unwrap();

    // The short farewell goes out without any LLM involvement.
    let spoken = h.synth.recv().await.unwrap();
    assert_eq!(spoken, script::VOICEMAIL_FAREWELL);

    // Hangup after the farewell audio drains.
    let op = h.ops.recv().await.unwrap();
    assert_eq!(op, Op::Hangup);

    let record = h.records.recv().await.unwrap();
    assert_eq!(record.status, CallStatus::Voicemail);
    assert_eq!(record.hangup_cause, "voicemail");
}

// ─── S3: silent callee ───────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn s3_silent_callee_warning_then_hangup() {
    let mut h = harness(vec![]);
    let start = Instant::now();
    let (_handle, _outbound) = connect_call(&mut h).await;

    // Warning prompt at 10 s ±200 ms of silence.
    let spoken = h.synth.recv().await.unwrap();
    assert_eq!(spoken, script::WARNING_PROMPT);
    let at_warning = start.elapsed();
    assert!(
        at_warning >= Duration::from_millis(9_800) && at_warning <= Duration::from_millis(10_200),
        "warning at {:?}",
        at_warning
    );

    // Hangup at 15 s ±200 ms.
    let op = h.ops.recv().await.unwrap();
    assert_eq!(op, Op::Hangup);
    let at_hangup = start.elapsed();
    assert!(
        at_hangup >= Duration::from_millis(14_800) && at_hangup <= Duration::from_millis(15_200),
        "hangup at {:?}",
        at_hangup
    );

    let record = h.records.recv().await.unwrap();
    assert_eq!(record.status, CallStatus::NoResponse);
    assert_eq!(record.hangup_cause, "no_response");
}

// ─── S4: overlap then recovery ───────────────────────────────

#[tokio::test(start_paused = true)]
async fn s4_overlap_suppressed_then_recovers() {
    let turns = vec![
        say(script::ScriptStep::Verification.question()),
        say(script::DISCOVERY_QUESTION),
    ];
    let mut h = harness(turns);
    let (handle, _outbound) = connect_call(&mut h).await;

    handle.events.send(final_transcript("hello?")).await.unwrap();
    let first = h.synth.recv().await.unwrap();
    assert_eq!(first, script::ScriptStep::Verification.question());

    // User speaks over the playing prompt; this must not become a turn.
    handle
        .events
        .send(CallEvent::Stt(SttEvent::Partial {
            text: "Hello".to_string(),
        }))
        .await
        .unwrap();
    settle().await;

    // Next utterance out is the silence warning, 10 s after speech ends —
    // proving the overlap neither answered the question nor killed the timer.
    let second = h.synth.recv().await.unwrap();
    assert_eq!(second, script::WARNING_PROMPT);

    // The user then answers for real; the dialog resumes at the cursor.
    handle
        .events
        .send(final_transcript("yes that's me"))
        .await
        .unwrap();
    let third = h.synth.recv().await.unwrap();
    assert_eq!(third, script::DISCOVERY_QUESTION);
}

// ─── S5: disqualification on Alzheimer's ─────────────────────

#[tokio::test(start_paused = true)]
async fn s5_disqualified_on_alzheimers() {
    let turns = vec![
        say(script::ScriptStep::Alzheimers.question()),
        LlmTurn {
            content: Some("I understand, thank you for telling me.".to_string()),
            tool_calls: vec![update("no_alzheimers", false), outcome("disqualified")],
        },
    ];
    let mut h = harness(turns);
    let (handle, _outbound) = connect_call(&mut h).await;

    handle.events.send(final_transcript("hello")).await.unwrap();
    h.synth.recv().await.unwrap();

    handle
        .events
        .send(final_transcript("yes, I was diagnosed last year"))
        .await
        .unwrap();

    // Polite close, then hangup; never a transfer.
    let closing = h.synth.recv().await.unwrap();
    assert_eq!(closing, Config::default().dialog.closing_disqualified);
    let op = h.ops.recv().await.unwrap();
    assert_eq!(op, Op::Hangup);

    let record = h.records.recv().await.unwrap();
    assert_eq!(record.status, CallStatus::Completed);
    assert_eq!(record.hangup_cause, "disqualified");
    assert_eq!(record.qualification.no_alzheimers, Tri::No);
    assert!(!h
        .telephony
        .ops()
        .iter()
        .any(|op| matches!(op, Op::Transfer(_))));
}

// ─── S6: STT queue overflow ──────────────────────────────────

#[tokio::test(start_paused = true)]
async fn s6_stt_overflow_reconnect_then_unavailable() {
    let mut h = harness(vec![]);
    let (handle, _outbound) = connect_call(&mut h).await;

    let failed_at = Instant::now();
    handle
        .events
        .send(CallEvent::Stt(SttEvent::Error {
            kind: callcore::voice::stt::SttErrorKind::QueueOverflow,
        }))
        .await
        .unwrap();
    settle().await;

    // Exactly one reconnect attempt.
    assert_eq!(h.stt.connect_count(), 2);

    // The fresh session never reports ready; the 2 s window expires.
    let op = h.ops.recv().await.unwrap();
    assert_eq!(op, Op::Hangup);
    let elapsed = failed_at.elapsed();
    assert!(
        elapsed >= Duration::from_millis(1_900) && elapsed <= Duration::from_millis(2_200),
        "terminated at {:?}",
        elapsed
    );

    let record = h.records.recv().await.unwrap();
    assert_eq!(record.hangup_cause, "stt_unavailable");
}

#[tokio::test(start_paused = true)]
async fn stt_reconnect_refused_terminates_immediately() {
    // First connect works; the reconnect attempt is refused outright.
    let mut h = harness_with(vec![], Some(2));
    let (handle, _outbound) = connect_call(&mut h).await;

    handle
        .events
        .send(CallEvent::Stt(SttEvent::Closed))
        .await
        .unwrap();

    let op = h.ops.recv().await.unwrap();
    assert_eq!(op, Op::Hangup);
    assert_eq!(h.stt.connect_count(), 2);

    let record = h.records.recv().await.unwrap();
    assert_eq!(record.hangup_cause, "stt_unavailable");
}

// ─── Transfer watchdog ───────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn transfer_without_bridged_webhook_times_out() {
    let turns = vec![LlmTurn {
        content: None,
        tool_calls: vec![
            update("verified_info", true),
            update("no_alzheimers", true),
            update("no_hospice", true),
            update("age_qualified", true),
            update("has_bank_account", true),
            outcome("transfer_to_agent"),
        ],
    }];
    let mut h = harness(turns);
    let (handle, _outbound) = connect_call(&mut h).await;

    handle
        .events
        .send(final_transcript("yes to everything"))
        .await
        .unwrap();
    // Transfer confirmation plays, then the transfer is invoked.
    h.synth.recv().await.unwrap();
    assert!(matches!(h.ops.recv().await.unwrap(), Op::Transfer(_)));
    let transferred_at = Instant::now();

    // No bridged webhook ever arrives; the watchdog hangs up.
    let op = h.ops.recv().await.unwrap();
    assert_eq!(op, Op::Hangup);
    let waited = transferred_at.elapsed();
    assert!(
        waited >= Duration::from_millis(9_800) && waited <= Duration::from_millis(10_400),
        "watchdog at {:?}",
        waited
    );

    let record = h.records.recv().await.unwrap();
    assert_eq!(record.hangup_cause, "transfer_failed");
}

// ─── Webhook creates calls ───────────────────────────────────

#[tokio::test(start_paused = true)]
async fn webhook_creates_call_and_routes_events() {
    use axum::extract::{Json, State};
    use callcore::server::{webhook, ConnectionGauge, ServerState};
    use callcore::telephony::WebhookEnvelope;

    let mut h = harness(vec![]);
    let state = ServerState {
        deps: h.deps.clone(),
        connections: ConnectionGauge::new(100),
    };

    let envelope = |event_type: &str| -> WebhookEnvelope {
        serde_json::from_value(serde_json::json!({
            "data": {
                "event_type": event_type,
                "payload": {
                    "call_control_id": "cc-wh",
                    "from": "+15550100",
                    "to": "+15550199"
                }
            }
        }))
        .unwrap()
    };

    let status = webhook::handle(State(state.clone()), Json(envelope("call.initiated"))).await;
    assert_eq!(status, axum::http::StatusCode::OK);
    settle().await;
    assert!(h.deps.registry.contains("cc-wh").await);

    // The answered event reaches the supervisor, which starts the stream.
    webhook::handle(State(state), Json(envelope("call.answered"))).await;
    let op = h.ops.recv().await.unwrap();
    assert!(matches!(op, Op::StartStream(_)));
}
