//! Realtime speech-to-text client.
//!
//! One WebSocket session per call, authenticated with a single-use token
//! fetched immediately before connect. The session task owns both socket
//! halves and multiplexes four concerns:
//!
//! - audio commands from the media path, accumulated by the send governor
//! - provider messages (session lifecycle, partial/committed transcripts)
//! - the governor tick that paces outbound chunks
//! - the silence tick that promotes stale partials to finals
//!
//! The socket's `open` event does not mean ready: frames are transmitted
//! only after `session_started` arrives and a short grace elapses. Earlier
//! designs sent one message per 20 ms packet and were killed by the
//! provider's `queue_overflow`; the governor caps the send rate at 12.5
//! messages per second without adding latency beyond the first buffer.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::config::{SttConfig, TimerConfig};
use crate::error::{classify_status, CoreError};
use crate::types::{PipelineStats, Transcript};

/// Socket connect budget, separate from the session-start budget.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// First send happens as soon as 100 ms of audio (800 µ-law bytes) is
/// buffered.
const INITIAL_BUFFER_BYTES: usize = 800;
/// Steady-state chunk size.
const CHUNK_BYTES: usize = 800;
/// Minimum spacing between steady-state sends.
const MIN_SEND_INTERVAL: Duration = Duration::from_millis(80);
/// Past this the buffer is flushed even under-interval, bounding memory.
const FORCE_FLUSH_BYTES: usize = 8000;

/// Minimum words for a partial to count as speech.
const MIN_PARTIAL_WORDS: usize = 1;

/// Phrases that mark an answering machine. Matching any of these in a
/// partial upgrades it to a final with the voicemail flag set.
const VOICEMAIL_KEYWORDS: &[&str] = &[
    "voicemail",
    "voice mail",
    "leave a message",
    "leave your message",
    "leave your name",
    "after the beep",
    "after the tone",
    "at the tone",
    "mailbox",
    "you've reached",
    "you have reached",
    "automated voice messaging system",
    "unable to take your call",
    "please record your message",
];

pub fn matches_voicemail(text: &str) -> bool {
    let lower = text.to_lowercase();
    VOICEMAIL_KEYWORDS.iter().any(|k| lower.contains(k))
}

// ─── Events and commands ─────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SttErrorKind {
    Auth,
    Quota,
    QueueOverflow,
    Transcriber,
    SessionStartTimeout,
}

/// What the session reports back to the call supervisor.
#[derive(Debug, Clone, PartialEq)]
pub enum SttEvent {
    /// `session_started` received; frames flow after the ready grace.
    Ready,
    /// A stored partial (already filtered and deduplicated).
    Partial { text: String },
    /// A committed or auto-committed transcript.
    Final(Transcript),
    /// Provider error; the socket is closed before this is emitted.
    Error { kind: SttErrorKind },
    /// Socket closed without a prior error and without a disconnect request.
    Closed,
}

pub enum SttCommand {
    Audio(Vec<u8>),
    /// Transmit whatever is buffered, marked as a commit.
    Flush,
    Disconnect,
}

/// Caller-side handle to a running session.
#[derive(Clone)]
pub struct SttHandle {
    commands: mpsc::Sender<SttCommand>,
}

impl SttHandle {
    /// Wrap a raw command channel; lets tests observe session commands.
    pub fn from_channel(commands: mpsc::Sender<SttCommand>) -> Self {
        Self { commands }
    }

    /// Forward µ-law audio. Drops silently when the session queue is full —
    /// backpressure is absorbed here, never surfaced to the call.
    pub fn send_audio(&self, ulaw: Vec<u8>) {
        let _ = self.commands.try_send(SttCommand::Audio(ulaw));
    }

    pub async fn flush(&self) {
        let _ = self.commands.send(SttCommand::Flush).await;
    }

    pub async fn disconnect(&self) {
        let _ = self.commands.send(SttCommand::Disconnect).await;
    }
}

/// Seam the controller opens (and reopens) sessions through.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SttLink: Send + Sync {
    async fn connect(
        &self,
        call_control_id: &str,
        events: mpsc::Sender<SttEvent>,
        stats: Arc<PipelineStats>,
    ) -> Result<SttHandle, CoreError>;
}

// ─── Wire messages ───────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(tag = "message_type", rename_all = "snake_case")]
enum WireMessage {
    SessionStarted {},
    PartialTranscript {
        #[serde(default)]
        text: String,
    },
    CommittedTranscript {
        #[serde(default)]
        text: String,
    },
    CommittedTranscriptWithTimestamps {
        #[serde(default)]
        text: String,
    },
    AuthError {},
    QuotaExceeded {},
    QueueOverflow {},
    TranscriberError {},
    InputError {},
    #[serde(other)]
    Unknown,
}

fn audio_chunk_message(ulaw: &[u8], commit: bool) -> String {
    json!({
        "message_type": "input_audio_chunk",
        "audio_base_64": BASE64.encode(ulaw),
        "commit": commit,
        "sample_rate": 8000,
    })
    .to_string()
}

// ─── Send governor ───────────────────────────────────────────

/// Accumulates inbound audio and decides when a chunk goes on the wire.
/// Batches, never reorders.
struct SendGovernor {
    buffer: Vec<u8>,
    last_send: Option<Instant>,
    initial_sent: bool,
}

impl SendGovernor {
    fn new() -> Self {
        Self {
            buffer: Vec::new(),
            last_send: None,
            initial_sent: false,
        }
    }

    /// Append audio. Returns the number of bytes evicted to keep the buffer
    /// bounded while the session is not yet ready.
    fn push(&mut self, bytes: &[u8]) -> usize {
        self.buffer.extend_from_slice(bytes);
        if self.buffer.len() > FORCE_FLUSH_BYTES * 2 {
            let excess = self.buffer.len() - FORCE_FLUSH_BYTES * 2;
            self.buffer.drain(..excess);
            return excess;
        }
        0
    }

    /// Next chunk to transmit, if the pacing rules allow one.
    fn poll(&mut self, now: Instant) -> Option<Vec<u8>> {
        if !self.initial_sent {
            if self.buffer.len() >= INITIAL_BUFFER_BYTES {
                self.initial_sent = true;
                self.last_send = Some(now);
                return Some(self.buffer.drain(..INITIAL_BUFFER_BYTES).collect());
            }
            return None;
        }

        if self.buffer.len() > FORCE_FLUSH_BYTES {
            self.last_send = Some(now);
            return Some(std::mem::take(&mut self.buffer));
        }

        let due = self
            .last_send
            .map(|t| now.duration_since(t) >= MIN_SEND_INTERVAL)
            .unwrap_or(true);
        if due && self.buffer.len() >= CHUNK_BYTES {
            self.last_send = Some(now);
            return Some(self.buffer.drain(..CHUNK_BYTES).collect());
        }
        None
    }

    /// Everything still buffered, for the end-of-stream commit.
    fn drain(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buffer)
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.last_send = None;
        self.initial_sent = false;
    }
}

// ─── Partial tracker ─────────────────────────────────────────

enum PartialAction {
    Ignored,
    Stored,
    Voicemail(String),
}

/// Partial-transcript snapshot plus the silence auto-commit bookkeeping.
/// Compensates for segments the provider's VAD never commits.
struct PartialTracker {
    partial: Option<(String, Instant)>,
    last_auto: Option<(String, Instant)>,
    cooldown_until: Option<Instant>,
    silence: Duration,
    min_gap: Duration,
    cooldown: Duration,
}

impl PartialTracker {
    fn new(silence: Duration, min_gap: Duration, cooldown: Duration) -> Self {
        Self {
            partial: None,
            last_auto: None,
            cooldown_until: None,
            silence,
            min_gap,
            cooldown,
        }
    }

    fn on_partial(&mut self, text: &str, now: Instant) -> PartialAction {
        let trimmed = text.trim();
        if trimmed.split_whitespace().count() < MIN_PARTIAL_WORDS {
            return PartialAction::Ignored;
        }
        if matches_voicemail(trimmed) {
            self.partial = None;
            return PartialAction::Voicemail(trimmed.to_string());
        }
        if self.cooldown_until.is_some_and(|t| now < t) {
            return PartialAction::Ignored;
        }
        if self.last_auto.as_ref().is_some_and(|(t, _)| t == trimmed) {
            return PartialAction::Ignored;
        }
        self.partial = Some((trimmed.to_string(), now));
        PartialAction::Stored
    }

    /// Promote a stale partial to a final. Caller sends the commit flush.
    fn poll_autocommit(&mut self, now: Instant) -> Option<String> {
        let (text, at) = self.partial.as_ref()?;
        if now.duration_since(*at) <= self.silence {
            return None;
        }
        if text.is_empty() {
            self.partial = None;
            return None;
        }
        if let Some((last_text, last_at)) = &self.last_auto {
            if last_text == text || now.duration_since(*last_at) < self.min_gap {
                return None;
            }
        }
        let text = text.clone();
        self.last_auto = Some((text.clone(), now));
        self.cooldown_until = Some(now + self.cooldown);
        self.partial = None;
        Some(text)
    }

    fn on_committed(&mut self) {
        self.partial = None;
        self.last_auto = None;
    }
}

// ─── Session ─────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct SttTimings {
    ready_grace: Duration,
    session_start_timeout: Duration,
    autocommit_silence: Duration,
    autocommit_tick: Duration,
    autocommit_min_gap: Duration,
    partial_cooldown: Duration,
}

impl SttTimings {
    fn from_config(t: &TimerConfig) -> Self {
        Self {
            ready_grace: Duration::from_millis(t.stt_ready_grace_ms),
            session_start_timeout: Duration::from_millis(t.stt_session_start_timeout_ms),
            autocommit_silence: Duration::from_millis(t.autocommit_silence_ms),
            autocommit_tick: Duration::from_millis(t.autocommit_tick_ms),
            autocommit_min_gap: Duration::from_millis(t.autocommit_min_gap_ms),
            partial_cooldown: Duration::from_millis(t.partial_cooldown_ms),
        }
    }
}

/// Production connector: token fetch + socket open + session task spawn.
pub struct SttConnector {
    http: reqwest::Client,
    config: SttConfig,
    timings: SttTimings,
}

impl SttConnector {
    pub fn new(config: SttConfig, timers: &TimerConfig) -> Result<Self, CoreError> {
        if config.api_key.is_none() {
            return Err(CoreError::Unauthorized("STT_API_KEY not set".to_string()));
        }
        Ok(Self {
            http: reqwest::Client::new(),
            timings: SttTimings::from_config(timers),
            config,
        })
    }

    /// Fetch a single-use socket token. The key never rides on the socket
    /// URL; only this short-lived token does.
    async fn fetch_token(&self) -> Result<String, CoreError> {
        #[derive(Deserialize)]
        struct TokenResponse {
            token: String,
        }

        let api_key = self.config.api_key.as_deref().unwrap_or_default();
        let resp = self
            .http
            .post(&self.config.token_url)
            .header("xi-api-key", api_key)
            .send()
            .await
            .map_err(CoreError::from)?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }
        let parsed: TokenResponse = resp.json().await.map_err(CoreError::from)?;
        Ok(parsed.token)
    }

    fn session_url(&self, token: &str) -> Result<url::Url, CoreError> {
        let mut url = url::Url::parse(&self.config.ws_url)
            .map_err(|e| CoreError::InvariantViolation(format!("bad stt ws url: {}", e)))?;
        url.query_pairs_mut()
            .append_pair("model_id", &self.config.model_id)
            .append_pair("audio_format", "ulaw_8000")
            .append_pair("language_code", &self.config.language_code)
            .append_pair("commit_strategy", "vad")
            .append_pair(
                "vad_silence_threshold_secs",
                &self.config.vad_silence_threshold_secs.to_string(),
            )
            .append_pair("vad_threshold", &self.config.vad_threshold.to_string())
            .append_pair(
                "min_speech_duration_ms",
                &self.config.min_speech_duration_ms.to_string(),
            )
            .append_pair(
                "min_silence_duration_ms",
                &self.config.min_silence_duration_ms.to_string(),
            )
            .append_pair("token", token);
        Ok(url)
    }
}

#[async_trait]
impl SttLink for SttConnector {
    async fn connect(
        &self,
        call_control_id: &str,
        events: mpsc::Sender<SttEvent>,
        stats: Arc<PipelineStats>,
    ) -> Result<SttHandle, CoreError> {
        let token = self.fetch_token().await?;
        let url = self.session_url(&token)?;

        let (ws, _resp) = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(url.as_str()))
            .await
            .map_err(|_| CoreError::Timeout("stt socket connect".to_string()))?
            .map_err(|e| CoreError::TransientNetwork(format!("stt connect: {}", e)))?;

        info!(call = call_control_id, "stt session socket open");

        let (commands_tx, commands_rx) = mpsc::channel(256);
        let timings = self.timings.clone();
        let call = call_control_id.to_string();
        tokio::spawn(async move {
            run_session(ws, commands_rx, events, stats, timings, call).await;
        });

        Ok(SttHandle { commands: commands_tx })
    }
}

async fn run_session(
    ws: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
    mut commands: mpsc::Receiver<SttCommand>,
    events: mpsc::Sender<SttEvent>,
    stats: Arc<PipelineStats>,
    timings: SttTimings,
    call: String,
) {
    let (mut sink, mut stream) = ws.split();

    let mut governor = SendGovernor::new();
    let mut tracker = PartialTracker::new(
        timings.autocommit_silence,
        timings.autocommit_min_gap,
        timings.partial_cooldown,
    );

    let mut ready_at: Option<Instant> = None;
    let mut session_started = false;
    let started_deadline = Instant::now() + timings.session_start_timeout;
    // Once an error/disconnect is reported, a trailing Closed would make the
    // controller run its reconnect path twice.
    let mut reported = false;

    let mut governor_tick = tokio::time::interval(Duration::from_millis(20));
    governor_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut silence_tick = tokio::time::interval(timings.autocommit_tick);
    silence_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            cmd = commands.recv() => {
                match cmd {
                    Some(SttCommand::Audio(bytes)) => {
                        let dropped = governor.push(&bytes);
                        if dropped > 0 {
                            // Counted in 20 ms packet units like the other
                            // pipeline counters.
                            let packets = (dropped as u64).div_ceil(160);
                            stats
                                .dropped_not_ready
                                .fetch_add(packets, std::sync::atomic::Ordering::Relaxed);
                        }
                    }
                    Some(SttCommand::Flush) => {
                        let remainder = governor.drain();
                        let msg = audio_chunk_message(&remainder, true);
                        if sink.send(Message::Text(msg.into())).await.is_err() {
                            break;
                        }
                    }
                    Some(SttCommand::Disconnect) | None => {
                        let _ = sink.send(Message::Close(None)).await;
                        reported = true;
                        break;
                    }
                }
            }

            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(txt))) => {
                        match serde_json::from_str::<WireMessage>(txt.as_str()) {
                            Ok(WireMessage::SessionStarted {}) => {
                                session_started = true;
                                ready_at = Some(Instant::now() + timings.ready_grace);
                                debug!(call = %call, "stt session started");
                                let _ = events.send(SttEvent::Ready).await;
                            }
                            Ok(WireMessage::PartialTranscript { text }) => {
                                match tracker.on_partial(&text, Instant::now()) {
                                    PartialAction::Ignored => {}
                                    PartialAction::Stored => {
                                        let _ = events
                                            .send(SttEvent::Partial { text: text.trim().to_string() })
                                            .await;
                                    }
                                    PartialAction::Voicemail(text) => {
                                        info!(call = %call, "voicemail keyword in partial");
                                        let _ = events
                                            .send(SttEvent::Final(Transcript {
                                                text,
                                                confidence: 1.0,
                                                auto_committed: false,
                                                voicemail_detected: true,
                                            }))
                                            .await;
                                    }
                                }
                            }
                            Ok(WireMessage::CommittedTranscript { text })
                            | Ok(WireMessage::CommittedTranscriptWithTimestamps { text }) => {
                                tracker.on_committed();
                                let trimmed = text.trim();
                                if !trimmed.is_empty() {
                                    let _ = events
                                        .send(SttEvent::Final(Transcript::committed(trimmed)))
                                        .await;
                                }
                            }
                            Ok(WireMessage::AuthError {}) => {
                                report_error(&events, &mut reported, SttErrorKind::Auth).await;
                                break;
                            }
                            Ok(WireMessage::QuotaExceeded {}) => {
                                report_error(&events, &mut reported, SttErrorKind::Quota).await;
                                break;
                            }
                            Ok(WireMessage::QueueOverflow {}) => {
                                warn!(call = %call, "stt queue overflow, resetting governor");
                                governor.reset();
                                report_error(&events, &mut reported, SttErrorKind::QueueOverflow).await;
                                break;
                            }
                            Ok(WireMessage::TranscriberError {}) | Ok(WireMessage::InputError {}) => {
                                report_error(&events, &mut reported, SttErrorKind::Transcriber).await;
                                break;
                            }
                            Ok(WireMessage::Unknown) => {}
                            Err(e) => {
                                debug!(call = %call, "unparsed stt message: {}", e);
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(call = %call, "stt socket error: {}", e);
                        break;
                    }
                }
            }

            _ = governor_tick.tick() => {
                let ready = ready_at.is_some_and(|t| Instant::now() >= t);
                if ready {
                    if let Some(chunk) = governor.poll(Instant::now()) {
                        let msg = audio_chunk_message(&chunk, false);
                        if sink.send(Message::Text(msg.into())).await.is_err() {
                            break;
                        }
                    }
                }
            }

            _ = silence_tick.tick() => {
                if let Some(text) = tracker.poll_autocommit(Instant::now()) {
                    debug!(call = %call, "auto-committing stale partial");
                    let _ = events
                        .send(SttEvent::Final(Transcript {
                            text,
                            confidence: 0.8,
                            auto_committed: true,
                            voicemail_detected: false,
                        }))
                        .await;
                    // Flush the provider's segment buffer so the committed
                    // audio doesn't resurface in the next partial.
                    let msg = audio_chunk_message(&[], true);
                    if sink.send(Message::Text(msg.into())).await.is_err() {
                        break;
                    }
                }
            }

            _ = tokio::time::sleep_until(started_deadline), if !session_started => {
                warn!(call = %call, "stt session_started not received in time");
                report_error(&events, &mut reported, SttErrorKind::SessionStartTimeout).await;
                break;
            }
        }
    }

    if !reported {
        let _ = events.send(SttEvent::Closed).await;
    }
    debug!(call = %call, "stt session task ended");
}

async fn report_error(events: &mpsc::Sender<SttEvent>, reported: &mut bool, kind: SttErrorKind) {
    *reported = true;
    let _ = events.send(SttEvent::Error { kind }).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timings() -> (Duration, Duration, Duration) {
        (
            Duration::from_millis(500),
            Duration::from_millis(1500),
            Duration::from_millis(1000),
        )
    }

    #[test]
    fn test_voicemail_keywords() {
        assert!(matches_voicemail("You've reached the voicemail of Dan"));
        assert!(matches_voicemail("please leave a message after the beep"));
        assert!(matches_voicemail("This is an AUTOMATED VOICE MESSAGING SYSTEM"));
        assert!(!matches_voicemail("yes this is Dan speaking"));
        assert!(!matches_voicemail("I reached out yesterday"));
    }

    #[test]
    fn test_audio_chunk_message_shape() {
        let msg = audio_chunk_message(&[0xFF, 0xFF], false);
        let parsed: serde_json::Value = serde_json::from_str(&msg).unwrap();
        assert_eq!(parsed["message_type"], "input_audio_chunk");
        assert_eq!(parsed["commit"], false);
        assert_eq!(parsed["sample_rate"], 8000);
        assert_eq!(parsed["audio_base_64"], "//8=");
    }

    #[test]
    fn test_wire_message_parsing() {
        let m: WireMessage =
            serde_json::from_str(r#"{"message_type":"session_started","session_id":"s1"}"#).unwrap();
        assert!(matches!(m, WireMessage::SessionStarted {}));

        let m: WireMessage =
            serde_json::from_str(r#"{"message_type":"partial_transcript","text":"hello"}"#).unwrap();
        assert!(matches!(m, WireMessage::PartialTranscript { text } if text == "hello"));

        let m: WireMessage = serde_json::from_str(r#"{"message_type":"queue_overflow"}"#).unwrap();
        assert!(matches!(m, WireMessage::QueueOverflow {}));

        let m: WireMessage =
            serde_json::from_str(r#"{"message_type":"something_new","x":1}"#).unwrap();
        assert!(matches!(m, WireMessage::Unknown));
    }

    #[tokio::test(start_paused = true)]
    async fn test_governor_initial_buffer() {
        let mut g = SendGovernor::new();
        g.push(&[0u8; 400]);
        assert!(g.poll(Instant::now()).is_none());
        g.push(&[0u8; 400]);
        let first = g.poll(Instant::now()).unwrap();
        assert_eq!(first.len(), INITIAL_BUFFER_BYTES);
    }

    #[tokio::test(start_paused = true)]
    async fn test_governor_rate_cap() {
        let mut g = SendGovernor::new();
        // Prime past the initial buffer.
        g.push(&[0u8; INITIAL_BUFFER_BYTES]);
        assert!(g.poll(Instant::now()).is_some());

        // Feed exactly real-time audio for one second: 160 bytes per 20 ms,
        // polling at the same cadence as the session's governor tick.
        let mut sends = 0;
        for _ in 0..50 {
            g.push(&[0u8; 160]);
            if g.poll(Instant::now()).is_some() {
                sends += 1;
            }
            tokio::time::advance(Duration::from_millis(20)).await;
        }
        // ≤13 messages in any one-second window after the initial buffer.
        assert!(sends <= 13, "sent {} chunks in 1s", sends);
    }

    #[tokio::test(start_paused = true)]
    async fn test_governor_force_flush_bounds_memory() {
        let mut g = SendGovernor::new();
        g.push(&[0u8; INITIAL_BUFFER_BYTES]);
        assert!(g.poll(Instant::now()).is_some());

        // No interval has elapsed, but the buffer exceeds the bound.
        g.push(&[0u8; FORCE_FLUSH_BYTES + 1]);
        let sent = g.poll(Instant::now()).unwrap();
        assert_eq!(sent.len(), FORCE_FLUSH_BYTES + 1);
        assert!(g.drain().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_tracker_autocommit_after_silence() {
        let (silence, gap, cooldown) = timings();
        let mut t = PartialTracker::new(silence, gap, cooldown);

        assert!(matches!(
            t.on_partial("yes", Instant::now()),
            PartialAction::Stored
        ));
        // Not stale yet.
        assert!(t.poll_autocommit(Instant::now()).is_none());

        tokio::time::advance(Duration::from_millis(600)).await;
        assert_eq!(t.poll_autocommit(Instant::now()), Some("yes".to_string()));
        // Partial cleared after the commit.
        assert!(t.poll_autocommit(Instant::now()).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_tracker_dedupes_repeated_text() {
        let (silence, gap, cooldown) = timings();
        let mut t = PartialTracker::new(silence, gap, cooldown);

        t.on_partial("hello there", Instant::now());
        tokio::time::advance(Duration::from_millis(600)).await;
        assert!(t.poll_autocommit(Instant::now()).is_some());

        // Cooldown swallows the immediate echo of the same partial.
        assert!(matches!(
            t.on_partial("hello there", Instant::now()),
            PartialAction::Ignored
        ));

        // Even past the cooldown, identical text never commits twice.
        tokio::time::advance(Duration::from_millis(1200)).await;
        assert!(matches!(
            t.on_partial("hello there", Instant::now()),
            PartialAction::Ignored
        ));
        tokio::time::advance(Duration::from_millis(600)).await;
        assert!(t.poll_autocommit(Instant::now()).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_tracker_min_gap_between_autocommits() {
        // Short cooldown so the spacing rule is what binds here.
        let mut t = PartialTracker::new(
            Duration::from_millis(500),
            Duration::from_millis(1500),
            Duration::from_millis(100),
        );

        t.on_partial("first answer", Instant::now());
        tokio::time::advance(Duration::from_millis(600)).await;
        assert!(t.poll_autocommit(Instant::now()).is_some());

        // A different partial going stale under the 1.5 s spacing waits.
        tokio::time::advance(Duration::from_millis(200)).await;
        assert!(matches!(
            t.on_partial("second answer", Instant::now()),
            PartialAction::Stored
        ));
        tokio::time::advance(Duration::from_millis(600)).await;
        assert!(t.poll_autocommit(Instant::now()).is_none());

        // Once the spacing from the previous auto-commit elapses, it goes.
        tokio::time::advance(Duration::from_millis(700)).await;
        assert_eq!(
            t.poll_autocommit(Instant::now()),
            Some("second answer".to_string())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_tracker_voicemail_upgrade() {
        let (silence, gap, cooldown) = timings();
        let mut t = PartialTracker::new(silence, gap, cooldown);
        match t.on_partial("you've reached the voicemail of", Instant::now()) {
            PartialAction::Voicemail(text) => {
                assert!(text.contains("voicemail"));
            }
            _ => panic!("expected voicemail upgrade"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_tracker_committed_clears_state() {
        let (silence, gap, cooldown) = timings();
        let mut t = PartialTracker::new(silence, gap, cooldown);

        t.on_partial("some words", Instant::now());
        t.on_committed();
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(t.poll_autocommit(Instant::now()).is_none());

        // After a provider commit, the same text may legitimately recur.
        assert!(matches!(
            t.on_partial("some words", Instant::now()),
            PartialAction::Stored
        ));
    }

    #[tokio::test]
    async fn test_empty_partial_ignored() {
        let (silence, gap, cooldown) = timings();
        let mut t = PartialTracker::new(silence, gap, cooldown);
        assert!(matches!(
            t.on_partial("   ", Instant::now()),
            PartialAction::Ignored
        ));
    }
}
