//! Per-call supervisor.
//!
//! One task per call, selecting over the typed mailbox (telephony events,
//! media frames, STT events, TTS completions) and the earliest timer
//! deadline. All call state is mutated from this task only; collaborator
//! clients run their own I/O tasks and talk back through the mailbox, so no
//! lock is ever held across an await.

use chrono::Utc;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::call::archive::{CallArchive, CallRecord, TransferredCallRecord};
use crate::call::registry::{CallHandle, CallRegistry};
use crate::config::Config;
use crate::dialog::engine::{CallOutcome, DialogEngine};
use crate::dialog::llm::ChatApi;
use crate::telephony::{TelephonyApi, TelephonyEvent};
use crate::types::{Call, CallState, CallStatus, HangupCause, PipelineStats, Speaker, Transcript};
use crate::voice::audio;
use crate::voice::stt::{SttErrorKind, SttEvent, SttHandle, SttLink};
use crate::voice::tts::{Synthesizer, TtsAbortHandle};

/// Spoken when the dialog backend fails and the call cannot continue.
const APOLOGY_LINE: &str =
    "I'm so sorry, I'm having technical trouble on my end. We'll try you again \
     another time. Goodbye.";

/// Everything that can wake a call's supervisor.
#[derive(Debug)]
pub enum CallEvent {
    Telephony(TelephonyEvent),
    /// The provider opened the media socket; `outbound` carries µ-law chunks
    /// back to it.
    MediaConnected { outbound: mpsc::Sender<Vec<u8>> },
    /// One decoded inbound µ-law frame.
    MediaFrame(Vec<u8>),
    MediaStopped,
    Stt(SttEvent),
    /// The TTS pump drained; `generation` guards against completions from a
    /// preempted utterance.
    TtsComplete { bytes: u64, generation: u64 },
}

/// Collaborators a call runs against. Trait objects so tests swap in fakes.
#[derive(Clone)]
pub struct CallDeps {
    pub telephony: Arc<dyn TelephonyApi>,
    pub stt: Arc<dyn SttLink>,
    pub tts: Arc<dyn Synthesizer>,
    pub chat: Arc<dyn ChatApi>,
    pub archive: Arc<dyn CallArchive>,
    pub registry: Arc<CallRegistry>,
    pub config: Arc<Config>,
}

/// Outstanding deadlines. `None` = not armed.
#[derive(Debug, Default)]
struct Timers {
    /// Warning prompt after sustained silence.
    no_response: Option<Instant>,
    /// Hangup after the warning went unanswered.
    hangup: Option<Instant>,
    /// Outbound audio fully played to the callee.
    speaking_end: Option<Instant>,
    /// `bridged` webhook overdue after a transfer call.
    bridged_watchdog: Option<Instant>,
    /// Reconnected STT session must become ready before this.
    stt_reconnect: Option<Instant>,
}

impl Timers {
    fn next_deadline(&self) -> Option<Instant> {
        [
            self.no_response,
            self.hangup,
            self.speaking_end,
            self.bridged_watchdog,
            self.stt_reconnect,
        ]
        .into_iter()
        .flatten()
        .min()
    }

    fn clear(&mut self) {
        *self = Timers::default();
    }
}

struct Durations {
    no_response: Duration,
    hangup_after_warning: Duration,
    bridged_watchdog: Duration,
    stt_reconnect_window: Duration,
    media_stop_grace: Duration,
}

/// Create the call's mailbox and registry entry, then start its supervisor.
pub async fn spawn_call(call: Call, deps: CallDeps) -> CallHandle {
    let (events_tx, events_rx) = mpsc::channel(256);
    let handle = CallHandle::new(events_tx.clone());
    deps.registry.insert(&call.id, handle.clone()).await;

    let controller = CallController::new(call, deps, &handle, events_tx);
    tokio::spawn(controller.run(events_rx));
    handle
}

pub struct CallController {
    call: Call,
    deps: CallDeps,
    engine: DialogEngine,
    durations: Durations,
    timers: Timers,

    events_tx: mpsc::Sender<CallEvent>,
    stt_events_tx: mpsc::Sender<SttEvent>,
    stt: Option<SttHandle>,
    stt_ready: bool,
    stt_reconnect_attempted: bool,

    outbound: Option<mpsc::Sender<Vec<u8>>>,
    current_tts: Option<TtsAbortHandle>,
    tts_generation: u64,
    speak_started: Option<Instant>,

    /// A partial is in flight; the no-response timer stays disarmed.
    pending_partial: bool,
    pending_transfer: bool,
    pending_hangup: Option<HangupCause>,
    /// At least one final transcript has driven the dialog.
    finals_seen: bool,
    transferred: bool,
    local_cause: Option<HangupCause>,
    provider_cause: Option<String>,
    cleaned_up: bool,

    stats: Arc<PipelineStats>,
    bridged_flag: Arc<std::sync::atomic::AtomicBool>,
}

impl CallController {
    fn new(call: Call, deps: CallDeps, handle: &CallHandle, events_tx: mpsc::Sender<CallEvent>) -> Self {
        let t = &deps.config.timers;
        let durations = Durations {
            no_response: Duration::from_millis(t.no_response_ms),
            hangup_after_warning: Duration::from_millis(t.hangup_after_warning_ms),
            bridged_watchdog: Duration::from_millis(t.bridged_watchdog_ms),
            stt_reconnect_window: Duration::from_millis(t.stt_reconnect_window_ms),
            media_stop_grace: Duration::from_millis(t.media_stop_grace_ms),
        };
        let engine = DialogEngine::new(deps.chat.clone(), deps.config.dialog.clone());

        // STT sessions speak their own event type; bridge it into the
        // mailbox so neither side holds a back-pointer.
        let (stt_events_tx, mut stt_events_rx) = mpsc::channel::<SttEvent>(64);
        let forward = events_tx.clone();
        tokio::spawn(async move {
            while let Some(ev) = stt_events_rx.recv().await {
                if forward.send(CallEvent::Stt(ev)).await.is_err() {
                    break;
                }
            }
        });

        Self {
            call,
            engine,
            durations,
            timers: Timers::default(),
            events_tx,
            stt_events_tx,
            stt: None,
            stt_ready: false,
            stt_reconnect_attempted: false,
            outbound: None,
            current_tts: None,
            tts_generation: 0,
            speak_started: None,
            pending_partial: false,
            pending_transfer: false,
            pending_hangup: None,
            finals_seen: false,
            transferred: false,
            local_cause: None,
            provider_cause: None,
            cleaned_up: false,
            stats: handle.stats.clone(),
            bridged_flag: handle.bridged.clone(),
            deps,
        }
    }

    pub async fn run(mut self, mut events: mpsc::Receiver<CallEvent>) {
        info!(call = %self.call.id, from = %self.call.from, to = %self.call.to, "call supervisor started");

        while self.call.state != CallState::Terminal {
            let deadline = self.timers.next_deadline();
            tokio::select! {
                ev = events.recv() => {
                    match ev {
                        Some(ev) => self.handle_event(ev).await,
                        None => break,
                    }
                }
                _ = tokio::time::sleep_until(
                    deadline.unwrap_or_else(|| Instant::now() + Duration::from_secs(3600))
                ), if deadline.is_some() => {
                    self.handle_deadlines().await;
                }
            }
        }

        self.cleanup().await;
    }

    async fn handle_event(&mut self, event: CallEvent) {
        match event {
            CallEvent::Telephony(ev) => self.handle_telephony(ev).await,
            CallEvent::MediaConnected { outbound } => self.on_media_connected(outbound).await,
            CallEvent::MediaFrame(bytes) => self.on_media_frame(bytes),
            CallEvent::MediaStopped => self.on_media_stopped().await,
            CallEvent::Stt(ev) => self.handle_stt(ev).await,
            CallEvent::TtsComplete { bytes, generation } => {
                self.on_tts_complete(bytes, generation);
            }
        }
    }

    // ─── Telephony events ────────────────────────────────────

    async fn handle_telephony(&mut self, event: TelephonyEvent) {
        match event {
            TelephonyEvent::Initiated => {
                if self.call.state == CallState::Initiated {
                    self.call.state = CallState::Ringing;
                }
            }
            TelephonyEvent::Answered => self.on_answered().await,
            TelephonyEvent::MediaStarted => {
                debug!(call = %self.call.id, "provider confirmed media stream");
            }
            TelephonyEvent::Bridged { with } => self.on_bridged(with).await,
            TelephonyEvent::Hangup { cause } => {
                info!(call = %self.call.id, cause = ?cause, "hangup webhook");
                self.provider_cause = cause;
                self.call.state = CallState::Terminal;
            }
            TelephonyEvent::MachineDetection { is_machine } => {
                if is_machine {
                    info!(call = %self.call.id, "provider machine detection");
                    self.on_voicemail().await;
                }
            }
            TelephonyEvent::ProviderError { detail } => {
                error!(call = %self.call.id, detail = %detail, "provider error event");
                self.hangup_now(HangupCause::ProviderError).await;
            }
        }
    }

    async fn on_answered(&mut self) {
        if !matches!(self.call.state, CallState::Initiated | CallState::Ringing) {
            return;
        }
        self.call.state = CallState::Answered;
        self.call.connected_at = Some(Utc::now());

        let ws_url = self.deps.config.media_stream_url(&self.call.id);
        match self.deps.telephony.start_stream(&self.call.id, &ws_url).await {
            Ok(()) => {
                self.call.state = CallState::Streaming;
            }
            Err(e) => {
                error!(call = %self.call.id, "start_stream failed: {}", e);
                self.hangup_now(HangupCause::ProviderError).await;
            }
        }
    }

    async fn on_bridged(&mut self, with: String) {
        info!(call = %self.call.id, with = %with, "bridged to agent");
        self.call.state = CallState::Bridged;
        self.call.flags.bridged = true;
        self.bridged_flag.store(true, Ordering::Relaxed);
        self.transferred = true;
        self.timers.bridged_watchdog = None;
        self.timers.no_response = None;
        self.timers.hangup = None;
        self.call.push_turn(Speaker::System, format!("bridged with {}", with));

        self.deps
            .archive
            .record_transfer(TransferredCallRecord {
                call_control_id: self.call.id.clone(),
                from: self.call.from.clone(),
                to: self.call.to.clone(),
                transferred_at: Utc::now(),
            })
            .await;
    }

    // ─── Media events ────────────────────────────────────────

    async fn on_media_connected(&mut self, outbound: mpsc::Sender<Vec<u8>>) {
        // `start` may arrive after the first media frame, or not at all;
        // binding twice just refreshes the sender.
        let first = self.outbound.is_none();
        self.outbound = Some(outbound);
        if !first {
            return;
        }

        info!(call = %self.call.id, "media socket bound");
        if self.call.connected_at.is_none() {
            self.call.connected_at = Some(Utc::now());
        }
        self.call.state = CallState::Qualifying;
        self.arm_no_response();
        self.open_stt().await;
    }

    fn on_media_frame(&mut self, bytes: Vec<u8>) {
        if self.call.flags.bridged {
            return;
        }
        match &self.stt {
            Some(handle) => handle.send_audio(bytes),
            None => {
                self.stats.dropped_not_ready.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    async fn on_media_stopped(&mut self) {
        debug!(call = %self.call.id, "media stream stopped");
        if let Some(stt) = self.stt.clone() {
            // Push any buffered audio so the last utterance can still commit,
            // then give the provider a moment to deliver it.
            stt.flush().await;
            let grace = self.durations.media_stop_grace;
            tokio::spawn(async move {
                tokio::time::sleep(grace).await;
                stt.disconnect().await;
            });
        }
        self.outbound = None;
    }

    // ─── STT events ──────────────────────────────────────────

    async fn handle_stt(&mut self, event: SttEvent) {
        match event {
            SttEvent::Ready => {
                debug!(call = %self.call.id, "stt ready");
                self.stt_ready = true;
                self.timers.stt_reconnect = None;
            }
            SttEvent::Partial { .. } => self.on_partial(),
            SttEvent::Final(t) => self.on_final(t).await,
            SttEvent::Error { kind } => self.on_stt_failure(Some(kind)).await,
            SttEvent::Closed => self.on_stt_failure(None).await,
        }
    }

    fn on_partial(&mut self) {
        if self.call.flags.bridged || self.call.state.is_terminal() {
            return;
        }
        if self.call.flags.ai_speaking {
            // Overlap. Likely our own echo when no exchange has happened yet;
            // record the attempt only. Not marking a pending partial keeps
            // the no-response timer armable at speech end, so a real talker
            // gets the warning path instead of silence forever.
            if !self.finals_seen {
                self.call.flags.user_attempted_response = true;
            }
        } else {
            // Speech in flight defers the silence warning.
            self.pending_partial = true;
            self.timers.no_response = None;
        }
    }

    async fn on_final(&mut self, transcript: Transcript) {
        if self.call.flags.bridged || self.call.state.is_terminal() {
            return;
        }
        self.pending_partial = false;

        if transcript.voicemail_detected {
            self.on_voicemail().await;
            return;
        }
        if self.call.flags.voicemail_detected
            || self.pending_hangup.is_some()
            || self.pending_transfer
        {
            // Wrapping up; the dialog is done with this call.
            return;
        }
        if self.call.flags.ai_speaking && transcript.auto_committed && !self.finals_seen {
            // Overlap before any real exchange: suppress, likely our own echo.
            self.call.flags.user_attempted_response = true;
            debug!(call = %self.call.id, "suppressed overlapping transcript");
            return;
        }

        self.finals_seen = true;
        self.timers.no_response = None;
        self.timers.hangup = None;

        debug!(call = %self.call.id, auto = transcript.auto_committed, "dialog turn: {}", transcript.text);
        let turn = match self.engine.take_turn(&mut self.call, &transcript.text).await {
            Ok(turn) => turn,
            Err(e) => {
                error!(call = %self.call.id, "dialog backend failed: {}", e);
                self.pending_hangup = Some(HangupCause::ProviderError);
                self.call.push_turn(Speaker::Agent, APOLOGY_LINE);
                self.speak(APOLOGY_LINE.to_string()).await;
                return;
            }
        };

        match turn.outcome {
            Some(CallOutcome::TransferToAgent) => {
                info!(call = %self.call.id, "transfer requested, draining audio first");
                self.call.state = CallState::TransferRequested;
                self.pending_transfer = true;
                self.call.push_turn(Speaker::System, "transfer scheduled at end of audio");
                match turn.reply {
                    Some(reply) => self.speak(reply).await,
                    None => self.on_speaking_ended().await,
                }
            }
            Some(outcome) => {
                let cause = match outcome {
                    CallOutcome::Disqualified => HangupCause::Disqualified,
                    _ => HangupCause::UserRequested,
                };
                self.pending_hangup = Some(cause);
                match turn.reply {
                    Some(reply) => self.speak(reply).await,
                    None => {
                        let cause = self.pending_hangup.take().unwrap_or(HangupCause::NormalClearing);
                        self.hangup_now(cause).await;
                    }
                }
            }
            None => match turn.reply {
                Some(reply) => self.speak(reply).await,
                None => self.arm_no_response(),
            },
        }
    }

    async fn on_stt_failure(&mut self, kind: Option<SttErrorKind>) {
        if self.call.flags.bridged || self.call.state.is_terminal() {
            return;
        }
        match kind {
            Some(SttErrorKind::Auth) => {
                error!(call = %self.call.id, "stt rejected credentials");
                self.hangup_now(HangupCause::SttUnavailable).await;
                return;
            }
            Some(SttErrorKind::Quota) => {
                error!(call = %self.call.id, "stt quota exceeded");
                self.hangup_now(HangupCause::SttUnavailable).await;
                return;
            }
            Some(k) => warn!(call = %self.call.id, kind = ?k, "stt session lost"),
            None => warn!(call = %self.call.id, "stt socket closed"),
        }

        self.stt = None;
        self.stt_ready = false;
        if self.stt_reconnect_attempted {
            self.hangup_now(HangupCause::SttUnavailable).await;
            return;
        }
        info!(call = %self.call.id, "attempting stt reconnect");
        self.stt_reconnect_attempted = true;
        self.timers.stt_reconnect = Some(Instant::now() + self.durations.stt_reconnect_window);
        if !self.connect_stt().await {
            self.hangup_now(HangupCause::SttUnavailable).await;
        }
    }

    async fn open_stt(&mut self) {
        if self.connect_stt().await {
            return;
        }
        if self.stt_reconnect_attempted {
            self.hangup_now(HangupCause::SttUnavailable).await;
            return;
        }
        self.stt_reconnect_attempted = true;
        self.timers.stt_reconnect = Some(Instant::now() + self.durations.stt_reconnect_window);
        if !self.connect_stt().await {
            self.hangup_now(HangupCause::SttUnavailable).await;
        }
    }

    async fn connect_stt(&mut self) -> bool {
        match self
            .deps
            .stt
            .connect(&self.call.id, self.stt_events_tx.clone(), self.stats.clone())
            .await
        {
            Ok(handle) => {
                self.stt = Some(handle);
                true
            }
            Err(e) => {
                warn!(call = %self.call.id, "stt connect failed: {}", e);
                false
            }
        }
    }

    // ─── Speech output ───────────────────────────────────────

    async fn speak(&mut self, text: String) {
        // One utterance at a time: a new request preempts the in-flight one.
        if let Some(abort) = self.current_tts.take() {
            abort.abort();
        }
        self.tts_generation += 1;
        let generation = self.tts_generation;

        self.call.flags.ai_speaking = true;
        if !matches!(
            self.call.state,
            CallState::TransferRequested | CallState::Bridged
        ) && !self.call.state.is_terminal()
        {
            self.call.state = CallState::Speaking;
        }
        self.timers.no_response = None;
        self.speak_started = Some(Instant::now());
        // Estimate-based fallback in case the completion event is lost.
        self.timers.speaking_end =
            Some(Instant::now() + audio::estimate_speech_duration(&text) + Duration::from_secs(2));

        let stream = match self.deps.tts.synthesize(&text).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(call = %self.call.id, "tts failed, using provider playback: {}", e);
                // Provider-side playback keeps the callee from dead air; on a
                // double failure, treat the utterance as already drained so
                // pending actions still fire.
                self.timers.speaking_end =
                    if self.deps.telephony.speak(&self.call.id, &text).await.is_ok() {
                        Some(Instant::now() + audio::estimate_speech_duration(&text))
                    } else {
                        Some(Instant::now())
                    };
                return;
            }
        };

        self.current_tts = Some(stream.abort_handle());
        let outbound = self.outbound.clone();
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let mut chunks = stream.chunks;
            let mut bytes = 0u64;
            while let Some(chunk) = chunks.recv().await {
                bytes += chunk.len() as u64;
                if let Some(out) = &outbound {
                    if out.send(chunk).await.is_err() {
                        break;
                    }
                }
            }
            // Pad to a whole 20 ms packet so the framer doesn't hold the
            // tail of the utterance until the next one starts.
            let pad = (audio::OUTBOUND_PACKET_BYTES as u64 - bytes % audio::OUTBOUND_PACKET_BYTES as u64)
                % audio::OUTBOUND_PACKET_BYTES as u64;
            if pad > 0 && bytes > 0 {
                if let Some(out) = &outbound {
                    let _ = out.send(vec![0xFF; pad as usize]).await;
                }
                bytes += pad;
            }
            let _ = events.send(CallEvent::TtsComplete { bytes, generation }).await;
        });
    }

    fn on_tts_complete(&mut self, bytes: u64, generation: u64) {
        if generation != self.tts_generation {
            // Completion of a preempted utterance.
            return;
        }
        // Audio is pushed faster than real time; playback ends relative to
        // when the stream started, not when it finished arriving.
        let end = self
            .speak_started
            .map(|s| s + audio::playback_duration(bytes))
            .unwrap_or_else(Instant::now);
        self.timers.speaking_end = Some(end.max(Instant::now()));
    }

    async fn on_speaking_ended(&mut self) {
        self.call.flags.ai_speaking = false;
        self.current_tts = None;
        self.speak_started = None;
        self.timers.speaking_end = None;

        if self.call.state.is_terminal() || self.call.flags.bridged {
            return;
        }
        if self.pending_transfer {
            self.pending_transfer = false;
            self.fire_transfer().await;
            return;
        }
        if let Some(cause) = self.pending_hangup.take() {
            self.hangup_now(cause).await;
            return;
        }
        if self.call.state == CallState::Speaking {
            self.call.state = CallState::Qualifying;
        }
        if !self.pending_partial {
            self.arm_no_response();
        }
    }

    // ─── Voicemail, transfer, termination ────────────────────

    async fn on_voicemail(&mut self) {
        if self.call.flags.voicemail_detected || self.call.state.is_terminal() {
            return;
        }
        info!(call = %self.call.id, "voicemail detected");
        self.call.flags.voicemail_detected = true;
        self.call.push_turn(Speaker::System, "voicemail detected");
        self.timers.no_response = None;
        self.timers.hangup = None;
        self.call.flags.hangup_scheduled = true;
        self.pending_hangup = Some(HangupCause::Voicemail);
        let farewell = self.engine.voicemail_turn(&mut self.call);
        self.speak(farewell).await;
    }

    async fn fire_transfer(&mut self) {
        let agent = self.deps.config.telephony.agent_number.clone();
        info!(call = %self.call.id, agent = %agent, "invoking transfer");
        match self.deps.telephony.transfer(&self.call.id, &agent).await {
            Ok(()) => {
                self.timers.bridged_watchdog =
                    Some(Instant::now() + self.durations.bridged_watchdog);
            }
            Err(e) => {
                error!(call = %self.call.id, "transfer failed: {}", e);
                self.hangup_now(HangupCause::TransferFailed).await;
            }
        }
    }

    async fn hangup_now(&mut self, cause: HangupCause) {
        if self.call.state.is_terminal() {
            return;
        }
        info!(call = %self.call.id, cause = %cause, "hanging up");
        self.call.state = CallState::Hangup;
        self.local_cause = Some(cause);
        if let Err(e) = self.deps.telephony.hangup(&self.call.id).await {
            warn!(call = %self.call.id, "hangup control call failed: {}", e);
        }
        self.call.state = CallState::Terminal;
    }

    // ─── Timers ──────────────────────────────────────────────

    fn arm_no_response(&mut self) {
        if self.call.flags.ai_speaking || self.pending_partial {
            return;
        }
        self.timers.no_response = Some(Instant::now() + self.durations.no_response);
    }

    async fn handle_deadlines(&mut self) {
        let now = Instant::now();

        if self.timers.speaking_end.is_some_and(|d| now >= d) {
            self.on_speaking_ended().await;
        }
        if self.timers.no_response.is_some_and(|d| now >= d) {
            self.timers.no_response = None;
            self.on_no_response().await;
        }
        if self.timers.hangup.is_some_and(|d| now >= d) {
            self.timers.hangup = None;
            self.call.push_turn(Speaker::System, "no response after warning");
            self.hangup_now(HangupCause::NoResponse).await;
        }
        if self.timers.bridged_watchdog.is_some_and(|d| now >= d) {
            self.timers.bridged_watchdog = None;
            error!(call = %self.call.id, "bridged webhook never arrived");
            self.call.push_turn(Speaker::System, "transfer watchdog expired");
            self.hangup_now(HangupCause::TransferFailed).await;
        }
        if self.timers.stt_reconnect.is_some_and(|d| now >= d) {
            self.timers.stt_reconnect = None;
            if !self.stt_ready {
                self.hangup_now(HangupCause::SttUnavailable).await;
            }
        }
    }

    async fn on_no_response(&mut self) {
        if self.call.flags.ai_speaking || self.pending_partial {
            // Arming was deferred; speech end or a final re-arms.
            return;
        }
        info!(call = %self.call.id, "no response, playing warning");
        self.call.push_turn(Speaker::System, "no-response warning");
        let warning = self.engine.warning_turn(&mut self.call);
        self.timers.hangup = Some(Instant::now() + self.durations.hangup_after_warning);
        self.speak(warning).await;
    }

    // ─── Cleanup fan-out ─────────────────────────────────────

    async fn cleanup(&mut self) {
        if self.cleaned_up {
            return;
        }
        self.cleaned_up = true;
        self.call.state = CallState::Terminal;

        self.timers.clear();
        if let Some(abort) = self.current_tts.take() {
            abort.abort();
        }
        if let Some(stt) = self.stt.take() {
            stt.disconnect().await;
        }
        self.outbound = None;
        self.deps.registry.remove(&self.call.id).await;

        let record = self.build_record();
        let status = record.status;
        self.deps.archive.record_call(record).await;

        let (media_in, dropped_not_ready, dropped_bridged, sent_out) = self.stats.snapshot();
        info!(
            call = %self.call.id,
            status = ?status,
            media_in,
            dropped_not_ready,
            dropped_bridged,
            sent_out,
            "call finished"
        );
    }

    fn final_status(&self) -> CallStatus {
        if self.transferred {
            CallStatus::Transferred
        } else if self.call.flags.voicemail_detected {
            CallStatus::Voicemail
        } else if matches!(self.local_cause, Some(HangupCause::NoResponse)) {
            CallStatus::NoResponse
        } else if self.call.connected_at.is_none() {
            CallStatus::NoAnswer
        } else {
            CallStatus::Completed
        }
    }

    fn build_record(&self) -> CallRecord {
        let end = Utc::now();
        let start = self.call.created_at;
        let cause = self
            .local_cause
            .as_ref()
            .map(|c| c.to_string())
            .or_else(|| self.provider_cause.clone())
            .unwrap_or_else(|| HangupCause::NormalClearing.to_string());
        CallRecord {
            call_control_id: self.call.id.clone(),
            from: self.call.from.clone(),
            to: self.call.to.clone(),
            start_time: start,
            end_time: end,
            duration: (end - start).num_seconds(),
            status: self.final_status(),
            hangup_cause: cause,
            messages: self.call.log.clone(),
            qualification: self.call.qualification.clone(),
            cost_breakdown: None,
        }
    }
}
