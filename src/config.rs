//! Configuration management
//!
//! Loads an optional TOML file and applies environment overrides on top.
//! Every timer in the pipeline is tunable here but defaults to the values
//! the call core was measured against.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub telephony: TelephonyConfig,
    #[serde(default)]
    pub stt: SttConfig,
    #[serde(default)]
    pub tts: TtsConfig,
    #[serde(default)]
    pub dialog: DialogConfig,
    #[serde(default)]
    pub timers: TimerConfig,
}

/// HTTP/WebSocket server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Cap on simultaneous media WebSocket connections. A warning is logged
    /// at 80% of this value.
    #[serde(default = "default_max_connections")]
    pub max_ws_connections: usize,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_max_connections() -> usize {
    100
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_ws_connections: default_max_connections(),
        }
    }
}

/// Telephony provider (control plane + webhooks)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelephonyConfig {
    /// API key is injected from the environment, never persisted.
    #[serde(skip)]
    pub api_key: Option<String>,
    #[serde(default = "default_telephony_base_url")]
    pub base_url: String,
    /// Caller ID for outbound originations.
    #[serde(default)]
    pub from_number: String,
    /// Human agent leg for qualified transfers.
    #[serde(default)]
    pub agent_number: String,
    /// Public base URL the provider uses for webhooks and the media socket.
    #[serde(default)]
    pub webhook_base_url: String,
}

fn default_telephony_base_url() -> String {
    "https://api.telnyx.com/v2".to_string()
}

impl Default for TelephonyConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_telephony_base_url(),
            from_number: String::new(),
            agent_number: String::new(),
            webhook_base_url: String::new(),
        }
    }
}

/// Realtime speech-to-text provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SttConfig {
    #[serde(skip)]
    pub api_key: Option<String>,
    /// HTTPS endpoint that issues single-use socket tokens.
    #[serde(default = "default_stt_token_url")]
    pub token_url: String,
    /// WebSocket endpoint for the realtime session.
    #[serde(default = "default_stt_ws_url")]
    pub ws_url: String,
    #[serde(default = "default_stt_model")]
    pub model_id: String,
    #[serde(default = "default_language")]
    pub language_code: String,
    /// Seconds of silence before the provider's VAD commits a segment.
    #[serde(default = "default_vad_silence")]
    pub vad_silence_threshold_secs: f32,
    /// VAD sensitivity; low enough to catch quiet speech.
    #[serde(default = "default_vad_threshold")]
    pub vad_threshold: f32,
    /// Accept single-word answers.
    #[serde(default = "default_min_speech_ms")]
    pub min_speech_duration_ms: u32,
    #[serde(default = "default_min_silence_ms")]
    pub min_silence_duration_ms: u32,
}

fn default_stt_token_url() -> String {
    "https://api.elevenlabs.io/v1/speech-to-text/realtime/token".to_string()
}

fn default_stt_ws_url() -> String {
    "wss://api.elevenlabs.io/v1/speech-to-text/realtime".to_string()
}

fn default_stt_model() -> String {
    "scribe_v1_realtime".to_string()
}

fn default_language() -> String {
    "en".to_string()
}

fn default_vad_silence() -> f32 {
    0.3
}

fn default_vad_threshold() -> f32 {
    0.3
}

fn default_min_speech_ms() -> u32 {
    100
}

fn default_min_silence_ms() -> u32 {
    150
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            token_url: default_stt_token_url(),
            ws_url: default_stt_ws_url(),
            model_id: default_stt_model(),
            language_code: default_language(),
            vad_silence_threshold_secs: default_vad_silence(),
            vad_threshold: default_vad_threshold(),
            min_speech_duration_ms: default_min_speech_ms(),
            min_silence_duration_ms: default_min_silence_ms(),
        }
    }
}

/// Streaming text-to-speech provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsConfig {
    #[serde(skip)]
    pub api_key: Option<String>,
    #[serde(default = "default_tts_base_url")]
    pub base_url: String,
    /// Voice identifier; `ElevenLabs.Default.` / `ElevenLabs.` prefixes from
    /// provider-side voice descriptors are stripped before use.
    #[serde(default = "default_voice_id")]
    pub voice_id: String,
    #[serde(default = "default_tts_model")]
    pub model_id: String,
    #[serde(default = "default_stability")]
    pub stability: f32,
    #[serde(default = "default_similarity")]
    pub similarity_boost: f32,
    #[serde(default)]
    pub style: f32,
    #[serde(default = "default_speaker_boost")]
    pub use_speaker_boost: bool,
    /// Latency tier 0-4; 3 trades a little quality for fast first byte.
    #[serde(default = "default_latency_tier")]
    pub optimize_streaming_latency: u8,
}

fn default_tts_base_url() -> String {
    "https://api.elevenlabs.io/v1".to_string()
}

fn default_voice_id() -> String {
    "21m00Tcm4TlvDq8ikWAM".to_string()
}

fn default_tts_model() -> String {
    "eleven_flash_v2".to_string()
}

fn default_stability() -> f32 {
    0.65
}

fn default_similarity() -> f32 {
    0.8
}

fn default_speaker_boost() -> bool {
    true
}

fn default_latency_tier() -> u8 {
    3
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_tts_base_url(),
            voice_id: default_voice_id(),
            model_id: default_tts_model(),
            stability: default_stability(),
            similarity_boost: default_similarity(),
            style: 0.0,
            use_speaker_boost: default_speaker_boost(),
            optimize_streaming_latency: default_latency_tier(),
        }
    }
}

/// LLM dialog settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialogConfig {
    #[serde(skip)]
    pub api_key: Option<String>,
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_llm_max_tokens")]
    pub max_tokens: u32,
    /// Closing line for disqualified callees; operator-tunable.
    #[serde(default = "default_closing_disqualified")]
    pub closing_disqualified: String,
    /// Closing line when the callee declines.
    #[serde(default = "default_closing_declined")]
    pub closing_declined: String,
}

fn default_llm_base_url() -> String {
    "https://openrouter.ai/api/v1".to_string()
}

fn default_llm_model() -> String {
    "openai/gpt-4o-mini".to_string()
}

fn default_llm_max_tokens() -> u32 {
    512
}

fn default_closing_disqualified() -> String {
    "Thank you so much for your time today. Unfortunately this program isn't \
     a fit right now. Have a wonderful day."
        .to_string()
}

fn default_closing_declined() -> String {
    "No problem at all, thanks for your time. Have a great day.".to_string()
}

impl Default for DialogConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_llm_base_url(),
            model: default_llm_model(),
            max_tokens: default_llm_max_tokens(),
            closing_disqualified: default_closing_disqualified(),
            closing_declined: default_closing_declined(),
        }
    }
}

/// Every timer in the pipeline, in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimerConfig {
    /// Silence after the last user utterance before the warning prompt.
    #[serde(default = "default_no_response_ms")]
    pub no_response_ms: u64,
    /// Silence after the warning before hangup with cause `no_response`.
    #[serde(default = "default_hangup_after_warning_ms")]
    pub hangup_after_warning_ms: u64,
    /// How long to wait for the `bridged` webhook after a transfer call.
    #[serde(default = "default_bridged_watchdog_ms")]
    pub bridged_watchdog_ms: u64,
    /// Partial age at which the silence tick promotes it to a final.
    #[serde(default = "default_autocommit_silence_ms")]
    pub autocommit_silence_ms: u64,
    /// Cadence of the silence check.
    #[serde(default = "default_autocommit_tick_ms")]
    pub autocommit_tick_ms: u64,
    /// Minimum spacing between two auto-commits.
    #[serde(default = "default_autocommit_min_gap_ms")]
    pub autocommit_min_gap_ms: u64,
    /// Partials are suppressed for this long after an auto-commit.
    #[serde(default = "default_partial_cooldown_ms")]
    pub partial_cooldown_ms: u64,
    /// Grace after `session_started` before the STT socket counts as ready.
    #[serde(default = "default_stt_ready_grace_ms")]
    pub stt_ready_grace_ms: u64,
    /// Budget for the provider to send `session_started`.
    #[serde(default = "default_stt_session_start_timeout_ms")]
    pub stt_session_start_timeout_ms: u64,
    /// Window for the single reconnect attempt after an STT socket loss.
    #[serde(default = "default_stt_reconnect_window_ms")]
    pub stt_reconnect_window_ms: u64,
    /// Grace after media `stop` before disconnecting STT, letting the final
    /// transcript land.
    #[serde(default = "default_media_stop_grace_ms")]
    pub media_stop_grace_ms: u64,
    /// Per-request budget for telephony control calls.
    #[serde(default = "default_control_timeout_ms")]
    pub control_timeout_ms: u64,
}

fn default_no_response_ms() -> u64 {
    10_000
}

fn default_hangup_after_warning_ms() -> u64 {
    5_000
}

fn default_bridged_watchdog_ms() -> u64 {
    10_000
}

fn default_autocommit_silence_ms() -> u64 {
    500
}

fn default_autocommit_tick_ms() -> u64 {
    200
}

fn default_autocommit_min_gap_ms() -> u64 {
    1_500
}

fn default_partial_cooldown_ms() -> u64 {
    1_000
}

fn default_stt_ready_grace_ms() -> u64 {
    100
}

fn default_stt_session_start_timeout_ms() -> u64 {
    10_000
}

fn default_stt_reconnect_window_ms() -> u64 {
    2_000
}

fn default_media_stop_grace_ms() -> u64 {
    1_000
}

fn default_control_timeout_ms() -> u64 {
    10_000
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            no_response_ms: default_no_response_ms(),
            hangup_after_warning_ms: default_hangup_after_warning_ms(),
            bridged_watchdog_ms: default_bridged_watchdog_ms(),
            autocommit_silence_ms: default_autocommit_silence_ms(),
            autocommit_tick_ms: default_autocommit_tick_ms(),
            autocommit_min_gap_ms: default_autocommit_min_gap_ms(),
            partial_cooldown_ms: default_partial_cooldown_ms(),
            stt_ready_grace_ms: default_stt_ready_grace_ms(),
            stt_session_start_timeout_ms: default_stt_session_start_timeout_ms(),
            stt_reconnect_window_ms: default_stt_reconnect_window_ms(),
            media_stop_grace_ms: default_media_stop_grace_ms(),
            control_timeout_ms: default_control_timeout_ms(),
        }
    }
}

impl Config {
    /// Load from the default path (CALLCORE_CONFIG or ./callcore.toml),
    /// falling back to pure defaults when no file exists, then apply
    /// environment overrides.
    pub fn load() -> Result<Self> {
        let path = std::env::var("CALLCORE_CONFIG").unwrap_or_else(|_| "callcore.toml".to_string());
        let mut config = if Path::new(&path).exists() {
            Self::load_from(&path)?
        } else {
            Self::default()
        };
        config.apply_env();
        Ok(config)
    }

    /// Load from an explicit TOML file.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("failed to read config {}", path.as_ref().display()))?;
        toml::from_str(&raw).context("failed to parse config TOML")
    }

    /// Environment overrides. Secrets only ever come from here.
    pub fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("TELEPHONY_API_KEY") {
            self.telephony.api_key = Some(v);
        }
        if let Ok(v) = std::env::var("STT_API_KEY") {
            self.stt.api_key = Some(v);
        }
        if let Ok(v) = std::env::var("TTS_API_KEY") {
            self.tts.api_key = Some(v);
        }
        if let Ok(v) = std::env::var("LLM_API_KEY") {
            self.dialog.api_key = Some(v);
        }
        if let Ok(v) = std::env::var("TTS_VOICE_ID") {
            self.tts.voice_id = v;
        }
        if let Ok(v) = std::env::var("AGENT_TRANSFER_NUMBER") {
            self.telephony.agent_number = v;
        }
        if let Ok(v) = std::env::var("WEBHOOK_BASE_URL") {
            self.telephony.webhook_base_url = v;
        }
        if let Ok(v) = std::env::var("MAX_WS_CONNECTIONS") {
            if let Ok(n) = v.parse() {
                self.server.max_ws_connections = n;
            }
        }
        if let Ok(v) = std::env::var("NO_RESPONSE_TIMEOUT_MS") {
            if let Ok(n) = v.parse() {
                self.timers.no_response_ms = n;
            }
        }
        if let Ok(v) = std::env::var("HANGUP_AFTER_WARNING_MS") {
            if let Ok(n) = v.parse() {
                self.timers.hangup_after_warning_ms = n;
            }
        }
    }

    /// The public wss:// URL the provider should stream call media to.
    pub fn media_stream_url(&self, call_control_id: &str) -> String {
        let base = self
            .telephony
            .webhook_base_url
            .trim_end_matches('/')
            .replacen("https://", "wss://", 1)
            .replacen("http://", "ws://", 1);
        format!("{}/media?call_control_id={}", base, call_control_id)
    }
}
