//! Streaming text-to-speech client.
//!
//! One request per utterance: POST the text, read the chunked PCM body,
//! transcode to µ-law on the fly and hand chunks to the caller through a
//! channel. Cancellation flips an atomic flag the pump task checks between
//! chunks, then aborts the outstanding request by dropping the body stream.

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::TtsConfig;
use crate::error::{classify_status, CoreError};
use crate::voice::audio;

/// Synthesized audio arriving as µ-law chunks. The channel closing is the
/// completion signal; the receiver sums chunk lengths for playback math.
pub struct TtsStream {
    pub chunks: mpsc::Receiver<Vec<u8>>,
    cancel: Arc<AtomicBool>,
}

/// Detached cancellation handle; survives the stream being consumed.
#[derive(Clone)]
pub struct TtsAbortHandle(Arc<AtomicBool>);

impl TtsAbortHandle {
    pub fn abort(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

impl TtsStream {
    /// Build a stream from a raw channel; used by tests and by the client.
    pub fn new(chunks: mpsc::Receiver<Vec<u8>>, cancel: Arc<AtomicBool>) -> Self {
        Self { chunks, cancel }
    }

    /// Abort the in-flight synthesis. Chunks already queued still drain.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    pub fn abort_handle(&self) -> TtsAbortHandle {
        TtsAbortHandle(self.cancel.clone())
    }
}

/// Seam for the dialog pipeline; mocked in controller tests.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Synthesizer: Send + Sync {
    async fn synthesize(&self, text: &str) -> Result<TtsStream, CoreError>;
}

/// HTTP client for the streaming synthesis endpoint.
#[derive(Debug)]
pub struct TtsClient {
    http: Client,
    config: TtsConfig,
    api_key: String,
}

impl TtsClient {
    pub fn new(config: TtsConfig) -> Result<Self, CoreError> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| CoreError::Unauthorized("TTS_API_KEY not set".to_string()))?;
        let http = Client::new();
        Ok(Self { http, config, api_key })
    }

    fn voice_id(&self) -> &str {
        normalize_voice_id(&self.config.voice_id)
    }
}

/// Voice descriptors arrive either bare or wrapped in a provider prefix
/// (`ElevenLabs.Default.<id>` / `ElevenLabs.<id>`). Strip the wrapper.
pub fn normalize_voice_id(raw: &str) -> &str {
    raw.strip_prefix("ElevenLabs.Default.")
        .or_else(|| raw.strip_prefix("ElevenLabs."))
        .unwrap_or(raw)
}

#[async_trait]
impl Synthesizer for TtsClient {
    async fn synthesize(&self, text: &str) -> Result<TtsStream, CoreError> {
        let url = format!(
            "{}/text-to-speech/{}/stream?output_format=pcm_8000",
            self.config.base_url.trim_end_matches('/'),
            self.voice_id()
        );
        let body = json!({
            "text": text,
            "model_id": self.config.model_id,
            "voice_settings": {
                "stability": self.config.stability,
                "similarity_boost": self.config.similarity_boost,
                "style": self.config.style,
                "use_speaker_boost": self.config.use_speaker_boost,
            },
            "optimize_streaming_latency": self.config.optimize_streaming_latency,
        });

        let resp = self
            .http
            .post(&url)
            .header("xi-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(CoreError::from)?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(classify_status(status, &text));
        }

        let (tx, rx) = mpsc::channel::<Vec<u8>>(32);
        let cancel = Arc::new(AtomicBool::new(false));
        let cancel_task = cancel.clone();
        let chars = text.chars().count();

        tokio::spawn(async move {
            let mut body = resp.bytes_stream();
            // PCM16 chunks can split a sample across a boundary.
            let mut carry: Option<u8> = None;
            let mut total = 0u64;

            while let Some(chunk) = body.next().await {
                if cancel_task.load(Ordering::Relaxed) {
                    debug!("tts stream cancelled after {} bytes", total);
                    return;
                }
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        warn!("tts stream error: {}", e);
                        return;
                    }
                };

                let mut pcm = Vec::with_capacity(chunk.len() + 1);
                if let Some(b) = carry.take() {
                    pcm.push(b);
                }
                pcm.extend_from_slice(&chunk);
                if pcm.len() % 2 != 0 {
                    carry = pcm.pop();
                }

                let ulaw = audio::pcm16_to_ulaw(&pcm);
                if ulaw.is_empty() {
                    continue;
                }
                total += ulaw.len() as u64;
                if tx.send(ulaw).await.is_err() {
                    // Receiver gone — call terminated mid-synthesis.
                    return;
                }
            }
            debug!(chars, bytes = total, "tts stream complete");
        });

        Ok(TtsStream::new(rx, cancel))
    }
}
