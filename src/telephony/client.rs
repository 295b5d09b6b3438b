//! HTTP client for the telephony control plane.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

use super::TelephonyApi;
use crate::config::TelephonyConfig;
use crate::error::{classify_status, CoreError};

/// One initial attempt plus up to three retries.
const MAX_ATTEMPTS: u32 = 4;
/// Exponential backoff base; retries sleep 100, 200, 400 ms.
const BACKOFF_BASE_MS: u64 = 100;

/// Control-plane client. One instance serves all calls; every operation is
/// a single authenticated JSON POST against the provider API.
#[derive(Debug)]
pub struct TelephonyClient {
    http: Client,
    base_url: String,
    api_key: String,
}

impl TelephonyClient {
    pub fn new(config: &TelephonyConfig, control_timeout: Duration) -> Result<Self, CoreError> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| CoreError::Unauthorized("TELEPHONY_API_KEY not set".to_string()))?;
        let http = Client::builder()
            .timeout(control_timeout)
            .build()
            .map_err(|e| CoreError::TransientNetwork(e.to_string()))?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    /// POST with local retry on retryable errors. Backoff is 100/200/400 ms;
    /// a non-retryable provider error surfaces on the first occurrence.
    async fn post(&self, path: &str, body: Value) -> Result<Value, CoreError> {
        let url = format!("{}{}", self.base_url, path);
        let mut last_err = CoreError::TransientNetwork("no attempt made".to_string());

        for attempt in 0..MAX_ATTEMPTS {
            if attempt > 0 {
                let backoff = Duration::from_millis(BACKOFF_BASE_MS << (attempt - 1));
                warn!(url = %url, attempt, "retrying control call after {:?}", backoff);
                tokio::time::sleep(backoff).await;
            }

            let result = self
                .http
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await;

            match result {
                Ok(resp) if resp.status().is_success() => {
                    let parsed = resp.json::<Value>().await.unwrap_or(Value::Null);
                    debug!(url = %url, "control call ok");
                    return Ok(parsed);
                }
                Ok(resp) => {
                    let status = resp.status();
                    let text = resp.text().await.unwrap_or_default();
                    let err = classify_status(status, &text);
                    if !err.is_retryable() {
                        return Err(err);
                    }
                    last_err = err;
                }
                Err(e) => {
                    let err = CoreError::from(e);
                    if !err.is_retryable() {
                        return Err(err);
                    }
                    last_err = err;
                }
            }
        }
        Err(last_err)
    }

    async fn call_action(&self, call_control_id: &str, action: &str, body: Value) -> Result<(), CoreError> {
        self.post(&format!("/calls/{}/actions/{}", call_control_id, action), body)
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl TelephonyApi for TelephonyClient {
    async fn originate(&self, from: &str, to: &str) -> Result<String, CoreError> {
        let resp = self.post("/calls", json!({ "from": from, "to": to })).await?;
        resp.pointer("/data/call_control_id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                CoreError::ProviderRejected("originate response missing call_control_id".to_string())
            })
    }

    async fn answer(&self, call_control_id: &str) -> Result<(), CoreError> {
        self.call_action(call_control_id, "answer", json!({})).await
    }

    async fn hangup(&self, call_control_id: &str) -> Result<(), CoreError> {
        self.call_action(call_control_id, "hangup", json!({})).await
    }

    async fn start_stream(&self, call_control_id: &str, ws_url: &str) -> Result<(), CoreError> {
        self.call_action(
            call_control_id,
            "streaming_start",
            json!({
                "stream_url": ws_url,
                "stream_track": "inbound_track",
                "stream_bidirectional_mode": "rtp",
                "stream_bidirectional_codec": "PCMU"
            }),
        )
        .await
    }

    async fn stop_stream(&self, call_control_id: &str) -> Result<(), CoreError> {
        self.call_action(call_control_id, "streaming_stop", json!({})).await
    }

    async fn speak(&self, call_control_id: &str, text: &str) -> Result<(), CoreError> {
        self.call_action(
            call_control_id,
            "speak",
            json!({ "payload": text, "voice": "female", "language": "en-US" }),
        )
        .await
    }

    async fn transfer(&self, call_control_id: &str, number: &str) -> Result<(), CoreError> {
        self.call_action(call_control_id, "transfer", json!({ "to": number })).await
    }
}
