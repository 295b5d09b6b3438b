//! Telephony provider integration
//!
//! Control-plane operations (originate, answer, stream, transfer, hangup)
//! plus the webhook event vocabulary the provider pushes back at us. The
//! controller only ever talks to the [`TelephonyApi`] trait so call flow can
//! be exercised without a provider on the wire.

mod client;
mod events;

pub use client::TelephonyClient;
pub use events::{TelephonyEvent, WebhookEnvelope};

use async_trait::async_trait;

use crate::error::CoreError;

/// Control-plane surface of the telephony provider.
///
/// Implementations retry retryable transport failures internally (3 attempts,
/// exponential backoff); non-retryable provider errors surface immediately.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TelephonyApi: Send + Sync {
    /// Place an outbound call, returning the provider's call-control id.
    async fn originate(&self, from: &str, to: &str) -> Result<String, CoreError>;

    async fn answer(&self, call_control_id: &str) -> Result<(), CoreError>;

    async fn hangup(&self, call_control_id: &str) -> Result<(), CoreError>;

    /// Ask the provider to open the bidirectional media WebSocket to `ws_url`.
    async fn start_stream(&self, call_control_id: &str, ws_url: &str) -> Result<(), CoreError>;

    async fn stop_stream(&self, call_control_id: &str) -> Result<(), CoreError>;

    /// Provider-side text playback (no TTS pipeline involved).
    async fn speak(&self, call_control_id: &str, text: &str) -> Result<(), CoreError>;

    /// Bridge the call to a human agent leg.
    async fn transfer(&self, call_control_id: &str, number: &str) -> Result<(), CoreError>;
}
