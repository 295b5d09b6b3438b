//! Callcore - Real-time Outbound Voice Agent Core
//!
//! The per-call media and dialog pipeline behind an outbound qualification
//! bot:
//! - Telephony control plane + webhook events
//! - Bidirectional media WebSocket (µ-law 8 kHz)
//! - Realtime STT with send governor and silence auto-commit
//! - LLM-driven qualification script with tool calls
//! - Streaming TTS back onto the live call
//! - Transfer-to-agent choreography and cleanup fan-out
//!
//! # Example
//!
//! ```ignore
//! use callcore::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     // serve() wires the providers and runs webhook + media endpoints
//!     callcore::cli::run().await
//! }
//! ```

// Core modules (order matters for cross-module dependencies)
pub mod error;
pub mod types;
pub mod config;
pub mod telephony;
pub mod voice;
pub mod dialog;
pub mod call;
pub mod server;
pub mod cli;

// Re-export commonly used types for convenience
pub use call::{spawn_call, CallDeps, CallEvent, CallRegistry};
pub use config::Config;
pub use error::CoreError;
pub use types::{Call, CallState, CallStatus, HangupCause, Qualification, Transcript};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
