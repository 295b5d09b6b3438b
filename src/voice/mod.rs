//! Voice pipeline: audio conversion, realtime STT, streaming TTS.

pub mod audio;
pub mod stt;
pub mod tts;

pub use stt::{SttConnector, SttEvent, SttHandle, SttLink};
pub use tts::{Synthesizer, TtsAbortHandle, TtsClient, TtsStream};
