//! G.711 µ-law conversion and media framing helpers.
//!
//! The telephony leg negotiates µ-law at 8 kHz; TTS hands back 16-bit PCM at
//! the same rate. Conversion happens once, at the outbound boundary.

use std::time::Duration;

/// µ-law bytes per second at 8 kHz (one byte per sample).
pub const ULAW_BYTES_PER_SEC: u64 = 8000;

/// Outbound packet size: 160 bytes = 20 ms of µ-law audio.
pub const OUTBOUND_PACKET_BYTES: usize = 160;

/// Packets shorter than 10 ms are provider keepalives, not speech.
pub const MIN_MEDIA_PACKET_BYTES: usize = 80;

const BIAS: i32 = 0x84;
const CLIP: i32 = 32635;

/// Encode one 16-bit linear sample to G.711 µ-law.
pub fn linear_to_ulaw(sample: i16) -> u8 {
    let mut pcm = sample as i32;
    let sign: u8 = if pcm < 0 {
        pcm = -pcm;
        0x80
    } else {
        0x00
    };
    if pcm > CLIP {
        pcm = CLIP;
    }
    pcm += BIAS;

    let mut exponent: u8 = 7;
    let mut mask = 0x4000;
    while exponent > 0 && (pcm & mask) == 0 {
        exponent -= 1;
        mask >>= 1;
    }
    let mantissa = ((pcm >> (exponent + 3)) & 0x0F) as u8;
    !(sign | (exponent << 4) | mantissa)
}

/// Decode one G.711 µ-law byte back to 16-bit linear.
pub fn ulaw_to_linear(byte: u8) -> i16 {
    let u = !byte;
    let sign = u & 0x80;
    let exponent = ((u >> 4) & 0x07) as i32;
    let mantissa = (u & 0x0F) as i32;
    let sample = (((mantissa << 3) + BIAS) << exponent) - BIAS;
    if sign != 0 {
        -(sample as i16)
    } else {
        sample as i16
    }
}

/// Encode little-endian PCM16 bytes to µ-law. The input length must be even;
/// callers hold back a trailing odd byte between chunks.
pub fn pcm16_to_ulaw(pcm: &[u8]) -> Vec<u8> {
    pcm.chunks_exact(2)
        .map(|c| linear_to_ulaw(i16::from_le_bytes([c[0], c[1]])))
        .collect()
}

/// Real-time playback duration of a µ-law byte stream.
pub fn playback_duration(ulaw_bytes: u64) -> Duration {
    Duration::from_millis(ulaw_bytes * 1000 / ULAW_BYTES_PER_SEC)
}

/// Fallback speech-length estimate at 15 characters per second, used when a
/// byte count is not available yet.
pub fn estimate_speech_duration(text: &str) -> Duration {
    let chars = text.chars().count().max(1) as u64;
    Duration::from_millis(chars * 1000 / 15)
}
