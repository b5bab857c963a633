//! Audio DSP primitives for the bridge.
//!
//! Everything here operates on mono PCM16 (little-endian on the wire) or
//! directly on A-law bytes. These are the perf-critical helpers the ingress
//! and egress paths run per packet.

pub mod gain;
pub mod resample;

pub use gain::{alaw_rms, apply_alaw_gain, ThinningFilter};

/// Interpret little-endian PCM16 bytes as samples. A trailing odd byte is
/// ignored.
pub fn pcm16_from_le_bytes(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|c| i16::from_le_bytes([c[0], c[1]]))
        .collect()
}

/// Serialize samples to little-endian PCM16 bytes.
pub fn pcm16_to_le_bytes(samples: &[i16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for s in samples {
        out.extend_from_slice(&s.to_le_bytes());
    }
    out
}
