//! A-law gain, the "thinning" high-pass filter, and payload energy.

use crate::codec::g711::{alaw_decode, alaw_encode};

/// Clamp bound for gained samples, matching the G.711 encode clip.
const CLAMP: f32 = 32635.0;

/// Apply a linear gain to an A-law payload in place.
///
/// Decode, scale, clamp, re-encode per sample. Gains within 1% of unity are
/// a no-op so the common 1.0 path never touches the payload.
pub fn apply_alaw_gain(payload: &mut [u8], gain: f32) {
    if (gain - 1.0).abs() < 0.01 {
        return;
    }
    for b in payload.iter_mut() {
        let scaled = alaw_decode(*b) as f32 * gain;
        *b = alaw_encode(scaled.clamp(-CLAMP, CLAMP) as i16);
    }
}

/// RMS of an A-law payload, on the linear PCM16 scale.
///
/// This drives the half-duplex soft-gate: payloads below the configured
/// threshold while the bot is speaking are replaced with silence.
pub fn alaw_rms(payload: &[u8]) -> f32 {
    if payload.is_empty() {
        return 0.0;
    }
    let mut acc = 0.0f64;
    for &b in payload {
        let s = alaw_decode(b) as f64;
        acc += s * s;
    }
    (acc / payload.len() as f64).sqrt() as f32
}

/// First-order high-pass "thinning" filter.
///
/// `y[n] = alpha * (y[n-1] + x[n] - x[n-1])`. Used on PCM-mode egress audio
/// to thin out low-frequency rumble before A-law encoding. State is per
/// session and never shared.
pub struct ThinningFilter {
    alpha: f32,
    prev_in: f32,
    prev_out: f32,
}

impl ThinningFilter {
    /// Create a filter. `alpha = 0` disables it; other values clamp to the
    /// stable range `[0.5, 0.99]`.
    pub fn new(alpha: f32) -> Self {
        let alpha = if alpha == 0.0 {
            0.0
        } else {
            alpha.clamp(0.5, 0.99)
        };
        Self {
            alpha,
            prev_in: 0.0,
            prev_out: 0.0,
        }
    }

    /// Whether the filter does anything.
    pub fn is_enabled(&self) -> bool {
        self.alpha != 0.0
    }

    /// Filter a block of samples in place.
    pub fn process(&mut self, samples: &mut [i16]) {
        if self.alpha == 0.0 {
            return;
        }
        for s in samples.iter_mut() {
            let x = *s as f32;
            let y = self.alpha * (self.prev_out + x - self.prev_in);
            self.prev_in = x;
            self.prev_out = y;
            *s = y.clamp(-CLAMP, CLAMP) as i16;
        }
    }

    /// Drop filter history (used when a stream restarts).
    pub fn reset(&mut self) {
        self.prev_in = 0.0;
        self.prev_out = 0.0;
    }
}
