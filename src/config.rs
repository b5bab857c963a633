//! Bridge configuration.
//!
//! The subset of call configuration the bridge core reads. Loading these
//! values from files or dialplan is the embedding application's concern.

use crate::codec::Codec;

/// Tuning knobs for one bridged call.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Egress frame queue capacity in 20 ms frames (clamped to >= 60).
    pub max_frames: usize,
    /// Frames evicted per latency-clamp event.
    pub drop_batch: usize,
    /// Post-gain applied to egress audio just before the RTP wire.
    pub alaw_gain: f32,
    /// Caller-boost gain applied on ingress when > 1.01.
    pub ingress_gain: f32,
    /// Soft-gate RMS cutoff; decoded ingress below this is silenced while
    /// the bot is speaking (1500 is roughly -26 dBFS).
    pub barge_in_rms_threshold: f32,
    /// Informational echo-guard value from the dialplan. The gate's actual
    /// tail is fixed at 300 ms.
    pub echo_guard_ms: u64,
    /// High-pass "thinning" coefficient for PCM-mode egress audio.
    /// 0 disables; non-zero values clamp to [0.5, 0.99].
    pub thinning_alpha: f32,
    /// Codec offered first in negotiation.
    pub preferred_codec: Codec,
    /// Emit synthesized typing sounds instead of plain silence while the
    /// playout queue is priming.
    pub typing_sounds: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            max_frames: 240,
            drop_batch: 20,
            alaw_gain: 1.0,
            ingress_gain: 4.0,
            barge_in_rms_threshold: 1500.0,
            echo_guard_ms: 200,
            thinning_alpha: 0.88,
            preferred_codec: Codec::Alaw,
            typing_sounds: false,
        }
    }
}

impl BridgeConfig {
    /// Queue capacity with the minimum floor applied.
    pub fn queue_capacity(&self) -> usize {
        self.max_frames.max(60)
    }

    /// Queue depth above which the latency clamp triggers.
    pub fn clamp_high_water(&self) -> usize {
        self.queue_capacity().saturating_sub(5)
    }

    /// Thinning coefficient with the legal-range clamp applied.
    pub fn effective_thinning_alpha(&self) -> f32 {
        if self.thinning_alpha == 0.0 {
            0.0
        } else {
            self.thinning_alpha.clamp(0.5, 0.99)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_dialplan() {
        let cfg = BridgeConfig::default();
        assert_eq!(cfg.max_frames, 240);
        assert_eq!(cfg.drop_batch, 20);
        assert_eq!(cfg.preferred_codec, Codec::Alaw);
        assert_eq!(cfg.clamp_high_water(), 235);
    }

    #[test]
    fn queue_capacity_floor() {
        let cfg = BridgeConfig {
            max_frames: 10,
            ..Default::default()
        };
        assert_eq!(cfg.queue_capacity(), 60);
    }

    #[test]
    fn thinning_alpha_clamps() {
        let mut cfg = BridgeConfig::default();
        assert_eq!(cfg.effective_thinning_alpha(), 0.88);
        cfg.thinning_alpha = 0.1;
        assert_eq!(cfg.effective_thinning_alpha(), 0.5);
        cfg.thinning_alpha = 0.0;
        assert_eq!(cfg.effective_thinning_alpha(), 0.0);
    }
}
