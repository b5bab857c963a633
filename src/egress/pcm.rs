//! PCM input stage for AI dialects that emit raw PCM16 instead of G.711.
//!
//! Decodes little-endian PCM16 at 24 kHz, decimates to the telephony rate,
//! optionally thins low end, and A-law encodes. Output bytes feed the same
//! accumulator as the A-law input mode.

use crate::codec::g711::alaw_encode;
use crate::dsp::gain::ThinningFilter;
use crate::dsp::resample::downsample_24k_to_8k;
use crate::dsp::pcm16_from_le_bytes;

/// Per-call PCM -> A-law conversion stage.
///
/// Holds the thinning filter history; state is per session and reset on
/// stream restart.
pub struct PcmStage {
    thinning: ThinningFilter,
}

impl PcmStage {
    /// `thinning_alpha` of 0 disables the high-pass.
    pub fn new(thinning_alpha: f32) -> Self {
        Self {
            thinning: ThinningFilter::new(thinning_alpha),
        }
    }

    /// Convert one PCM chunk to A-law bytes.
    ///
    /// Returns `None` when the chunk cannot carry PCM16 (odd or empty); the
    /// caller logs and drops the push, and the stage stays usable.
    pub fn process(&mut self, pcm_le: &[u8]) -> Option<Vec<u8>> {
        if pcm_le.len() < 2 || pcm_le.len() % 2 != 0 {
            return None;
        }
        let samples = pcm16_from_le_bytes(pcm_le);
        let mut narrow = downsample_24k_to_8k(&samples);
        self.thinning.process(&mut narrow);
        Some(narrow.into_iter().map(alaw_encode).collect())
    }

    /// Drop filter history (stream restart).
    pub fn reset(&mut self) {
        self.thinning.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::g711::alaw_decode;
    use crate::dsp::pcm16_to_le_bytes;

    #[test]
    fn produces_one_alaw_byte_per_three_samples() {
        let mut stage = PcmStage::new(0.0);
        // 20 ms at 24 kHz = 480 samples = 960 bytes -> 160 A-law bytes.
        let pcm = pcm16_to_le_bytes(&vec![0i16; 480]);
        let alaw = stage.process(&pcm).unwrap();
        assert_eq!(alaw.len(), 160);
        assert!(alaw.iter().all(|&b| b == 0xD5));
    }

    #[test]
    fn rejects_odd_chunks() {
        let mut stage = PcmStage::new(0.88);
        assert!(stage.process(&[1, 2, 3]).is_none());
        assert!(stage.process(&[]).is_none());
        // Still usable afterwards.
        let pcm = pcm16_to_le_bytes(&vec![100i16; 48]);
        assert!(stage.process(&pcm).is_some());
    }

    #[test]
    fn preserves_tone_level_without_thinning() {
        let mut stage = PcmStage::new(0.0);
        let tone: Vec<i16> = (0..480)
            .map(|i| (6000.0 * (i as f32 * 0.08).sin()) as i16)
            .collect();
        let alaw = stage.process(&pcm16_to_le_bytes(&tone)).unwrap();
        let peak = alaw
            .iter()
            .map(|&b| (alaw_decode(b) as i32).abs())
            .max()
            .unwrap();
        assert!(peak > 4000, "peak {}", peak);
    }

    #[test]
    fn thinning_attenuates_dc_offset() {
        let mut stage = PcmStage::new(0.88);
        // Strong DC with no audio content.
        let dc = pcm16_to_le_bytes(&vec![8000i16; 2400]);
        let alaw = stage.process(&dc).unwrap();
        let tail = &alaw[alaw.len() - 40..];
        for &b in tail {
            assert!((alaw_decode(b) as i32).abs() < 500);
        }
    }
}
