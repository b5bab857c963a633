//! The caller -> AI path: a pure per-RTP-packet transform.
//!
//! Runs inline on the SIP transport's receive thread; every step is short
//! and non-blocking. The returned bytes are always A-law regardless of the
//! negotiated wire codec, so the AI hears one format.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::bargein::BargeInGate;
use crate::codec::g711::transcode_ulaw_to_alaw;
use crate::codec::{Codec, ALAW_SILENCE};
use crate::config::BridgeConfig;
use crate::dsp::{alaw_rms, apply_alaw_gain};

/// Packets ignored at call start; some PBXs front-load their jitter-buffer
/// priming garbage into the first stretch of RTP.
const FLUSH_PACKETS: u64 = 20;

/// Wall-clock ignore window at call start, in milliseconds.
const FLUSH_WINDOW_MS: u64 = 500;

/// Ingress statistics (lock-free atomic updates).
#[derive(Default)]
pub struct IngressStats {
    pub packets_seen: AtomicU64,
    /// Dropped by the startup flush guard.
    pub packets_flushed: AtomicU64,
    /// Replaced with silence by the half-duplex soft-gate.
    pub packets_gated: AtomicU64,
    pub packets_forwarded: AtomicU64,
}

/// Per-call ingress transform.
pub struct IngressPath {
    codec: Codec,
    gate: Arc<BargeInGate>,
    rms_threshold: f32,
    gain: f32,
    started_at: Instant,
    stats: Arc<IngressStats>,
}

impl IngressPath {
    pub fn new(config: &BridgeConfig, codec: Codec, gate: Arc<BargeInGate>) -> Self {
        Self {
            codec,
            gate,
            rms_threshold: config.barge_in_rms_threshold,
            gain: config.ingress_gain,
            started_at: Instant::now(),
            stats: Arc::new(IngressStats::default()),
        }
    }

    /// Transform one RTP payload into the bytes to forward to the AI.
    ///
    /// Returns `None` when the packet is swallowed by the flush guard.
    pub fn process(&self, payload: &[u8]) -> Option<Vec<u8>> {
        let seen = self.stats.packets_seen.fetch_add(1, Ordering::Relaxed) + 1;

        // Flush guard: both conditions must clear before audio passes.
        if seen <= FLUSH_PACKETS
            || self.started_at.elapsed().as_millis() < FLUSH_WINDOW_MS as u128
        {
            self.stats.packets_flushed.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        let mut audio = payload.to_vec();

        // Normalize to A-law so the AI only ever hears one encoding.
        if self.codec == Codec::Ulaw {
            transcode_ulaw_to_alaw(&mut audio);
        }

        // Half-duplex soft-gate: while the bot is (recently) speaking, quiet
        // uplink audio is its own echo or room tone. Genuine speech exceeds
        // the threshold and passes through to trigger barge-in.
        if self.gate.is_gating() && alaw_rms(&audio) < self.rms_threshold {
            audio.fill(ALAW_SILENCE);
            self.stats.packets_gated.fetch_add(1, Ordering::Relaxed);
        } else if self.gain > 1.01 && !audio.iter().all(|&b| b == ALAW_SILENCE) {
            // Caller boost for quiet handsets. Digital silence stays exactly
            // the silence byte: boosting it would only re-quantize the
            // codec's idle level onto a nearby non-silence code.
            apply_alaw_gain(&mut audio, self.gain);
        }

        self.stats.packets_forwarded.fetch_add(1, Ordering::Relaxed);
        Some(audio)
    }

    /// Statistics handle.
    pub fn stats(&self) -> Arc<IngressStats> {
        self.stats.clone()
    }

    #[cfg(test)]
    fn with_flush_elapsed(mut self) -> Self {
        self.started_at = Instant::now() - std::time::Duration::from_millis(FLUSH_WINDOW_MS + 1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::g711::{alaw_decode, alaw_encode};

    fn path(codec: Codec, gate: Arc<BargeInGate>) -> IngressPath {
        let config = BridgeConfig {
            ingress_gain: 1.0,
            ..Default::default()
        };
        IngressPath::new(&config, codec, gate).with_flush_elapsed()
    }

    fn speech_frame() -> Vec<u8> {
        (0..160)
            .map(|i| alaw_encode((6000.0 * (i as f32 * 0.25).sin()) as i16))
            .collect()
    }

    #[test]
    fn flush_guard_swallows_first_packets() {
        let gate = Arc::new(BargeInGate::new());
        let config = BridgeConfig::default();
        // Fresh path: the 500 ms window applies even past 20 packets.
        let path = IngressPath::new(&config, Codec::Alaw, gate);

        for _ in 0..FLUSH_PACKETS + 5 {
            assert!(path.process(&[ALAW_SILENCE; 160]).is_none());
        }
        assert_eq!(
            path.stats().packets_flushed.load(Ordering::Relaxed),
            FLUSH_PACKETS + 5
        );
    }

    #[test]
    fn packet_count_guard_applies_after_window() {
        let gate = Arc::new(BargeInGate::new());
        let p = path(Codec::Alaw, gate);
        // Window already elapsed, but the first 20 packets still flush.
        for i in 0..FLUSH_PACKETS {
            assert!(p.process(&[ALAW_SILENCE; 160]).is_none(), "packet {}", i);
        }
        assert!(p.process(&[ALAW_SILENCE; 160]).is_some());
    }

    fn warmed(p: &IngressPath) {
        for _ in 0..FLUSH_PACKETS {
            let _ = p.process(&[ALAW_SILENCE; 160]);
        }
    }

    #[test]
    fn ulaw_peer_is_transcoded() {
        let gate = Arc::new(BargeInGate::new());
        let p = path(Codec::Ulaw, gate);
        warmed(&p);

        let out = p.process(&[0xFFu8; 160]).unwrap();
        assert_eq!(out.len(), 160);
        assert!(out.iter().all(|&b| b == 0xD5));
    }

    #[test]
    fn alaw_passes_through_untouched_at_unity_gain() {
        let gate = Arc::new(BargeInGate::new());
        let p = path(Codec::Alaw, gate);
        warmed(&p);

        let frame = speech_frame();
        let out = p.process(&frame).unwrap();
        assert_eq!(out, frame);
    }

    #[test]
    fn soft_gate_silences_quiet_audio_while_bot_speaks() {
        let gate = Arc::new(BargeInGate::new());
        gate.note_bot_audio();
        let p = path(Codec::Alaw, gate);
        warmed(&p);

        // Low-level room tone: below the RMS threshold.
        let quiet: Vec<u8> = (0..160)
            .map(|i| alaw_encode((200.0 * (i as f32 * 0.3).sin()) as i16))
            .collect();
        let out = p.process(&quiet).unwrap();
        assert!(out.iter().all(|&b| b == ALAW_SILENCE));
        // Decodes to near-zero PCM: nothing for the AI's VAD to chew on.
        assert!(out.iter().all(|&b| alaw_decode(b).abs() <= 8));
        assert_eq!(p.stats().packets_gated.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn soft_gate_passes_genuine_speech() {
        let gate = Arc::new(BargeInGate::new());
        gate.note_bot_audio();
        let p = path(Codec::Alaw, gate);
        warmed(&p);

        let frame = speech_frame();
        let out = p.process(&frame).unwrap();
        assert_eq!(out, frame);
        assert_eq!(p.stats().packets_gated.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn no_gating_when_idle() {
        let gate = Arc::new(BargeInGate::new());
        let p = path(Codec::Alaw, gate);
        warmed(&p);

        let quiet: Vec<u8> = vec![alaw_encode(50); 160];
        let out = p.process(&quiet).unwrap();
        assert_eq!(out, quiet);
    }

    #[test]
    fn ingress_gain_boosts_quiet_callers() {
        let gate = Arc::new(BargeInGate::new());
        let config = BridgeConfig::default(); // 4x boost
        let p = IngressPath::new(&config, Codec::Alaw, gate).with_flush_elapsed();
        warmed(&p);

        let quiet = vec![alaw_encode(1000); 160];
        let out = p.process(&quiet).unwrap();
        let boosted = alaw_decode(out[0]) as f32;
        assert!((boosted - 4000.0).abs() / 4000.0 < 0.15, "{}", boosted);
    }

    #[test]
    fn ulaw_silence_reaches_ai_as_alaw_silence() {
        // The mu-law peer scenario end to end: 0xFF silence in, 0xD5 out,
        // gated or not.
        let gate = Arc::new(BargeInGate::new());
        gate.note_bot_audio();
        let p = path(Codec::Ulaw, gate);
        warmed(&p);

        let out = p.process(&[0xFF; 160]).unwrap();
        assert!(out.iter().all(|&b| b == 0xD5));
    }

    #[test]
    fn ulaw_silence_with_default_boost_stays_digital_silence() {
        // Same scenario under the stock dialplan: 4x caller boost, gate
        // idle. The silence byte must reach the AI unchanged; a boosted
        // idle level would land on 0xD7 and read as low-level noise.
        let gate = Arc::new(BargeInGate::new());
        let config = BridgeConfig::default();
        assert!(config.ingress_gain > 1.01);
        let p = IngressPath::new(&config, Codec::Ulaw, gate).with_flush_elapsed();
        warmed(&p);

        let out = p.process(&[0xFF; 160]).unwrap();
        assert_eq!(out, vec![ALAW_SILENCE; 160]);
    }
}
