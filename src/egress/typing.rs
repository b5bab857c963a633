//! Synthesized typing-sound comfort fill.
//!
//! While the playout queue is priming, dead silence makes callers think the
//! line dropped. When enabled, this generator emits faint keyboard clicks
//! (short noise bursts at low amplitude with irregular spacing) so the line
//! sounds attended without masking the bot's first real frame.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::codec::g711::{alaw_encode, ulaw_encode};
use crate::codec::Codec;
use crate::{Frame, FRAME_SIZE};

/// Peak click amplitude on the PCM16 scale (~ -29 dBFS).
const CLICK_AMPLITUDE: f32 = 1200.0;

/// Click length in samples (5 ms at 8 kHz).
const CLICK_SAMPLES: usize = 40;

/// Frames between clicks inside a burst.
const CLICK_GAP: std::ops::RangeInclusive<u32> = 5..=8;

/// Frames between bursts.
const BURST_GAP: std::ops::RangeInclusive<u32> = 20..=35;

/// Clicks per burst.
const BURST_CLICKS: std::ops::RangeInclusive<u32> = 2..=5;

/// Comfort-fill generator, one per call.
pub struct TypingSound {
    codec: Codec,
    rng: StdRng,
    /// Clicks remaining in the current burst.
    clicks_left: u32,
    /// Frames until the next click.
    countdown: u32,
}

impl TypingSound {
    pub fn new(codec: Codec) -> Self {
        let mut rng = StdRng::from_entropy();
        let clicks_left = rng.gen_range(BURST_CLICKS);
        let countdown = rng.gen_range(CLICK_GAP);
        Self {
            codec,
            rng,
            clicks_left,
            countdown,
        }
    }

    /// Produce the next 20 ms comfort frame.
    pub fn next_frame(&mut self) -> Frame {
        if self.countdown > 0 {
            self.countdown -= 1;
            return self.codec.silence_frame();
        }

        let frame = self.click_frame();

        if self.clicks_left > 1 {
            self.clicks_left -= 1;
            self.countdown = self.rng.gen_range(CLICK_GAP);
        } else {
            self.clicks_left = self.rng.gen_range(BURST_CLICKS);
            self.countdown = self.rng.gen_range(BURST_GAP);
        }
        frame
    }

    /// Restart spacing state (after a barge-in clear).
    pub fn reset(&mut self) {
        self.clicks_left = self.rng.gen_range(BURST_CLICKS);
        self.countdown = self.rng.gen_range(CLICK_GAP);
    }

    /// One frame whose head is a decaying noise click.
    fn click_frame(&mut self) -> Frame {
        let mut frame = self.codec.silence_frame();
        for i in 0..CLICK_SAMPLES.min(FRAME_SIZE) {
            let decay = 1.0 - (i as f32 / CLICK_SAMPLES as f32);
            let noise: f32 = self.rng.gen_range(-1.0..1.0);
            let sample = (noise * CLICK_AMPLITUDE * decay) as i16;
            frame[i] = match self.codec {
                Codec::Alaw => alaw_encode(sample),
                Codec::Ulaw => ulaw_encode(sample),
            };
        }
        frame
    }
}
