//! voicebridge: real-time audio bridge between SIP/RTP telephony calls and a
//! conversational AI speaking over a WebSocket.
//!
//! The SIP layer negotiates a G.711 call (A-law or mu-law, 8 kHz, 20 ms
//! frames) and hands this crate the RTP socket plus lifecycle callbacks. The
//! crate runs both directions of the bridge:
//!
//! - **Ingress** (caller -> AI): per-packet transcode to A-law, half-duplex
//!   soft-gate while the bot is speaking, optional caller boost, forward to
//!   the AI WebSocket.
//! - **Egress** (AI -> caller): byte accumulator -> bounded frame queue with
//!   drop-oldest backpressure -> dedicated playout thread emitting one
//!   160-byte frame every 20 ms with jitter buffering and comfort fill.
//!
//! Barge-in (caller speaking over the bot) clears the egress pipeline within
//! one tick; a watchdog tells the AI when the caller has actually heard the
//! end of a response.

pub mod ai;
pub mod audiosock;
pub mod bargein;
pub mod codec;
pub mod config;
pub mod dsp;
pub mod egress;
pub mod error;
pub mod ingress;
pub mod rtp;
pub mod session;

pub use codec::Codec;
pub use config::BridgeConfig;
pub use error::BridgeError;
pub use session::CallSession;

/// Bytes per G.711 frame: 20 ms at 8 kHz, one byte per sample.
pub const FRAME_SIZE: usize = 160;

/// Frame cadence in nanoseconds (exactly 20 ms).
pub const FRAME_INTERVAL_NS: u64 = 20_000_000;

/// Telephony sample rate in Hz.
pub const SAMPLE_RATE: u32 = 8000;

/// RTP timestamp increment per frame (one timestamp unit per sample).
pub const TIMESTAMP_STEP: u32 = FRAME_SIZE as u32;

/// One 20 ms G.711 frame. Everything past the accumulator boundary moves in
/// this unit, so a frame of the wrong length cannot exist downstream.
pub type Frame = [u8; FRAME_SIZE];
