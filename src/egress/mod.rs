//! The AI -> caller pipeline.
//!
//! Audio arrives from the AI as arbitrary-sized byte chunks at generation
//! speed (bursty, often faster than real time). This module turns that into
//! a hard 20 ms cadence on the RTP wire:
//!
//! ```text
//! push -> [FrameAccumulator] -> [FrameQueue (drop-oldest)] -> [PlayoutEngine thread] -> RTP
//! ```
//!
//! The accumulator coalesces chunks into exact 160-byte frames, the bounded
//! queue absorbs bursts and keeps the caller current under overrun, and the
//! playout engine paces one frame per tick with comfort fill when the queue
//! runs dry.

pub mod accumulator;
pub mod pcm;
pub mod pipe;
pub mod playout;
pub mod queue;
pub mod typing;

pub use accumulator::FrameAccumulator;
pub use pcm::PcmStage;
pub use pipe::{EgressPipe, InputMode};
pub use playout::{FrameSink, PlayoutEngine};
pub use queue::FrameQueue;
