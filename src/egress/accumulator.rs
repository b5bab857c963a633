//! Coalesces arbitrary-sized A-law chunks into exact 160-byte frames.

use crate::{Frame, FRAME_SIZE};

/// Byte accumulator feeding the frame queue.
///
/// The AI delivers audio in whatever chunk sizes its generator produces;
/// nothing downstream accepts anything but whole frames. The egress pipe is
/// the only writer and serializes all access under its own lock.
///
/// After every `accumulate` the residue is strictly less than one frame.
pub struct FrameAccumulator {
    buffer: Vec<u8>,
}

impl FrameAccumulator {
    pub fn new() -> Self {
        Self {
            // One frame of headroom; grows geometrically for larger bursts.
            buffer: Vec::with_capacity(FRAME_SIZE * 2),
        }
    }

    /// Append `bytes`, then drain every complete frame to `emit`.
    ///
    /// Returns the number of frames emitted.
    pub fn accumulate<F: FnMut(Frame)>(&mut self, bytes: &[u8], mut emit: F) -> usize {
        self.buffer.extend_from_slice(bytes);

        let mut frames = 0;
        let mut offset = 0;
        while self.buffer.len() - offset >= FRAME_SIZE {
            let mut frame = [0u8; FRAME_SIZE];
            frame.copy_from_slice(&self.buffer[offset..offset + FRAME_SIZE]);
            emit(frame);
            frames += 1;
            offset += FRAME_SIZE;
        }

        // Shift the partial remainder to the front, keeping capacity.
        if offset > 0 {
            self.buffer.copy_within(offset.., 0);
            self.buffer.truncate(self.buffer.len() - offset);
        }
        frames
    }

    /// Pad the terminal residue with `silence` and emit it as a final frame.
    ///
    /// Only used at stream end; without it the tail bytes of a response
    /// would be held forever.
    pub fn flush<F: FnMut(Frame)>(&mut self, silence: u8, mut emit: F) -> bool {
        if self.buffer.is_empty() {
            return false;
        }
        let mut frame = [silence; FRAME_SIZE];
        frame[..self.buffer.len()].copy_from_slice(&self.buffer);
        self.buffer.clear();
        emit(frame);
        true
    }

    /// Bytes currently buffered (always `< FRAME_SIZE` between calls).
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Drop buffered bytes; capacity is retained.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for FrameAccumulator {
    fn default() -> Self {
        Self::new()
    }
}
