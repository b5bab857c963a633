//! Bounded frame queue between the egress pipe and the playout engine.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::Frame;

/// Queue statistics (lock-free atomic updates).
#[derive(Default)]
pub struct QueueStats {
    pub frames_in: AtomicU64,
    pub frames_out: AtomicU64,
    /// Frames discarded by the drop-oldest policy or the latency clamp.
    pub frames_evicted: AtomicU64,
}

/// FIFO of 20 ms frames with drop-oldest backpressure.
///
/// Multiple writers (the egress pipe, in practice one at a time), a single
/// consumer (the playout thread). Writes always succeed: when the queue is
/// full the oldest frame is evicted so the caller hears the freshest audio
/// instead of drifting seconds behind.
pub struct FrameQueue {
    inner: Mutex<VecDeque<Frame>>,
    available: Condvar,
    capacity: usize,
    stats: QueueStats,
}

impl FrameQueue {
    /// Create a queue holding at most `capacity` frames (floor of 60 = 1.2 s).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(60);
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            available: Condvar::new(),
            capacity,
            stats: QueueStats::default(),
        }
    }

    /// Append a frame, evicting the oldest if the queue is full.
    ///
    /// Returns the number of frames evicted (0 or 1).
    pub fn push(&self, frame: Frame) -> usize {
        let mut q = self.inner.lock();
        let mut evicted = 0;
        while q.len() >= self.capacity {
            q.pop_front();
            evicted += 1;
        }
        q.push_back(frame);
        drop(q);

        self.stats.frames_in.fetch_add(1, Ordering::Relaxed);
        if evicted > 0 {
            self.stats
                .frames_evicted
                .fetch_add(evicted as u64, Ordering::Relaxed);
        }
        self.available.notify_one();
        evicted
    }

    /// Evict up to `n` oldest frames (the latency clamp). Returns the number
    /// actually evicted.
    pub fn evict_oldest(&self, n: usize) -> usize {
        let mut q = self.inner.lock();
        let evicted = n.min(q.len());
        for _ in 0..evicted {
            q.pop_front();
        }
        drop(q);
        if evicted > 0 {
            self.stats
                .frames_evicted
                .fetch_add(evicted as u64, Ordering::Relaxed);
        }
        evicted
    }

    /// Pop the oldest frame without waiting.
    pub fn try_pop(&self) -> Option<Frame> {
        let frame = self.inner.lock().pop_front();
        if frame.is_some() {
            self.stats.frames_out.fetch_add(1, Ordering::Relaxed);
        }
        frame
    }

    /// Pop the oldest frame, waiting up to `timeout` for one to arrive.
    ///
    /// The playout loop bounds `timeout` by one tick so cancellation is
    /// never delayed past a frame interval.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<Frame> {
        let mut q = self.inner.lock();
        if q.is_empty() {
            self.available.wait_for(&mut q, timeout);
        }
        let frame = q.pop_front();
        drop(q);
        if frame.is_some() {
            self.stats.frames_out.fetch_add(1, Ordering::Relaxed);
        }
        frame
    }

    /// Current depth in frames.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Maximum depth in frames.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop every queued frame (barge-in). Returns the number dropped.
    pub fn clear(&self) -> usize {
        let mut q = self.inner.lock();
        let dropped = q.len();
        q.clear();
        dropped
    }

    /// Statistics reference.
    pub fn stats(&self) -> &QueueStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Instant;

    fn frame(tag: u8) -> Frame {
        [tag; 160]
    }

    #[test]
    fn fifo_order() {
        let q = FrameQueue::new(60);
        q.push(frame(1));
        q.push(frame(2));
        q.push(frame(3));
        assert_eq!(q.try_pop().unwrap()[0], 1);
        assert_eq!(q.try_pop().unwrap()[0], 2);
        assert_eq!(q.try_pop().unwrap()[0], 3);
        assert!(q.try_pop().is_none());
    }

    #[test]
    fn capacity_floor_is_sixty() {
        let q = FrameQueue::new(4);
        assert_eq!(q.capacity(), 60);
    }

    #[test]
    fn full_queue_drops_oldest_and_write_succeeds() {
        let q = FrameQueue::new(60);
        for i in 0..60 {
            assert_eq!(q.push(frame(i as u8)), 0);
        }
        assert_eq!(q.len(), 60);

        // 61st write evicts frame 0.
        assert_eq!(q.push(frame(77)), 1);
        assert_eq!(q.len(), 60);
        assert_eq!(q.try_pop().unwrap()[0], 1);
        assert_eq!(q.stats().frames_evicted.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn depth_never_exceeds_capacity() {
        let q = FrameQueue::new(60);
        for i in 0..500 {
            q.push(frame(i as u8));
            assert!(q.len() <= 60);
        }
    }

    #[test]
    fn evict_oldest_batch() {
        let q = FrameQueue::new(60);
        for i in 0..30 {
            q.push(frame(i as u8));
        }
        assert_eq!(q.evict_oldest(20), 20);
        assert_eq!(q.len(), 10);
        assert_eq!(q.try_pop().unwrap()[0], 20);
        // Eviction beyond depth is bounded.
        assert_eq!(q.evict_oldest(100), 9);
    }

    #[test]
    fn pop_timeout_waits_for_writer() {
        let q = Arc::new(FrameQueue::new(60));
        let writer = q.clone();
        let t = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(5));
            writer.push(frame(42));
        });

        let got = q.pop_timeout(Duration::from_millis(500));
        t.join().unwrap();
        assert_eq!(got.unwrap()[0], 42);
    }

    #[test]
    fn pop_timeout_expires_empty() {
        let q = FrameQueue::new(60);
        let start = Instant::now();
        assert!(q.pop_timeout(Duration::from_millis(20)).is_none());
        assert!(start.elapsed() >= Duration::from_millis(15));
    }

    #[test]
    fn clear_empties() {
        let q = FrameQueue::new(60);
        for i in 0..10 {
            q.push(frame(i));
        }
        assert_eq!(q.clear(), 10);
        assert!(q.is_empty());
    }
}
