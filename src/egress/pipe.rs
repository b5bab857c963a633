//! Egress pipe: lifecycle orchestration of accumulator, queue, and playout.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::codec::{Codec, ALAW_SILENCE};
use crate::config::BridgeConfig;
use crate::egress::accumulator::FrameAccumulator;
use crate::egress::pcm::PcmStage;
use crate::egress::playout::{
    FrameObserver, FrameSink, PlayoutConfig, PlayoutEngine, QueueEmptyCallback,
};
use crate::egress::queue::FrameQueue;
use crate::error::BridgeError;

/// What the AI emits on this call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    /// G.711-ready A-law bytes; pushed straight through the accumulator.
    Alaw,
    /// Raw PCM16 at 24 kHz; converted by the PCM stage first.
    Pcm,
}

/// Pipe statistics (lock-free atomic updates).
#[derive(Default)]
pub struct EgressStats {
    pub chunks_in: AtomicU64,
    pub frames_queued: AtomicU64,
    /// Latency-clamp activations (not individual frames).
    pub clamp_events: AtomicU64,
    /// Pushes dropped: not started, or PCM stage rejection.
    pub discarded_pushes: AtomicU64,
}

/// Hook invoked when a push queued at least one frame (drives the barge-in
/// gate's BotSpeaking edge).
pub type FrameQueuedHook = Box<dyn Fn() + Send + Sync>;

/// AI -> caller pipeline for one call.
///
/// Sole writer to the accumulator and sole producer into the frame queue;
/// the playout engine inside owns the consumer side. All public entry
/// points are safe before start and after stop.
pub struct EgressPipe {
    mode: InputMode,
    codec: Codec,
    drop_batch: usize,
    clamp_high_water: usize,
    started: AtomicBool,
    accumulator: Mutex<FrameAccumulator>,
    pcm: Mutex<PcmStage>,
    queue: Arc<FrameQueue>,
    playout: Mutex<PlayoutEngine>,
    /// Registered before start; handed to the playout thread on start.
    pending_observers: Mutex<Vec<FrameObserver>>,
    on_frame_queued: Mutex<Option<FrameQueuedHook>>,
    stats: Arc<EgressStats>,
}

impl EgressPipe {
    pub fn new(config: &BridgeConfig, codec: Codec, mode: InputMode) -> Self {
        let queue = Arc::new(FrameQueue::new(config.queue_capacity()));
        let playout = PlayoutEngine::new(
            queue.clone(),
            PlayoutConfig {
                codec,
                gain: config.alaw_gain,
                typing_sounds: config.typing_sounds,
            },
        );
        Self {
            mode,
            codec,
            drop_batch: config.drop_batch,
            clamp_high_water: config.clamp_high_water(),
            started: AtomicBool::new(false),
            accumulator: Mutex::new(FrameAccumulator::new()),
            pcm: Mutex::new(PcmStage::new(config.effective_thinning_alpha())),
            queue,
            playout: Mutex::new(playout),
            pending_observers: Mutex::new(Vec::new()),
            on_frame_queued: Mutex::new(None),
            stats: Arc::new(EgressStats::default()),
        }
    }

    /// Register an observer for each frame just before the playout sink.
    /// Must be called before `start`.
    pub fn add_frame_observer(&self, observer: FrameObserver) {
        self.pending_observers.lock().push(observer);
    }

    /// Register the frame-queued hook. Must be called before `start`.
    pub fn set_frame_queued_hook(&self, hook: FrameQueuedHook) {
        *self.on_frame_queued.lock() = Some(hook);
    }

    /// Reset conversion state and spawn the playout thread.
    ///
    /// Idempotent: a second start while running is a no-op.
    pub fn start(
        &self,
        sink: Box<dyn FrameSink>,
        on_queue_empty: QueueEmptyCallback,
    ) -> Result<(), BridgeError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.accumulator.lock().clear();
        self.pcm.lock().reset();

        let observers = std::mem::take(&mut *self.pending_observers.lock());
        let result = self.playout.lock().start(sink, observers, on_queue_empty);
        if result.is_err() {
            self.started.store(false, Ordering::SeqCst);
        }
        result
    }

    /// Cancel playout (500 ms join deadline), drop buffered state, drain the
    /// queue. Idempotent.
    pub fn stop(&self) {
        if !self.started.swap(false, Ordering::SeqCst) {
            return;
        }
        self.playout.lock().stop();
        self.accumulator.lock().clear();
        self.queue.clear();
    }

    /// Push an audio chunk in the configured input mode.
    pub fn push(&self, bytes: &[u8]) {
        match self.mode {
            InputMode::Alaw => self.push_alaw(bytes),
            InputMode::Pcm => self.push_pcm(bytes),
        }
    }

    /// Push G.711 A-law bytes from the AI.
    ///
    /// Pushes before start (or after stop) are discarded silently.
    pub fn push_alaw(&self, bytes: &[u8]) {
        if !self.started.load(Ordering::SeqCst) {
            self.stats.discarded_pushes.fetch_add(1, Ordering::Relaxed);
            return;
        }
        self.stats.chunks_in.fetch_add(1, Ordering::Relaxed);

        let queued = {
            let mut acc = self.accumulator.lock();
            acc.accumulate(bytes, |frame| {
                self.queue.push(frame);
            })
        };

        if queued > 0 {
            self.stats
                .frames_queued
                .fetch_add(queued as u64, Ordering::Relaxed);
            if let Some(hook) = self.on_frame_queued.lock().as_ref() {
                hook();
            }
        }

        // Latency clamp: a producer running faster than real time gets its
        // oldest audio evicted in batches, keeping the caller current.
        if self.queue.len() > self.clamp_high_water {
            let evicted = self.queue.evict_oldest(self.drop_batch);
            self.stats.clamp_events.fetch_add(1, Ordering::Relaxed);
            log::warn!(
                "egress queue above {} frames, dropped {} oldest",
                self.clamp_high_water,
                evicted
            );
        }
    }

    /// Push PCM16 24 kHz bytes from the AI.
    pub fn push_pcm(&self, bytes: &[u8]) {
        if !self.started.load(Ordering::SeqCst) {
            self.stats.discarded_pushes.fetch_add(1, Ordering::Relaxed);
            return;
        }
        let alaw = self.pcm.lock().process(bytes);
        match alaw {
            Some(alaw) => self.push_alaw(&alaw),
            None => {
                self.stats.discarded_pushes.fetch_add(1, Ordering::Relaxed);
                log::warn!("PCM push of {} bytes is not valid PCM16, discarded", bytes.len());
            }
        }
    }

    /// Emit the accumulator's terminal residue as a silence-padded frame.
    ///
    /// Called at response end so the tail of the bot's audio is not held
    /// back waiting for bytes that will never come.
    pub fn flush(&self) {
        if !self.started.load(Ordering::SeqCst) {
            return;
        }
        let emitted = self.accumulator.lock().flush(ALAW_SILENCE, |frame| {
            self.queue.push(frame);
        });
        if emitted {
            self.stats.frames_queued.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Barge-in: drop all pending audio and return playout to buffering.
    pub fn clear(&self) {
        self.accumulator.lock().clear();
        self.pcm.lock().reset();
        self.playout.lock().clear();
    }

    /// Final teardown; safe to call more than once.
    pub fn dispose(&self) {
        self.stop();
        self.pending_observers.lock().clear();
        *self.on_frame_queued.lock() = None;
    }

    /// Current queue depth in frames.
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Whether the playout queue is fully drained.
    pub fn queue_is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Negotiated wire codec.
    pub fn codec(&self) -> Codec {
        self.codec
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Statistics handle.
    pub fn stats(&self) -> Arc<EgressStats> {
        self.stats.clone()
    }

    #[cfg(test)]
    pub(crate) fn queue(&self) -> &Arc<FrameQueue> {
        &self.queue
    }
}

impl Drop for EgressPipe {
    fn drop(&mut self) {
        self.dispose();
    }
}
