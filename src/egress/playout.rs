//! Paced playout of queued frames onto the RTP wire.
//!
//! One dedicated thread per call emits exactly one 160-byte frame every
//! 20 ms. Naive `sleep(20ms)` drifts by the scheduler's wake-up error every
//! tick; the loop instead tracks an absolute deadline and waits with a
//! hybrid of sleep-with-slack plus a short spin for the final stretch.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::codec::g711::transcode_alaw_to_ulaw;
use crate::codec::Codec;
use crate::dsp::apply_alaw_gain;
use crate::egress::queue::FrameQueue;
use crate::egress::typing::TypingSound;
use crate::error::BridgeError;
use crate::{Frame, FRAME_INTERVAL_NS};

/// Frames that must be queued before the first playout of a call.
const START_THRESHOLD: usize = 2;

/// Frames that must be queued to resume after an underrun.
const RESUME_THRESHOLD: usize = 1;

/// How long `stop()` waits for the playout thread before leaking it.
const JOIN_DEADLINE: Duration = Duration::from_millis(500);

/// Destination for paced frames. The RTP sender is the production sink;
/// tests substitute collectors.
pub trait FrameSink: Send {
    fn send(&mut self, frame: &Frame);
}

impl FrameSink for crate::rtp::RtpSender {
    fn send(&mut self, frame: &Frame) {
        self.send_frame(frame);
    }
}

/// Observer invoked with each real audio frame just before the sink.
pub type FrameObserver = Box<dyn Fn(&Frame) + Send>;

/// Callback fired on the Playing -> Buffering transition.
pub type QueueEmptyCallback = Box<dyn Fn() + Send>;

/// Playout statistics (lock-free atomic updates).
#[derive(Default)]
pub struct PlayoutStats {
    pub ticks: AtomicU64,
    pub frames_played: AtomicU64,
    pub comfort_frames: AtomicU64,
    pub underruns: AtomicU64,
}

/// Playout tuning for one call.
#[derive(Clone)]
pub struct PlayoutConfig {
    /// Wire codec; frames are A-law internally and transcode on a PCMU call.
    pub codec: Codec,
    /// Post-gain applied to dequeued frames.
    pub gain: f32,
    /// Typing-sound comfort fill instead of plain silence.
    pub typing_sounds: bool,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum PlayState {
    Buffering,
    Playing,
}

/// The paced playout loop for one call.
///
/// Owns the consumer side of the frame queue and the RTP send path.
pub struct PlayoutEngine {
    queue: Arc<FrameQueue>,
    config: PlayoutConfig,
    running: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
    /// Set by `clear()`; the loop re-enters Buffering and drops its sticky
    /// state on the next tick.
    reset_requested: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    stats: Arc<PlayoutStats>,
}

impl PlayoutEngine {
    pub fn new(queue: Arc<FrameQueue>, config: PlayoutConfig) -> Self {
        Self {
            queue,
            config,
            running: Arc::new(AtomicBool::new(false)),
            finished: Arc::new(AtomicBool::new(false)),
            reset_requested: Arc::new(AtomicBool::new(false)),
            thread: None,
            stats: Arc::new(PlayoutStats::default()),
        }
    }

    /// Spawn the playout thread. No-op if already running.
    pub fn start(
        &mut self,
        sink: Box<dyn FrameSink>,
        observers: Vec<FrameObserver>,
        on_queue_empty: QueueEmptyCallback,
    ) -> Result<(), BridgeError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.finished.store(false, Ordering::SeqCst);
        self.reset_requested.store(false, Ordering::SeqCst);

        let ctx = LoopContext {
            queue: self.queue.clone(),
            config: self.config.clone(),
            running: self.running.clone(),
            finished: self.finished.clone(),
            reset_requested: self.reset_requested.clone(),
            stats: self.stats.clone(),
            sink,
            observers,
            on_queue_empty,
        };

        let handle = thread::Builder::new()
            .name("playout".to_string())
            .spawn(move || playout_loop(ctx))
            .map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                BridgeError::ThreadSpawn {
                    name: "playout",
                    source: e,
                }
            })?;
        self.thread = Some(handle);
        Ok(())
    }

    /// Drop all queued audio and return to Buffering (barge-in).
    pub fn clear(&self) {
        let dropped = self.queue.clear();
        self.reset_requested.store(true, Ordering::SeqCst);
        if dropped > 0 {
            log::debug!("playout cleared, {} frames dropped", dropped);
        }
    }

    /// Stop the loop and join the thread with a deadline.
    ///
    /// If the thread fails to exit within 500 ms the handle is dropped and
    /// the thread leaks; teardown must not hang the call.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);

        let Some(handle) = self.thread.take() else {
            return;
        };

        let deadline = Instant::now() + JOIN_DEADLINE;
        while !self.finished.load(Ordering::SeqCst) {
            if Instant::now() >= deadline {
                log::warn!("playout thread did not exit within 500 ms, leaking");
                return;
            }
            thread::sleep(Duration::from_millis(5));
        }
        let _ = handle.join();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Statistics handle.
    pub fn stats(&self) -> Arc<PlayoutStats> {
        self.stats.clone()
    }
}

impl Drop for PlayoutEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

struct LoopContext {
    queue: Arc<FrameQueue>,
    config: PlayoutConfig,
    running: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
    reset_requested: Arc<AtomicBool>,
    stats: Arc<PlayoutStats>,
    sink: Box<dyn FrameSink>,
    observers: Vec<FrameObserver>,
    on_queue_empty: QueueEmptyCallback,
}

fn playout_loop(mut ctx: LoopContext) {
    raise_thread_priority();

    let interval = Duration::from_nanos(FRAME_INTERVAL_NS);
    let mut typing = ctx
        .config
        .typing_sounds
        .then(|| TypingSound::new(ctx.config.codec));
    let mut state = PlayState::Buffering;
    let mut has_played = false;
    let mut next_tick = Instant::now();

    while ctx.running.load(Ordering::SeqCst) {
        wait_until(next_tick, &ctx.running);
        if !ctx.running.load(Ordering::SeqCst) {
            break;
        }
        ctx.stats.ticks.fetch_add(1, Ordering::Relaxed);

        if ctx.reset_requested.swap(false, Ordering::SeqCst) {
            state = PlayState::Buffering;
            has_played = false;
            if let Some(t) = typing.as_mut() {
                t.reset();
            }
        }

        if state == PlayState::Buffering {
            let threshold = if has_played {
                RESUME_THRESHOLD
            } else {
                START_THRESHOLD
            };
            if ctx.queue.len() >= threshold {
                state = PlayState::Playing;
            }
        }

        match state {
            PlayState::Playing => {
                // The frame is normally already queued; the short grace
                // covers a producer racing this tick.
                match ctx.queue.pop_timeout(Duration::from_millis(1)) {
                    Some(mut frame) => {
                        apply_alaw_gain(&mut frame, ctx.config.gain);
                        for obs in &ctx.observers {
                            obs(&frame);
                        }
                        if ctx.config.codec == Codec::Ulaw {
                            transcode_alaw_to_ulaw(&mut frame);
                        }
                        ctx.sink.send(&frame);
                        has_played = true;
                        ctx.stats.frames_played.fetch_add(1, Ordering::Relaxed);
                    }
                    None => {
                        // Ran dry: back to Buffering, tell the watchdog, and
                        // keep the wire alive with silence this tick.
                        state = PlayState::Buffering;
                        ctx.stats.underruns.fetch_add(1, Ordering::Relaxed);
                        ctx.sink.send(&ctx.config.codec.silence_frame());
                        ctx.stats.comfort_frames.fetch_add(1, Ordering::Relaxed);
                        (ctx.on_queue_empty)();
                    }
                }
            }
            PlayState::Buffering => {
                let frame = match typing.as_mut() {
                    Some(t) => t.next_frame(),
                    None => ctx.config.codec.silence_frame(),
                };
                ctx.sink.send(&frame);
                ctx.stats.comfort_frames.fetch_add(1, Ordering::Relaxed);
            }
        }

        next_tick += interval;

        // Re-base if the loop fell a full interval behind (debugger pause,
        // scheduler stall); cadence resumes from now instead of bursting.
        let now = Instant::now();
        if now > next_tick + interval {
            next_tick = now + interval;
        }
    }

    ctx.finished.store(true, Ordering::SeqCst);
}

/// Hybrid wait: sleep with 1 ms slack, spin the remainder.
fn wait_until(deadline: Instant, running: &AtomicBool) {
    let now = Instant::now();
    if deadline <= now {
        return;
    }
    let wait = deadline - now;
    if wait > Duration::from_millis(2) {
        thread::sleep(wait - Duration::from_millis(1));
    }
    while Instant::now() < deadline {
        if !running.load(Ordering::Relaxed) {
            return;
        }
        std::hint::spin_loop();
    }
}

/// Raise the current thread to real-time-ish priority, best effort.
fn raise_thread_priority() {
    #[cfg(windows)]
    {
        use windows_sys::Win32::System::Threading::{
            GetCurrentThread, SetThreadPriority, THREAD_PRIORITY_TIME_CRITICAL,
        };
        unsafe {
            SetThreadPriority(GetCurrentThread(), THREAD_PRIORITY_TIME_CRITICAL);
        }
    }
    #[cfg(unix)]
    {
        unsafe {
            let mut param: libc::sched_param = std::mem::zeroed();
            param.sched_priority = 10;
            // Needs privileges on most systems; silently stays best-effort.
            libc::pthread_setschedparam(libc::pthread_self(), libc::SCHED_FIFO, &param);
        }
    }
}
