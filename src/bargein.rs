//! Half-duplex state tracking and playout-complete signalling.
//!
//! While the bot is audible on the caller's side, low-energy uplink audio is
//! almost always echo or room tone; the gate lets the ingress path suppress
//! it without blocking genuine interruptions. The watchdog resolves the
//! ordering race between "the AI finished generating" and "the caller heard
//! the last frame" so the AI gets exactly one turn-over signal per response.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::time::Instant;

use lazy_static::lazy_static;

/// How long after the bot's audio drains the gate still treats the line as
/// bot-occupied, covering the acoustic tail re-arriving on the uplink.
const ECHO_TAIL_MS: u64 = 300;

lazy_static! {
    /// Process epoch for the gate's millisecond stamps.
    static ref EPOCH: Instant = Instant::now();
}

fn now_ms() -> u64 {
    EPOCH.elapsed().as_millis() as u64
}

/// Who currently holds the floor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BargeInState {
    /// The line is the caller's.
    Idle = 0,
    /// Bot audio is queued or playing.
    BotSpeaking = 1,
    /// Bot audio drained less than 300 ms ago.
    BotSpeakingRecently = 2,
}

/// Lock-free half-duplex gate shared by ingress, egress, and playout.
///
/// All state lives in atomics; the 300 ms tail is evaluated lazily against
/// the stamp instead of running a timer thread.
pub struct BargeInGate {
    state: AtomicU8,
    /// When the bot stopped speaking, in ms since process epoch.
    stopped_at_ms: AtomicU64,
    /// Set by the AI's response_done; queue drain completes the transition.
    response_done: AtomicBool,
}

impl BargeInGate {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(BargeInState::Idle as u8),
            stopped_at_ms: AtomicU64::new(0),
            response_done: AtomicBool::new(false),
        }
    }

    /// Egress queued a bot frame.
    pub fn note_bot_audio(&self) {
        self.response_done.store(false, Ordering::SeqCst);
        self.state
            .store(BargeInState::BotSpeaking as u8, Ordering::SeqCst);
    }

    /// The AI finished generating the current response.
    pub fn note_response_done(&self) {
        self.response_done.store(true, Ordering::SeqCst);
    }

    /// The playout queue drained. Moves into the echo tail only once the AI
    /// has also signalled response completion; a mid-response underrun keeps
    /// the bot "speaking".
    pub fn note_queue_empty(&self) {
        if !self.response_done.load(Ordering::SeqCst) {
            return;
        }
        let was = self.state.compare_exchange(
            BargeInState::BotSpeaking as u8,
            BargeInState::BotSpeakingRecently as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
        if was.is_ok() {
            self.stopped_at_ms.store(now_ms(), Ordering::SeqCst);
        }
    }

    /// The caller barged in: the floor is theirs immediately.
    pub fn force_idle(&self) {
        self.state.store(BargeInState::Idle as u8, Ordering::SeqCst);
    }

    /// Current state, with the lazy tail expiry applied.
    pub fn state(&self) -> BargeInState {
        match self.state.load(Ordering::SeqCst) {
            s if s == BargeInState::BotSpeaking as u8 => BargeInState::BotSpeaking,
            s if s == BargeInState::BotSpeakingRecently as u8 => {
                let stopped = self.stopped_at_ms.load(Ordering::SeqCst);
                if now_ms().saturating_sub(stopped) >= ECHO_TAIL_MS {
                    // Tail elapsed; fold to Idle for this and future reads.
                    let _ = self.state.compare_exchange(
                        BargeInState::BotSpeakingRecently as u8,
                        BargeInState::Idle as u8,
                        Ordering::SeqCst,
                        Ordering::SeqCst,
                    );
                    BargeInState::Idle
                } else {
                    BargeInState::BotSpeakingRecently
                }
            }
            _ => BargeInState::Idle,
        }
    }

    /// Whether the soft-gate should screen low-energy uplink audio.
    pub fn is_gating(&self) -> bool {
        !matches!(self.state(), BargeInState::Idle)
    }
}

impl Default for BargeInGate {
    fn default() -> Self {
        Self::new()
    }
}

/// Fires `notify` exactly once per response, strictly after both
/// `response_done` and the queue drain have happened.
pub struct PlayoutWatchdog {
    /// Armed by response_done while audio is still queued.
    pending: AtomicBool,
    notify: Box<dyn Fn() + Send + Sync>,
}

impl PlayoutWatchdog {
    pub fn new(notify: Box<dyn Fn() + Send + Sync>) -> Self {
        Self {
            pending: AtomicBool::new(false),
            notify,
        }
    }

    /// AI signalled response completion. `queue_empty` is the playout
    /// queue's state at this moment: if the caller has already heard
    /// everything, notify now; otherwise arm for the coming drain.
    pub fn on_response_done(&self, queue_empty: bool) {
        if queue_empty {
            self.pending.store(false, Ordering::SeqCst);
            (self.notify)();
        } else {
            self.pending.store(true, Ordering::SeqCst);
        }
    }

    /// Playout drained. Fires the armed notification, if any.
    pub fn on_queue_empty(&self) {
        if self.pending.swap(false, Ordering::SeqCst) {
            (self.notify)();
        }
    }

    /// Barge-in cancels any armed notification; the interrupted response
    /// never completes from the caller's point of view.
    pub fn cancel(&self) {
        self.pending.store(false, Ordering::SeqCst);
    }
}
