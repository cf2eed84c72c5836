use std::time::{Duration, Instant};

/// Which producer currently drives the experience. Exactly one is active at
/// any moment; the intro's one-way latch decides which.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProgressSource {
    Intro(f32),
    Scroll(f32),
}

impl ProgressSource {
    pub fn value(self) -> f32 {
        match self {
            Self::Intro(value) | Self::Scroll(value) => value,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum IntroState {
    NotStarted,
    Running { started_at: Instant },
    Done,
}

/// One-shot timed ramp from 0 to 1. NotStarted -> Running fires once, when
/// preloading first reports ready; Running -> Done latches permanently and
/// hands control to scroll progress for the rest of the session.
#[derive(Debug)]
pub struct IntroSequencer {
    duration: Duration,
    state: IntroState,
}

impl IntroSequencer {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            state: IntroState::NotStarted,
        }
    }

    /// No-op unless the sequencer has never run.
    pub fn start(&mut self, now: Instant) {
        if matches!(self.state, IntroState::NotStarted) {
            self.state = IntroState::Running { started_at: now };
        }
    }

    pub fn tick(&mut self, now: Instant) {
        if let IntroState::Running { started_at } = self.state {
            if now.saturating_duration_since(started_at) >= self.duration {
                self.state = IntroState::Done;
            }
        }
    }

    pub fn has_started(&self) -> bool {
        !matches!(self.state, IntroState::NotStarted)
    }

    pub fn is_done(&self) -> bool {
        matches!(self.state, IntroState::Done)
    }

    /// 0 before start, elapsed/duration while running, exactly 1 once done.
    pub fn progress(&self, now: Instant) -> f32 {
        match self.state {
            IntroState::NotStarted => 0.0,
            IntroState::Running { started_at } => {
                let elapsed = now.saturating_duration_since(started_at).as_secs_f32();
                (elapsed / self.duration.as_secs_f32()).clamp(0.0, 1.0)
            }
            IntroState::Done => 1.0,
        }
    }

    /// The per-tick selection: intro progress until the latch flips, external
    /// scroll progress forever after.
    pub fn select(&self, now: Instant, scroll_progress: f32) -> ProgressSource {
        if self.is_done() {
            ProgressSource::Scroll(scroll_progress)
        } else {
            ProgressSource::Intro(self.progress(now))
        }
    }
}

/// Maps active progress to a frame index: `min(n-1, floor(active * (n-1)))`,
/// tolerating out-of-range and non-finite input by clamping into [0, n-1].
pub fn frame_index_for(active: f32, frame_count: usize) -> usize {
    if frame_count <= 1 {
        return 0;
    }
    let clamped = if active.is_finite() {
        active.clamp(0.0, 1.0)
    } else if active == f32::INFINITY {
        1.0
    } else {
        0.0
    };
    let last = frame_count - 1;
    ((clamped * last as f32).floor() as usize).min(last)
}
