/// Clap sequencing state machine
///
/// Turns per-block clap detections into a single "double clap accepted" latch.
/// A double clap is only accepted once the sequence has gone quiet for the
/// maximum window after the second clap; a third clap spoils it.

use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info};

/// Position in the clap-count sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ClapState {
    /// No clap sequence in progress
    Idle,

    /// One clap heard
    FirstClap,

    /// Two claps heard, waiting out the silence window
    SecondClap,

    /// Three or more claps, sequence will be discarded
    ThirdOrHigherClap,
}

impl fmt::Display for ClapState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ClapState::Idle => "IDLE",
            ClapState::FirstClap => "FIRST_CLAP",
            ClapState::SecondClap => "SECOND_CLAP",
            ClapState::ThirdOrHigherClap => "THIRD_OR_HIGHER_CLAP",
        };
        f.write_str(name)
    }
}

/// Inter-clap timing bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimingWindow {
    /// One window used as the silence timeout; any second clap is accepted
    Single(Duration),

    /// Second clap must come at least `min` after the first; `max` of
    /// silence ends the sequence
    Range { min: Duration, max: Duration },
}

impl TimingWindow {
    /// Silence after the last clap that finalizes a sequence
    pub fn max(&self) -> Duration {
        match *self {
            TimingWindow::Single(window) => window,
            TimingWindow::Range { max, .. } => max,
        }
    }

    /// Minimum gap before a second clap counts, if enforced
    pub fn min(&self) -> Option<Duration> {
        match *self {
            TimingWindow::Single(_) => None,
            TimingWindow::Range { min, .. } => Some(min),
        }
    }
}

/// Clap-count state machine
#[derive(Debug, Clone)]
pub struct ClapSequencer {
    window: TimingWindow,
    state: ClapState,
    last_clap_time: Option<Duration>,
    double_clap_pending: bool,
}

impl ClapSequencer {
    pub fn new(window: TimingWindow) -> Self {
        debug!("Initializing clap sequencer with window: {:?}", window);

        Self {
            window,
            state: ClapState::Idle,
            last_clap_time: None,
            double_clap_pending: false,
        }
    }

    /// Advance the state machine for one processed block.
    ///
    /// Returns the new state if it changed.
    pub fn on_block(&mut self, clap_detected: bool, now: Duration) -> Option<ClapState> {
        if clap_detected {
            let next = self.on_clap(now);
            self.last_clap_time = Some(now);
            return self.update_state(next);
        }

        let last_clap = self.last_clap_time?;
        if now.saturating_sub(last_clap) <= self.window.max() {
            return None;
        }

        match self.state {
            ClapState::Idle => {}
            ClapState::FirstClap => info!("First clap timeout. Reset!"),
            ClapState::SecondClap => {
                info!("Double clap accepted!");
                self.double_clap_pending = true;
            }
            ClapState::ThirdOrHigherClap => info!("Clapping stopped. Reset!"),
        }

        self.update_state(ClapState::Idle)
    }

    fn on_clap(&self, now: Duration) -> ClapState {
        match self.state {
            ClapState::Idle => {
                info!("First clap detected!");
                ClapState::FirstClap
            }
            ClapState::FirstClap => {
                let gap = self.last_clap_time.map(|last| now.saturating_sub(last));
                match (gap, self.window.min()) {
                    (Some(gap), Some(min)) if gap < min => {
                        info!("Second clap too early ({:?}). Reset!", gap);
                        ClapState::Idle
                    }
                    _ => {
                        // Acceptance waits for the absence of a third clap
                        info!("Second clap detected!");
                        ClapState::SecondClap
                    }
                }
            }
            ClapState::SecondClap => {
                info!("Higher clap detected!");
                ClapState::ThirdOrHigherClap
            }
            ClapState::ThirdOrHigherClap => ClapState::ThirdOrHigherClap,
        }
    }

    fn update_state(&mut self, next: ClapState) -> Option<ClapState> {
        if self.state == next {
            return None;
        }
        debug!("State: {} -> {}", self.state, next);
        self.state = next;
        Some(next)
    }

    /// Consume the double clap latch
    pub fn take_double_clap(&mut self) -> bool {
        std::mem::take(&mut self.double_clap_pending)
    }

    pub fn is_double_clap_pending(&self) -> bool {
        self.double_clap_pending
    }

    pub fn state(&self) -> ClapState {
        self.state
    }

    pub fn last_clap_time(&self) -> Option<Duration> {
        self.last_clap_time
    }

    pub fn window(&self) -> TimingWindow {
        self.window
    }
}
