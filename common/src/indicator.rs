//! Status LED state machine.
//!
//! The LED is either steady (`On`/`Off`) or running one blink pattern on top
//! of a remembered steady state. Each blink gets a [`BlinkToken`]; only the
//! holder of the current token may end the blink, so a superseded timer
//! cannot clobber a newer pattern.
//!
//! | Pattern      | Waveform                                     |
//! |--------------|----------------------------------------------|
//! | BlinkSlow    | 50% square wave at the slow period           |
//! | BlinkFast    | 50% square wave at the fast period           |
//! | DoubleBlink  | two fast flashes, then dark for the slow period |

use serde::Serialize;

use crate::types::LedState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonEvent {
    Pairing,
    CycleReview,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlinkToken(u64);

#[derive(Debug, Clone, Copy)]
pub struct BlinkTiming {
    pub slow_period_ms: u32,
    pub fast_period_ms: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct Indicator {
    #[serde(rename = "ledState")]
    state: LedState,
    #[serde(rename = "steadyState")]
    steady: LedState,
    #[serde(rename = "stopBlinkingRequested")]
    stop_requested: bool,
    #[serde(skip)]
    generation: u64,
}

impl Default for Indicator {
    fn default() -> Self {
        Self::new()
    }
}

impl Indicator {
    /// Boots lit, to show the process is alive.
    pub fn new() -> Self {
        Self {
            state: LedState::On,
            steady: LedState::On,
            stop_requested: false,
            generation: 0,
        }
    }

    pub fn state(&self) -> LedState {
        self.state
    }

    pub fn steady(&self) -> LedState {
        self.steady
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested
    }

    /// Changes the steady state. A running blink keeps going and restores to
    /// the new value when it ends.
    pub fn set_steady(&mut self, on: bool) {
        self.steady = if on { LedState::On } else { LedState::Off };
        if !self.state.is_blinking() {
            self.state = self.steady;
        }
    }

    pub fn start_blink(&mut self, pattern: LedState) -> BlinkToken {
        self.generation = self.generation.wrapping_add(1);
        self.stop_requested = false;
        if pattern.is_blinking() {
            self.state = pattern;
        } else {
            self.set_steady(pattern == LedState::On);
            self.state = self.steady;
        }
        BlinkToken(self.generation)
    }

    pub fn request_stop(&mut self) {
        if self.state.is_blinking() {
            self.stop_requested = true;
        }
    }

    pub fn is_current(&self, token: BlinkToken) -> bool {
        token.0 == self.generation && self.state.is_blinking()
    }

    /// Ends the blink identified by `token` and restores the steady state.
    /// Returns false when the token was superseded.
    pub fn finish_blink(&mut self, token: BlinkToken) -> bool {
        if !self.is_current(token) {
            return false;
        }
        self.state = self.steady;
        self.stop_requested = false;
        true
    }

    /// Invalidates any running blink and drives the LED dark.
    pub fn shutdown(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        self.steady = LedState::Off;
        self.state = LedState::Off;
        self.stop_requested = false;
    }

    /// Output level of the current state, `phase_ms` into the pattern.
    pub fn level(&self, phase_ms: u64, timing: BlinkTiming) -> bool {
        pattern_level(self.state, phase_ms, timing)
    }
}

pub fn pattern_level(state: LedState, phase_ms: u64, timing: BlinkTiming) -> bool {
    let slow = timing.slow_period_ms.max(2) as u64;
    let fast = timing.fast_period_ms.max(2) as u64;

    match state {
        LedState::Off => false,
        LedState::On => true,
        LedState::BlinkSlow => phase_ms % slow < slow / 2,
        LedState::BlinkFast => phase_ms % fast < fast / 2,
        LedState::DoubleBlink => {
            let cycle = slow + 2 * fast;
            let phase = phase_ms % cycle;
            phase < 2 * fast && phase % fast < fast / 2
        }
    }
}
