//! Pulse state machine.
//!
//! A line alternates between an asserted run of `on_cycles` time slots and a
//! deasserted run of `off_cycles` time slots. [`PulseState::advance`] is
//! called once per timer tick and yields the state for the next slot; the
//! level it carries is what gets sent to the line driver on that tick.
//!
//! The counter holds the number of slots already completed in the current
//! composite period, so the boundary checks compare the value *before* it is
//! incremented. Starting from the post-enable state `(Asserted, 0)` this gives
//! exactly `on_cycles` asserted ticks followed by `off_cycles` deasserted
//! ticks, with no drift between repetitions.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Logic level of a line.
///
/// These are *logic* values. `Asserted` does not necessarily mean a high
/// voltage; an active-low line is driven low when asserted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Level {
    Deasserted,
    Asserted,
}

impl Level {
    pub fn is_asserted(self) -> bool {
        self == Level::Asserted
    }

    /// `1` for asserted, `0` for deasserted.
    pub fn as_bit(self) -> u8 {
        u8::from(self.is_asserted())
    }
}

impl From<bool> for Level {
    fn from(asserted: bool) -> Self {
        if asserted {
            Level::Asserted
        } else {
            Level::Deasserted
        }
    }
}

impl core::fmt::Display for Level {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Level::Deasserted => write!(f, "deasserted"),
            Level::Asserted => write!(f, "asserted"),
        }
    }
}

/// Number of consecutive asserted and deasserted slots in one composite period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PulsePattern {
    pub on_cycles: u32,
    pub off_cycles: u32,
}

impl PulsePattern {
    pub const fn new(on_cycles: u32, off_cycles: u32) -> Self {
        Self { on_cycles, off_cycles }
    }

    /// Length of the composite period in slots.
    pub fn total_cycles(&self) -> u64 {
        u64::from(self.on_cycles) + u64::from(self.off_cycles)
    }

    /// Fraction of the composite period spent asserted, `0.0` for `0/0`.
    pub fn duty_cycle(&self) -> f64 {
        let total = self.total_cycles();
        if total == 0 {
            0.0
        } else {
            f64::from(self.on_cycles) / total as f64
        }
    }

    /// Level a freshly restarted phase begins with.
    pub fn initial_level(&self) -> Level {
        Level::from(self.on_cycles > 0)
    }
}

impl Default for PulsePattern {
    /// Square wave, 50% duty cycle.
    fn default() -> Self {
        Self::new(1, 1)
    }
}

/// Broken invariant detected while advancing the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PulseFault {
    #[error("line deasserted with no off cycles configured (counter {counter}, on_cycles {on_cycles})")]
    DeassertedWithoutOffCycles { counter: u64, on_cycles: u32 },
}

/// Current level and the number of slots completed in the composite period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PulseState {
    pub level: Level,
    pub counter: u64,
}

impl PulseState {
    /// Idle state of a disabled line.
    pub const IDLE: PulseState = PulseState { level: Level::Deasserted, counter: 0 };

    /// State right after the line is enabled: asserted, nothing counted yet.
    pub const START: PulseState = PulseState { level: Level::Asserted, counter: 0 };

    pub const fn new(level: Level, counter: u64) -> Self {
        Self { level, counter }
    }

    /// Compute the state for the next time slot.
    ///
    /// `on_cycles == 0` always yields `(Deasserted, 0)`, which also defines the
    /// degenerate `0/0` pattern as permanently deasserted. With
    /// `off_cycles == 0` the line stays asserted and the counter wraps to 0 at
    /// each boundary.
    ///
    /// # Errors
    ///
    /// Returns [`PulseFault::DeassertedWithoutOffCycles`] if the state is
    /// deasserted while the pattern has no off cycles. That state can only be
    /// produced by a bug; the caller should put the line into a safe state.
    pub fn advance(self, pattern: PulsePattern) -> Result<PulseState, PulseFault> {
        let PulsePattern { on_cycles, off_cycles } = pattern;

        if on_cycles == 0 {
            return Ok(PulseState::new(Level::Deasserted, 0));
        }

        let next = match self.level {
            Level::Asserted => {
                if self.counter >= u64::from(on_cycles) {
                    if off_cycles > 0 {
                        PulseState::new(Level::Deasserted, self.counter + 1)
                    } else {
                        PulseState::new(Level::Asserted, 0)
                    }
                } else {
                    PulseState::new(Level::Asserted, self.counter + 1)
                }
            }
            Level::Deasserted => {
                if off_cycles == 0 {
                    return Err(PulseFault::DeassertedWithoutOffCycles {
                        counter: self.counter,
                        on_cycles,
                    });
                }

                if self.counter >= pattern.total_cycles() {
                    // the flip itself occupies the first asserted slot
                    PulseState::new(Level::Asserted, 1)
                } else {
                    PulseState::new(Level::Deasserted, self.counter + 1)
                }
            }
        };

        Ok(next)
    }
}

impl Default for PulseState {
    fn default() -> Self {
        Self::IDLE
    }
}
