//! Timing engine: frequency to period mapping and recurring tick scheduling.
//!
//! Two strategies share the [`TimingEngine`] contract:
//!
//! - [`CoarseTimer`] works in whole system ticks (`tick_hz` per second). It
//!   clamps requests above `tick_hz` and rearms from the instant each tick
//!   fires, like a jiffy timer.
//! - [`FineTimer`] works in microseconds and forwards a monotonic interval by
//!   whole periods, skipping slots it missed.
//!
//! The strategy is chosen once per [`crate::Registry`] through
//! [`TimingConfig`] and never swapped at runtime.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, warn};

/// Typical kernel HZ.
pub const DEFAULT_TICK_HZ: u32 = 250;

pub const MICROS_PER_SEC: u32 = 1_000_000;

const NANOS_PER_SEC: u64 = 1_000_000_000;

/// Highest accepted system tick rate for the coarse strategy.
pub const MAX_TICK_HZ: u32 = MICROS_PER_SEC;

/// Highest frequency the fine strategy schedules: one slot per microsecond.
pub const FINE_MAX_FREQUENCY_HZ: u32 = MICROS_PER_SEC;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimingStrategy {
    Coarse,
    Fine,
}

impl Default for TimingStrategy {
    fn default() -> Self {
        if cfg!(feature = "fine-timing") {
            TimingStrategy::Fine
        } else {
            TimingStrategy::Coarse
        }
    }
}

impl core::str::FromStr for TimingStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "coarse" => Ok(TimingStrategy::Coarse),
            "fine" => Ok(TimingStrategy::Fine),
            other => Err(format!("unknown timing strategy '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub strategy: TimingStrategy,
    /// System ticks per second for the coarse strategy.
    pub tick_hz: u32,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            strategy: TimingStrategy::default(),
            tick_hz: DEFAULT_TICK_HZ,
        }
    }
}

impl TimingConfig {
    pub fn coarse(tick_hz: u32) -> Self {
        Self { strategy: TimingStrategy::Coarse, tick_hz }
    }

    pub fn fine() -> Self {
        Self { strategy: TimingStrategy::Fine, tick_hz: DEFAULT_TICK_HZ }
    }

    /// Build one engine instance; every line gets its own.
    pub fn build_engine(&self, runtime: Option<Handle>) -> Box<dyn TimingEngine> {
        match self.strategy {
            TimingStrategy::Coarse => Box::new(CoarseTimer::new(self.tick_hz, runtime)),
            TimingStrategy::Fine => Box::new(FineTimer::new(runtime)),
        }
    }
}

/// Result of mapping a requested frequency onto a strategy's resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeriodMapping {
    /// Frequency actually applied, after clamping.
    pub frequency: u32,
    /// Length of one time slot; zero means no periodic timer.
    pub period: Duration,
    /// The request exceeded what the strategy can schedule.
    pub clamped: bool,
}

impl PeriodMapping {
    const STATIC: PeriodMapping = PeriodMapping {
        frequency: 0,
        period: Duration::ZERO,
        clamped: false,
    };

    pub fn is_static(&self) -> bool {
        self.period.is_zero()
    }
}

/// Period in whole system ticks: `round(tick_hz / frequency)`, at least one tick.
pub fn coarse_period(tick_hz: u32, frequency: u32) -> PeriodMapping {
    if frequency == 0 || tick_hz == 0 {
        return PeriodMapping::STATIC;
    }

    let clamped = frequency > tick_hz;
    let effective = frequency.min(tick_hz);
    let (hz, eff) = (u64::from(tick_hz), u64::from(effective));
    let ticks = ((hz + eff / 2) / eff).max(1);
    let nanos = (ticks * NANOS_PER_SEC / hz).max(1);

    PeriodMapping {
        frequency: effective,
        period: Duration::from_nanos(nanos),
        clamped,
    }
}

/// Period in microseconds: `1_000_000 / frequency`.
pub fn fine_period(frequency: u32) -> PeriodMapping {
    if frequency == 0 {
        return PeriodMapping::STATIC;
    }

    let clamped = frequency > FINE_MAX_FREQUENCY_HZ;
    let effective = frequency.min(FINE_MAX_FREQUENCY_HZ);

    PeriodMapping {
        frequency: effective,
        period: Duration::from_micros(u64::from(MICROS_PER_SEC / effective)),
        clamped,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Continue,
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirstTick {
    /// Fire as soon as the timer task runs.
    Immediate,
    /// Wait one full period first.
    AfterPeriod,
}

/// Callback run on every tick; returning [`TickOutcome::Stop`] lets the timer lapse.
pub type TickHandler = Arc<dyn Fn() -> TickOutcome + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TimerError {
    #[error("no async runtime available to run the timer")]
    NoRuntime,
    #[error("cannot arm a periodic timer with a zero period")]
    ZeroPeriod,
}

/// Recurring tick scheduler owned by exactly one line.
pub trait TimingEngine: Send {
    fn strategy(&self) -> TimingStrategy;

    /// Map a requested frequency onto this engine's resolution.
    fn period_for(&self, frequency: u32) -> PeriodMapping;

    /// Start calling `handler` every `period`, replacing any previous arming.
    ///
    /// # Errors
    ///
    /// Returns [`TimerError`] if the timer cannot be scheduled; any previous
    /// arming is cancelled regardless.
    fn arm(&mut self, period: Duration, first: FirstTick, handler: TickHandler) -> Result<(), TimerError>;

    /// Stop the timer. Calling this on a disarmed timer does nothing.
    fn cancel(&mut self);

    fn is_armed(&self) -> bool;
}

#[derive(Debug, Default)]
struct TimerTask {
    runtime: Option<Handle>,
    task: Option<JoinHandle<()>>,
}

impl TimerTask {
    fn new(runtime: Option<Handle>) -> Self {
        Self { runtime, task: None }
    }

    fn runtime(&self) -> Result<Handle, TimerError> {
        self.runtime
            .clone()
            .or_else(|| Handle::try_current().ok())
            .ok_or(TimerError::NoRuntime)
    }

    fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    fn is_armed(&self) -> bool {
        self.task.as_ref().map_or(false, |task| !task.is_finished())
    }
}

impl Drop for TimerTask {
    fn drop(&mut self) {
        self.cancel();
    }
}

fn first_deadline(first: FirstTick, period: Duration) -> Instant {
    let now = Instant::now();
    match first {
        FirstTick::Immediate => now,
        FirstTick::AfterPeriod => now + period,
    }
}

/// Tick-granular timer that rearms itself before doing any work.
#[derive(Debug)]
pub struct CoarseTimer {
    tick_hz: u32,
    timer: TimerTask,
}

impl CoarseTimer {
    pub fn new(tick_hz: u32, runtime: Option<Handle>) -> Self {
        Self {
            tick_hz,
            timer: TimerTask::new(runtime),
        }
    }

    pub fn tick_hz(&self) -> u32 {
        self.tick_hz
    }
}

impl TimingEngine for CoarseTimer {
    fn strategy(&self) -> TimingStrategy {
        TimingStrategy::Coarse
    }

    fn period_for(&self, frequency: u32) -> PeriodMapping {
        coarse_period(self.tick_hz, frequency)
    }

    fn arm(&mut self, period: Duration, first: FirstTick, handler: TickHandler) -> Result<(), TimerError> {
        self.timer.cancel();
        if period.is_zero() {
            return Err(TimerError::ZeroPeriod);
        }
        let runtime = self.timer.runtime()?;

        debug!("arming coarse timer: period {:?}, first tick {:?}", period, first);
        self.timer.task = Some(runtime.spawn(async move {
            let mut deadline = first_deadline(first, period);
            loop {
                time::sleep_until(deadline).await;

                // next slot is measured from the moment this one fired
                let rearmed = match Instant::now().checked_add(period) {
                    Some(next) => {
                        deadline = next;
                        true
                    }
                    None => {
                        warn!("failed to rearm coarse timer (period {:?})", period);
                        false
                    }
                };

                if handler() == TickOutcome::Stop || !rearmed {
                    break;
                }
            }
        }));

        Ok(())
    }

    fn cancel(&mut self) {
        self.timer.cancel();
    }

    fn is_armed(&self) -> bool {
        self.timer.is_armed()
    }
}

/// Microsecond-resolution timer forwarding by whole periods.
#[derive(Debug)]
pub struct FineTimer {
    timer: TimerTask,
}

impl FineTimer {
    pub fn new(runtime: Option<Handle>) -> Self {
        Self {
            timer: TimerTask::new(runtime),
        }
    }
}

impl TimingEngine for FineTimer {
    fn strategy(&self) -> TimingStrategy {
        TimingStrategy::Fine
    }

    fn period_for(&self, frequency: u32) -> PeriodMapping {
        fine_period(frequency)
    }

    fn arm(&mut self, period: Duration, first: FirstTick, handler: TickHandler) -> Result<(), TimerError> {
        self.timer.cancel();
        if period.is_zero() {
            return Err(TimerError::ZeroPeriod);
        }
        let runtime = self.timer.runtime()?;

        debug!("arming fine timer: period {:?}, first tick {:?}", period, first);
        self.timer.task = Some(runtime.spawn(async move {
            let mut interval = time::interval_at(first_deadline(first, period), period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                if handler() == TickOutcome::Stop {
                    break;
                }
            }
        }));

        Ok(())
    }

    fn cancel(&mut self) {
        self.timer.cancel();
    }

    fn is_armed(&self) -> bool {
        self.timer.is_armed()
    }
}
